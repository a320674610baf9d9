//! Per-particle state across the run.
//!
//! The table separates two views of the same particles:
//!
//! - the full-length output arrays, one row per originally seeded particle
//!   and one column per output time, which only ever grow values and never
//!   shrink, and
//! - the per-step working set, compacted to the still-active rows before
//!   each advection call.
//!
//! [`ParticleTable::active_batch`] produces the compacted view together
//! with the row mapping needed to scatter engine results back, and
//! [`ParticleTable::carry_forward`] freezes exited rows into new columns so
//! trajectories stay append-only per row.

use ndarray::Array2;

use crate::engine::StepResult;
use crate::types::ParticleStatus;

/// Compacted working set for one advection call.
///
/// `rows` maps each entry back to its row in the full-length arrays.
#[derive(Debug, Clone)]
pub struct ActiveBatch {
    pub rows: Vec<usize>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    /// Accumulated model time per particle at the batch column (s).
    pub t: Vec<f64>,
    /// Transport sums carried into the next engine call, if tracked.
    pub transport: Option<(Vec<f64>, Vec<f64>)>,
}

impl ActiveBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Full-length per-particle state arrays, mutated in place every step.
#[derive(Debug, Clone)]
pub struct ParticleTable {
    /// Grid-index x position, (n_particles, n_columns).
    x: Array2<f64>,
    /// Grid-index y position.
    y: Array2<f64>,
    /// Fractional vertical grid-index position.
    z: Array2<f64>,
    /// Recovered real depth (m); mirrors `z` for isoslice runs.
    zp: Array2<f64>,
    /// Accumulated model time (s), run-relative until finalization.
    t: Array2<f64>,
    status: Vec<ParticleStatus>,
    transport: Option<(Vec<f64>, Vec<f64>)>,
}

impl ParticleTable {
    /// Seed the table: column 0 holds the initial positions, everything
    /// later is NaN until stepped, all particles active, all times zero.
    pub fn seed(
        x0: &[f64],
        y0: &[f64],
        z0: &[f64],
        n_columns: usize,
        track_transport: bool,
    ) -> Self {
        let n = x0.len();
        assert_eq!(n, y0.len());
        assert_eq!(n, z0.len());
        assert!(n_columns >= 1);

        let mut x = Array2::from_elem((n, n_columns), f64::NAN);
        let mut y = x.clone();
        let mut z = x.clone();
        let zp = x.clone();
        let t = Array2::zeros((n, n_columns));
        for p in 0..n {
            x[[p, 0]] = x0[p];
            y[[p, 0]] = y0[p];
            z[[p, 0]] = z0[p];
        }

        Self {
            x,
            y,
            z,
            zp,
            t,
            status: vec![ParticleStatus::Active; n],
            transport: if track_transport {
                Some((vec![0.0; n], vec![0.0; n]))
            } else {
                None
            },
        }
    }

    pub fn n_particles(&self) -> usize {
        self.status.len()
    }

    pub fn n_columns(&self) -> usize {
        self.x.ncols()
    }

    pub fn status(&self) -> &[ParticleStatus] {
        &self.status
    }

    pub fn positions(&self) -> (&Array2<f64>, &Array2<f64>, &Array2<f64>) {
        (&self.x, &self.y, &self.z)
    }

    /// Recovered depth array (the saved vertical coordinate).
    pub fn depths(&self) -> &Array2<f64> {
        &self.zp
    }

    /// Accumulated time array.
    pub fn times(&self) -> &Array2<f64> {
        &self.t
    }

    pub fn transport(&self) -> Option<(&[f64], &[f64])> {
        self.transport
            .as_ref()
            .map(|(u, v)| (u.as_slice(), v.as_slice()))
    }

    /// Set the recovered depth for one column (used for the seed column,
    /// whose depth comes from the initial vertical-edge field).
    pub fn set_depth_column(&mut self, column: usize, depths: &[f64]) {
        assert_eq!(depths.len(), self.n_particles());
        for (p, &d) in depths.iter().enumerate() {
            self.zp[[p, column]] = d;
        }
    }

    /// Compact the still-active rows at the given column for the next
    /// advection call.
    pub fn active_batch(&self, column: usize) -> ActiveBatch {
        let rows: Vec<usize> = (0..self.n_particles())
            .filter(|&p| self.status[p].is_active())
            .collect();
        let gather = |a: &Array2<f64>| rows.iter().map(|&p| a[[p, column]]).collect::<Vec<_>>();
        ActiveBatch {
            x: gather(&self.x),
            y: gather(&self.y),
            z: gather(&self.z),
            t: gather(&self.t),
            transport: self.transport.as_ref().map(|(u, v)| {
                (
                    rows.iter().map(|&p| u[p]).collect(),
                    rows.iter().map(|&p| v[p]).collect(),
                )
            }),
            rows,
        }
    }

    /// Copy exited rows' state at `base_column` into the next `n_out`
    /// columns. Called before scattering so that frozen trajectories stay
    /// filled while active ones are advanced.
    pub fn carry_forward(&mut self, base_column: usize, n_out: usize) {
        for p in 0..self.n_particles() {
            if self.status[p].is_active() {
                continue;
            }
            for c in 1..=n_out {
                self.x[[p, base_column + c]] = self.x[[p, base_column]];
                self.y[[p, base_column + c]] = self.y[[p, base_column]];
                self.z[[p, base_column + c]] = self.z[[p, base_column]];
                self.zp[[p, base_column + c]] = self.zp[[p, base_column]];
                self.t[[p, base_column + c]] = self.t[[p, base_column]];
            }
        }
    }

    /// Fold one advection call's results back into the full-length arrays.
    ///
    /// `rows` is the mapping produced by [`ParticleTable::active_batch`].
    /// Result column c lands in `base_column + 1 + c`. Elapsed times are
    /// added onto each particle's running total at `base_column`, keeping
    /// accumulated time monotone. `depths` carries the recovered real
    /// vertical positions when the run is 3D; without it the fractional
    /// index is stored as the depth too (isoslice case).
    pub fn scatter(
        &mut self,
        rows: &[usize],
        result: &StepResult,
        base_column: usize,
        depths: Option<&Array2<f64>>,
    ) {
        let n_out = result.x.ncols();
        assert_eq!(result.x.nrows(), rows.len());

        for (b, &p) in rows.iter().enumerate() {
            let t_base = self.t[[p, base_column]];
            for c in 0..n_out {
                let col = base_column + 1 + c;
                self.x[[p, col]] = result.x[[b, c]];
                self.y[[p, col]] = result.y[[b, c]];
                self.z[[p, col]] = result.z[[b, c]];
                self.zp[[p, col]] = match depths {
                    Some(d) => d[[b, c]],
                    None => result.z[[b, c]],
                };
                self.t[[p, col]] = t_base + result.elapsed[[b, c]];
            }
            if !result.flags[b].is_active() {
                self.status[p] = ParticleStatus::Exited;
            }
        }

        if let (Some((tu, tv)), Some((ru, rv))) =
            (self.transport.as_mut(), result.transport.as_ref())
        {
            for (b, &p) in rows.iter().enumerate() {
                tu[p] = ru[b];
                tv[p] = rv[b];
            }
        }
    }

    /// Shift every accumulated time by the run's base epoch, turning
    /// run-relative times into absolute ones at finalization.
    pub fn add_epoch(&mut self, epoch: f64) {
        self.t += epoch;
    }
}
