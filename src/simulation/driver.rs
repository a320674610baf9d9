//! The simulation driver.
//!
//! [`Tracker`] owns the run: it seeds the particle table, walks the
//! dataset's time indices, refreshes the two-slot flux buffer, blends
//! sub-step fluxes, hands compacted particle batches to the external
//! advection engine, folds the results back, and finally reassembles the
//! trajectories in the configured output coordinates.
//!
//! Execution is single-threaded and synchronous throughout: one call
//! stack, no suspension, and bit-for-bit reproducible output for identical
//! inputs.

use std::sync::Arc;

use ndarray::Array2;

use crate::engine::{AdvectionEngine, StepInput};
use crate::error::TrackError;
use crate::fields::FluxBuffer;
use crate::grid::{convert_index_convention, interpolate3d, Grid};
use crate::io::{SnapshotError, SnapshotSource};
use crate::particles::ParticleTable;
use crate::types::{IndexConvention, OutputCoords, TimeDirection, VerticalMode};

use super::TrackConfig;

// ============================================================================
// Time index set
// ============================================================================

/// Ordered indices into the dataset's time dimension for one run.
///
/// Strictly monotonic in the run direction, at least two entries (one
/// bounding snapshot pair).
#[derive(Debug, Clone)]
pub struct TimeIndexSet {
    indices: Vec<usize>,
}

impl TimeIndexSet {
    /// Select the indices a run will consume, starting at `start_index`
    /// and walking in the configured direction with the configured stride,
    /// capped by what the dataset has.
    pub fn for_run(
        config: &TrackConfig,
        start_index: usize,
        n_available: usize,
    ) -> Result<Self, TrackError> {
        let stride = config.stride();
        let want = config.n_output_indices();
        let mut indices = Vec::with_capacity(want);

        match config.direction {
            TimeDirection::Forward => {
                let mut idx = start_index;
                while indices.len() < want && idx < n_available {
                    indices.push(idx);
                    idx += stride;
                }
            }
            TimeDirection::Backward => {
                let mut idx = start_index as isize;
                while indices.len() < want && idx >= 0 {
                    indices.push(idx as usize);
                    idx -= stride as isize;
                }
            }
        }

        if indices.len() < 2 {
            return Err(TrackError::ConfigInvalid(format!(
                "run needs at least two model outputs, only {} reachable from index {}",
                indices.len(),
                start_index
            )));
        }
        Ok(Self { indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of bounding snapshot pairs, i.e. outer loop iterations.
    pub fn n_intervals(&self) -> usize {
        self.indices.len() - 1
    }
}

// ============================================================================
// Trajectories
// ============================================================================

/// Finalized output of a run, ready for a track writer.
///
/// Rows are the surviving seed particles, columns the output times.
/// `lon`/`lat` hold whatever the configured [`OutputCoords`] dictates:
/// degrees, projected metres, or raw fractional grid indices.
#[derive(Debug, Clone)]
pub struct Trajectories {
    pub lon: Array2<f64>,
    pub lat: Array2<f64>,
    /// Vertical position: recovered depth (m) for 3D runs, the constant
    /// fractional layer index for isoslice runs.
    pub z: Array2<f64>,
    /// Absolute time per sample (s since the dataset epoch).
    pub t: Array2<f64>,
    /// Lagrangian stream-function transport sums, if tracked.
    pub transport: Option<(Vec<f64>, Vec<f64>)>,
    pub name: String,
    pub coords: OutputCoords,
}

impl Trajectories {
    pub fn n_particles(&self) -> usize {
        self.lon.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.lon.ncols()
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// State machine driving one tracking run.
pub struct Tracker {
    config: TrackConfig,
    grid: Arc<Grid>,
    buffer: FluxBuffer,
    table: Option<ParticleTable>,
    times: Option<TimeIndexSet>,
    /// Dataset time at the run start; added back onto the run-relative
    /// accumulated times at finalization.
    epoch: f64,
}

impl Tracker {
    /// Validate the configuration against the grid and allocate the flux
    /// buffer. Fatal configuration problems surface here, before any
    /// dataset access.
    pub fn new(config: TrackConfig, grid: Arc<Grid>) -> Result<Self, TrackError> {
        config.validate()?;
        if let VerticalMode::Isoslice { layer } = config.vertical {
            if layer >= grid.km {
                return Err(TrackError::ConfigInvalid(format!(
                    "isoslice layer {} out of range for a {}-layer grid",
                    layer, grid.km
                )));
            }
        }
        let km_eff = Self::km_eff(&config, &grid);
        let buffer = FluxBuffer::allocate(grid.nx(), grid.ny(), km_eff);
        Ok(Self {
            config,
            grid,
            buffer,
            table: None,
            times: None,
            epoch: 0.0,
        })
    }

    /// Vertical extent of the working fields: isoslice runs carry a single
    /// extracted layer, 3D runs the full column.
    fn km_eff(config: &TrackConfig, grid: &Grid) -> usize {
        if config.vertical.is_3d() {
            grid.km
        } else {
            1
        }
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The particle table, once seeded.
    pub fn table(&self) -> Option<&ParticleTable> {
        self.table.as_ref()
    }

    /// Seed the run.
    ///
    /// Converts geographic (or projected, for idealized grids) seed
    /// positions to fractional grid indices, silently dropping any seed
    /// that does not resolve — out-of-domain seeds are a policy drop, not
    /// an error. Resolves each survivor's initial vertical index, primes
    /// the flux buffer with the first snapshot, and allocates the
    /// full-length output arrays.
    ///
    /// Returns the number of surviving particles.
    pub fn prepare_for_model_run<S: SnapshotSource>(
        &mut self,
        source: &mut S,
        lon0: &[f64],
        lat0: &[f64],
        start_index: usize,
    ) -> Result<usize, TrackError> {
        if lon0.len() != lat0.len() {
            return Err(TrackError::ConfigInvalid(format!(
                "seed arrays disagree in length: {} vs {}",
                lon0.len(),
                lat0.len()
            )));
        }
        if let VerticalMode::FromSurface { depths } = &self.config.vertical {
            if depths.len() != lon0.len() {
                return Err(TrackError::ConfigInvalid(format!(
                    "3D run has {} seed depths for {} seed positions",
                    depths.len(),
                    lon0.len()
                )));
            }
        }

        let times = TimeIndexSet::for_run(&self.config, start_index, source.n_times())?;
        let first_index = times.indices()[0];
        self.epoch = source
            .time_value(first_index)
            .map_err(|source| TrackError::SnapshotLoad {
                time_index: first_index,
                source,
            })?;

        // Horizontal seeding: convert and drop unresolvable seeds, keeping
        // per-seed depths aligned with the survivors.
        let mut xs = Vec::with_capacity(lon0.len());
        let mut ys = Vec::with_capacity(lon0.len());
        let mut kept = Vec::with_capacity(lon0.len());
        for (p, (&lon, &lat)) in lon0.iter().zip(lat0).enumerate() {
            let (i, j) = self.grid.to_index_space(lon, lat);
            if i.is_nan() || j.is_nan() {
                continue;
            }
            xs.push(i);
            ys.push(j);
            kept.push(p);
        }
        if kept.len() < lon0.len() {
            log::warn!(
                "dropped {} of {} seeds outside the grid's interpolatable domain",
                lon0.len() - kept.len(),
                lon0.len()
            );
        }
        if kept.is_empty() {
            return Err(TrackError::EmptySeed);
        }

        // Prime the buffer's new slot with the first snapshot; the first
        // advance of the loop shifts it into the old slot.
        let first = source
            .read_fields(first_index, &self.grid, &self.config.vertical)
            .map_err(|source| TrackError::SnapshotLoad {
                time_index: first_index,
                source,
            })?;
        self.buffer
            .prime(first)
            .map_err(|e| TrackError::SnapshotLoad {
                time_index: first_index,
                source: SnapshotError::Shape(e),
            })?;

        // Vertical seeding.
        let (xs, ys, zs) = match &self.config.vertical {
            VerticalMode::Isoslice { .. } => {
                // One extracted layer with edges 0 and 1; every particle
                // sits at the cell center, where the flux information is.
                let zs = vec![0.5; xs.len()];
                (xs, ys, zs)
            }
            VerticalMode::FromSurface { depths } => {
                let zwt = &self.buffer.new_slot().zwt;
                let mut fx = Vec::with_capacity(xs.len());
                let mut fy = Vec::with_capacity(xs.len());
                let mut fz = Vec::with_capacity(xs.len());
                let mut dropped_deep = 0usize;
                for (b, &p) in kept.iter().enumerate() {
                    let i = (xs[b].round() as usize).min(self.grid.nx() - 1);
                    let j = (ys[b].round() as usize).min(self.grid.ny() - 1);
                    let column: Vec<f64> =
                        (0..=self.grid.km).map(|k| zwt[[i, j, k]]).collect();
                    match resolve_depth_to_index(&column, depths[p]) {
                        Some(z) => {
                            fx.push(xs[b]);
                            fy.push(ys[b]);
                            fz.push(z);
                        }
                        None => dropped_deep += 1,
                    }
                }
                if dropped_deep > 0 {
                    log::warn!(
                        "dropped {} seeds whose depth falls outside the local water column",
                        dropped_deep
                    );
                }
                if fx.is_empty() {
                    return Err(TrackError::EmptySeed);
                }
                (fx, fy, fz)
            }
            // Rejected by validation in Tracker::new.
            VerticalMode::FromMeanSeaLevel { .. } => {
                return Err(TrackError::ConfigUnsupported(
                    "mean-sea-level depth reference is not implemented".to_string(),
                ));
            }
        };

        let n_columns =
            times.n_intervals() * self.config.nsubsteps() * self.config.outputs_per_call + 1;
        let mut table =
            ParticleTable::seed(&xs, &ys, &zs, n_columns, self.config.track_transport);

        // Seed-column depth: real metres for 3D runs, the constant
        // fractional index otherwise.
        if self.config.vertical.is_3d() {
            let zwt = &self.buffer.new_slot().zwt;
            let depths0: Vec<f64> = (0..xs.len())
                .map(|b| interpolate3d(xs[b], ys[b], zs[b], zwt).0)
                .collect();
            table.set_depth_column(0, &depths0);
        } else {
            table.set_depth_column(0, &zs);
        }

        log::info!(
            "tracking {} particles over {} output intervals ({} sub-steps each)",
            xs.len(),
            times.n_intervals(),
            self.config.nsubsteps()
        );

        let survivors = xs.len();
        self.table = Some(table);
        self.times = Some(times);
        Ok(survivors)
    }

    /// Run the whole time-index sequence and finalize.
    pub fn run<S, E>(
        &mut self,
        source: &mut S,
        engine: &mut E,
        lon0: &[f64],
        lat0: &[f64],
        start_index: usize,
    ) -> Result<Trajectories, TrackError>
    where
        S: SnapshotSource,
        E: AdvectionEngine,
    {
        self.prepare_for_model_run(source, lon0, lat0, start_index)?;
        let n_intervals = self.times.as_ref().map(TimeIndexSet::n_intervals).unwrap_or(0);
        for outer in 0..n_intervals {
            self.run_interval(source, engine, outer)?;
        }
        self.finish()
    }

    /// One outer iteration: advance the flux buffer to the next bounding
    /// snapshot, then take every sub-step within the interval.
    pub fn run_interval<S, E>(
        &mut self,
        source: &mut S,
        engine: &mut E,
        outer: usize,
    ) -> Result<(), TrackError>
    where
        S: SnapshotSource,
        E: AdvectionEngine,
    {
        let (next_index, n_intervals) = {
            let times = self.times.as_ref().ok_or_else(not_prepared)?;
            (times.indices()[outer + 1], times.n_intervals())
        };

        let snapshot = source
            .read_fields(next_index, &self.grid, &self.config.vertical)
            .map_err(|source| TrackError::SnapshotLoad {
                time_index: next_index,
                source,
            })?;
        self.buffer
            .advance(snapshot)
            .map_err(|e| TrackError::SnapshotLoad {
                time_index: next_index,
                source: SnapshotError::Shape(e),
            })?;

        let nsubsteps = self.config.nsubsteps();
        for sub in 0..nsubsteps {
            self.step_substep(engine, outer, sub)?;
        }
        log::debug!("completed output interval {} of {}", outer + 1, n_intervals);
        Ok(())
    }

    /// One sub-step: blend fluxes, compact the active set, call the
    /// engine, recover depth, scatter back.
    fn step_substep<E: AdvectionEngine>(
        &mut self,
        engine: &mut E,
        outer: usize,
        sub: usize,
    ) -> Result<(), TrackError> {
        let nsubsteps = self.config.nsubsteps();
        let n_out = self.config.outputs_per_call;
        let base_col = (outer * nsubsteps + sub) * n_out;

        let table = self.table.as_mut().ok_or_else(not_prepared)?;

        // Freeze previously exited rows into the new columns first, so the
        // output arrays are fully populated even if nothing is active.
        table.carry_forward(base_col, n_out);
        let batch = table.active_batch(base_col);
        if batch.is_empty() {
            return Ok(());
        }

        let (flux_start, flux_end) = self.buffer.sub_step_flux(sub, nsubsteps);
        let (dzt_old, dzt_new) = self.buffer.dzt_pair();

        // The engine speaks 1-based horizontal indices.
        let mut x_start = Vec::with_capacity(batch.len());
        let mut y_start = Vec::with_capacity(batch.len());
        for b in 0..batch.len() {
            let (xe, ye) =
                convert_index_convention(IndexConvention::ToEngine, batch.x[b], batch.y[b]);
            x_start.push(xe);
            y_start.push(ye);
        }

        let input = StepInput {
            x_start: &x_start,
            y_start: &y_start,
            z_start: &batch.z,
            time_budget: self.config.call_budget(),
            flux_start: &flux_start,
            flux_end: &flux_end,
            dzt_old,
            dzt_new,
            grid: &self.grid,
            direction: self.config.direction,
            ah: self.config.ah,
            av: self.config.av,
            turbulence: self.config.turbulence,
            periodic: self.config.periodic,
            max_inner_steps: self.config.max_inner_steps,
            outputs_per_call: n_out,
            transport: batch
                .transport
                .as_ref()
                .map(|(u, v)| (u.as_slice(), v.as_slice())),
        };

        let mut result = engine.step(&input)?;

        // Back to 0-based indices.
        for b in 0..result.x.nrows() {
            for c in 0..result.x.ncols() {
                let (xi, yi) = convert_index_convention(
                    IndexConvention::FromEngine,
                    result.x[[b, c]],
                    result.y[[b, c]],
                );
                result.x[[b, c]] = xi;
                result.y[[b, c]] = yi;
            }
        }

        // Recover real depth by blending vertical edge depths at each
        // output's fraction of the interval. Isoslice runs skip this: the
        // fractional vertical index is constant by construction.
        let depths = if self.config.vertical.is_3d() {
            let mut d = Array2::from_elem((batch.len(), n_out), f64::NAN);
            for c in 0..n_out {
                let frac =
                    (sub as f64 + (c + 1) as f64 / n_out as f64) / nsubsteps as f64;
                let zwt = self.buffer.vertical_edges_at_fraction(frac);
                for b in 0..batch.len() {
                    d[[b, c]] =
                        interpolate3d(result.x[[b, c]], result.y[[b, c]], result.z[[b, c]], &zwt)
                            .0;
                }
            }
            Some(d)
        } else {
            None
        };

        let table = self.table.as_mut().ok_or_else(not_prepared)?;
        table.scatter(&batch.rows, &result, base_col, depths.as_ref());
        Ok(())
    }

    /// Finalize: shift accumulated times to absolute, convert terminal
    /// index-space positions to the configured output coordinates, and
    /// hand the assembled arrays over.
    pub fn finish(&mut self) -> Result<Trajectories, TrackError> {
        let mut table = self.table.take().ok_or_else(not_prepared)?;
        self.times = None;

        table.add_epoch(self.epoch);

        let (x, y, _) = table.positions();
        let (n, cols) = x.dim();
        let (mut lon, mut lat) = match self.config.output_coords {
            OutputCoords::GridIndex => (x.clone(), y.clone()),
            _ => (
                Array2::from_elem((n, cols), f64::NAN),
                Array2::from_elem((n, cols), f64::NAN),
            ),
        };
        match self.config.output_coords {
            OutputCoords::GridIndex => {}
            OutputCoords::Projected => {
                for p in 0..n {
                    for c in 0..cols {
                        let (px, py) = self.grid.index_to_xy(x[[p, c]], y[[p, c]]);
                        lon[[p, c]] = px;
                        lat[[p, c]] = py;
                    }
                }
            }
            OutputCoords::Geographic => {
                for p in 0..n {
                    for c in 0..cols {
                        let (lo, la) = self.grid.to_geo_space(x[[p, c]], y[[p, c]]);
                        lon[[p, c]] = lo;
                        lat[[p, c]] = la;
                    }
                }
            }
        }

        Ok(Trajectories {
            lon,
            lat,
            z: table.depths().clone(),
            t: table.times().clone(),
            transport: table
                .transport()
                .map(|(u, v)| (u.to_vec(), v.to_vec())),
            name: self.config.name.clone(),
            coords: self.config.output_coords,
        })
    }
}

fn not_prepared() -> TrackError {
    TrackError::ConfigInvalid("run not prepared: call prepare_for_model_run first".to_string())
}

/// Resolve a real seed depth (negative metres) to a fractional vertical
/// edge index against one water column of edge depths.
///
/// `edges[0]` is the seabed, `edges[km]` the surface. Depths outside the
/// column — below the seabed or above the surface — do not resolve; such
/// seeds are dropped like horizontal out-of-domain seeds.
fn resolve_depth_to_index(edges: &[f64], depth: f64) -> Option<f64> {
    if !depth.is_finite() || edges.len() < 2 {
        return None;
    }
    // A column with fill values in its edges (land, missing zeta) cannot
    // resolve any depth; NaN would slip through the range checks below.
    if edges.iter().any(|e| !e.is_finite()) {
        return None;
    }
    let km = edges.len() - 1;
    if depth < edges[0] || depth > edges[km] {
        return None;
    }
    // Deepest edge at or below the seed depth.
    let mut k = 0;
    for (e, &edge) in edges.iter().enumerate().take(km) {
        if edge <= depth {
            k = e;
        }
    }
    let span = edges[k + 1] - edges[k];
    if span <= 0.0 {
        return None;
    }
    Some(k as f64 + (depth - edges[k]) / span)
}
