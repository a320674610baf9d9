//! Velocity-flux snapshot buffer.
//!
//! The driver holds exactly two time levels of the model's flux and
//! vertical-geometry fields: the `old` snapshot at the start of the current
//! output interval and the `new` snapshot at its end. Sub-step fluxes are
//! linear blends of the two. Advancing the buffer copies `new` into `old`
//! before the next snapshot is loaded; the copy is a true deep copy because
//! both slots are read during the same sub-step blend.

use ndarray::Array3;
use thiserror::Error;

/// A snapshot's fields do not match the shapes the buffer was allocated for.
#[derive(Debug, Error)]
#[error("snapshot shape mismatch: expected (nx, ny, km) = {expected:?}, got {got:?}")]
pub struct ShapeMismatch {
    pub expected: (usize, usize, usize),
    pub got: (usize, usize, usize),
}

/// One time level of the velocity and vertical-geometry fields.
///
/// Staggering follows the model's C-grid: `uf` lives on x-edges,
/// `vf` on y-edges, layer quantities at cell centers, and `zwt` on the
/// km + 1 vertical cell edges.
#[derive(Debug, Clone)]
pub struct FieldSnapshot {
    /// Volumetric flux across x-edges (m³/s), shape (nx-1, ny, km).
    pub uf: Array3<f64>,
    /// Volumetric flux across y-edges (m³/s), shape (nx, ny-1, km).
    pub vf: Array3<f64>,
    /// Layer thickness at cell centers (m), shape (nx, ny, km).
    pub dzt: Array3<f64>,
    /// Depth of layer centers (m, negative down), shape (nx, ny, km).
    pub zrt: Array3<f64>,
    /// Depth of layer edges (m, negative down), shape (nx, ny, km+1).
    pub zwt: Array3<f64>,
}

impl FieldSnapshot {
    /// Allocate a snapshot of the given horizontal/vertical extent filled
    /// with NaN, the "not yet loaded" state.
    pub fn nan(nx: usize, ny: usize, km: usize) -> Self {
        Self {
            uf: Array3::from_elem((nx - 1, ny, km), f64::NAN),
            vf: Array3::from_elem((nx, ny - 1, km), f64::NAN),
            dzt: Array3::from_elem((nx, ny, km), f64::NAN),
            zrt: Array3::from_elem((nx, ny, km), f64::NAN),
            zwt: Array3::from_elem((nx, ny, km + 1), f64::NAN),
        }
    }

    /// The (nx, ny, km) extent implied by the cell-centered fields.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.dzt.dim()
    }

    /// Whether every field agrees with the given extent.
    pub fn matches(&self, nx: usize, ny: usize, km: usize) -> bool {
        self.uf.dim() == (nx - 1, ny, km)
            && self.vf.dim() == (nx, ny - 1, km)
            && self.dzt.dim() == (nx, ny, km)
            && self.zrt.dim() == (nx, ny, km)
            && self.zwt.dim() == (nx, ny, km + 1)
    }
}

/// Horizontal flux pair blended to one instant between snapshots.
#[derive(Debug, Clone)]
pub struct SubFlux {
    pub uf: Array3<f64>,
    pub vf: Array3<f64>,
}

/// Two-slot ring of bounding snapshots with temporal interpolation.
#[derive(Debug, Clone)]
pub struct FluxBuffer {
    old: FieldSnapshot,
    new: FieldSnapshot,
    nx: usize,
    ny: usize,
    km: usize,
}

impl FluxBuffer {
    /// Allocate both slots as NaN for a domain of the given extent.
    pub fn allocate(nx: usize, ny: usize, km: usize) -> Self {
        Self {
            old: FieldSnapshot::nan(nx, ny, km),
            new: FieldSnapshot::nan(nx, ny, km),
            nx,
            ny,
            km,
        }
    }

    /// Load the first snapshot into the `new` slot without shifting.
    ///
    /// Called once at seeding time; the first [`FluxBuffer::advance`] of
    /// the run then moves it into `old`.
    pub fn prime(&mut self, first: FieldSnapshot) -> Result<(), ShapeMismatch> {
        self.check(&first)?;
        self.new = first;
        Ok(())
    }

    /// Shift `new` into `old` (deep copy) and install the next snapshot.
    pub fn advance(&mut self, next: FieldSnapshot) -> Result<(), ShapeMismatch> {
        self.check(&next)?;
        self.old = self.new.clone();
        self.new = next;
        Ok(())
    }

    fn check(&self, snap: &FieldSnapshot) -> Result<(), ShapeMismatch> {
        if snap.matches(self.nx, self.ny, self.km) {
            Ok(())
        } else {
            Err(ShapeMismatch {
                expected: (self.nx, self.ny, self.km),
                got: snap.shape(),
            })
        }
    }

    /// The snapshot at the start of the current interval.
    pub fn old(&self) -> &FieldSnapshot {
        &self.old
    }

    /// The snapshot at the end of the current interval.
    pub fn new_slot(&self) -> &FieldSnapshot {
        &self.new
    }

    /// Fluxes bounding sub-step `sub` of `total`.
    ///
    /// The pair is blended at r = sub/total and r = (sub+1)/total. With a
    /// single sub-step the result is exactly (`old`, `new`): the endpoint
    /// blends are cloned, not recomputed, so no floating-point round trip
    /// can perturb them.
    pub fn sub_step_flux(&self, sub: usize, total: usize) -> (SubFlux, SubFlux) {
        assert!(total >= 1, "at least one sub-step required");
        assert!(sub < total, "sub-step index out of range");
        let r0 = sub as f64 / total as f64;
        let r1 = (sub + 1) as f64 / total as f64;
        (
            SubFlux {
                uf: blend(&self.old.uf, &self.new.uf, r0),
                vf: blend(&self.old.vf, &self.new.vf, r0),
            },
            SubFlux {
                uf: blend(&self.old.uf, &self.new.uf, r1),
                vf: blend(&self.old.vf, &self.new.vf, r1),
            },
        )
    }

    /// Vertical edge depths blended to the end of sub-step `sub` of `total`.
    pub fn vertical_edges_at(&self, sub: usize, total: usize) -> Array3<f64> {
        assert!(total >= 1 && sub < total);
        self.vertical_edges_at_fraction((sub + 1) as f64 / total as f64)
    }

    /// Vertical edge depths blended at an arbitrary fraction r in [0, 1]
    /// of the current output interval.
    pub fn vertical_edges_at_fraction(&self, r: f64) -> Array3<f64> {
        blend(&self.old.zwt, &self.new.zwt, r)
    }

    /// Layer thickness at both time levels, as the engine consumes it.
    pub fn dzt_pair(&self) -> (&Array3<f64>, &Array3<f64>) {
        (&self.old.dzt, &self.new.dzt)
    }
}

/// (1-r)·a + r·b with exact endpoints.
///
/// r = 0 and r = 1 return clones: `0.0 * NaN` would otherwise smear NaN
/// from the opposite slot into cells that are perfectly valid there.
fn blend(a: &Array3<f64>, b: &Array3<f64>, r: f64) -> Array3<f64> {
    if r == 0.0 {
        a.clone()
    } else if r == 1.0 {
        b.clone()
    } else {
        a * (1.0 - r) + b * r
    }
}
