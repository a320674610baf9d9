//! Contract of the external advection engine.
//!
//! The elementary single-step integrator is not part of this crate: it is a
//! wrapped native numerical engine that, given particle start positions, a
//! flux field, the grid mask/geometry and a time budget, returns end
//! positions, exit flags and elapsed time. The driver's only obligations
//! are the index convention on the way in (1-based, per the engine's
//! contract) and the reinterpretation of flags and elapsed time on the way
//! out.
//!
//! The call is blocking and synchronous; one call covers one sub-step.

use ndarray::{Array2, Array3};
use thiserror::Error;

use crate::fields::SubFlux;
use crate::grid::Grid;
use crate::types::{ParticleStatus, PeriodicBoundary, TimeDirection, TurbulenceModel};

/// Failure inside the advection engine. Fatal to the run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected its inputs.
    #[error("engine rejected input: {0}")]
    BadInput(String),
    /// The engine failed mid-step.
    #[error("engine step failed: {0}")]
    StepFailed(String),
}

/// Everything one advection call needs.
///
/// Positions are in the engine's 1-based index convention. `flux_start`
/// and `flux_end` bound the sub-step in time; the engine interpolates
/// between them internally.
pub struct StepInput<'a> {
    /// Start positions, 1-based fractional indices, one entry per active
    /// particle.
    pub x_start: &'a [f64],
    pub y_start: &'a [f64],
    /// Start vertical positions, 0-based fractional edge indices (the
    /// vertical axis keeps the crate convention).
    pub z_start: &'a [f64],
    /// Seconds of model time this call must advance.
    pub time_budget: f64,
    /// Flux field at the sub-step start.
    pub flux_start: &'a SubFlux,
    /// Flux field at the sub-step end.
    pub flux_end: &'a SubFlux,
    /// Layer thickness at the old and new snapshot time levels.
    pub dzt_old: &'a Array3<f64>,
    pub dzt_new: &'a Array3<f64>,
    /// Shared read-only grid: mask (`kmt`), cell geometry, bathymetry.
    pub grid: &'a Grid,
    pub direction: TimeDirection,
    /// Horizontal diffusivity (m²/s); used only with turbulence enabled.
    pub ah: f64,
    /// Vertical diffusivity (m²/s).
    pub av: f64,
    pub turbulence: TurbulenceModel,
    pub periodic: PeriodicBoundary,
    /// Cap on internal integration steps between field reinterpolations.
    pub max_inner_steps: usize,
    /// Number of trajectory samples the call must return per particle.
    pub outputs_per_call: usize,
    /// Running Lagrangian transport sums to continue from, when stream
    /// function diagnostics are on.
    pub transport: Option<(&'a [f64], &'a [f64])>,
}

/// One advection call's results.
///
/// Matrices are (n_active, outputs_per_call); column c samples the
/// trajectory at fraction (c+1)/outputs_per_call of the time budget. A
/// particle that exits mid-call holds its exit position in all later
/// columns, and its elapsed time stops growing there.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// End positions, 1-based fractional indices.
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    /// End vertical positions, 0-based fractional edge indices.
    pub z: Array2<f64>,
    /// Seconds of model time elapsed since the start of the call,
    /// cumulative along columns, per particle.
    pub elapsed: Array2<f64>,
    /// Final status per particle: `Exited` when the particle left the
    /// domain during this call.
    pub flags: Vec<ParticleStatus>,
    /// Updated transport sums, present iff requested via the input.
    pub transport: Option<(Vec<f64>, Vec<f64>)>,
}

/// The external single-step particle advection integrator.
pub trait AdvectionEngine {
    /// Advance every input particle through one sub-step.
    fn step(&mut self, input: &StepInput<'_>) -> Result<StepResult, EngineError>;
}
