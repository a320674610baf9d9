//! # drift-rs
//!
//! Lagrangian particle tracking over discretized, time-varying ocean
//! velocity fields.
//!
//! The crate is the driver around an external single-step advection
//! integrator: it loads model output snapshots one pair at a time, keeps
//! particle state across steps, blends fluxes in time for sub-stepping,
//! converts between geographic and fractional-grid-index coordinates, and
//! assembles complete trajectories at the end of a run. The integrator
//! itself is abstracted behind [`engine::AdvectionEngine`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use drift_rs::grid::Grid;
//! use drift_rs::simulation::{TrackConfig, Tracker};
//!
//! # fn run(mut source: impl drift_rs::io::SnapshotSource,
//! #        mut engine: impl drift_rs::engine::AdvectionEngine)
//! #        -> Result<(), drift_rs::error::TrackError> {
//! let grid = Arc::new(Grid::uniform(100, 100, 10, 500.0, 500.0));
//! let config = TrackConfig::new(2.0, 3600.0).with_substep(900.0);
//! let mut tracker = Tracker::new(config, grid)?;
//! let tracks = tracker.run(&mut source, &mut engine, &[1000.0], &[2000.0], 0)?;
//! println!("{} particles, {} samples", tracks.n_particles(), tracks.n_samples());
//! # Ok(())
//! # }
//! ```
//!
//! Runs are single-threaded and synchronous; identical inputs produce
//! bit-for-bit identical trajectories.
//!
//! NetCDF-backed dataset readers and track writers for ROMS model output
//! live behind the `netcdf` feature.

pub mod engine;
pub mod error;
pub mod fields;
pub mod grid;
pub mod io;
pub mod particles;
pub mod simulation;
pub mod types;

pub use engine::{AdvectionEngine, EngineError, StepInput, StepResult};
pub use error::TrackError;
pub use fields::{FieldSnapshot, FluxBuffer, SubFlux};
pub use grid::Grid;
pub use simulation::{TrackConfig, Tracker, Trajectories};
pub use types::{
    OutputCoords, ParticleStatus, PeriodicBoundary, TimeDirection, TurbulenceModel, VerticalMode,
};
