//! Collaborator interfaces for dataset access and track output.
//!
//! The driver depends on two external collaborators, specified here by
//! trait: a [`SnapshotSource`] producing one [`FieldSnapshot`] per model
//! output time, and a [`TrackWriter`] consuming the finalized trajectory
//! arrays. [`InMemorySource`] serves idealized runs and tests; NetCDF-backed
//! implementations for ROMS-format model output live behind the `netcdf`
//! feature.

#[cfg(feature = "netcdf")]
mod dataset;
#[cfg(feature = "netcdf")]
mod tracks;

#[cfg(feature = "netcdf")]
pub use dataset::{RomsDataset, RomsGridReader};
#[cfg(feature = "netcdf")]
pub use tracks::NetcdfTrackWriter;

use thiserror::Error;

use crate::fields::{FieldSnapshot, ShapeMismatch};
use crate::grid::Grid;
use crate::simulation::Trajectories;
use crate::types::VerticalMode;

/// Failure while reading grid or snapshot data.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("time index {index} out of range ({available} available)")]
    TimeIndexOutOfRange { index: usize, available: usize },

    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Failure while persisting trajectories.
#[derive(Debug, Error)]
pub enum TrackWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Source of time-indexed velocity/vertical-geometry snapshots.
///
/// Called once per outer step to fill the flux buffer's `new` slot. A
/// failure here is fatal to the run.
pub trait SnapshotSource {
    /// Number of time records available in the dataset.
    fn n_times(&self) -> usize;

    /// Dataset time value (seconds since the dataset epoch) at an index.
    fn time_value(&self, index: usize) -> Result<f64, SnapshotError>;

    /// Read the fields at one time index.
    ///
    /// `vertical` tells layered sources which model layer to extract for
    /// isoslice runs; 3D runs read the full column.
    fn read_fields(
        &mut self,
        time_index: usize,
        grid: &Grid,
        vertical: &VerticalMode,
    ) -> Result<FieldSnapshot, SnapshotError>;
}

/// Sink for finalized trajectories.
pub trait TrackWriter {
    fn save(&mut self, tracks: &Trajectories) -> Result<(), TrackWriteError>;
}

/// Snapshot source over precomputed in-memory fields.
///
/// Fields are stored exactly as the buffer consumes them, so the vertical
/// selector is ignored: callers slice layers themselves when building the
/// snapshots.
pub struct InMemorySource {
    snapshots: Vec<FieldSnapshot>,
    times: Vec<f64>,
}

impl InMemorySource {
    /// Build from parallel snapshot/time vectors.
    pub fn new(snapshots: Vec<FieldSnapshot>, times: Vec<f64>) -> Self {
        assert_eq!(snapshots.len(), times.len());
        Self { snapshots, times }
    }
}

impl SnapshotSource for InMemorySource {
    fn n_times(&self) -> usize {
        self.times.len()
    }

    fn time_value(&self, index: usize) -> Result<f64, SnapshotError> {
        self.times
            .get(index)
            .copied()
            .ok_or(SnapshotError::TimeIndexOutOfRange {
                index,
                available: self.times.len(),
            })
    }

    fn read_fields(
        &mut self,
        time_index: usize,
        _grid: &Grid,
        _vertical: &VerticalMode,
    ) -> Result<FieldSnapshot, SnapshotError> {
        self.snapshots
            .get(time_index)
            .cloned()
            .ok_or(SnapshotError::TimeIndexOutOfRange {
                index: time_index,
                available: self.snapshots.len(),
            })
    }
}
