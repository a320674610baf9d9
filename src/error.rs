//! Fatal run errors.
//!
//! Only failures that abort a run live here. Per-particle numeric trouble
//! (NaN positions, domain exit) is absorbed into the data model: exited
//! particles are masked and carried forward, NaN propagates through the
//! output arrays, and neither ever surfaces as an error.

use thiserror::Error;

use crate::engine::EngineError;
use crate::io::SnapshotError;

/// Errors that terminate a tracking run.
#[derive(Debug, Error)]
pub enum TrackError {
    /// A requested mode has no implementation (e.g. the mean-sea-level
    /// depth reference). Raised at validation, before any stepping.
    #[error("unsupported configuration: {0}")]
    ConfigUnsupported(String),

    /// A configuration value is out of its legal set.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The grid loader failed; nothing can run without a grid.
    #[error("grid load failed: {0}")]
    GridLoad(#[source] SnapshotError),

    /// A velocity-field snapshot could not be read. No partial-output
    /// recovery is attempted.
    #[error("snapshot load failed at time index {time_index}: {source}")]
    SnapshotLoad {
        time_index: usize,
        #[source]
        source: SnapshotError,
    },

    /// The external advection engine reported a failure.
    #[error("advection engine failed: {0}")]
    Engine(#[from] EngineError),

    /// Every seed fell outside the interpolatable domain, leaving nothing
    /// to track. Individual out-of-domain seeds are dropped silently; a
    /// run with zero survivors cannot start.
    #[error("no seed positions resolved to valid grid indices")]
    EmptySeed,
}
