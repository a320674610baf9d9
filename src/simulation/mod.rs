//! Run configuration and the tracking driver.

mod config;
mod driver;

pub use config::TrackConfig;
pub use driver::{TimeIndexSet, Tracker, Trajectories};
