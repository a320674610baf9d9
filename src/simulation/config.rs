//! Run configuration.
//!
//! One validated, immutable structure holds every knob of a tracking run.
//! It is constructed once, checked by [`TrackConfig::validate`] before any
//! stepping, and never mutated afterwards.

use crate::error::TrackError;
use crate::types::{
    OutputCoords, PeriodicBoundary, TimeDirection, TurbulenceModel, VerticalMode,
};

/// Relative slack admitted when checking interval divisibility.
const DIVISIBILITY_TOL: f64 = 1e-9;

/// Configuration for a tracking run.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    /// Run name, carried into output metadata.
    pub name: String,
    /// Tracking duration in days from the start date.
    pub days: f64,
    /// Seconds between model output snapshots.
    pub output_interval: f64,
    /// Sub-step length in seconds relative to one output interval. `None`
    /// means one call per interval. Must divide `output_interval` evenly;
    /// the actual per-call time budget scales with the snapshot stride
    /// (see [`TrackConfig::call_budget`]).
    pub substep: Option<f64>,
    /// Desired seconds between used snapshots, when coarser than what the
    /// dataset offers. `None` uses every snapshot. Rounds to a whole
    /// stride over `output_interval`.
    pub desired_interval: Option<f64>,
    /// Trajectory samples returned per advection call.
    pub outputs_per_call: usize,
    /// Cap on engine-internal integration steps between reinterpolations.
    pub max_inner_steps: usize,
    pub direction: TimeDirection,
    pub vertical: VerticalMode,
    pub turbulence: TurbulenceModel,
    /// Horizontal diffusivity (m²/s), engine-side, turbulence only.
    pub ah: f64,
    /// Vertical diffusivity (m²/s), engine-side, 3D turbulence only.
    pub av: f64,
    pub periodic: PeriodicBoundary,
    pub output_coords: OutputCoords,
    /// Accumulate Lagrangian stream-function transport sums.
    pub track_transport: bool,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            name: "drifters".to_string(),
            days: 1.0,
            output_interval: 3600.0,
            substep: None,
            desired_interval: None,
            outputs_per_call: 1,
            max_inner_steps: 1,
            direction: TimeDirection::Forward,
            vertical: VerticalMode::Isoslice { layer: 0 },
            turbulence: TurbulenceModel::None,
            ah: 0.0,
            av: 0.0,
            periodic: PeriodicBoundary::None,
            output_coords: OutputCoords::Geographic,
            track_transport: false,
        }
    }
}

impl TrackConfig {
    /// Config with the two parameters every run must choose.
    pub fn new(days: f64, output_interval: f64) -> Self {
        Self {
            days,
            output_interval,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_direction(mut self, direction: TimeDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_vertical(mut self, vertical: VerticalMode) -> Self {
        self.vertical = vertical;
        self
    }

    pub fn with_substep(mut self, seconds: f64) -> Self {
        self.substep = Some(seconds);
        self
    }

    pub fn with_outputs_per_call(mut self, n: usize) -> Self {
        self.outputs_per_call = n;
        self
    }

    pub fn with_max_inner_steps(mut self, n: usize) -> Self {
        self.max_inner_steps = n;
        self
    }

    pub fn with_turbulence(mut self, model: TurbulenceModel, ah: f64, av: f64) -> Self {
        self.turbulence = model;
        self.ah = ah;
        self.av = av;
        self
    }

    pub fn with_periodic(mut self, periodic: PeriodicBoundary) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn with_output_coords(mut self, coords: OutputCoords) -> Self {
        self.output_coords = coords;
        self
    }

    pub fn with_transport(mut self, on: bool) -> Self {
        self.track_transport = on;
        self
    }

    /// Seconds per advection call.
    #[inline]
    pub fn substep_interval(&self) -> f64 {
        self.substep.unwrap_or(self.output_interval)
    }

    /// Advection calls per output interval.
    #[inline]
    pub fn nsubsteps(&self) -> usize {
        (self.output_interval / self.substep_interval()).round() as usize
    }

    /// Snapshot stride over the dataset time dimension (≥ 1).
    #[inline]
    pub fn stride(&self) -> usize {
        match self.desired_interval {
            Some(d) => ((d / self.output_interval).round() as usize).max(1),
            None => 1,
        }
    }

    /// Model seconds consumed per outer step: the snapshot interval times
    /// the stride, since a strided run skips intermediate records.
    #[inline]
    pub fn interval_seconds(&self) -> f64 {
        self.stride() as f64 * self.output_interval
    }

    /// Seconds of model time one advection call must advance. Scales with
    /// the stride so particle time stays in lockstep with the snapshots
    /// actually loaded.
    #[inline]
    pub fn call_budget(&self) -> f64 {
        self.interval_seconds() / self.nsubsteps() as f64
    }

    /// Number of snapshot indices the run consumes, rounding the duration
    /// up so the final bounding pair is always captured.
    #[inline]
    pub fn n_output_indices(&self) -> usize {
        (self.days * 86_400.0 / self.interval_seconds()).ceil() as usize + 1
    }

    /// Check every field against its legal value set.
    ///
    /// Fails fast before any stepping: an unsupported vertical reference
    /// or a sub-step that does not divide the output interval would
    /// otherwise surface as silent numerical drift deep into the run.
    pub fn validate(&self) -> Result<(), TrackError> {
        if !(self.days > 0.0) {
            return Err(TrackError::ConfigInvalid(format!(
                "days must be positive, got {}",
                self.days
            )));
        }
        if !(self.output_interval > 0.0) {
            return Err(TrackError::ConfigInvalid(format!(
                "output interval must be positive, got {}",
                self.output_interval
            )));
        }
        if let Some(sub) = self.substep {
            if !(sub > 0.0) {
                return Err(TrackError::ConfigInvalid(format!(
                    "sub-step interval must be positive, got {}",
                    sub
                )));
            }
            let ratio = self.output_interval / sub;
            if (ratio - ratio.round()).abs() > DIVISIBILITY_TOL * ratio {
                return Err(TrackError::ConfigInvalid(format!(
                    "sub-step interval {} s does not divide the output interval {} s",
                    sub, self.output_interval
                )));
            }
        }
        if let Some(d) = self.desired_interval {
            if d < self.output_interval {
                return Err(TrackError::ConfigInvalid(format!(
                    "desired output interval {} s is finer than the dataset's {} s",
                    d, self.output_interval
                )));
            }
        }
        if self.outputs_per_call < 1 {
            return Err(TrackError::ConfigInvalid(
                "outputs per call must be at least 1".to_string(),
            ));
        }
        if self.max_inner_steps < 1 {
            return Err(TrackError::ConfigInvalid(
                "max inner steps must be at least 1".to_string(),
            ));
        }
        if self.ah < 0.0 || self.av < 0.0 {
            return Err(TrackError::ConfigInvalid(
                "diffusivities must be non-negative".to_string(),
            ));
        }
        match &self.vertical {
            VerticalMode::FromMeanSeaLevel { .. } => {
                return Err(TrackError::ConfigUnsupported(
                    "mean-sea-level depth reference is not implemented".to_string(),
                ));
            }
            VerticalMode::FromSurface { depths } => {
                if depths.is_empty() {
                    return Err(TrackError::ConfigInvalid(
                        "3D run requires one seed depth per particle".to_string(),
                    ));
                }
                if depths.iter().any(|&d| d > 0.0) {
                    return Err(TrackError::ConfigInvalid(
                        "seed depths must be negative (below the surface)".to_string(),
                    ));
                }
            }
            VerticalMode::Isoslice { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrackConfig::default().validate().is_ok());
    }

    #[test]
    fn test_substep_divisibility() {
        let cfg = TrackConfig::new(1.0, 3600.0).with_substep(900.0);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.nsubsteps(), 4);

        let cfg = TrackConfig::new(1.0, 3600.0).with_substep(1000.0);
        assert!(matches!(
            cfg.validate(),
            Err(TrackError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_from_msl_is_unsupported() {
        let cfg = TrackConfig::new(1.0, 3600.0)
            .with_vertical(VerticalMode::FromMeanSeaLevel { depths: vec![-10.0] });
        assert!(matches!(
            cfg.validate(),
            Err(TrackError::ConfigUnsupported(_))
        ));
    }

    #[test]
    fn test_positive_seed_depth_rejected() {
        let cfg = TrackConfig::new(1.0, 3600.0)
            .with_vertical(VerticalMode::FromSurface { depths: vec![-5.0, 2.0] });
        assert!(matches!(cfg.validate(), Err(TrackError::ConfigInvalid(_))));
    }

    #[test]
    fn test_index_counts() {
        let cfg = TrackConfig::new(0.5, 3600.0);
        // 12 hours of hourly output needs 12 intervals -> 13 indices.
        assert_eq!(cfg.n_output_indices(), 13);
        assert_eq!(cfg.stride(), 1);

        let mut cfg = TrackConfig::new(1.0, 3600.0);
        cfg.desired_interval = Some(7200.0);
        assert_eq!(cfg.stride(), 2);
        // A strided day spans the same 24 h with half the indices.
        assert_eq!(cfg.n_output_indices(), 13);
    }

    #[test]
    fn test_strided_call_budget_covers_skipped_records() {
        let mut cfg = TrackConfig::new(1.0, 3600.0).with_substep(900.0);
        cfg.desired_interval = Some(7200.0);
        assert_eq!(cfg.interval_seconds(), 7200.0);
        // Each of the 4 calls per outer step covers twice the sub-step
        // interval, keeping particle time aligned with the loaded records.
        assert_eq!(cfg.call_budget(), 1800.0);

        let cfg = TrackConfig::new(1.0, 3600.0).with_substep(900.0);
        assert_eq!(cfg.call_budget(), 900.0);
    }
}
