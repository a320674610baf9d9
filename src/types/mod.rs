//! Run-level enums and flags.
//!
//! These types replace the loose integer/string switches of typical
//! drifter-tracking configurations (`ff = ±1`, `z0 = 's'`, `doturb = 2`, ...)
//! with explicit enumerated value sets, so an invalid combination cannot be
//! expressed once a config has validated.

/// Direction of integration through the model-output time dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeDirection {
    /// Forward in time (increasing time indices).
    #[default]
    Forward,
    /// Backward in time (decreasing time indices).
    Backward,
}

impl TimeDirection {
    /// Sign carried into the advection engine: +1.0 forward, -1.0 backward.
    #[inline]
    pub fn signum(self) -> f64 {
        match self {
            TimeDirection::Forward => 1.0,
            TimeDirection::Backward => -1.0,
        }
    }
}

/// Per-particle domain status.
///
/// A particle flips to `Exited` at most once and never back: exited rows are
/// excluded from every later advection call and their trajectory is carried
/// forward unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticleStatus {
    /// In the domain, advanced every step.
    #[default]
    Active,
    /// Left the domain; position and time frozen at the exit column.
    Exited,
}

impl ParticleStatus {
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, ParticleStatus::Active)
    }
}

/// Vertical tracking mode.
#[derive(Debug, Clone, PartialEq)]
pub enum VerticalMode {
    /// 2D tracking constrained to one terrain-following layer.
    ///
    /// `layer` selects which model layer's fluxes are read (0-based,
    /// `km - 1` for the surface layer). Particles sit at the fractional
    /// vertical index 0.5, the cell center, where the flux information
    /// lives; the vertical position never changes during the run.
    Isoslice { layer: usize },
    /// 3D tracking seeded at real depths below the time-dependent surface.
    ///
    /// One depth per seed particle, in metres, negative below the surface.
    FromSurface { depths: Vec<f64> },
    /// 3D tracking seeded at depths below mean sea level.
    ///
    /// Deliberately unimplemented: config validation rejects it before any
    /// stepping occurs.
    FromMeanSeaLevel { depths: Vec<f64> },
}

impl VerticalMode {
    /// True for modes where particles move freely in depth, which makes the
    /// per-sub-step vertical position recovery necessary.
    #[inline]
    pub fn is_3d(&self) -> bool {
        !matches!(self, VerticalMode::Isoslice { .. })
    }
}

/// Sub-grid turbulence handed to the advection engine.
///
/// The seed is part of the configuration so that runs are reproducible
/// bit-for-bit; the core never draws random numbers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurbulenceModel {
    /// Pure advection, no added diffusion.
    #[default]
    None,
    /// Diffusion via velocity fluctuations.
    Fluctuation { seed: u64 },
    /// Diffusion via random-walk displacement.
    RandomWalk { seed: u64 },
    /// Random walk with displacements aligned to isobaths.
    IsobathRandomWalk { seed: u64 },
}

/// Periodic boundary handling for drifters, passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodicBoundary {
    #[default]
    None,
    /// Wrap in the east-west / x / i direction.
    EastWest,
    /// Wrap in the north-south / y / j direction.
    NorthSouth,
}

/// Coordinate system of the final trajectory output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCoords {
    /// Longitude/latitude in degrees (requires a grid projection).
    #[default]
    Geographic,
    /// Projected x/y in the grid's plane (metres, or idealized units).
    Projected,
    /// Raw fractional grid indices, unconverted.
    GridIndex,
}

/// Direction of an index-convention conversion (see
/// [`convert_index_convention`](crate::grid::convert_index_convention)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexConvention {
    /// Crate 0-based indices to the engine's 1-based contract (+1).
    ToEngine,
    /// Engine 1-based indices back to crate 0-based (-1).
    FromEngine,
}
