//! Grid record and coordinate conversions.
//!
//! A [`Grid`] is the read-only description of the model domain: cell-center
//! coordinate arrays in a projected plane, a land/sea mask expressed as the
//! number of active vertical layers per column, bathymetry, cell sizes, and
//! an optional projection back to geographic coordinates. It is loaded once
//! per run and shared read-only by every component.
//!
//! Conversions between geographic, projected and fractional grid-index
//! coordinates live in [`convert`]; all of them propagate NaN rather than
//! panicking so that one bad particle cannot abort a batch.

mod convert;
mod projection;

pub use convert::{convert_index_convention, interpolate3d};
pub use projection::{CoordinateProjection, LocalProjection};

use ndarray::Array2;

/// Horizontal/vertical description of the model domain.
///
/// Array shapes are (nx, ny) with the first axis east-west, matching the
/// staggering of the flux fields in [`crate::fields`].
#[derive(Debug, Clone)]
pub struct Grid {
    /// Cell-center x coordinates (projected metres, or idealized units).
    pub x_rho: Array2<f64>,
    /// Cell-center y coordinates.
    pub y_rho: Array2<f64>,
    /// Bathymetry depth at cell centers, positive down (m).
    pub h: Array2<f64>,
    /// Deepest active layer count per column; 0 marks a land cell.
    pub kmt: Array2<usize>,
    /// Number of vertical layers, fixed for the run.
    pub km: usize,
    /// Cell width in x at v-points (m).
    pub dx_v: Array2<f64>,
    /// Cell height in y at u-points (m).
    pub dy_u: Array2<f64>,
    /// Horizontal cell area (m²).
    pub dxdy: Array2<f64>,
    /// Projection between geographic and the grid plane. `None` for
    /// idealized domains, where x/y double as the output coordinates.
    pub projection: Option<LocalProjection>,
}

impl Grid {
    /// Number of cells in x.
    #[inline]
    pub fn nx(&self) -> usize {
        self.x_rho.nrows()
    }

    /// Number of cells in y.
    #[inline]
    pub fn ny(&self) -> usize {
        self.x_rho.ncols()
    }

    /// Whether the column at (i, j) has any active layers.
    #[inline]
    pub fn is_wet(&self, i: usize, j: usize) -> bool {
        self.kmt[[i, j]] > 0
    }

    /// Uniform rectangular all-wet grid for idealized runs and tests.
    ///
    /// Cell centers sit at (i·dx, j·dy), every column carries `km` active
    /// layers, and the depth is `km` metres so that unit layer thicknesses
    /// fill the water column. No projection is attached.
    pub fn uniform(nx: usize, ny: usize, km: usize, dx: f64, dy: f64) -> Self {
        assert!(nx >= 2 && ny >= 2 && km >= 1, "degenerate grid");
        let x_rho = Array2::from_shape_fn((nx, ny), |(i, _)| i as f64 * dx);
        let y_rho = Array2::from_shape_fn((nx, ny), |(_, j)| j as f64 * dy);
        Self {
            x_rho,
            y_rho,
            h: Array2::from_elem((nx, ny), km as f64),
            kmt: Array2::from_elem((nx, ny), km),
            km,
            dx_v: Array2::from_elem((nx, ny), dx),
            dy_u: Array2::from_elem((nx, ny), dy),
            dxdy: Array2::from_elem((nx, ny), dx * dy),
            projection: None,
        }
    }

    /// Check that all horizontal arrays share one extent.
    ///
    /// Loaders call this after assembling a grid from file variables that
    /// may disagree in shape.
    pub fn consistent(&self) -> bool {
        let dim = self.x_rho.dim();
        self.y_rho.dim() == dim
            && self.h.dim() == dim
            && self.kmt.dim() == dim
            && self.dx_v.dim() == dim
            && self.dy_u.dim() == dim
            && self.dxdy.dim() == dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_grid_geometry() {
        let grid = Grid::uniform(10, 8, 3, 500.0, 400.0);
        assert_eq!(grid.nx(), 10);
        assert_eq!(grid.ny(), 8);
        assert_eq!(grid.km, 3);
        assert!(grid.consistent());
        assert!(grid.is_wet(0, 0));
        assert_eq!(grid.x_rho[[4, 2]], 2000.0);
        assert_eq!(grid.y_rho[[4, 2]], 800.0);
        assert_eq!(grid.dxdy[[0, 0]], 200_000.0);
    }

    #[test]
    #[should_panic]
    fn test_uniform_grid_rejects_degenerate() {
        Grid::uniform(1, 8, 3, 500.0, 400.0);
    }
}
