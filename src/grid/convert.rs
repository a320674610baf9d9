//! Coordinate conversions between geographic, projected and index space.
//!
//! Fractional grid-index coordinates are the working currency of the
//! driver: (4.5, 2.0) means halfway between cell centers 4 and 5 in x,
//! exactly at center 2 in y. Conversions here are the only places where
//! geographic or projected coordinates meet index space.
//!
//! Edge-case policy, uniform across every function in this module: NaN in
//! means NaN out, coordinates outside the grid's interpolation support come
//! back as NaN, and nothing indexes out of bounds.

use ndarray::Array3;

use super::{CoordinateProjection, Grid};
use crate::types::IndexConvention;

/// Newton iterations for the bilinear cell inversion.
const MAX_NEWTON_ITERS: usize = 12;
/// Convergence tolerance for the inversion residual (in metres).
const NEWTON_TOL: f64 = 1e-9;
/// Slack admitted on local cell coordinates before declaring a miss.
const CELL_EDGE_SLACK: f64 = 1e-9;

impl Grid {
    /// Map geographic (lon, lat) to fractional grid indices (i, j).
    ///
    /// Uses the grid projection when present; on an idealized grid the
    /// inputs are taken as projected x/y directly. Points outside the
    /// convex support of the cell-center mesh yield (NaN, NaN).
    pub fn to_index_space(&self, lon: f64, lat: f64) -> (f64, f64) {
        if !lon.is_finite() || !lat.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        let (px, py) = match &self.projection {
            Some(proj) => proj.geo_to_xy(lon, lat),
            None => (lon, lat),
        };
        self.xy_to_index(px, py)
    }

    /// Map projected (x, y) to fractional grid indices (i, j).
    ///
    /// Locates the quadrilateral of adjacent cell centers containing the
    /// point and inverts its bilinear map. A hop walk from the domain
    /// center finds the cell in a handful of solves on structured grids;
    /// the exhaustive scan remains as the fallback when the walk cannot
    /// decide, so the result is identical either way.
    pub fn xy_to_index(&self, px: f64, py: f64) -> (f64, f64) {
        if !px.is_finite() || !py.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        if let Some(hit) = self.locate_by_walk(px, py) {
            return hit;
        }
        self.locate_by_scan(px, py)
    }

    fn cell_corners(&self, i: usize, j: usize) -> [(f64, f64); 4] {
        [
            (self.x_rho[[i, j]], self.y_rho[[i, j]]),
            (self.x_rho[[i + 1, j]], self.y_rho[[i + 1, j]]),
            (self.x_rho[[i, j + 1]], self.y_rho[[i, j + 1]]),
            (self.x_rho[[i + 1, j + 1]], self.y_rho[[i + 1, j + 1]]),
        ]
    }

    /// Hop between cells using the local bilinear solution as a compass:
    /// a solution outside the unit square says how many cells to move and
    /// in which direction, so near-uniform grids land in one or two hops.
    /// `None` means the walk could not decide (degenerate cell, boundary
    /// clamp, hop cycle) and the caller falls back to the scan.
    fn locate_by_walk(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        let (nx, ny) = (self.nx(), self.ny());
        if nx < 2 || ny < 2 {
            return None;
        }
        let mut i = (nx - 1) / 2;
        let mut j = (ny - 1) / 2;
        for _ in 0..nx + ny {
            let [p00, p10, p01, p11] = self.cell_corners(i, j);
            let (a, b) = solve_bilinear(p00, p10, p01, p11, px, py)?;
            if in_unit_cell(a) && in_unit_cell(b) {
                return Some((
                    i as f64 + a.clamp(0.0, 1.0),
                    j as f64 + b.clamp(0.0, 1.0),
                ));
            }
            let ni = hop_cell(i, a, nx - 2);
            let nj = hop_cell(j, b, ny - 2);
            if ni == i && nj == j {
                return None;
            }
            i = ni;
            j = nj;
        }
        None
    }

    fn locate_by_scan(&self, px: f64, py: f64) -> (f64, f64) {
        let (nx, ny) = (self.nx(), self.ny());
        for i in 0..nx - 1 {
            for j in 0..ny - 1 {
                let [p00, p10, p01, p11] = self.cell_corners(i, j);

                // Cheap reject before the Newton solve.
                let xmin = p00.0.min(p10.0).min(p01.0).min(p11.0);
                let xmax = p00.0.max(p10.0).max(p01.0).max(p11.0);
                let ymin = p00.1.min(p10.1).min(p01.1).min(p11.1);
                let ymax = p00.1.max(p10.1).max(p01.1).max(p11.1);
                if px < xmin || px > xmax || py < ymin || py > ymax {
                    continue;
                }

                if let Some((a, b)) = solve_bilinear(p00, p10, p01, p11, px, py) {
                    if in_unit_cell(a) && in_unit_cell(b) {
                        return (
                            i as f64 + a.clamp(0.0, 1.0),
                            j as f64 + b.clamp(0.0, 1.0),
                        );
                    }
                }
            }
        }
        (f64::NAN, f64::NAN)
    }

    /// Sample the projected coordinates at a fractional index position.
    pub fn index_to_xy(&self, i: f64, j: f64) -> (f64, f64) {
        (
            bilinear(&self.x_rho, i, j),
            bilinear(&self.y_rho, i, j),
        )
    }

    /// Map fractional grid indices back to geographic (lon, lat).
    ///
    /// Without a projection this returns the projected coordinates, which
    /// is the inverse of [`Grid::to_index_space`] on idealized grids.
    pub fn to_geo_space(&self, i: f64, j: f64) -> (f64, f64) {
        let (px, py) = self.index_to_xy(i, j);
        if !px.is_finite() || !py.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        match &self.projection {
            Some(proj) => proj.xy_to_geo(px, py),
            None => (px, py),
        }
    }
}

/// Translate between the crate's 0-based indices and the engine's 1-based
/// contract. Purely additive per axis; applying the two directions in
/// sequence is an exact identity for every finite input, and NaN passes
/// through untouched.
#[inline]
pub fn convert_index_convention(dir: IndexConvention, x: f64, y: f64) -> (f64, f64) {
    match dir {
        IndexConvention::ToEngine => (x + 1.0, y + 1.0),
        IndexConvention::FromEngine => (x - 1.0, y - 1.0),
    }
}

/// Trilinearly interpolate a vertically-resolved field at a fractional
/// position (i, j, z).
///
/// The field's third axis is indexed by vertical cell edge (length km + 1
/// for edge-depth fields). Returns the interpolated value together with the
/// fractional vertical remainder z - floor(z); both are NaN when any input
/// is NaN or the horizontal position lies outside the array.
pub fn interpolate3d(i: f64, j: f64, z: f64, field: &Array3<f64>) -> (f64, f64) {
    if !i.is_finite() || !j.is_finite() || !z.is_finite() {
        return (f64::NAN, f64::NAN);
    }
    let (nx, ny, nk) = field.dim();
    if i < 0.0 || i > (nx - 1) as f64 || j < 0.0 || j > (ny - 1) as f64 {
        return (f64::NAN, f64::NAN);
    }

    // Vertical index clamps instead of going NaN: the engine can step a
    // particle marginally past an edge within its last sub-step.
    let z = z.clamp(0.0, (nk - 1) as f64);

    let i0 = (i.floor() as usize).min(nx - 2);
    let j0 = (j.floor() as usize).min(ny - 2);
    let k0 = (z.floor() as usize).min(nk - 2);
    let fi = i - i0 as f64;
    let fj = j - j0 as f64;
    let fz = z - k0 as f64;

    let plane = |k: usize| -> f64 {
        let v00 = field[[i0, j0, k]];
        let v10 = field[[i0 + 1, j0, k]];
        let v01 = field[[i0, j0 + 1, k]];
        let v11 = field[[i0 + 1, j0 + 1, k]];
        v00 * (1.0 - fi) * (1.0 - fj)
            + v10 * fi * (1.0 - fj)
            + v01 * (1.0 - fi) * fj
            + v11 * fi * fj
    };

    let value = plane(k0) * (1.0 - fz) + plane(k0 + 1) * fz;
    (value, fz)
}

/// Bilinear sample of a 2D array at fractional indices; NaN outside.
fn bilinear(a: &ndarray::Array2<f64>, i: f64, j: f64) -> f64 {
    if !i.is_finite() || !j.is_finite() {
        return f64::NAN;
    }
    let (nx, ny) = a.dim();
    if i < 0.0 || i > (nx - 1) as f64 || j < 0.0 || j > (ny - 1) as f64 {
        return f64::NAN;
    }
    let i0 = (i.floor() as usize).min(nx - 2);
    let j0 = (j.floor() as usize).min(ny - 2);
    let fi = i - i0 as f64;
    let fj = j - j0 as f64;
    a[[i0, j0]] * (1.0 - fi) * (1.0 - fj)
        + a[[i0 + 1, j0]] * fi * (1.0 - fj)
        + a[[i0, j0 + 1]] * (1.0 - fi) * fj
        + a[[i0 + 1, j0 + 1]] * fi * fj
}

/// Whether a local cell coordinate lies in the unit interval, up to slack.
#[inline]
fn in_unit_cell(a: f64) -> bool {
    (-CELL_EDGE_SLACK..=1.0 + CELL_EDGE_SLACK).contains(&a)
}

/// Next cell index along one axis given the local solution value, clamped
/// to the valid cell range. A solution inside [0, 1) does not move.
#[inline]
fn hop_cell(i: usize, a: f64, last: usize) -> usize {
    (i as f64 + a.floor()).clamp(0.0, last as f64) as usize
}

/// Solve the bilinear map of one quadrilateral cell for the local
/// coordinates (a, b) reproducing the query point, via a 2×2 Newton
/// iteration. The solution is returned even when it falls outside the
/// unit square; callers decide containment. `None` when the cell is
/// degenerate or the iteration fails to converge.
fn solve_bilinear(
    p00: (f64, f64),
    p10: (f64, f64),
    p01: (f64, f64),
    p11: (f64, f64),
    px: f64,
    py: f64,
) -> Option<(f64, f64)> {
    // F(a, b) = p00 + a·dx10 + b·dx01 + a·b·dxx - p
    let dx10 = (p10.0 - p00.0, p10.1 - p00.1);
    let dx01 = (p01.0 - p00.0, p01.1 - p00.1);
    let dxx = (
        p11.0 - p10.0 - p01.0 + p00.0,
        p11.1 - p10.1 - p01.1 + p00.1,
    );

    let mut a = 0.5;
    let mut b = 0.5;
    for _ in 0..MAX_NEWTON_ITERS {
        let rx = p00.0 + a * dx10.0 + b * dx01.0 + a * b * dxx.0 - px;
        let ry = p00.1 + a * dx10.1 + b * dx01.1 + a * b * dxx.1 - py;
        if rx.abs() < NEWTON_TOL && ry.abs() < NEWTON_TOL {
            return Some((a, b));
        }

        let j00 = dx10.0 + b * dxx.0;
        let j01 = dx01.0 + a * dxx.0;
        let j10 = dx10.1 + b * dxx.1;
        let j11 = dx01.1 + a * dxx.1;
        let det = j00 * j11 - j01 * j10;
        if det.abs() < 1e-300 {
            return None;
        }
        a -= (rx * j11 - ry * j01) / det;
        b -= (ry * j00 - rx * j10) / det;

        if !a.is_finite() || !b.is_finite() {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::LocalProjection;

    const TOL: f64 = 1e-6;

    #[test]
    fn test_uniform_grid_index_roundtrip() {
        let grid = Grid::uniform(10, 10, 1, 100.0, 100.0);
        for (x, y) in [(450.0, 450.0), (120.0, 730.0), (0.0, 0.0), (900.0, 900.0)] {
            let (i, j) = grid.xy_to_index(x, y);
            assert!((i - x / 100.0).abs() < TOL, "i = {}", i);
            assert!((j - y / 100.0).abs() < TOL, "j = {}", j);
            let (x2, y2) = grid.index_to_xy(i, j);
            assert!((x - x2).abs() < TOL);
            assert!((y - y2).abs() < TOL);
        }
    }

    #[test]
    fn test_geo_roundtrip_with_projection() {
        let mut grid = Grid::uniform(12, 12, 1, 1000.0, 1000.0);
        grid.projection = Some(LocalProjection::new(-94.5, 27.8));
        // Pick geographic points that land inside the 11 km domain.
        for (di, dj) in [(2.3, 4.1), (0.5, 0.5), (10.2, 9.9)] {
            let (lon, lat) = grid.to_geo_space(di, dj);
            let (i, j) = grid.to_index_space(lon, lat);
            let (lon2, lat2) = grid.to_geo_space(i, j);
            assert!((lon - lon2).abs() < TOL, "{} vs {}", lon, lon2);
            assert!((lat - lat2).abs() < TOL, "{} vs {}", lat, lat2);
        }
    }

    #[test]
    fn test_sheared_grid_lookup_matches_roundtrip() {
        // Shear the mesh so cells are not axis-aligned and the hop walk
        // has to correct course; the walk and the scan must agree.
        let mut grid = Grid::uniform(40, 30, 1, 100.0, 100.0);
        for i in 0..40 {
            for j in 0..30 {
                grid.x_rho[[i, j]] += 12.0 * j as f64;
                grid.y_rho[[i, j]] += 7.0 * i as f64;
            }
        }
        for (di, dj) in [(0.25, 0.75), (17.5, 3.2), (38.9, 28.1), (0.0, 0.0)] {
            let (x, y) = grid.index_to_xy(di, dj);
            let (i, j) = grid.xy_to_index(x, y);
            assert!((i - di).abs() < TOL, "i: {} vs {}", i, di);
            assert!((j - dj).abs() < TOL, "j: {} vs {}", j, dj);
            let (si, sj) = grid.locate_by_scan(x, y);
            assert!((i - si).abs() < TOL && (j - sj).abs() < TOL);
        }
    }

    #[test]
    fn test_out_of_domain_is_nan() {
        let grid = Grid::uniform(10, 10, 1, 100.0, 100.0);
        let (i, j) = grid.xy_to_index(-50.0, 400.0);
        assert!(i.is_nan() && j.is_nan());
        let (i, j) = grid.xy_to_index(400.0, 2000.0);
        assert!(i.is_nan() && j.is_nan());
    }

    #[test]
    fn test_nan_propagates_never_zero() {
        let grid = Grid::uniform(10, 10, 1, 100.0, 100.0);
        let (i, j) = grid.to_index_space(f64::NAN, 300.0);
        assert!(i.is_nan() && j.is_nan());
        let (lon, lat) = grid.to_geo_space(f64::NAN, 3.0);
        assert!(lon.is_nan() && lat.is_nan());
        let field = Array3::<f64>::zeros((4, 4, 3));
        let (v, f) = interpolate3d(1.0, f64::NAN, 0.5, &field);
        assert!(v.is_nan() && f.is_nan());
    }

    #[test]
    fn test_index_convention_roundtrip_exact() {
        for (x, y) in [(0.0, 0.0), (3.25, 7.5), (-1.0, 999.0)] {
            let (xe, ye) = convert_index_convention(IndexConvention::ToEngine, x, y);
            let (x2, y2) = convert_index_convention(IndexConvention::FromEngine, xe, ye);
            assert_eq!(x, x2);
            assert_eq!(y, y2);
        }
    }

    #[test]
    fn test_interpolate3d_linear_field() {
        // field(i, j, k) = k over a 5x5 column of 4 edges: the sample at
        // fractional z must reproduce z and the fractional remainder.
        let field = Array3::from_shape_fn((5, 5, 4), |(_, _, k)| k as f64);
        let (v, fz) = interpolate3d(2.5, 1.5, 1.25, &field);
        assert!((v - 1.25).abs() < TOL);
        assert!((fz - 0.25).abs() < TOL);

        // Clamped above the top edge.
        let (v, _) = interpolate3d(2.0, 2.0, 9.0, &field);
        assert!((v - 3.0).abs() < TOL);
    }

    #[test]
    fn test_interpolate3d_out_of_plane_is_nan() {
        let field = Array3::<f64>::zeros((4, 4, 3));
        let (v, fz) = interpolate3d(-0.5, 1.0, 0.5, &field);
        assert!(v.is_nan() && fz.is_nan());
    }
}
