//! Geographic to planar coordinate projection.
//!
//! Grid coordinate arrays are stored in a projected plane (metres). Seed
//! positions arrive as WGS84 lon/lat and final trajectories may be reported
//! in lon/lat, so the grid carries a projection for the round trip.
//!
//! The tangent-plane projection here is accurate to ~0.1% within 50 km of
//! its reference point, which covers the regional model domains this crate
//! targets. Idealized grids simply carry no projection.

use std::f64::consts::PI;

/// Bidirectional mapping between geographic and projected coordinates.
pub trait CoordinateProjection {
    /// Geographic (lon, lat) in degrees to projected (x, y) in metres.
    fn geo_to_xy(&self, lon: f64, lat: f64) -> (f64, f64);

    /// Projected (x, y) in metres back to geographic (lon, lat).
    fn xy_to_geo(&self, x: f64, y: f64) -> (f64, f64);
}

/// Flat-plane projection tangent at a reference point.
///
/// Scale factors account for the WGS84 ellipsoid's radii of curvature at
/// the reference latitude, so the distortion over a regional domain stays
/// far below the grid resolution.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    ref_lon: f64,
    ref_lat: f64,
    /// Metres per degree of latitude at the reference point.
    m_per_deg_lat: f64,
    /// Metres per degree of longitude at the reference latitude.
    m_per_deg_lon: f64,
}

impl LocalProjection {
    /// WGS84 equatorial radius (m).
    const A: f64 = 6_378_137.0;
    /// WGS84 flattening.
    const F: f64 = 1.0 / 298.257_223_563;

    /// Build a projection centered at (`ref_lon`, `ref_lat`) degrees.
    pub fn new(ref_lon: f64, ref_lat: f64) -> Self {
        let lat_rad = ref_lat * PI / 180.0;
        let e2 = 2.0 * Self::F - Self::F * Self::F;
        let sin2 = lat_rad.sin() * lat_rad.sin();

        // Meridional and prime-vertical radii of curvature.
        let rho = Self::A * (1.0 - e2) / (1.0 - e2 * sin2).powf(1.5);
        let nu = Self::A / (1.0 - e2 * sin2).sqrt();

        Self {
            ref_lon,
            ref_lat,
            m_per_deg_lat: rho * PI / 180.0,
            m_per_deg_lon: nu * lat_rad.cos() * PI / 180.0,
        }
    }

    /// Reference point (lon, lat) in degrees.
    pub fn reference(&self) -> (f64, f64) {
        (self.ref_lon, self.ref_lat)
    }
}

impl CoordinateProjection for LocalProjection {
    fn geo_to_xy(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.ref_lon) * self.m_per_deg_lon,
            (lat - self.ref_lat) * self.m_per_deg_lat,
        )
    }

    fn xy_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.ref_lon + x / self.m_per_deg_lon,
            self.ref_lat + y / self.m_per_deg_lat,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn test_roundtrip_near_reference() {
        let proj = LocalProjection::new(-94.5, 27.8);
        for (lon, lat) in [
            (-94.5, 27.8),
            (-94.2, 28.0),
            (-94.9, 27.5),
            (-94.5, 28.3),
        ] {
            let (x, y) = proj.geo_to_xy(lon, lat);
            let (lon2, lat2) = proj.xy_to_geo(x, y);
            assert!((lon - lon2).abs() < TOL, "lon {} -> {}", lon, lon2);
            assert!((lat - lat2).abs() < TOL, "lat {} -> {}", lat, lat2);
        }
    }

    #[test]
    fn test_scale_factors_plausible() {
        // At 28°N a degree of latitude is ~110.8 km, a degree of
        // longitude ~98.4 km.
        let proj = LocalProjection::new(-94.5, 28.0);
        let (dx, _) = proj.geo_to_xy(-93.5, 28.0);
        let (_, dy) = proj.geo_to_xy(-94.5, 29.0);
        assert!((dx - 98_400.0).abs() < 1_000.0, "lon scale {}", dx);
        assert!((dy - 110_800.0).abs() < 1_000.0, "lat scale {}", dy);
    }

    #[test]
    fn test_nan_passthrough() {
        let proj = LocalProjection::new(-94.5, 28.0);
        let (x, y) = proj.geo_to_xy(f64::NAN, 28.0);
        assert!(x.is_nan());
        assert!(!y.is_nan());
    }
}
