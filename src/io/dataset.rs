//! ROMS-format NetCDF dataset access.
//!
//! [`RomsGridReader`] loads the static grid description (coordinates, mask,
//! bathymetry, cell metrics) and [`RomsDataset`] serves velocity snapshots
//! one time record at a time, converting velocities to the volumetric
//! fluxes the advection engine works in.
//!
//! File arrays are stored `[eta][xi]` (y-major); everything is transposed
//! into the crate's (nx, ny) layout on read. Packed `i16` variables are
//! unpacked with `scale_factor`/`add_offset`, and fill values become NaN so
//! they propagate through interpolation instead of poisoning positions
//! silently.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};

use crate::fields::FieldSnapshot;
use crate::grid::{CoordinateProjection, Grid, LocalProjection};
use crate::types::VerticalMode;

use super::{SnapshotError, SnapshotSource};

// ============================================================================
// Grid reader
// ============================================================================

/// Loader for the static grid variables of a ROMS output or grid file.
pub struct RomsGridReader;

impl RomsGridReader {
    /// Read the grid, wrapping any failure as a fatal run error.
    pub fn load(path: impl AsRef<Path>) -> Result<Grid, crate::error::TrackError> {
        Self::read(path).map_err(crate::error::TrackError::GridLoad)
    }

    /// Read the grid from a file holding `lon_rho`, `lat_rho`, `mask_rho`,
    /// `h`, `pm` and `pn`.
    ///
    /// The vertical layer count comes from the `s_rho` dimension when
    /// present, otherwise the grid is treated as single-layer. A local
    /// tangent-plane projection is anchored at the domain centroid.
    pub fn read(path: impl AsRef<Path>) -> Result<Grid, SnapshotError> {
        let file = netcdf::open(path)?;

        let (lon, ny, nx) = read_2d(&file, &["lon_rho", "lon"])?;
        let (lat, ny2, nx2) = read_2d(&file, &["lat_rho", "lat"])?;
        if (ny, nx) != (ny2, nx2) {
            return Err(SnapshotError::InvalidData(format!(
                "lon/lat shapes disagree: ({ny}, {nx}) vs ({ny2}, {nx2})"
            )));
        }
        let (h, _, _) = read_2d(&file, &["h"])?;
        let (mask, _, _) = read_2d(&file, &["mask_rho", "mask"])?;
        let (pm, _, _) = read_2d(&file, &["pm"])?;
        let (pn, _, _) = read_2d(&file, &["pn"])?;
        for (name, v) in [("h", &h), ("mask_rho", &mask), ("pm", &pm), ("pn", &pn)] {
            if v.len() != ny * nx {
                return Err(SnapshotError::InvalidData(format!(
                    "{name} does not match the lon_rho extent"
                )));
            }
        }

        let km = file
            .dimension("s_rho")
            .map(|d| d.len())
            .filter(|&n| n > 0)
            .unwrap_or(1);

        // Anchor the projection at the domain centroid.
        let n = (ny * nx) as f64;
        let lon0 = lon.iter().sum::<f64>() / n;
        let lat0 = lat.iter().sum::<f64>() / n;
        let projection = LocalProjection::new(lon0, lat0);

        // File layout is [eta][xi]; crate layout is (nx, ny).
        let at = |v: &[f64], i: usize, j: usize| v[j * nx + i];
        let mut x_rho = Array2::zeros((nx, ny));
        let mut y_rho = Array2::zeros((nx, ny));
        for i in 0..nx {
            for j in 0..ny {
                let (x, y) = projection.geo_to_xy(at(&lon, i, j), at(&lat, i, j));
                x_rho[[i, j]] = x;
                y_rho[[i, j]] = y;
            }
        }

        let grid = Grid {
            x_rho,
            y_rho,
            h: Array2::from_shape_fn((nx, ny), |(i, j)| at(&h, i, j)),
            kmt: Array2::from_shape_fn((nx, ny), |(i, j)| {
                if at(&mask, i, j) > 0.5 {
                    km
                } else {
                    0
                }
            }),
            km,
            dx_v: Array2::from_shape_fn((nx, ny), |(i, j)| 1.0 / at(&pm, i, j)),
            dy_u: Array2::from_shape_fn((nx, ny), |(i, j)| 1.0 / at(&pn, i, j)),
            dxdy: Array2::from_shape_fn((nx, ny), |(i, j)| {
                1.0 / (at(&pm, i, j) * at(&pn, i, j))
            }),
            projection: Some(projection),
        };
        if !grid.consistent() {
            return Err(SnapshotError::InvalidData(
                "grid arrays disagree in shape".to_string(),
            ));
        }
        log::info!(
            "loaded {} x {} grid with {} layers, anchored at ({:.3}, {:.3})",
            nx,
            ny,
            km,
            lon0,
            lat0
        );
        Ok(grid)
    }
}

// ============================================================================
// Snapshot source
// ============================================================================

/// Velocity snapshot source over one ROMS history/averages file.
///
/// The time coordinate and sigma edge levels are read at construction; the
/// heavy per-record variables are read lazily per [`SnapshotSource::read_fields`]
/// call, so only the buffer's two slots are ever resident.
pub struct RomsDataset {
    path: PathBuf,
    times: Vec<f64>,
    /// Edge sigma levels, km + 1 values from -1 (seabed) to 0 (surface).
    s_w: Vec<f64>,
}

impl RomsDataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref().to_path_buf();
        let file = netcdf::open(&path)?;

        let times = read_1d(&file, &["ocean_time", "time"])?;
        if times.is_empty() {
            return Err(SnapshotError::InvalidData(
                "dataset has no time records".to_string(),
            ));
        }

        // Fall back to uniform sigma levels when the file carries none.
        let s_w = match read_1d(&file, &["s_w"]) {
            Ok(s) if s.len() >= 2 => s,
            _ => {
                let km = file.dimension("s_rho").map(|d| d.len()).unwrap_or(1);
                (0..=km).map(|k| k as f64 / km as f64 - 1.0).collect()
            }
        };

        Ok(Self { path, times, s_w })
    }

    fn km(&self) -> usize {
        self.s_w.len() - 1
    }

    /// Vertical edge depths for one free-surface field: z_w = ζ + (ζ + h)·σ.
    fn edge_depths(&self, grid: &Grid, zeta: &Array2<f64>) -> Array3<f64> {
        let (nx, ny) = (grid.nx(), grid.ny());
        let km = self.km();
        Array3::from_shape_fn((nx, ny, km + 1), |(i, j, k)| {
            let z = zeta[[i, j]];
            z + (z + grid.h[[i, j]]) * self.s_w[k]
        })
    }
}

impl SnapshotSource for RomsDataset {
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
        grid: &Grid,
        vertical: &VerticalMode,
    ) -> Result<FieldSnapshot, SnapshotError> {
        if time_index >= self.times.len() {
            return Err(SnapshotError::TimeIndexOutOfRange {
                index: time_index,
                available: self.times.len(),
            });
        }
        let file = netcdf::open(&self.path)?;
        let (nx, ny) = (grid.nx(), grid.ny());
        let km = self.km();

        let zeta = read_record_2d(&file, &["zeta"], time_index, nx, ny)
            .unwrap_or_else(|_| Array2::zeros((nx, ny)));
        let u = read_record_3d(&file, &["u"], time_index, nx - 1, ny, km)?;
        let v = read_record_3d(&file, &["v"], time_index, nx, ny - 1, km)?;

        let zwt = self.edge_depths(grid, &zeta);
        let dzt =
            Array3::from_shape_fn((nx, ny, km), |(i, j, k)| zwt[[i, j, k + 1]] - zwt[[i, j, k]]);
        let zrt = Array3::from_shape_fn((nx, ny, km), |(i, j, k)| {
            0.5 * (zwt[[i, j, k]] + zwt[[i, j, k + 1]])
        });

        // Velocity to volumetric flux on the staggered edges. Land columns
        // carry zero flux so the engine's mask logic sees solid walls.
        let uf = Array3::from_shape_fn((nx - 1, ny, km), |(i, j, k)| {
            if !grid.is_wet(i, j) || !grid.is_wet(i + 1, j) {
                return 0.0;
            }
            let dz = 0.5 * (dzt[[i, j, k]] + dzt[[i + 1, j, k]]);
            let dy = 0.5 * (grid.dy_u[[i, j]] + grid.dy_u[[i + 1, j]]);
            u[[i, j, k]] * dz * dy
        });
        let vf = Array3::from_shape_fn((nx, ny - 1, km), |(i, j, k)| {
            if !grid.is_wet(i, j) || !grid.is_wet(i, j + 1) {
                return 0.0;
            }
            let dz = 0.5 * (dzt[[i, j, k]] + dzt[[i, j + 1, k]]);
            let dx = 0.5 * (grid.dx_v[[i, j]] + grid.dx_v[[i, j + 1]]);
            v[[i, j, k]] * dz * dx
        });

        let full = FieldSnapshot { uf, vf, dzt, zrt, zwt };
        match vertical {
            VerticalMode::Isoslice { layer } => {
                let l = *layer;
                if l >= km {
                    return Err(SnapshotError::InvalidData(format!(
                        "isoslice layer {l} out of range for {km} layers"
                    )));
                }
                Ok(extract_layer(&full, l))
            }
            _ => Ok(full),
        }
    }
}

/// Reduce a full-column snapshot to the single extracted layer an isoslice
/// run works in. The layer keeps its real edge depths; isoslice runs never
/// read them, since the fractional vertical position is pinned at 0.5.
fn extract_layer(full: &FieldSnapshot, layer: usize) -> FieldSnapshot {
    let (nxu, ny, _) = full.uf.dim();
    let (nx, nyv, _) = full.vf.dim();
    FieldSnapshot {
        uf: Array3::from_shape_fn((nxu, ny, 1), |(i, j, _)| full.uf[[i, j, layer]]),
        vf: Array3::from_shape_fn((nx, nyv, 1), |(i, j, _)| full.vf[[i, j, layer]]),
        dzt: Array3::from_shape_fn((nx, ny, 1), |(i, j, _)| full.dzt[[i, j, layer]]),
        zrt: Array3::from_shape_fn((nx, ny, 1), |(i, j, _)| full.zrt[[i, j, layer]]),
        zwt: Array3::from_shape_fn((nx, ny, 2), |(i, j, k)| full.zwt[[i, j, layer + k]]),
    }
}

// ============================================================================
// Variable readers
// ============================================================================

fn find_variable<'f>(
    file: &'f netcdf::File,
    names: &[&str],
) -> Result<netcdf::Variable<'f>, SnapshotError> {
    for name in names {
        if let Some(var) = file.variable(name) {
            return Ok(var);
        }
    }
    Err(SnapshotError::MissingVariable(names.join(" or ")))
}

fn read_1d(file: &netcdf::File, names: &[&str]) -> Result<Vec<f64>, SnapshotError> {
    let var = find_variable(file, names)?;
    Ok(var.get_values(..)?)
}

/// Read a full static 2D `[eta][xi]` variable; returns (flat, ny, nx).
fn read_2d(
    file: &netcdf::File,
    names: &[&str],
) -> Result<(Vec<f64>, usize, usize), SnapshotError> {
    let var = find_variable(file, names)?;
    let dims = var.dimensions();
    if dims.len() != 2 {
        return Err(SnapshotError::InvalidData(format!(
            "{} is not 2D",
            var.name()
        )));
    }
    let (ny, nx) = (dims[0].len(), dims[1].len());
    let data: Vec<f64> = var.get_values(..)?;
    Ok((data, ny, nx))
}

/// Unpack one flat record with scale/offset, mapping fills to NaN.
fn unpack_record<E>(var: &netcdf::Variable, slab: E) -> Result<Vec<f64>, SnapshotError>
where
    E: TryInto<netcdf::Extents> + Copy,
    E::Error: Into<netcdf::Error>,
{
    let scale = get_attr_f64(var, "scale_factor").unwrap_or(1.0);
    let offset = get_attr_f64(var, "add_offset").unwrap_or(0.0);
    let fill_i16 = get_attr_i16(var, "_FillValue").unwrap_or(i16::MAX);
    let fill_f64 = get_attr_f64(var, "_FillValue").unwrap_or(f64::MAX);

    if let Ok(raw) = var.get_values::<i16, _>(slab) {
        Ok(raw
            .iter()
            .map(|&v| {
                if v == fill_i16 {
                    f64::NAN
                } else {
                    v as f64 * scale + offset
                }
            })
            .collect())
    } else {
        let raw: Vec<f64> = var.get_values(slab)?;
        Ok(raw
            .iter()
            .map(|&v| {
                if !v.is_finite() || v == fill_f64 || v.abs() > 1e30 {
                    f64::NAN
                } else {
                    v * scale + offset
                }
            })
            .collect())
    }
}

/// One time record of a `[time][eta][xi]` variable into (nx, ny).
fn read_record_2d(
    file: &netcdf::File,
    names: &[&str],
    t: usize,
    nx: usize,
    ny: usize,
) -> Result<Array2<f64>, SnapshotError> {
    let var = find_variable(file, names)?;
    let flat = unpack_record(&var, (t, .., ..))?;
    if flat.len() != nx * ny {
        return Err(SnapshotError::InvalidData(format!(
            "{} record does not match the grid extent",
            var.name()
        )));
    }
    Ok(Array2::from_shape_fn((nx, ny), |(i, j)| flat[j * nx + i]))
}

/// One time record of a `[time][s][eta][xi]` variable into (nx, ny, km),
/// reordered so layer 0 is the deepest.
fn read_record_3d(
    file: &netcdf::File,
    names: &[&str],
    t: usize,
    nx: usize,
    ny: usize,
    km: usize,
) -> Result<Array3<f64>, SnapshotError> {
    let var = find_variable(file, names)?;
    if var.dimensions().len() == 3 {
        // Depth-averaged (2D) model output: one layer.
        let flat = unpack_record(&var, (t, .., ..))?;
        if km != 1 || flat.len() != nx * ny {
            return Err(SnapshotError::InvalidData(format!(
                "{} is 2D but {km} layers were expected",
                var.name()
            )));
        }
        return Ok(Array3::from_shape_fn((nx, ny, 1), |(i, j, _)| {
            flat[j * nx + i]
        }));
    }
    let flat = unpack_record(&var, (t, .., .., ..))?;
    if flat.len() != nx * ny * km {
        return Err(SnapshotError::InvalidData(format!(
            "{} record does not match the grid extent",
            var.name()
        )));
    }
    // ROMS orders s_rho from the seabed up already.
    Ok(Array3::from_shape_fn((nx, ny, km), |(i, j, k)| {
        flat[(k * ny + j) * nx + i]
    }))
}

fn get_attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Double(d) => Some(d),
            netcdf::AttributeValue::Float(f) => Some(f as f64),
            _ => None,
        })
}

fn get_attr_i16(var: &netcdf::Variable, name: &str) -> Option<i16> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Short(s) => Some(s),
            netcdf::AttributeValue::Int(i) => Some(i as i16),
            _ => None,
        })
}
