//! NetCDF trajectory output.
//!
//! One file per run: `drifter` and `sample` dimensions, position/depth/time
//! variables, CF-style metadata. Variable names and units follow the
//! configured output coordinate system.

use std::path::{Path, PathBuf};

use chrono::Utc;
use netcdf::create;

use crate::simulation::Trajectories;
use crate::types::OutputCoords;

use super::{TrackWriteError, TrackWriter};

/// Writer producing one NetCDF file of finalized trajectories.
pub struct NetcdfTrackWriter {
    path: PathBuf,
}

impl NetcdfTrackWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Names and units of the two horizontal position variables for a
    /// coordinate system.
    fn position_vars(coords: OutputCoords) -> [(&'static str, &'static str); 2] {
        match coords {
            OutputCoords::Geographic => [("lon", "degrees_east"), ("lat", "degrees_north")],
            OutputCoords::Projected => [("x", "m"), ("y", "m")],
            OutputCoords::GridIndex => [("xg", "1"), ("yg", "1")],
        }
    }
}

impl TrackWriter for NetcdfTrackWriter {
    fn save(&mut self, tracks: &Trajectories) -> Result<(), TrackWriteError> {
        let n = tracks.n_particles();
        let samples = tracks.n_samples();
        if n == 0 || samples == 0 {
            return Err(TrackWriteError::InvalidData(
                "no trajectories to write".to_string(),
            ));
        }

        let mut file = create(&self.path)?;
        file.add_dimension("drifter", n)?;
        file.add_dimension("sample", samples)?;

        file.add_attribute("Conventions", "CF-1.8")?;
        file.add_attribute("title", tracks.name.as_str())?;
        let now = Utc::now();
        file.add_attribute(
            "history",
            format!(
                "{}: Created by drift-rs",
                now.format("%Y-%m-%d %H:%M:%S UTC")
            )
            .as_str(),
        )?;

        let [(xname, xunits), (yname, yunits)] = Self::position_vars(tracks.coords);
        let dims = ["drifter", "sample"];

        {
            let mut var = file.add_variable::<f64>(xname, &dims)?;
            var.put_attribute("long_name", "trajectory x position")?;
            var.put_attribute("units", xunits)?;
            let flat: Vec<f64> = tracks.lon.iter().copied().collect();
            var.put_values(&flat, (.., ..))?;
        }
        {
            let mut var = file.add_variable::<f64>(yname, &dims)?;
            var.put_attribute("long_name", "trajectory y position")?;
            var.put_attribute("units", yunits)?;
            let flat: Vec<f64> = tracks.lat.iter().copied().collect();
            var.put_values(&flat, (.., ..))?;
        }
        {
            let mut var = file.add_variable::<f64>("z", &dims)?;
            var.put_attribute("long_name", "trajectory vertical position")?;
            var.put_attribute("units", "m")?;
            var.put_attribute("positive", "up")?;
            let flat: Vec<f64> = tracks.z.iter().copied().collect();
            var.put_values(&flat, (.., ..))?;
        }
        {
            let mut var = file.add_variable::<f64>("time", &dims)?;
            var.put_attribute("standard_name", "time")?;
            var.put_attribute("long_name", "time since the dataset epoch")?;
            var.put_attribute("units", "s")?;
            let flat: Vec<f64> = tracks.t.iter().copied().collect();
            var.put_values(&flat, (.., ..))?;
        }

        if let Some((u, v)) = &tracks.transport {
            let mut uvar = file.add_variable::<f64>("transport_u", &["drifter"])?;
            uvar.put_attribute("long_name", "accumulated x-direction transport")?;
            uvar.put_attribute("units", "m3 s-1")?;
            uvar.put_values(u, ..)?;

            let mut vvar = file.add_variable::<f64>("transport_v", &["drifter"])?;
            vvar.put_attribute("long_name", "accumulated y-direction transport")?;
            vvar.put_attribute("units", "m3 s-1")?;
            vvar.put_values(v, ..)?;
        }

        log::info!(
            "wrote {} trajectories x {} samples to {}",
            n,
            samples,
            self.path.display()
        );
        Ok(())
    }
}
