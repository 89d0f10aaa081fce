//! Run parameters.
//!
//! A run is described by one JSON document (`params.json` in a case
//! directory). Every field is optional; missing fields take the values of
//! the reference camera set-up.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatorConfig;
use crate::convert::DEFAULT_CALIBRATION_DIVISOR;
use crate::error::{EngineError, Result};
use crate::flux::{default_boxes, FluxBox, FluxGeometry};
use crate::physics::lookup::MAX_TABLE_ROWS;
use crate::physics::{SensorCalibration, TableSpec};
use crate::quality::QualityThresholds;

/// Default file name of a case's parameter document.
pub const PARAMS_FILE: &str = "params.json";

// ---------------------------------------------------------------------------
// Camera geometry
// ---------------------------------------------------------------------------

/// Optics of the camera, from which the on-plume pixel size follows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraGeometry {
    /// Distance from the camera to the plume plane (m).
    pub distance_m: f64,
    /// Horizontal field of view (degrees).
    pub fov_deg: f64,
    /// Horizontal sensor resolution (pixels).
    pub sensor_width_px: u32,
}

impl CameraGeometry {
    /// `2 · distance · tan(fov / 2) / sensor_width`.
    pub fn pixel_size(&self) -> Result<f64> {
        let valid = self.distance_m.is_finite()
            && self.distance_m > 0.0
            && self.fov_deg > 0.0
            && self.fov_deg < 180.0
            && self.sensor_width_px > 0;
        if !valid {
            return Err(EngineError::InvalidInput(format!(
                "camera geometry out of range: distance {} m, fov {}°, width {} px",
                self.distance_m, self.fov_deg, self.sensor_width_px
            )));
        }
        let half_fov = (self.fov_deg / 2.0).to_radians();
        Ok(2.0 * self.distance_m * half_fov.tan() / self.sensor_width_px as f64)
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Every tunable of one quantification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Background temperature (K). Derived from `background_counts` when absent.
    pub tb: Option<f64>,
    /// Gas temperature (K). Derived from `gas_counts` when absent.
    pub tg: Option<f64>,
    /// Raw sensor reading of the background.
    pub background_counts: Option<f64>,
    /// Raw sensor reading inside the plume.
    pub gas_counts: Option<f64>,

    /// Sensor units per unit ΔI.
    pub calibration_divisor: f64,
    /// CL axis spacing of the lookup table (ppm·m).
    pub cl_step: f64,
    /// Exclusive end of the CL axis (ppm·m).
    pub cl_max: f64,

    /// Pixel edge length on the plume plane (m); overridden by the camera
    /// geometry when `distance_m` and `fov_deg` are both given.
    pub pixel_size_m: f64,
    pub distance_m: Option<f64>,
    pub fov_deg: Option<f64>,
    pub sensor_width_px: u32,

    pub frame_interval_s: f64,
    pub ppm_to_kg_m2: f64,
    pub boxes: Vec<FluxBox>,

    pub window_size: usize,
    pub frames_per_group: usize,
    /// Frames whose flow fragmentation exceeds this are discarded.
    pub fragmentation_threshold: f64,
    pub min_flow_magnitude: f32,
    pub min_cl: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        let geometry = FluxGeometry::default();
        let thresholds = QualityThresholds::default();
        let aggregation = AggregatorConfig::default();
        Self {
            tb: None,
            tg: None,
            background_counts: None,
            gas_counts: None,
            calibration_divisor: DEFAULT_CALIBRATION_DIVISOR,
            cl_step: 10_000.0,
            cl_max: 30_000_000.0,
            pixel_size_m: geometry.pixel_size_m,
            distance_m: None,
            fov_deg: None,
            sensor_width_px: 320,
            frame_interval_s: geometry.frame_interval_s,
            ppm_to_kg_m2: geometry.ppm_to_kg_m2,
            boxes: default_boxes(),
            window_size: aggregation.window_size,
            frames_per_group: aggregation.frames_per_group,
            fragmentation_threshold: 15.0,
            min_flow_magnitude: thresholds.min_flow_magnitude,
            min_cl: thresholds.min_cl,
        }
    }
}

impl RunConfig {
    /// Read a parameter document. Unknown fields are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| EngineError::unreadable(path, e))?;
        config.validate()?;
        log::debug!("loaded run parameters from {}", path.display());
        Ok(config)
    }

    /// Parameters of `dir/params.json`, or the defaults if the file is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(PARAMS_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            log::info!("no {} in {}, using defaults", PARAMS_FILE, dir.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidInput(format!("{name} must be positive, got {v}")))
            }
        };
        positive("calibration_divisor", self.calibration_divisor)?;
        positive("cl_step", self.cl_step)?;
        positive("cl_max", self.cl_max)?;
        positive("pixel_size_m", self.pixel_size_m)?;
        positive("frame_interval_s", self.frame_interval_s)?;
        positive("ppm_to_kg_m2", self.ppm_to_kg_m2)?;
        if (self.cl_max / self.cl_step).ceil() > MAX_TABLE_ROWS as f64 {
            return Err(EngineError::InvalidInput(format!(
                "cl_max / cl_step gives more than {MAX_TABLE_ROWS} table rows"
            )));
        }
        if self.window_size == 0 || self.frames_per_group == 0 {
            return Err(EngineError::InvalidInput(
                "window_size and frames_per_group must be positive".into(),
            ));
        }
        if self.boxes.iter().any(|b| b.half_width <= 0) {
            return Err(EngineError::InvalidInput(
                "flux box half widths must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn camera(&self) -> Option<CameraGeometry> {
        Some(CameraGeometry {
            distance_m: self.distance_m?,
            fov_deg: self.fov_deg?,
            sensor_width_px: self.sensor_width_px,
        })
    }

    /// Effective pixel size (m).
    pub fn pixel_size(&self) -> Result<f64> {
        match self.camera() {
            Some(camera) => camera.pixel_size(),
            None => Ok(self.pixel_size_m),
        }
    }

    /// `(Tb, Tg)` in kelvin, converting raw counts where a temperature is
    /// not given directly.
    pub fn temperatures(&self, calibration: &SensorCalibration) -> Result<(f64, f64)> {
        let resolve = |name: &str, kelvin: Option<f64>, counts: Option<f64>| match (kelvin, counts) {
            (Some(t), _) => Ok(t),
            (None, Some(c)) => calibration.temperature_from_counts(c),
            (None, None) => Err(EngineError::InvalidInput(format!(
                "{name} temperature needs either a value or sensor counts"
            ))),
        };
        let tb = resolve("background", self.tb, self.background_counts)?;
        let tg = resolve("gas", self.tg, self.gas_counts)?;
        Ok((tb, tg))
    }

    pub fn table_spec(&self, calibration: &SensorCalibration) -> Result<TableSpec> {
        let (background_temperature, gas_temperature) = self.temperatures(calibration)?;
        Ok(TableSpec {
            background_temperature,
            gas_temperature,
            cl_max: self.cl_max,
            cl_step: self.cl_step,
        })
    }

    pub fn flux_geometry(&self) -> Result<FluxGeometry> {
        Ok(FluxGeometry {
            pixel_size_m: self.pixel_size()?,
            frame_interval_s: self.frame_interval_s,
            ppm_to_kg_m2: self.ppm_to_kg_m2,
        })
    }

    pub fn quality_thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            min_cl: self.min_cl,
            min_flow_magnitude: self.min_flow_magnitude,
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            window_size: self.window_size,
            frames_per_group: self.frames_per_group,
            frame_interval_s: self.frame_interval_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_match_reference_setup() {
        let c = RunConfig::default();
        assert_eq!(c.calibration_divisor, 30724.0);
        assert_eq!(c.window_size, 30);
        assert_eq!(c.frames_per_group, 3);
        assert_eq!(c.fragmentation_threshold, 15.0);
        assert_eq!(c.boxes.len(), 3);
        assert_eq!(c.pixel_size().unwrap(), 0.002);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let c: RunConfig = serde_json::from_str(r#"{"tb": 317.5, "window_size": 12}"#).unwrap();
        assert_eq!(c.tb, Some(317.5));
        assert_eq!(c.window_size, 12);
        assert_eq!(c.frame_interval_s, 0.04);
        assert_eq!(c.cl_step, 10_000.0);
    }

    #[test]
    fn camera_geometry_sets_pixel_size() {
        let c = RunConfig {
            distance_m: Some(2.0),
            fov_deg: Some(90.0),
            ..RunConfig::default()
        };
        // 2 · 2 · tan(45°) / 320
        assert_relative_eq!(c.pixel_size().unwrap(), 4.0 / 320.0, max_relative = 1e-12);
    }

    #[test]
    fn bad_geometry_is_rejected() {
        let camera = CameraGeometry {
            distance_m: -1.0,
            fov_deg: 24.0,
            sensor_width_px: 320,
        };
        assert!(camera.pixel_size().is_err());
    }

    #[test]
    fn temperatures_come_from_counts_when_missing() {
        let calibration = SensorCalibration::default();
        let c = RunConfig {
            tg: Some(300.0),
            background_counts: Some(12000.0),
            ..RunConfig::default()
        };
        let (tb, tg) = c.temperatures(&calibration).unwrap();
        assert_eq!(tg, 300.0);
        assert_relative_eq!(
            tb,
            calibration.temperature_from_counts(12000.0).unwrap(),
            max_relative = 1e-12
        );

        assert!(RunConfig::default().temperatures(&calibration).is_err());
    }

    #[test]
    fn non_positive_values_fail_validation() {
        let c = RunConfig {
            frame_interval_s: 0.0,
            ..RunConfig::default()
        };
        assert!(matches!(c.validate(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn tiny_cl_step_fails_validation() {
        let c = RunConfig {
            cl_step: 0.01,
            ..RunConfig::default()
        };
        assert!(matches!(c.validate(), Err(EngineError::InvalidInput(_))));
    }
}
