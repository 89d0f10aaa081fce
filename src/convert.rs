use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::data::model::{ClMap, ForegroundFrame};
use crate::data::raster::{is_tiff, read_scalar_tiff, write_scalar_tiff};
use crate::error::{EngineError, Result};
use crate::matcher::frame_order_key;
use crate::physics::LookupTable;

/// Radiometric scale of the reference camera: sensor units per unit ΔI.
pub const DEFAULT_CALIBRATION_DIVISOR: f64 = 30724.0;

/// Suffix appended to a foreground stem to name its CL map.
pub const CL_SUFFIX: &str = "_CL";

// ---------------------------------------------------------------------------
// ClConverter – foreground frame → column density map
// ---------------------------------------------------------------------------

/// Converts foreground frames to CL maps through a lookup table.
#[derive(Debug, Clone)]
pub struct ClConverter {
    table: LookupTable,
    calibration_divisor: f64,
}

impl ClConverter {
    /// Fails on a table that cannot be inverted or a non-positive divisor.
    pub fn new(table: LookupTable, calibration_divisor: f64) -> Result<Self> {
        if !(calibration_divisor.is_finite() && calibration_divisor > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "calibration divisor must be positive, got {calibration_divisor}"
            )));
        }
        table.ensure_invertible()?;
        Ok(Self {
            table,
            calibration_divisor,
        })
    }

    pub fn table(&self) -> &LookupTable {
        &self.table
    }

    /// CL of a single raw foreground value.
    pub fn cl_for_raw(&self, raw: f32) -> f32 {
        let delta_i = raw as f64 / self.calibration_divisor;
        self.table.cl_for_delta_i(delta_i) as f32
    }

    pub fn convert(&self, frame: &ForegroundFrame) -> ClMap {
        frame.map(|raw| self.cl_for_raw(raw))
    }

    /// Convert one TIFF; the CL map lands in `out_dir` as `<stem>_CL.tif`.
    pub fn convert_file(&self, input: &Path, out_dir: &Path) -> Result<PathBuf> {
        let frame = read_scalar_tiff(input)?;
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EngineError::unreadable(input, "file name is not valid UTF-8"))?;
        let output = out_dir.join(format!("{stem}{CL_SUFFIX}.tif"));
        write_scalar_tiff(&output, &self.convert(&frame))?;
        Ok(output)
    }

    /// Convert every TIFF of `input_dir` into `out_dir`.
    ///
    /// Frames convert in parallel; the returned paths follow frame order
    /// (last digit run of the name, then the name). Frames that fail are
    /// logged and left out.
    pub fn convert_dir(&self, input_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir).map_err(|e| EngineError::io(out_dir, e))?;
        let inputs = list_frames(input_dir)?;

        let converted: Vec<Option<PathBuf>> = inputs
            .par_iter()
            .map(|input| match self.convert_file(input, out_dir) {
                Ok(path) => Some(path),
                Err(err) => {
                    log::warn!("skipping {}: {err}", input.display());
                    None
                }
            })
            .collect();

        let outputs: Vec<PathBuf> = converted.into_iter().flatten().collect();
        log::info!(
            "converted {}/{} foreground frames to CL maps in {}",
            outputs.len(),
            inputs.len(),
            out_dir.display()
        );
        Ok(outputs)
    }
}

/// TIFF files of `dir` in frame order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::io(dir, e))?;
    let mut frames = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EngineError::io(dir, e))?.path();
        if path.is_file() && is_tiff(&path) {
            frames.push(path);
        }
    }
    frames.sort_by_cached_key(|p| {
        frame_order_key(p.file_name().and_then(|n| n.to_str()).unwrap_or_default())
    });
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn converter() -> ClConverter {
        let table = LookupTable::from_delta_i(vec![0.0, 0.5, 1.0, 2.0], 100.0).unwrap();
        ClConverter::new(table, 10.0).unwrap()
    }

    #[test]
    fn boundary_values_clamp_to_table_ends() {
        let c = converter();
        assert_eq!(c.cl_for_raw(0.0), 0.0);
        assert_eq!(c.cl_for_raw(-40.0), 0.0);
        assert_eq!(c.cl_for_raw(20.0), 300.0);
        assert_eq!(c.cl_for_raw(1e9), 300.0);
    }

    #[test]
    fn interior_values_interpolate() {
        let c = converter();
        // raw 15 → ΔI 1.5 → halfway between CL 200 and 300.
        assert_relative_eq!(c.cl_for_raw(15.0), 250.0);
    }

    #[test]
    fn conversion_keeps_shape() {
        let frame = ForegroundFrame::new(2, 2, vec![0.0, 5.0, 10.0, 20.0]).unwrap();
        let cl = converter().convert(&frame);
        assert_eq!((cl.width(), cl.height()), (2, 2));
        assert_eq!(cl.data(), &[0.0, 100.0, 200.0, 300.0]);
    }

    #[test]
    fn degenerate_table_is_refused() {
        let table = LookupTable::from_delta_i(vec![0.0; 5], 100.0).unwrap();
        assert!(matches!(
            ClConverter::new(table, 10.0),
            Err(EngineError::DegenerateLookupTable(_))
        ));
    }

    #[test]
    fn directory_conversion_preserves_frame_order() {
        let root = std::env::temp_dir().join(format!("leak-quant-convert-{}", std::process::id()));
        let input = root.join("foreground");
        let output = root.join("CL");
        std::fs::create_dir_all(&input).unwrap();
        for n in [10, 2, 1] {
            let frame = ForegroundFrame::filled(3, 3, n as f32).unwrap();
            write_scalar_tiff(&input.join(format!("frame_{n}.tif")), &frame).unwrap();
        }
        std::fs::write(input.join("broken.tif"), b"not a tiff").unwrap();

        let written = converter().convert_dir(&input, &output).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_1_CL.tif", "frame_2_CL.tif", "frame_10_CL.tif"]);

        let cl = read_scalar_tiff(&written[2]).unwrap();
        assert!(cl.data().iter().all(|&v| v == 100.0));
    }
}
