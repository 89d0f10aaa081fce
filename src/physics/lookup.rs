use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::planck::radiance;
use crate::data::model::AbsorptionSpectrum;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Optical response of the camera filter
// ---------------------------------------------------------------------------

/// Upper bound of the filter transmission.
pub const FILTER_CAP: f64 = 0.82;

/// Largest CL axis a table may have.
pub const MAX_TABLE_ROWS: usize = 1_000_000;

/// Empirical band-pass transmission of the camera filter at `wavelength_um`.
///
/// Cubic fit, clipped at [`FILTER_CAP`]. The fit is only meaningful inside
/// the 3.1–3.5 µm pass band and goes negative outside it; no lower clip is
/// applied.
pub fn filter_response(wavelength_um: f64) -> f64 {
    let x = wavelength_um;
    let fitted = 38.24031 * x * x * x - 406.65706 * x * x + 1434.81195 * x - 1679.70048;
    fitted.min(FILTER_CAP)
}

// ---------------------------------------------------------------------------
// Table generation parameters
// ---------------------------------------------------------------------------

/// Inputs of a lookup-table build.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Background temperature Tb (K).
    pub background_temperature: f64,
    /// Gas-cloud temperature Tg (K).
    pub gas_temperature: f64,
    /// Exclusive upper end of the CL axis (ppm·m).
    pub cl_max: f64,
    /// Spacing of the CL axis (ppm·m).
    pub cl_step: f64,
}

impl TableSpec {
    /// Number of rows: `ceil(cl_max / cl_step)`.
    pub fn rows(&self) -> usize {
        (self.cl_max / self.cl_step).ceil() as usize
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.background_temperature) || !positive(self.gas_temperature) {
            return Err(EngineError::InvalidInput(format!(
                "temperatures must be positive (Tb={}, Tg={})",
                self.background_temperature, self.gas_temperature
            )));
        }
        if !positive(self.cl_step) || !positive(self.cl_max) {
            return Err(EngineError::InvalidInput(format!(
                "CL axis needs positive max and step (max={}, step={})",
                self.cl_max, self.cl_step
            )));
        }
        if (self.cl_max / self.cl_step).ceil() > MAX_TABLE_ROWS as f64 {
            return Err(EngineError::InvalidInput(format!(
                "CL axis of {} / {} exceeds {MAX_TABLE_ROWS} rows",
                self.cl_max, self.cl_step
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LookupTable
// ---------------------------------------------------------------------------

/// Monotonicity classification of a table's ΔI column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableShape {
    /// Non-decreasing in CL: the whole table is invertible.
    Monotonic,
    /// Every ΔI is identical (e.g. Tb == Tg): nothing can be inverted.
    Degenerate,
    /// ΔI drops at `first_violation`; only the rows before it are used.
    NonMonotonic { first_violation: usize },
}

/// ΔI as a function of column density on the axis `CL_i = i · cl_step`.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    cl_step: f64,
    delta_i: Vec<f64>,
    /// Length of the leading non-decreasing run of `delta_i`.
    monotone_len: usize,
}

/// JSON sidecar stored next to a persisted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub cl_step: f64,
    pub len: usize,
    #[serde(default)]
    pub background_temperature: Option<f64>,
    #[serde(default)]
    pub gas_temperature: Option<f64>,
}

impl LookupTable {
    /// Integrate the radiance difference seen through the gas over the
    /// spectrum, once per CL row.
    ///
    /// For each row, the per-wavelength response is
    /// `min(1 - exp(-coef · 1e-6 · CL), filter(λ))` and
    /// `ΔI = Σ (B(λ, Tb) - B(λ, Tg)) · response · Δλ` over forward
    /// differences of the ascending wavelength axis.
    pub fn generate(spec: &TableSpec, spectrum: &AbsorptionSpectrum) -> Result<Self> {
        spec.validate()?;
        let axis = spectrum.to_wavelength_axis()?;
        let n = axis.wavelength_um.len();

        let filter: Vec<f64> = axis.wavelength_um.iter().map(|&w| filter_response(w)).collect();
        let contrast: Vec<f64> = axis
            .wavelength_um
            .iter()
            .map(|&w| {
                let wavelength_m = w * 1e-6;
                radiance(wavelength_m, spec.background_temperature)
                    - radiance(wavelength_m, spec.gas_temperature)
            })
            .collect();
        let spacing: Vec<f64> = axis
            .wavelength_um
            .windows(2)
            .map(|w| (w[1] - w[0]) * 1e-6)
            .collect();

        let delta_i: Vec<f64> = (0..spec.rows())
            .into_par_iter()
            .map(|row| {
                let cl = row as f64 * spec.cl_step;
                (0..n.saturating_sub(1))
                    .map(|j| {
                        let transmission = 1.0 - (-axis.coefficient[j] * 1e-6 * cl).exp();
                        contrast[j] * transmission.min(filter[j]) * spacing[j]
                    })
                    .sum()
            })
            .collect();

        let table = Self::from_delta_i(delta_i, spec.cl_step)?;
        match table.shape() {
            TableShape::Monotonic => {
                let top = table.delta_i[table.len() - 1];
                let saturated_from = table.delta_i.partition_point(|&d| d < top);
                log::info!(
                    "lookup table: {} rows, ΔI max {:.6e} reached at CL={} (Tb={} K, Tg={} K)",
                    table.len(),
                    top,
                    table.cl(saturated_from),
                    spec.background_temperature,
                    spec.gas_temperature
                )
            }
            TableShape::Degenerate => log::warn!(
                "lookup table is degenerate (Tb={} K, Tg={} K): ΔI is constant",
                spec.background_temperature,
                spec.gas_temperature
            ),
            TableShape::NonMonotonic { first_violation } => log::warn!(
                "lookup table ΔI decreases at row {first_violation} (CL={}); inversion limited to lower rows",
                table.cl(first_violation)
            ),
        }
        Ok(table)
    }

    /// Wrap an existing ΔI column.
    pub fn from_delta_i(delta_i: Vec<f64>, cl_step: f64) -> Result<Self> {
        if delta_i.is_empty() {
            return Err(EngineError::InvalidInput("lookup table has no rows".into()));
        }
        if !(cl_step.is_finite() && cl_step > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "CL step must be positive, got {cl_step}"
            )));
        }
        if let Some(i) = delta_i.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "lookup table row {i} is not finite"
            )));
        }
        let monotone_len = delta_i
            .windows(2)
            .position(|w| w[1] < w[0])
            .map(|i| i + 1)
            .unwrap_or(delta_i.len());
        Ok(Self {
            cl_step,
            delta_i,
            monotone_len,
        })
    }

    pub fn len(&self) -> usize {
        self.delta_i.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delta_i.is_empty()
    }

    pub fn cl_step(&self) -> f64 {
        self.cl_step
    }

    pub fn delta_i(&self) -> &[f64] {
        &self.delta_i
    }

    /// Column density of row `i` (ppm·m).
    pub fn cl(&self, i: usize) -> f64 {
        i as f64 * self.cl_step
    }

    pub fn cl_values(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.cl(i)).collect()
    }

    pub fn shape(&self) -> TableShape {
        let first = self.delta_i[0];
        if self.delta_i.iter().all(|&v| v == first) {
            TableShape::Degenerate
        } else if self.monotone_len < self.delta_i.len() {
            TableShape::NonMonotonic {
                first_violation: self.monotone_len,
            }
        } else {
            TableShape::Monotonic
        }
    }

    /// Fail unless at least two distinct ΔI values lead the table.
    pub fn ensure_invertible(&self) -> Result<()> {
        let prefix = &self.delta_i[..self.monotone_len];
        match self.shape() {
            TableShape::Degenerate => Err(EngineError::DegenerateLookupTable(
                "ΔI is constant over CL (background and gas temperatures equal?)".into(),
            )),
            _ if prefix.first() == prefix.last() => Err(EngineError::DegenerateLookupTable(
                "ΔI decreases before it ever increases".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Column density producing `delta_i`, by piecewise-linear inversion.
    ///
    /// Only the leading non-decreasing rows take part, so a non-monotone
    /// table resolves to its lowest-CL branch. Values outside the ΔI range
    /// clamp to the first/last usable row. Within an interior flat run the
    /// lowest CL wins; at or above the top ΔI the result is the last usable
    /// row, so a saturated tail maps to its highest CL.
    pub fn cl_for_delta_i(&self, delta_i: f64) -> f64 {
        let usable = &self.delta_i[..self.monotone_len];
        let last = usable.len() - 1;
        if delta_i >= usable[last] {
            return self.cl(last);
        }
        let idx = usable.partition_point(|&d| d < delta_i);
        if idx == 0 {
            return self.cl(0);
        }
        let (d0, d1) = (usable[idx - 1], usable[idx]);
        let t = (delta_i - d0) / (d1 - d0);
        self.cl(idx - 1) + t * self.cl_step
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Path of the JSON sidecar for a table stored at `path`.
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Write ΔI as little-endian `f32` plus the JSON sidecar.
    pub fn save(&self, path: &Path, spec: Option<&TableSpec>) -> Result<()> {
        let bytes: Vec<u8> = self
            .delta_i
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect();
        fs::write(path, bytes).map_err(|e| EngineError::io(path, e))?;

        let metadata = TableMetadata {
            cl_step: self.cl_step,
            len: self.len(),
            background_temperature: spec.map(|s| s.background_temperature),
            gas_temperature: spec.map(|s| s.gas_temperature),
        };
        let sidecar = Self::sidecar_path(path);
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        fs::write(&sidecar, json).map_err(|e| EngineError::io(&sidecar, e))?;
        log::debug!("saved lookup table ({} rows) to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a persisted table.
    ///
    /// The CL step comes from the sidecar when one exists, otherwise
    /// `fallback_step` is used.
    pub fn load(path: &Path, fallback_step: f64) -> Result<Self> {
        if !path.is_file() {
            return Err(EngineError::MissingLookupTable(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|e| EngineError::unreadable(path, e))?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(EngineError::unreadable(
                path,
                format!("{} bytes is not a whole number of f32 values", bytes.len()),
            ));
        }
        let delta_i: Vec<f64> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect();

        let sidecar = Self::sidecar_path(path);
        let cl_step = match fs::read_to_string(&sidecar) {
            Ok(text) => {
                let metadata: TableMetadata = serde_json::from_str(&text)
                    .map_err(|e| EngineError::unreadable(&sidecar, e))?;
                if metadata.len != delta_i.len() {
                    log::warn!(
                        "{} declares {} rows, table has {}",
                        sidecar.display(),
                        metadata.len,
                        delta_i.len()
                    );
                }
                metadata.cl_step
            }
            Err(_) => fallback_step,
        };

        Self::from_delta_i(delta_i, cl_step).map_err(|e| EngineError::unreadable(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn band_spectrum() -> AbsorptionSpectrum {
        // 3.20 – 3.45 µm, inside the filter pass band.
        let wavenumber: Vec<f64> = (0..26).map(|i| 10_000.0 / (3.20 + 0.01 * i as f64)).collect();
        let coefficient = vec![0.8; wavenumber.len()];
        AbsorptionSpectrum::new(wavenumber, coefficient).unwrap()
    }

    fn spec(tb: f64, tg: f64) -> TableSpec {
        TableSpec {
            background_temperature: tb,
            gas_temperature: tg,
            cl_max: 3_000_000.0,
            cl_step: 10_000.0,
        }
    }

    #[test]
    fn filter_response_is_capped_in_band() {
        assert_abs_diff_eq!(filter_response(3.3), FILTER_CAP);
        assert!(filter_response(3.2) > 0.5 && filter_response(3.2) < FILTER_CAP);
        assert!(filter_response(3.0) < 0.0);
    }

    #[test]
    fn warm_background_gives_non_negative_increasing_table() {
        let table = LookupTable::generate(&spec(317.55, 313.15), &band_spectrum()).unwrap();
        assert_eq!(table.len(), 300);
        assert_eq!(table.delta_i()[0], 0.0);
        assert!(table.delta_i().iter().all(|&d| d >= 0.0));
        assert_eq!(table.shape(), TableShape::Monotonic);
    }

    #[test]
    fn spectrum_order_does_not_change_the_table() {
        let forward = band_spectrum();
        let reversed = AbsorptionSpectrum::new(
            forward.wavenumber.iter().rev().copied().collect(),
            forward.coefficient.iter().rev().copied().collect(),
        )
        .unwrap();
        let a = LookupTable::generate(&spec(317.55, 313.15), &forward).unwrap();
        let b = LookupTable::generate(&spec(317.55, 313.15), &reversed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn equal_temperatures_give_degenerate_table() {
        let table = LookupTable::generate(&spec(300.0, 300.0), &band_spectrum()).unwrap();
        assert!(table.delta_i().iter().all(|&d| d == 0.0));
        assert_eq!(table.shape(), TableShape::Degenerate);
        assert!(matches!(
            table.ensure_invertible(),
            Err(EngineError::DegenerateLookupTable(_))
        ));
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let mut bad = spec(317.55, 313.15);
        bad.cl_step = 0.0;
        assert!(LookupTable::generate(&bad, &band_spectrum()).is_err());
        let cold = spec(0.0, 313.15);
        assert!(LookupTable::generate(&cold, &band_spectrum()).is_err());
    }

    #[test]
    fn inversion_clamps_and_interpolates() {
        let table = LookupTable::from_delta_i(vec![0.0, 1.0, 3.0, 4.0], 100.0).unwrap();
        assert_eq!(table.cl_for_delta_i(-5.0), 0.0);
        assert_eq!(table.cl_for_delta_i(0.0), 0.0);
        assert_eq!(table.cl_for_delta_i(4.0), 300.0);
        assert_eq!(table.cl_for_delta_i(10.0), 300.0);
        assert_relative_eq!(table.cl_for_delta_i(0.5), 50.0);
        assert_relative_eq!(table.cl_for_delta_i(2.0), 150.0);
    }

    #[test]
    fn flat_runs_resolve_to_lowest_cl() {
        let table = LookupTable::from_delta_i(vec![0.0, 2.0, 2.0, 2.0, 5.0], 10.0).unwrap();
        assert_eq!(table.cl_for_delta_i(2.0), 10.0);
        assert_relative_eq!(table.cl_for_delta_i(3.5), 35.0);
    }

    #[test]
    fn saturated_tail_maps_top_to_last_row() {
        let table = LookupTable::from_delta_i(vec![0.0, 1.0, 2.0, 2.0, 2.0], 100.0).unwrap();
        assert_eq!(table.shape(), TableShape::Monotonic);
        assert_eq!(table.cl_for_delta_i(2.0), 400.0);
        assert_eq!(table.cl_for_delta_i(2.0 + 1e-9), 400.0);
        assert_relative_eq!(table.cl_for_delta_i(1.5), 150.0);
    }

    #[test]
    fn generated_table_saturates_at_filter_cap() {
        let table = LookupTable::generate(&spec(317.55, 313.15), &band_spectrum()).unwrap();
        let d = table.delta_i();
        let top = d[d.len() - 1];
        assert_eq!(d[d.len() - 2], top);
        assert_eq!(table.cl_for_delta_i(top), table.cl(table.len() - 1));
    }

    #[test]
    fn oversized_cl_axis_is_rejected() {
        let mut fine = spec(317.55, 313.15);
        fine.cl_step = 1e-3;
        assert!(matches!(
            LookupTable::generate(&fine, &band_spectrum()),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn non_monotone_table_uses_leading_branch() {
        let table = LookupTable::from_delta_i(vec![0.0, 2.0, 4.0, 3.0, 6.0], 1.0).unwrap();
        assert_eq!(
            table.shape(),
            TableShape::NonMonotonic { first_violation: 3 }
        );
        assert!(table.ensure_invertible().is_ok());
        assert_eq!(table.cl_for_delta_i(5.0), 2.0);
        assert_relative_eq!(table.cl_for_delta_i(3.0), 1.5);
    }

    #[test]
    fn table_falling_from_first_row_is_not_invertible() {
        let table = LookupTable::from_delta_i(vec![1.0, 0.5, 0.2], 1.0).unwrap();
        assert!(table.ensure_invertible().is_err());
    }

    #[test]
    fn persisted_table_reloads_with_sidecar_step() {
        let dir = std::env::temp_dir().join(format!("leak-quant-lookup-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("d_i_cl.bin");

        let table = LookupTable::from_delta_i(vec![0.0, 0.25, 0.5, 1.0], 250.0).unwrap();
        table.save(&path, Some(&spec(317.55, 313.15))).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);

        let loaded = LookupTable::load(&path, 1.0).unwrap();
        assert_eq!(loaded, table);

        std::fs::remove_file(LookupTable::sidecar_path(&path)).unwrap();
        assert_eq!(LookupTable::load(&path, 7.0).unwrap().cl_step(), 7.0);
    }

    #[test]
    fn missing_table_is_reported() {
        let path = std::env::temp_dir().join("leak-quant-no-such-table.bin");
        assert!(matches!(
            LookupTable::load(&path, 100.0),
            Err(EngineError::MissingLookupTable(_))
        ));
    }
}
