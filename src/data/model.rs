use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// AbsorptionSpectrum – gas absorption coefficients on a wavenumber axis
// ---------------------------------------------------------------------------

/// Absorption spectrum of the target gas as delivered by the spectroscopy
/// database export.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsorptionSpectrum {
    /// Wavenumber axis (cm⁻¹).
    pub wavenumber: Vec<f64>,
    /// Absorption coefficient per (ppm·m)·10⁶, same length as `wavenumber`.
    pub coefficient: Vec<f64>,
}

/// Spectrum re-expressed on a strictly increasing wavelength axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralAxis {
    /// Wavelength (µm), strictly increasing.
    pub wavelength_um: Vec<f64>,
    pub coefficient: Vec<f64>,
}

impl AbsorptionSpectrum {
    pub fn new(wavenumber: Vec<f64>, coefficient: Vec<f64>) -> Result<Self> {
        if wavenumber.len() != coefficient.len() {
            return Err(EngineError::InvalidInput(format!(
                "spectrum has {} wavenumbers but {} coefficients",
                wavenumber.len(),
                coefficient.len()
            )));
        }
        if wavenumber.is_empty() {
            return Err(EngineError::InvalidInput("spectrum is empty".into()));
        }
        Ok(Self {
            wavenumber,
            coefficient,
        })
    }

    /// Number of spectral samples.
    pub fn len(&self) -> usize {
        self.wavenumber.len()
    }

    /// Whether the spectrum is empty.
    pub fn is_empty(&self) -> bool {
        self.wavenumber.is_empty()
    }

    /// Convert to wavelength (µm) and sort ascending.
    ///
    /// Integration downstream uses forward differences of the axis, so the
    /// order must be strictly increasing whatever order the export used.
    /// Duplicate wavelengths keep their first sample.
    pub fn to_wavelength_axis(&self) -> Result<SpectralAxis> {
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(self.len());
        for (i, (&nu, &coef)) in self.wavenumber.iter().zip(&self.coefficient).enumerate() {
            if !nu.is_finite() || nu <= 0.0 || !coef.is_finite() {
                return Err(EngineError::InvalidInput(format!(
                    "spectrum sample {i} is not usable (wavenumber {nu}, coefficient {coef})"
                )));
            }
            pairs.push((10_000.0 / nu, coef));
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        pairs.dedup_by(|later, earlier| later.0 == earlier.0);

        let (wavelength_um, coefficient) = pairs.into_iter().unzip();
        Ok(SpectralAxis {
            wavelength_um,
            coefficient,
        })
    }
}

// ---------------------------------------------------------------------------
// ScalarMap – single-channel f32 raster (foreground frames, CL maps)
// ---------------------------------------------------------------------------

/// Row-major single-channel raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

/// Background-subtracted thermal frame in sensor units.
pub type ForegroundFrame = ScalarMap;

/// Column density per pixel (ppm·m).
pub type ClMap = ScalarMap;

impl ScalarMap {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidInput(format!(
                "raster must not be empty ({width}x{height})"
            )));
        }
        if data.len() != width * height {
            return Err(EngineError::InvalidInput(format!(
                "raster {width}x{height} needs {} values, got {}",
                width * height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Result<Self> {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Apply `f` to every pixel, keeping the shape.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> ScalarMap {
        ScalarMap {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowField – per-pixel (u, v) displacement
// ---------------------------------------------------------------------------

/// Optical-flow displacement field, pixels per frame interval.
///
/// Stored interleaved as `[u0, v0, u1, v1, ...]` in row-major order, the
/// same layout as the `.flo` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FlowField {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidInput(format!(
                "flow field must not be empty ({width}x{height})"
            )));
        }
        if data.len() != width * height * 2 {
            return Err(EngineError::InvalidInput(format!(
                "flow field {width}x{height} needs {} values, got {}",
                width * height * 2,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Flow field with the same vector at every pixel.
    pub fn uniform(width: usize, height: usize, u: f32, v: f32) -> Result<Self> {
        let data = std::iter::repeat([u, v])
            .take(width * height)
            .flatten()
            .collect();
        Self::new(width, height, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn vector(&self, row: usize, col: usize) -> (f32, f32) {
        let i = 2 * (row * self.width + col);
        (self.data[i], self.data[i + 1])
    }

    /// Iterate `(u, v)` pairs in row-major order.
    pub fn vectors(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.data.chunks_exact(2).map(|uv| (uv[0], uv[1]))
    }

    /// Vector magnitude per pixel, row-major.
    pub fn magnitudes(&self) -> Vec<f32> {
        self.vectors().map(|(u, v)| u.hypot(v)).collect()
    }

    /// Whether this field covers the same pixel grid as `map`.
    pub fn matches_shape(&self, map: &ScalarMap) -> bool {
        self.width == map.width() && self.height == map.height()
    }
}
