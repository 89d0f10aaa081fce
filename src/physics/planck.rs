use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Physical constants (SI)
// ---------------------------------------------------------------------------

pub const PLANCK_H: f64 = 6.626070e-34;
pub const LIGHT_C: f64 = 2.997925e8;
pub const BOLTZMANN_K: f64 = 1.380649e-23;

/// Search interval for the inverse problem (K).
const T_MIN: f64 = 1.0;
const T_MAX: f64 = 10_000.0;
const T_TOLERANCE: f64 = 1e-9;
const MAX_ITERATIONS: usize = 200;

// ---------------------------------------------------------------------------
// Planck law
// ---------------------------------------------------------------------------

/// Spectral radiance (W·sr⁻¹·m⁻³) of a black body at `temperature` K,
/// evaluated at `wavelength` m.
///
/// Both arguments must be strictly positive; the expression is singular as
/// the temperature approaches zero.
pub fn radiance(wavelength: f64, temperature: f64) -> f64 {
    let prefactor = 2.0 * PLANCK_H * LIGHT_C * LIGHT_C / wavelength.powi(5);
    let exponent = PLANCK_H * LIGHT_C / (wavelength * BOLTZMANN_K * temperature);
    prefactor / exponent.exp_m1()
}

/// d radiance / dT, used for the Newton steps of [`inverse_temperature`].
fn radiance_slope(wavelength: f64, temperature: f64) -> f64 {
    let x = PLANCK_H * LIGHT_C / (wavelength * BOLTZMANN_K * temperature);
    let prefactor = 2.0 * PLANCK_H * LIGHT_C * LIGHT_C / wavelength.powi(5);
    let em1 = x.exp_m1();
    prefactor * x.exp() * x / (temperature * em1 * em1)
}

/// Solve `radiance(wavelength, T) == target` for T.
///
/// The radiance is strictly increasing in T, so the root is bracketed on
/// `[1 K, 10000 K]` and refined with safeguarded Newton steps starting from
/// `initial_guess`. A step leaving the bracket falls back to bisection.
pub fn inverse_temperature(wavelength: f64, target: f64, initial_guess: f64) -> Result<f64> {
    let non_physical = || EngineError::NonPhysicalRadiance {
        wavelength_m: wavelength,
        radiance: target,
    };

    if !(wavelength > 0.0) || !target.is_finite() || target <= 0.0 {
        return Err(non_physical());
    }

    let mut lo = T_MIN;
    let mut hi = T_MAX;
    if radiance(wavelength, lo) > target || radiance(wavelength, hi) < target {
        return Err(non_physical());
    }

    let mut t = if initial_guess > lo && initial_guess < hi {
        initial_guess
    } else {
        0.5 * (lo + hi)
    };

    for _ in 0..MAX_ITERATIONS {
        let residual = radiance(wavelength, t) - target;
        if residual == 0.0 {
            return Ok(t);
        }
        if residual > 0.0 {
            hi = t;
        } else {
            lo = t;
        }

        let slope = radiance_slope(wavelength, t);
        let newton = t - residual / slope;
        let next = if slope.is_finite() && slope > 0.0 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };

        if (next - t).abs() < T_TOLERANCE * t.max(1.0) {
            return Ok(next);
        }
        t = next;
    }

    if hi - lo < 1e-6 {
        Ok(0.5 * (lo + hi))
    } else {
        Err(non_physical())
    }
}

// ---------------------------------------------------------------------------
// Sensor calibration – raw counts ↔ radiance
// ---------------------------------------------------------------------------

/// Linear radiometric calibration of the camera at its effective wavelength.
///
/// `radiance = (counts - offset) / gain`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorCalibration {
    pub offset: f64,
    pub gain: f64,
    /// Effective band wavelength (m).
    pub wavelength_m: f64,
}

impl Default for SensorCalibration {
    fn default() -> Self {
        Self {
            offset: 8175.31,
            gain: 0.01875,
            wavelength_m: 3.25e-6,
        }
    }
}

impl SensorCalibration {
    pub fn radiance_from_counts(&self, counts: f64) -> f64 {
        (counts - self.offset) / self.gain
    }

    /// Brightness temperature (K) of a raw sensor reading.
    pub fn temperature_from_counts(&self, counts: f64) -> Result<f64> {
        let radiance = self.radiance_from_counts(counts);
        inverse_temperature(self.wavelength_m, radiance, 300.0)
    }
}
