//! Radiative side of the engine: the Planck model and the
//! column-density ↔ radiance-difference lookup table built on it.

pub mod lookup;
pub mod planck;

pub use lookup::{filter_response, LookupTable, TableShape, TableSpec};
pub use planck::{inverse_temperature, radiance, SensorCalibration};
