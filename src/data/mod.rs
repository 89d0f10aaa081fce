/// Data layer: core types, artifact codecs, and spectrum loading.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv          .tif / .tiff              .flo
///        │                               │                      │
///        ▼                               ▼                      ▼
///   ┌──────────┐                   ┌──────────┐           ┌──────────┐
///   │  loader   │ → Absorption-    │  raster   │ ↔ Scalar- │   flo     │ ↔ FlowField
///   └──────────┘    Spectrum       └──────────┘   Map      └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  spectra, rasters, flow fields
///   └──────────┘
/// ```

pub mod flo;
pub mod loader;
pub mod model;
pub mod raster;
