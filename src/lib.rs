//! Gas leakage-rate estimation from infrared video.
//!
//! A radiative lookup table relates the radiance drop behind a gas plume to
//! its column density (CL). Foreground frames are converted to CL maps with
//! that table, paired with optical-flow fields, integrated through control
//! boxes into per-frame mass flux, and the noisy flux sequence is reduced to
//! one leakage rate (kg/h) by a quality-gated sliding window.
//!
//! Layers, leaves first:
//! - [`physics`] – Planck radiance, sensor calibration, lookup tables.
//! - [`data`] – in-memory rasters and flow fields plus their file formats.
//! - [`convert`], [`matcher`], [`flux`], [`quality`], [`aggregate`] – the
//!   per-frame and per-sequence stages.
//! - [`pipeline`] – orchestration of a full run, with [`config`] and
//!   [`state`] for its parameters and bookkeeping.

pub mod aggregate;
pub mod color;
pub mod config;
pub mod convert;
pub mod data;
pub mod error;
pub mod flux;
pub mod matcher;
pub mod physics;
pub mod pipeline;
pub mod quality;
pub mod state;

pub use aggregate::{AggregatorConfig, FluxSample, TemporalAggregator, WindowEstimate};
pub use config::{CameraGeometry, RunConfig};
pub use convert::ClConverter;
pub use error::{EngineError, Result};
pub use flux::{frame_flux, FluxBox, FluxGeometry};
pub use matcher::{Correspondence, FlowIndex};
pub use physics::{LookupTable, SensorCalibration, TableSpec};
pub use pipeline::{predict_leakage, run_case, FrameSource, LeakageReport, RunPaths};
pub use quality::{FrameQualityMetrics, QualityThresholds};
