//! End-to-end quantification of one recording.
//!
//! ```text
//!  spectrum ──► LookupTable::generate ──► table.bin (+ .json)
//!                                             │
//!  foreground/*.tif ──► ClConverter ──► CL/*_CL.tif
//!                                             │
//!  flow/*.flo ──► FlowIndex::resolve ◄────────┘   (per frame, parallel)
//!                      │
//!                      ▼
//!        fragmentation gate ─► frame_flux + coverage metrics
//!                      │
//!                      ▼  (frame order)
//!              TemporalAggregator ──► leakage_curve.csv, result.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::aggregate::{FluxSample, TemporalAggregator, WindowEstimate};
use crate::config::RunConfig;
use crate::convert::{list_frames, ClConverter};
use crate::data::flo::read_flo;
use crate::data::model::{AbsorptionSpectrum, ClMap, FlowField};
use crate::data::raster::read_scalar_tiff;
use crate::error::{EngineError, Result};
use crate::flux::{frame_flux, FluxBox, FluxGeometry};
use crate::matcher::FlowIndex;
use crate::physics::{LookupTable, SensorCalibration};
use crate::quality::{fragmentation, FrameQualityMetrics, QualityThresholds};
use crate::state::{RunGuard, RunRecord};

/// File name of the per-window estimate table.
pub const CURVE_FILE: &str = "leakage_curve.csv";
/// Sub-directory of the output directory receiving CL maps.
pub const CL_DIR: &str = "CL";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Result of quantifying one frame sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakageReport {
    /// Leakage rate (kg/h); `None` when no window produced an estimate.
    pub estimate: Option<f64>,
    pub windows: Vec<WindowEstimate>,
    /// CL frames found.
    pub frames_total: usize,
    /// Frames that reached the aggregator.
    pub frames_used: usize,
    /// Frames dropped by the fragmentation gate.
    pub frames_fragmented: usize,
    /// Frames dropped for a missing or unreadable artifact.
    pub frames_skipped: usize,
    /// Why `estimate` is missing.
    pub diagnostic: Option<String>,
}

/// What happened to one CL frame before aggregation.
#[derive(Debug)]
enum FrameOutcome {
    Sample(FluxSample),
    Fragmented(f64),
    Skipped(EngineError),
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Build the lookup table for `config` and persist it at `table_path`.
pub fn build_table(
    config: &RunConfig,
    calibration: &SensorCalibration,
    spectrum: &AbsorptionSpectrum,
    table_path: &Path,
) -> Result<LookupTable> {
    let spec = config.table_spec(calibration)?;
    let table = LookupTable::generate(&spec, spectrum)?;
    if let Some(parent) = table_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    table.save(table_path, Some(&spec))?;
    log::info!(
        "lookup table Tb={:.2} K Tg={:.2} K ({} rows) written to {}",
        spec.background_temperature,
        spec.gas_temperature,
        table.len(),
        table_path.display()
    );
    Ok(table)
}

/// Convert the foreground frames of `foreground_dir` into `cl_dir`.
pub fn convert_foreground(
    config: &RunConfig,
    table_path: &Path,
    foreground_dir: &Path,
    cl_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let table = LookupTable::load(table_path, config.cl_step)?;
    let converter = ClConverter::new(table, config.calibration_divisor)?;
    converter.convert_dir(foreground_dir, cl_dir)
}

/// Quantify the leak from existing CL maps and flow fields.
pub fn estimate_leakage(config: &RunConfig, cl_dir: &Path, flow_dir: &Path) -> Result<LeakageReport> {
    config.validate()?;
    let geometry = config.flux_geometry()?;
    let thresholds = config.quality_thresholds();
    let mut aggregator = TemporalAggregator::new(config.aggregator_config())?;

    let cl_frames = list_frames(cl_dir)?;
    let flows = FlowIndex::scan(flow_dir)?;
    log::info!(
        "{} CL frames, {} flow fields",
        cl_frames.len(),
        flows.len()
    );

    let outcomes: Vec<FrameOutcome> = cl_frames
        .par_iter()
        .enumerate()
        .map(|(index, path)| {
            process_frame(
                index,
                path,
                &flows,
                &geometry,
                &config.boxes,
                &thresholds,
                config.fragmentation_threshold,
            )
        })
        .collect();

    let mut report = LeakageReport {
        estimate: None,
        windows: Vec::new(),
        frames_total: cl_frames.len(),
        frames_used: 0,
        frames_fragmented: 0,
        frames_skipped: 0,
        diagnostic: None,
    };
    for (path, outcome) in cl_frames.iter().zip(outcomes) {
        match outcome {
            FrameOutcome::Sample(sample) => {
                report.frames_used += 1;
                aggregator.push(sample);
            }
            FrameOutcome::Fragmented(score) => {
                report.frames_fragmented += 1;
                log::debug!("{}: fragmentation {score:.2} above threshold", path.display());
            }
            FrameOutcome::Skipped(err) => {
                report.frames_skipped += 1;
                if err.is_frame_local() {
                    log::warn!("{}: skipped ({err})", path.display());
                } else {
                    log::warn!("{}: rejected ({err})", path.display());
                }
            }
        }
    }

    report.windows = aggregator.estimates().to_vec();
    match aggregator.require_leakage() {
        Ok(value) => {
            report.estimate = Some(value);
            log::info!(
                "leakage {value:.4} kg/h from {} windows over {} frames",
                report.windows.len(),
                report.frames_used
            );
        }
        Err(err) => {
            let reason = if report.frames_used >= config.window_size {
                "no window retained a flux sample".to_string()
            } else {
                err.to_string()
            };
            log::warn!("no leakage estimate: {reason}");
            report.diagnostic = Some(reason);
        }
    }
    Ok(report)
}

fn process_frame(
    index: usize,
    cl_path: &Path,
    flows: &FlowIndex,
    geometry: &FluxGeometry,
    boxes: &[FluxBox],
    thresholds: &QualityThresholds,
    fragmentation_threshold: f64,
) -> FrameOutcome {
    let name = cl_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let Some(flow_path) = flows.resolve(name).into_path() else {
        return FrameOutcome::Skipped(EngineError::NoCorrespondence(name.to_string()));
    };
    let flow = match read_flo(&flow_path) {
        Ok(flow) => flow,
        Err(err) => return FrameOutcome::Skipped(err),
    };

    let score = fragmentation(&flow);
    if score > fragmentation_threshold {
        return FrameOutcome::Fragmented(score);
    }

    // Past the gate the frame stays in the sequence; without a CL map it
    // carries no flux.
    let (flux, mut metrics) = match read_scalar_tiff(cl_path) {
        Ok(cl) => match measure_frame(&cl, &flow, geometry, boxes, thresholds) {
            Ok(measured) => measured,
            Err(err) => return FrameOutcome::Skipped(err),
        },
        Err(err) => {
            log::warn!("{name}: CL map unreadable, no flux ({err})");
            (None, FrameQualityMetrics::flow_only(&flow, thresholds))
        }
    };
    metrics.fragmentation = score;
    FrameOutcome::Sample(FluxSample {
        frame_index: index,
        flux,
        metrics,
    })
}

fn measure_frame(
    cl: &ClMap,
    flow: &FlowField,
    geometry: &FluxGeometry,
    boxes: &[FluxBox],
    thresholds: &QualityThresholds,
) -> Result<(Option<f64>, FrameQualityMetrics)> {
    let flux = frame_flux(cl, flow, geometry, boxes)?;
    let metrics = FrameQualityMetrics::coverage(cl, flow, thresholds)?;
    Ok((flux, metrics))
}

/// Write the window estimates as CSV.
pub fn write_curve(path: &Path, windows: &[WindowEstimate]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| EngineError::unreadable(path, e))?;
    for window in windows {
        writer
            .serialize(window)
            .map_err(|e| EngineError::unreadable(path, e))?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Whole run
// ---------------------------------------------------------------------------

/// Where a run's CL maps come from.
#[derive(Debug, Clone)]
pub enum FrameSource {
    /// Foreground frames converted with the table at `table`.
    Foreground { dir: PathBuf, table: PathBuf },
    /// CL maps that already exist.
    Cl(PathBuf),
}

/// Locations of one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub source: FrameSource,
    pub flow_dir: PathBuf,
    /// Receives `CL/`, the curve and `result.json`.
    pub output_dir: PathBuf,
}

impl RunPaths {
    /// Standard case layout: `foreground/`, `flow/` and `table.bin` inside
    /// `case_dir`, which also receives the outputs.
    pub fn case(case_dir: &Path) -> Self {
        Self {
            source: FrameSource::Foreground {
                dir: case_dir.join("foreground"),
                table: case_dir.join(TABLE_FILE),
            },
            flow_dir: case_dir.join("flow"),
            output_dir: case_dir.to_path_buf(),
        }
    }
}

/// File name of the lookup table in the case layout.
pub const TABLE_FILE: &str = "table.bin";

/// Convert (when needed), match, estimate and record, holding the output
/// directory for the duration.
///
/// `result.json` is marked running at the start and completed or failed at
/// the end; failures are also returned to the caller.
pub fn predict_leakage(config: &RunConfig, paths: &RunPaths) -> Result<LeakageReport> {
    guarded(&paths.output_dir, || run_stages(config, paths))
}

/// Full run over the case layout of [`RunPaths::case`], building
/// `table.bin` from `spectrum` first. The table is written under the same
/// guard as the rest of the run.
pub fn run_case(
    config: &RunConfig,
    calibration: &SensorCalibration,
    spectrum: &AbsorptionSpectrum,
    case_dir: &Path,
) -> Result<LeakageReport> {
    let paths = RunPaths::case(case_dir);
    guarded(case_dir, || {
        build_table(config, calibration, spectrum, &case_dir.join(TABLE_FILE))?;
        run_stages(config, &paths)
    })
}

fn guarded(
    output_dir: &Path,
    stages: impl FnOnce() -> Result<LeakageReport>,
) -> Result<LeakageReport> {
    let _guard = RunGuard::acquire(output_dir)?;
    RunRecord::running().write(output_dir)?;

    match stages() {
        Ok(report) => {
            RunRecord::completed(report.estimate, report.diagnostic.clone()).write(output_dir)?;
            Ok(report)
        }
        Err(err) => {
            log::error!("run in {} failed: {err}", output_dir.display());
            RunRecord::failed(err.to_string()).write(output_dir)?;
            Err(err)
        }
    }
}

fn run_stages(config: &RunConfig, paths: &RunPaths) -> Result<LeakageReport> {
    let cl_dir = match &paths.source {
        FrameSource::Foreground { dir, table } => {
            let cl_dir = paths.output_dir.join(CL_DIR);
            convert_foreground(config, table, dir, &cl_dir)?;
            cl_dir
        }
        FrameSource::Cl(dir) => dir.clone(),
    };
    let report = estimate_leakage(config, &cl_dir, &paths.flow_dir)?;
    write_curve(&paths.output_dir.join(CURVE_FILE), &report.windows)?;
    Ok(report)
}
