use std::fs;
use std::path::PathBuf;

use approx::assert_relative_eq;

use leak_quant::aggregate::{AggregatorConfig, FluxSample, TemporalAggregator};
use leak_quant::data::flo::write_flo;
use leak_quant::data::loader::load_spectrum;
use leak_quant::data::model::{AbsorptionSpectrum, FlowField, ForegroundFrame};
use leak_quant::data::raster::{read_scalar_tiff, write_scalar_tiff};
use leak_quant::pipeline::{self, FrameSource, RunPaths, CURVE_FILE, TABLE_FILE};
use leak_quant::state::{RunRecord, RunStatus};
use leak_quant::{
    Correspondence, FlowIndex, FluxBox, FrameQualityMetrics, LookupTable, RunConfig,
    SensorCalibration, TableSpec,
};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("leak-quant-e2e-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn two_point_spectrum_gives_two_row_table() {
    // 3.25 µm and 3.35 µm.
    let spectrum = AbsorptionSpectrum::new(vec![3076.923, 2985.075], vec![1.0, 1.0]).unwrap();
    let spec = TableSpec {
        background_temperature: 317.55,
        gas_temperature: 313.15,
        cl_max: 200.0,
        cl_step: 100.0,
    };
    let table = LookupTable::generate(&spec, &spectrum).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.delta_i()[0], 0.0);
    assert!(table.delta_i()[1] > 0.0);
    assert_eq!(table.cl_values(), vec![0.0, 100.0]);
}

#[test]
fn forty_constant_frames_estimate_their_flux() {
    let mut aggregator = TemporalAggregator::new(AggregatorConfig {
        window_size: 30,
        frames_per_group: 3,
        frame_interval_s: 0.04,
    })
    .unwrap();
    let metrics = FrameQualityMetrics {
        fragmentation: 2.0,
        cl_valid_ratio: 0.6,
        flow_valid_ratio: 0.7,
        iou: 0.3,
    };
    for frame_index in 0..40 {
        aggregator.push(FluxSample {
            frame_index,
            flux: Some(2.0),
            metrics,
        });
    }
    assert_relative_eq!(aggregator.leakage().unwrap(), 2.0);
}

#[test]
fn flow_matching_prefers_exact_frame_number() {
    let dir = scratch("match");
    for name in ["0042.flo", "0043.flo"] {
        fs::write(dir.join(name), b"").unwrap();
    }
    let index = FlowIndex::scan(&dir).unwrap();
    assert_eq!(
        index.resolve("frame_0042_CL.tif"),
        Correspondence::ExactNumeric(dir.join("0042.flo"))
    );
}

/// A small case: plume on the right half of a 24x24 frame, uniform drift.
fn write_case(root: &PathBuf, frames: usize) -> RunConfig {
    let wavenumbers: Vec<f64> = (0..=250).map(|i| 2900.0 + i as f64).collect();
    let coef = vec![5.0; wavenumbers.len()];
    let spectrum = serde_json::json!({ "wavenumber": wavenumbers, "coef": coef });
    fs::write(root.join("spectrum.json"), spectrum.to_string()).unwrap();

    let foreground = root.join("foreground");
    let flow = root.join("flow");
    fs::create_dir_all(&foreground).unwrap();
    fs::create_dir_all(&flow).unwrap();
    for i in 0..frames {
        let raw: Vec<f32> = (0..24 * 24)
            .map(|p| if p % 24 >= 12 { 30.0 } else { 0.0 })
            .collect();
        let frame = ForegroundFrame::new(24, 24, raw).unwrap();
        write_scalar_tiff(&foreground.join(format!("frame_{i:04}.tif")), &frame).unwrap();
        let field = FlowField::uniform(24, 24, 1.5, 0.0).unwrap();
        write_flo(&flow.join(format!("{i:04}.flo")), &field).unwrap();
    }

    RunConfig {
        tb: Some(317.55),
        tg: Some(313.15),
        cl_max: 1_000_000.0,
        boxes: vec![FluxBox::new(10, 10, 5)],
        window_size: 5,
        frames_per_group: 1,
        ..RunConfig::default()
    }
}

#[test]
fn case_directory_runs_to_an_estimate() {
    let root = scratch("case");
    let config = write_case(&root, 8);

    let spectrum = load_spectrum(&root.join("spectrum.json")).unwrap();
    let report =
        pipeline::run_case(&config, &SensorCalibration::default(), &spectrum, &root).unwrap();
    let table = LookupTable::load(&root.join(TABLE_FILE), 1.0).unwrap();
    assert_eq!(table.len(), 100);
    assert_eq!(table.cl_step(), config.cl_step);

    assert_eq!(report.frames_total, 8);
    assert_eq!(report.frames_used, 8);
    // Windows close at 5, 6, 7 and 8 samples.
    assert_eq!(report.windows.len(), 4);
    let estimate = report.estimate.unwrap();
    assert!(estimate > 0.0);

    let cl = read_scalar_tiff(&root.join("CL").join("frame_0003_CL.tif")).unwrap();
    assert_eq!(cl.get(0, 0), 0.0);
    assert!(cl.get(0, 20) > 0.0);

    let record = RunRecord::read(&root).unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_relative_eq!(record.result.unwrap(), estimate);
    let curve = fs::read_to_string(root.join(CURVE_FILE)).unwrap();
    assert_eq!(curve.lines().count(), 5);
}

#[test]
fn all_frames_fragmented_gives_no_estimate() {
    let root = scratch("fragmented");
    let mut config = write_case(&root, 6);
    // Every score (>= 0) exceeds a negative threshold.
    config.fragmentation_threshold = -1.0;
    let spectrum = load_spectrum(&root.join("spectrum.json")).unwrap();
    pipeline::build_table(
        &config,
        &SensorCalibration::default(),
        &spectrum,
        &root.join(TABLE_FILE),
    )
    .unwrap();

    let paths = RunPaths {
        source: FrameSource::Foreground {
            dir: root.join("foreground"),
            table: root.join(TABLE_FILE),
        },
        flow_dir: root.join("flow"),
        output_dir: root.join("out"),
    };
    let report = pipeline::predict_leakage(&config, &paths).unwrap();
    assert_eq!(report.frames_fragmented, 6);
    assert_eq!(report.frames_used, 0);
    assert_eq!(report.estimate, None);
    assert!(report.diagnostic.is_some());

    let record = RunRecord::read(&paths.output_dir).unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.result, None);
}

#[test]
fn equal_temperatures_cannot_convert() {
    let root = scratch("degenerate");
    let mut config = write_case(&root, 1);
    config.tg = config.tb;
    let spectrum = load_spectrum(&root.join("spectrum.json")).unwrap();
    let table = pipeline::build_table(
        &config,
        &SensorCalibration::default(),
        &spectrum,
        &root.join(TABLE_FILE),
    )
    .unwrap();
    assert!(table.delta_i().iter().all(|&d| d == 0.0));

    let err = pipeline::convert_foreground(
        &config,
        &root.join(TABLE_FILE),
        &root.join("foreground"),
        &root.join("CL"),
    )
    .unwrap_err();
    assert!(matches!(err, leak_quant::EngineError::DegenerateLookupTable(_)));
}
