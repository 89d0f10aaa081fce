use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use leak_quant::color::save_flow_png;
use leak_quant::config::RunConfig;
use leak_quant::data::flo::read_flo;
use leak_quant::data::loader::load_spectrum;
use leak_quant::pipeline::{self, FrameSource, LeakageReport, RunPaths};
use leak_quant::SensorCalibration;

#[derive(Parser)]
#[command(name = "leak-quant")]
#[command(version, about = "Gas leakage-rate estimation from infrared video", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a lookup table from an absorption spectrum
    Table {
        /// Absorption spectrum (.parquet, .json or .csv)
        #[arg(value_name = "SPECTRUM")]
        spectrum: PathBuf,

        /// Output table file
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Print the brightness temperature of raw sensor counts
    Temperature {
        #[arg(value_name = "COUNTS", required = true)]
        counts: Vec<f64>,
    },

    /// Convert foreground frames to CL maps
    Convert {
        /// Directory of foreground TIFFs
        #[arg(value_name = "DIR")]
        foreground: PathBuf,

        /// Lookup table file
        #[arg(short, long, value_name = "FILE")]
        table: PathBuf,

        /// Output directory for the CL maps
        #[arg(short, long, value_name = "DIR")]
        out: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Estimate the leakage rate from CL maps (or foreground frames) and flow fields
    Estimate {
        /// Directory of flow fields (.flo)
        #[arg(long, value_name = "DIR")]
        flow: PathBuf,

        /// Directory of existing CL maps
        #[arg(long, value_name = "DIR", conflicts_with_all = ["foreground", "table"])]
        cl: Option<PathBuf>,

        /// Directory of foreground TIFFs, converted with --table
        #[arg(long, value_name = "DIR", requires = "table")]
        foreground: Option<PathBuf>,

        /// Lookup table file
        #[arg(long, value_name = "FILE")]
        table: Option<PathBuf>,

        /// Output directory (curve, result.json, CL maps)
        #[arg(short, long, value_name = "DIR")]
        out: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Full run over a case directory: table, conversion and estimate
    Run {
        /// Case directory holding foreground/, flow/ and params.json
        #[arg(value_name = "CASE_DIR")]
        case_dir: PathBuf,

        /// Absorption spectrum used to build the table
        #[arg(short, long, value_name = "FILE")]
        spectrum: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Render a flow field to its colour coding
    FlowPng {
        #[arg(value_name = "FLO")]
        input: PathBuf,

        #[arg(short, long, value_name = "PNG")]
        out: PathBuf,
    },
}

/// Run parameters: a JSON file plus individual overrides.
#[derive(Args)]
struct ParamArgs {
    /// Parameter file (JSON)
    #[arg(long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Background temperature (K)
    #[arg(long)]
    tb: Option<f64>,

    /// Gas temperature (K)
    #[arg(long)]
    tg: Option<f64>,

    /// CL axis step (ppm·m)
    #[arg(long, value_name = "PPM_M")]
    cl_step: Option<f64>,

    /// CL axis end (ppm·m)
    #[arg(long, value_name = "PPM_M")]
    cl_max: Option<f64>,

    /// Sensor units per unit ΔI
    #[arg(long)]
    divisor: Option<f64>,

    /// Pixel size on the plume plane (m)
    #[arg(long, value_name = "M")]
    pixel_size: Option<f64>,

    /// Camera to plume distance (m), with --fov
    #[arg(long, value_name = "M", requires = "fov")]
    distance: Option<f64>,

    /// Horizontal field of view (degrees), with --distance
    #[arg(long, value_name = "DEG", requires = "distance")]
    fov: Option<f64>,

    /// Frame interval (s)
    #[arg(long, value_name = "S")]
    interval: Option<f64>,

    /// Sliding window length (frames)
    #[arg(long)]
    window: Option<usize>,

    /// Frames between window evaluations
    #[arg(long)]
    group: Option<usize>,

    /// Fragmentation above which a frame is dropped
    #[arg(long)]
    fragmentation: Option<f64>,
}

impl ParamArgs {
    /// Parameters from `--params`, else the case directory's params.json,
    /// else defaults; then the individual flags on top.
    fn resolve(&self, case_dir: Option<&Path>) -> Result<RunConfig> {
        let mut config = match (&self.params, case_dir) {
            (Some(path), _) => RunConfig::load(path)
                .with_context(|| format!("reading parameters {}", path.display()))?,
            (None, Some(dir)) => RunConfig::load_or_default(dir)
                .with_context(|| format!("reading parameters of {}", dir.display()))?,
            (None, None) => RunConfig::default(),
        };

        if let Some(v) = self.tb {
            config.tb = Some(v);
        }
        if let Some(v) = self.tg {
            config.tg = Some(v);
        }
        if let Some(v) = self.cl_step {
            config.cl_step = v;
        }
        if let Some(v) = self.cl_max {
            config.cl_max = v;
        }
        if let Some(v) = self.divisor {
            config.calibration_divisor = v;
        }
        if let Some(v) = self.pixel_size {
            config.pixel_size_m = v;
        }
        if self.distance.is_some() {
            config.distance_m = self.distance;
            config.fov_deg = self.fov;
        }
        if let Some(v) = self.interval {
            config.frame_interval_s = v;
        }
        if let Some(v) = self.window {
            config.window_size = v;
        }
        if let Some(v) = self.group {
            config.frames_per_group = v;
        }
        if let Some(v) = self.fragmentation {
            config.fragmentation_threshold = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Table {
            spectrum,
            out,
            params,
        } => {
            let config = params.resolve(None)?;
            let spectrum = load_spectrum(&spectrum)?;
            let table =
                pipeline::build_table(&config, &SensorCalibration::default(), &spectrum, &out)?;
            println!("{} rows written to {}", table.len(), out.display());
        }

        Commands::Temperature { counts } => {
            let calibration = SensorCalibration::default();
            for c in counts {
                let t = calibration
                    .temperature_from_counts(c)
                    .with_context(|| format!("counts {c}"))?;
                println!("{c}\t{t:.3} K");
            }
        }

        Commands::Convert {
            foreground,
            table,
            out,
            params,
        } => {
            let config = params.resolve(None)?;
            let written = pipeline::convert_foreground(&config, &table, &foreground, &out)?;
            println!("{} CL maps written to {}", written.len(), out.display());
        }

        Commands::Estimate {
            flow,
            cl,
            foreground,
            table,
            out,
            params,
        } => {
            let source = match (cl, foreground, table) {
                (Some(cl), _, _) => FrameSource::Cl(cl),
                (None, Some(dir), Some(table)) => FrameSource::Foreground { dir, table },
                _ => bail!("give either --cl or --foreground with --table"),
            };
            let config = params.resolve(None)?;
            let paths = RunPaths {
                source,
                flow_dir: flow,
                output_dir: out,
            };
            print_report(&pipeline::predict_leakage(&config, &paths)?);
        }

        Commands::Run {
            case_dir,
            spectrum,
            params,
        } => {
            let config = params.resolve(Some(&case_dir))?;
            let spectrum = load_spectrum(&spectrum)?;
            let report =
                pipeline::run_case(&config, &SensorCalibration::default(), &spectrum, &case_dir)
                    .with_context(|| format!("running case {}", case_dir.display()))?;
            print_report(&report);
        }

        Commands::FlowPng { input, out } => {
            let flow = read_flo(&input)?;
            save_flow_png(&flow, &out)?;
            println!("{}x{} flow rendered to {}", flow.width(), flow.height(), out.display());
        }
    }
    Ok(())
}

fn print_report(report: &LeakageReport) {
    println!(
        "frames: {} total, {} used, {} fragmented, {} skipped",
        report.frames_total, report.frames_used, report.frames_fragmented, report.frames_skipped
    );
    match (report.estimate, &report.diagnostic) {
        (Some(value), _) => println!("leakage: {value:.4} kg/h ({} windows)", report.windows.len()),
        (None, Some(reason)) => println!("leakage: no estimate ({reason})"),
        (None, None) => println!("leakage: no estimate"),
    }
}
