//! Writes a synthetic case for trying the pipeline end to end:
//!
//! ```text
//! <out>/spectrum.parquet        absorption spectrum (x = wavenumber, y = coef)
//! <out>/case/params.json        run parameters
//! <out>/case/foreground/*.tif   raw foreground frames of a drifting plume
//! <out>/case/flow/*.flo         matching optical-flow fields
//! ```
//!
//! Then: `leak-quant run <out>/case --spectrum <out>/spectrum.parquet`.

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;

use leak_quant::config::{RunConfig, PARAMS_FILE};
use leak_quant::data::flo::write_flo;
use leak_quant::data::model::{AbsorptionSpectrum, FlowField, ForegroundFrame};
use leak_quant::data::raster::write_scalar_tiff;
use leak_quant::physics::{LookupTable, TableSpec};

const WIDTH: usize = 160;
const HEIGHT: usize = 100;
const SOURCE: (f64, f64) = (50.0, 45.0);
const PEAK_CL: f64 = 40_000.0;
const DRIFT_PX: f32 = 2.0;

#[derive(Parser)]
#[command(about = "Write a synthetic leak case")]
struct Args {
    /// Output directory
    #[arg(default_value = "sample_case")]
    out: PathBuf,

    /// Number of frames
    #[arg(short, long, default_value_t = 45)]
    frames: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Methane-like ν3 band: P and R branch lines around a strong Q branch.
fn absorption_spectrum(rng: &mut SimpleRng) -> (Vec<f64>, Vec<f64>) {
    let wavenumbers: Vec<f64> = (0..620).map(|i| 2870.0 + i as f64 * 0.5).collect();
    let mut lines: Vec<(f64, f64, f64)> = vec![(3017.0, 3.0, 12.0)];
    for k in 1..15 {
        let k = k as f64;
        lines.push((3017.0 + 10.4 * k, 1.2, 8.0 * (-k / 9.0).exp()));
        lines.push((3017.0 - 10.0 * k, 1.2, 7.0 * (-k / 9.0).exp()));
    }
    let coefficients = wavenumbers
        .iter()
        .map(|&wn| {
            let signal: f64 = lines
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wn, mu, sigma, amp))
                .sum();
            (0.05 + signal + rng.gauss(0.0, 0.01)).max(0.0)
        })
        .collect();
    (wavenumbers, coefficients)
}

/// Plume column density at `(row, col)`, widening downstream of the source.
fn plume_cl(row: usize, col: usize, strength: f64) -> f64 {
    let (r, c) = (row as f64 - SOURCE.0, col as f64 - SOURCE.1);
    if c < 0.0 {
        return strength * PEAK_CL * (-(r * r + c * c) / 32.0).exp();
    }
    let width = 4.0 + 0.15 * c;
    strength * PEAK_CL * (4.0 / width) * (-(r * r) / (2.0 * width * width)).exp()
}

/// ΔI of `cl` by linear interpolation in the table.
fn delta_i_at(table: &LookupTable, cl: f64) -> f64 {
    let d = table.delta_i();
    let pos = (cl / table.cl_step()).max(0.0);
    let i = pos.floor() as usize;
    if i + 1 >= d.len() {
        return d[d.len() - 1];
    }
    let t = pos - i as f64;
    d[i] + t * (d[i + 1] - d[i])
}

fn write_spectrum(path: &PathBuf, wavenumbers: &[f64], coefficients: &[f64]) {
    let mut x_builder = ListBuilder::new(Float64Builder::new());
    x_builder.values().append_slice(wavenumbers);
    x_builder.append(true);
    let mut y_builder = ListBuilder::new(Float64Builder::new());
    y_builder.values().append_slice(coefficients);
    y_builder.append(true);

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(x_builder.finish()), Arc::new(y_builder.finish())],
    )
    .expect("Failed to create RecordBatch");

    let file = std::fs::File::create(path).expect("Failed to create spectrum file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("Failed to create writer");
    writer.write(&batch).expect("Failed to write batch");
    writer.close().expect("Failed to close writer");
}

/// xoshiro256** seeded through splitmix64, so `--seed` reproduces a case
/// without pulling in an RNG crate.
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut x = seed;
        let mut splitmix = || {
            x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = x;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        };
        SimpleRng {
            state: [splitmix(), splitmix(), splitmix(), splitmix()],
        }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    let case = args.out.join("case");
    let foreground_dir = case.join("foreground");
    let flow_dir = case.join("flow");
    std::fs::create_dir_all(&foreground_dir).expect("Failed to create foreground directory");
    std::fs::create_dir_all(&flow_dir).expect("Failed to create flow directory");

    let (wavenumbers, coefficients) = absorption_spectrum(&mut rng);
    let spectrum_path = args.out.join("spectrum.parquet");
    write_spectrum(&spectrum_path, &wavenumbers, &coefficients);

    let config = RunConfig {
        tb: Some(317.55),
        tg: Some(313.15),
        ..RunConfig::default()
    };
    let params = serde_json::to_string_pretty(&config).expect("Failed to serialise parameters");
    std::fs::write(case.join(PARAMS_FILE), params).expect("Failed to write parameters");

    // Foreground counts are synthesised through the same table the run
    // will build, so the recovered CL matches the plume model.
    let spectrum = AbsorptionSpectrum::new(wavenumbers, coefficients).expect("Invalid spectrum");
    let spec = TableSpec {
        background_temperature: 317.55,
        gas_temperature: 313.15,
        cl_max: config.cl_max,
        cl_step: config.cl_step,
    };
    let table = LookupTable::generate(&spec, &spectrum).expect("Failed to build table");

    for frame in 0..args.frames {
        let strength = 1.0 + rng.gauss(0.0, 0.05);
        let mut raw = Vec::with_capacity(WIDTH * HEIGHT);
        let mut flow = Vec::with_capacity(WIDTH * HEIGHT * 2);
        for row in 0..HEIGHT {
            for col in 0..WIDTH {
                let cl = plume_cl(row, col, strength);
                let counts = delta_i_at(&table, cl) * config.calibration_divisor;
                raw.push((counts + rng.gauss(0.0, 0.5)).max(0.0) as f32);

                let carried = (cl / (0.2 * PEAK_CL)).min(1.0) as f32;
                flow.push(DRIFT_PX * carried + rng.gauss(0.0, 0.02) as f32);
                flow.push(rng.gauss(0.0, 0.02) as f32);
            }
        }

        let foreground = ForegroundFrame::new(WIDTH, HEIGHT, raw).expect("Invalid frame");
        write_scalar_tiff(&foreground_dir.join(format!("frame_{frame:04}.tif")), &foreground)
            .expect("Failed to write foreground frame");
        let flow = FlowField::new(WIDTH, HEIGHT, flow).expect("Invalid flow field");
        write_flo(&flow_dir.join(format!("{frame:04}.flo")), &flow).expect("Failed to write flow");
    }

    println!(
        "Wrote {} frames ({WIDTH}x{HEIGHT}) and a {}-sample spectrum under {}",
        args.frames,
        spectrum.len(),
        args.out.display()
    );
}
