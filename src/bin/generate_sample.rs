use std::f64::consts::TAU;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::write::FileOptions;
use zip::ZipWriter;

use physio_tidy::config::{Config, SwellConfig};
use physio_tidy::data::pickle::{self, NdArray, PyValue};

const CHEST_RATE: usize = 700;

/// Label timeline of a synthetic subject, in seconds per protocol phase.
const PROTOCOL: [(i64, usize); 7] = [(0, 4), (1, 6), (2, 5), (0, 3), (3, 4), (4, 4), (6, 3)];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
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
        let z = (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos();
        mean + std_dev * z
    }
}

// ---------------------------------------------------------------------------
// WESAD
// ---------------------------------------------------------------------------

fn channel(n: usize, rng: &mut SimpleRng, f: impl Fn(f64) -> f64, noise: f64) -> PyValue {
    let values = (0..n)
        .map(|i| f(i as f64 / CHEST_RATE as f64) + rng.gauss(0.0, noise))
        .collect();
    PyValue::Array(NdArray::column_f64(values).into())
}

fn subject_pickle(subject: &str, rng: &mut SimpleRng) -> PyValue {
    let labels: Vec<i64> = PROTOCOL
        .iter()
        .flat_map(|&(code, secs)| std::iter::repeat(code).take(secs * CHEST_RATE))
        .collect();
    let n = labels.len();
    let stress = |t: f64| {
        let idx = ((t * CHEST_RATE as f64) as usize).min(n - 1);
        if labels[idx] == 2 { 1.0 } else { 0.0 }
    };

    let acc = NdArray {
        shape: vec![n, 3],
        ..NdArray::column_f64((0..n * 3).map(|_| rng.gauss(0.0, 0.02)).collect())
    };
    let chest = vec![
        (PyValue::text("ACC"), PyValue::Array(acc.into())),
        (PyValue::text("ECG"), channel(n, rng, |t| (TAU * 1.2 * t).sin().powi(15), 0.02)),
        (PyValue::text("EMG"), channel(n, rng, |_| 0.0, 0.01)),
        (PyValue::text("EDA"), channel(n, rng, |t| 5.0 + 0.05 * t + 1.5 * stress(t), 0.01)),
        (PyValue::text("Temp"), channel(n, rng, |t| 33.5 - 0.01 * t, 0.005)),
        (PyValue::text("Resp"), channel(n, rng, |t| (TAU * 0.25 * t).sin(), 0.05)),
    ];

    PyValue::Dict(vec![
        (
            PyValue::text("signal"),
            PyValue::Dict(vec![
                (PyValue::text("chest"), PyValue::Dict(chest)),
                (PyValue::text("wrist"), PyValue::Dict(Vec::new())),
            ]),
        ),
        (PyValue::text("label"), PyValue::Array(NdArray::vector_i32(labels).into())),
        (PyValue::text("subject"), PyValue::text(subject)),
    ])
}

fn write_wesad(root: &Path, rng: &mut SimpleRng) -> Result<()> {
    for subject in ["S2", "S3"] {
        let dir = root.join(subject);
        fs::create_dir_all(&dir)?;
        let bytes = pickle::to_vec(&subject_pickle(subject, rng));
        fs::write(dir.join(format!("{subject}.pkl")), bytes)?;
    }

    // Folder without a pickle, and a pickle cut off mid-stream.
    fs::create_dir_all(root.join("S4"))?;
    let broken = pickle::to_vec(&subject_pickle("S5", rng));
    fs::create_dir_all(root.join("S5"))?;
    fs::write(root.join("S5").join("S5.pkl"), &broken[..broken.len() / 2])?;

    fs::write(root.join("wesad_readme.txt"), "synthetic WESAD layout\n")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// AffectiveROAD
// ---------------------------------------------------------------------------

fn write_zip(path: &Path, members: &[(&str, String)]) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    for (name, contents) in members {
        let options: FileOptions<'_, ()> = FileOptions::default();
        zip.start_file(*name, options)?;
        zip.write_all(contents.as_bytes())?;
    }
    zip.finish()?;
    Ok(())
}

fn hr_csv(start: f64, rate: f64, seconds: usize, rng: &mut SimpleRng) -> String {
    let mut text = format!("{start:.6}\n{rate:.6}\n");
    let mut hr = 75.0;
    for _ in 0..(seconds as f64 * rate) as usize {
        hr = (hr + rng.gauss(0.0, 0.6)).clamp(55.0, 130.0);
        text.push_str(&format!("{hr:.2}\n"));
    }
    text
}

fn write_road(root: &Path, rng: &mut SimpleRng) -> Result<()> {
    let drives: [(&str, &str, Option<f64>); 3] = [
        ("2017-05-03-E4-Drv1", "Left.zip", Some(1.0)),
        ("2017-05-04-E4-Drv2", "Right.zip", Some(1.0)),
        ("2017-05-05-E4-Drv3", "Left.zip", None),
    ];
    for (i, (folder, archive, rate)) in drives.iter().enumerate() {
        let dir = root.join(folder);
        fs::create_dir_all(&dir)?;
        let start = 1_493_796_000.0 + i as f64 * 86_400.0;
        let mut members = vec![("TEMP.csv", format!("{start:.6}\n4.000000\n33.1\n33.2\n"))];
        if let Some(rate) = rate {
            members.push(("HR.csv", hr_csv(start + 10.0, *rate, 120, rng)));
        }
        write_zip(&dir.join(archive), &members)?;
    }
    fs::create_dir_all(root.join("Annotations"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SWELL
// ---------------------------------------------------------------------------

fn write_swell(path: &Path, rng: &mut SimpleRng) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "PP",
        "Blok",
        "Condition",
        "SnCOMP",
        "SnMouseAct",
        "SnKeyStrokes",
        "SnAppChange",
    ])?;
    for pp in 1..=3 {
        for (blok, condition) in ["N", "T", "I"].iter().enumerate() {
            writer.write_record([
                format!("PP{pp}"),
                (blok + 1).to_string(),
                condition.to_string(),
                format!("{:.3}", rng.next_f64()),
                format!("{:.1}", 100.0 + rng.gauss(0.0, 15.0)),
                ((rng.next_f64() * 200.0) as i64).to_string(),
                ((rng.next_f64() * 10.0) as i64).to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let out = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    let mut rng = SimpleRng::new(42);

    let config = Config {
        raw_dir: out.join("raw"),
        clean_dir: out.join("clean"),
        swell: SwellConfig {
            file: PathBuf::from("Behavioral-features - per minute.csv"),
            ..SwellConfig::default()
        },
        ..Config::default()
    };

    let wesad_root = config.wesad_root();
    fs::create_dir_all(&wesad_root)?;
    write_wesad(&wesad_root, &mut rng).context("writing WESAD subjects")?;

    let road_root = config.road_root();
    fs::create_dir_all(&road_root)?;
    write_road(&road_root, &mut rng).context("writing AffectiveROAD drives")?;

    write_swell(&config.swell_source(), &mut rng).context("writing SWELL sheet")?;

    let config_path = out.join("physio.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    println!("Wrote synthetic raw data to {}", config.raw_dir.display());
    println!("Run: physio-tidy --config {}", config_path.display());
    Ok(())
}
