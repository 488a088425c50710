use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Output format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Directory layout and per-dataset settings. Every field has a default that
/// reproduces the stock `data/raw` -> `data/clean` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub raw_dir: PathBuf,
    pub clean_dir: PathBuf,
    pub format: OutputFormat,
    pub wesad: WesadConfig,
    pub swell: SwellConfig,
    pub road: RoadConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WesadConfig {
    /// Relative to `raw_dir`.
    pub dir: PathBuf,
    pub subject_prefix: String,
    pub chest_rate_hz: u32,
    pub target_rate_hz: u32,
    /// Output file stem inside `clean_dir`.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwellConfig {
    /// Relative to `raw_dir`.
    pub file: PathBuf,
    pub output: String,
    /// Reuse an existing output instead of re-reading the spreadsheet.
    pub skip_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadConfig {
    /// Relative to `raw_dir`.
    pub dir: PathBuf,
    /// Substring identifying a recording folder.
    pub folder_marker: String,
    /// Archive names tried in order inside each recording folder.
    pub archives: Vec<String>,
    pub member: String,
    pub output: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            clean_dir: PathBuf::from("data/clean"),
            format: OutputFormat::Csv,
            wesad: WesadConfig::default(),
            swell: SwellConfig::default(),
            road: RoadConfig::default(),
        }
    }
}

impl Default for WesadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("WESAD"),
            subject_prefix: "S".to_string(),
            chest_rate_hz: 700,
            target_rate_hz: 10,
            output: "wesad_all_subjects".to_string(),
        }
    }
}

impl Default for SwellConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("Behavioral-features - per minute.xlsx"),
            output: "swell_processed".to_string(),
            skip_existing: true,
        }
    }
}

impl Default for RoadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("AffectiveROAD_Data/Database/E4"),
            folder_marker: "-E4-".to_string(),
            archives: vec!["Left.zip".to_string(), "Right.zip".to_string()],
            member: "HR.csv".to_string(),
            output: "road_hr_all".to_string(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings no job could run with.
    pub fn validate(&self) -> Result<()> {
        self.wesad.stride()?;
        if self.road.archives.is_empty() {
            bail!("road.archives must name at least one archive");
        }
        if self.road.member.is_empty() {
            bail!("road.member must not be empty");
        }
        Ok(())
    }

    pub fn wesad_root(&self) -> PathBuf {
        self.raw_dir.join(&self.wesad.dir)
    }

    pub fn swell_source(&self) -> PathBuf {
        self.raw_dir.join(&self.swell.file)
    }

    pub fn road_root(&self) -> PathBuf {
        self.raw_dir.join(&self.road.dir)
    }

    /// Output path for a dataset stem, with the extension of the chosen format.
    pub fn output_path(&self, stem: &str) -> PathBuf {
        self.clean_dir.join(format!("{stem}.{}", self.format.extension()))
    }
}

impl WesadConfig {
    /// Decimation stride: chest rate over target rate (700 / 10 = 70).
    pub fn stride(&self) -> Result<usize> {
        if self.target_rate_hz == 0 {
            bail!("wesad.target_rate_hz must be positive");
        }
        if self.chest_rate_hz % self.target_rate_hz != 0 {
            bail!(
                "wesad.target_rate_hz ({}) must divide wesad.chest_rate_hz ({})",
                self.target_rate_hz,
                self.chest_rate_hz
            );
        }
        let stride = (self.chest_rate_hz / self.target_rate_hz) as usize;
        if stride == 0 {
            bail!("wesad.chest_rate_hz must be positive");
        }
        Ok(stride)
    }
}
