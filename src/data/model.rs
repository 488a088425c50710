use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// ActivityLabel – WESAD study protocol conditions
// ---------------------------------------------------------------------------

/// The four experimental conditions kept from the WESAD label stream.
/// Codes 0 and 5..=7 (transient / undefined) have no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityLabel {
    Baseline = 1,
    Stress = 2,
    Amusement = 3,
    Meditation = 4,
}

impl ActivityLabel {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ActivityLabel::Baseline),
            2 => Some(ActivityLabel::Stress),
            3 => Some(ActivityLabel::Amusement),
            4 => Some(ActivityLabel::Meditation),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            ActivityLabel::Baseline => "Baseline",
            ActivityLabel::Stress => "Stress",
            ActivityLabel::Amusement => "Amusement",
            ActivityLabel::Meditation => "Meditation",
        }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// RawSubjectRecord – one decoded WESAD subject
// ---------------------------------------------------------------------------

/// Chest channels and labels of one subject, flattened to one dimension.
/// Lengths are as stored; [`RawSubjectRecord::aligned_len`] gives the common
/// prefix that is safe to index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSubjectRecord {
    pub eda: Vec<f64>,
    pub temp: Vec<f64>,
    pub ecg: Vec<f64>,
    pub resp: Vec<f64>,
    pub labels: Vec<i64>,
}

impl RawSubjectRecord {
    /// Shortest of the four channels and the label sequence.
    pub fn aligned_len(&self) -> usize {
        [self.eda.len(), self.temp.len(), self.ecg.len(), self.resp.len(), self.labels.len()]
            .into_iter()
            .min()
            .unwrap_or(0)
    }

    /// True when every channel and the labels have the same length.
    pub fn is_aligned(&self) -> bool {
        let n = self.labels.len();
        [self.eda.len(), self.temp.len(), self.ecg.len(), self.resp.len()]
            .iter()
            .all(|&len| len == n)
    }
}

// ---------------------------------------------------------------------------
// HeartRateExport – one Empatica E4 single-channel export
// ---------------------------------------------------------------------------

/// An E4 `HR.csv`: start timestamp and sample rate header, then samples.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateExport {
    /// Unix seconds of the first sample. Read but not carried to the output.
    pub start_time: f64,
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

impl HeartRateExport {
    /// `i / sample_rate` for every sample index.
    pub fn relative_times(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.samples.len()).map(move |i| i as f64 / self.sample_rate)
    }

    /// Tag every sample with its drive and relative time.
    pub fn into_samples(self, drive_id: &str) -> Vec<RoadSample> {
        let times: Vec<f64> = self.relative_times().collect();
        times
            .into_iter()
            .zip(self.samples)
            .map(|(t, hr)| RoadSample {
                drive_id: drive_id.to_string(),
                relative_time_seconds: t,
                heart_rate: hr,
                dataset: RoadSample::DATASET,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Output rows
// ---------------------------------------------------------------------------

/// One decimated WESAD chest sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedSample {
    #[serde(rename = "SubjectID")]
    pub subject_id: String,
    #[serde(rename = "EDA")]
    pub eda: f64,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "ECG")]
    pub ecg: f64,
    #[serde(rename = "Respiration")]
    pub respiration: f64,
    #[serde(rename = "LabelCode")]
    pub label_code: i64,
    #[serde(rename = "ConditionName")]
    pub condition_name: &'static str,
}

impl UnifiedSample {
    pub const COLUMNS: [&'static str; 7] = [
        "SubjectID",
        "EDA",
        "Temperature",
        "ECG",
        "Respiration",
        "LabelCode",
        "ConditionName",
    ];
}

/// One heart-rate sample of an AffectiveROAD drive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadSample {
    #[serde(rename = "DriveID")]
    pub drive_id: String,
    #[serde(rename = "RelativeTimeSeconds")]
    pub relative_time_seconds: f64,
    #[serde(rename = "HeartRate")]
    pub heart_rate: f64,
    #[serde(rename = "Dataset")]
    pub dataset: &'static str,
}

impl RoadSample {
    pub const COLUMNS: [&'static str; 4] =
        ["DriveID", "RelativeTimeSeconds", "HeartRate", "Dataset"];
    pub const DATASET: &'static str = "AffectiveROAD";
}

// ---------------------------------------------------------------------------
// CellValue – a single spreadsheet cell
// ---------------------------------------------------------------------------

/// A dynamically-typed spreadsheet cell, passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Date/time already rendered as `YYYY-MM-DD HH:MM:SS`.
    Date(String),
    Null,
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) | CellValue::Date(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v:?}"),
            CellValue::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            CellValue::Null => Ok(()),
        }
    }
}

impl CellValue {
    /// Parse a CSV field the way a spreadsheet reader would type it.
    pub fn guess(s: &str) -> Self {
        if s.is_empty() {
            return CellValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return CellValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return CellValue::Float(f);
        }
        match s {
            "True" | "true" | "TRUE" => CellValue::Bool(true),
            "False" | "false" | "FALSE" => CellValue::Bool(false),
            _ => CellValue::String(s.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SwellSheet – the passthrough SWELL table
// ---------------------------------------------------------------------------

/// The first worksheet of the SWELL export: header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwellSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl SwellSheet {
    pub const DATASET_COLUMN: &'static str = "Dataset";
    pub const DATASET: &'static str = "SWELL";

    /// Append the constant dataset tag column. Short rows are padded so
    /// every row ends with the tag.
    pub fn with_dataset_tag(mut self) -> Self {
        let width = self.headers.len();
        self.headers.push(Self::DATASET_COLUMN.to_string());
        for row in &mut self.rows {
            row.resize(width, CellValue::Null);
            row.push(CellValue::String(Self::DATASET.to_string()));
        }
        self
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
