use std::fs;
use std::path::Path;

use anyhow::Result;
use log::{info, warn};

use super::{run_units, JobOutcome};
use crate::config::Config;
use crate::data::filter::subject_samples;
use crate::data::loader::load_wesad_subject;
use crate::data::model::UnifiedSample;
use crate::data::writer::write_table;
use crate::error::ProcessingError;

pub const DATASET: &str = "WESAD";

/// Subject folders under `root` whose names start with `prefix`, sorted
/// lexicographically so output order is reproducible.
pub fn discover_subjects(root: &Path, prefix: &str) -> Result<Vec<String>, ProcessingError> {
    if !root.is_dir() {
        return Err(ProcessingError::MissingInput { path: root.to_path_buf() });
    }
    let entries = fs::read_dir(root).map_err(|e| ProcessingError::io(root, e))?;

    let mut subjects = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProcessingError::io(root, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with(prefix) && entry.path().is_dir() {
            subjects.push(name);
        }
    }
    subjects.sort();
    Ok(subjects)
}

/// Decode, align, filter and decimate one subject.
pub fn extract_subject(
    root: &Path,
    subject: &str,
    stride: usize,
) -> Result<Vec<UnifiedSample>, ProcessingError> {
    let path = root.join(subject).join(format!("{subject}.pkl"));
    let record = load_wesad_subject(&path)?;
    if !record.is_aligned() {
        warn!(
            "{DATASET}: {subject} channel lengths differ \
             (EDA {}, Temp {}, ECG {}, Resp {}, label {}); truncating to {}",
            record.eda.len(),
            record.temp.len(),
            record.ecg.len(),
            record.resp.len(),
            record.labels.len(),
            record.aligned_len()
        );
    }
    Ok(subject_samples(subject, &record, stride))
}

/// Build the combined WESAD table. Writes nothing when no subject succeeds.
pub fn run(config: &Config) -> JobOutcome {
    match convert(config) {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome::Failed(e),
    }
}

fn convert(config: &Config) -> Result<JobOutcome> {
    let root = config.wesad_root();
    let stride = config.wesad.stride()?;
    let subjects = discover_subjects(&root, &config.wesad.subject_prefix)?;
    info!("{DATASET}: found {} subjects: {subjects:?}", subjects.len());

    let extraction =
        run_units(DATASET, &subjects, |subject| extract_subject(&root, subject, stride));
    if extraction.succeeded.is_empty() {
        return Err(ProcessingError::EmptyResult { dataset: DATASET }.into());
    }

    let path = config.output_path(&config.wesad.output);
    write_table(extraction.rows.as_slice(), &path, config.format)?;
    info!("{DATASET}: subjects included: {:?}", extraction.succeeded);

    Ok(JobOutcome::Written {
        path,
        rows: extraction.rows.len(),
        succeeded: extraction.succeeded.len(),
        skipped: extraction.failed.len(),
    })
}
