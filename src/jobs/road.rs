use std::fs;
use std::path::Path;

use anyhow::Result;
use log::{debug, info};

use super::{run_units, JobOutcome};
use crate::config::{Config, RoadConfig};
use crate::data::loader::{load_archive_member, locate_archive};
use crate::data::model::RoadSample;
use crate::data::writer::write_table;
use crate::error::ProcessingError;

pub const DATASET: &str = "AffectiveROAD";

/// Recording folders under `root` whose names contain `marker`, sorted by name.
pub fn discover_recordings(root: &Path, marker: &str) -> Result<Vec<String>, ProcessingError> {
    if !root.is_dir() {
        return Err(ProcessingError::MissingInput { path: root.to_path_buf() });
    }
    let entries = fs::read_dir(root).map_err(|e| ProcessingError::io(root, e))?;

    let mut drives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProcessingError::io(root, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.contains(marker) && entry.path().is_dir() {
            drives.push(name);
        }
    }
    drives.sort();
    Ok(drives)
}

/// Pull the heart-rate channel of one drive out of its device archive.
pub fn extract_recording(
    folder: &Path,
    drive_id: &str,
    settings: &RoadConfig,
) -> Result<Vec<RoadSample>, ProcessingError> {
    let archive =
        locate_archive(folder, &settings.archives).ok_or_else(|| ProcessingError::MissingInput {
            path: folder.join(settings.archives.join(" or ")),
        })?;
    debug!("{DATASET}: {drive_id}: reading {} from {}", settings.member, archive.display());

    let export = load_archive_member(&archive, &settings.member)?;
    debug!(
        "{DATASET}: {drive_id}: start time {}, {} Hz, {} samples",
        export.start_time,
        export.sample_rate,
        export.samples.len()
    );
    Ok(export.into_samples(drive_id))
}

/// Build the combined AffectiveROAD heart-rate table.
pub fn run(config: &Config) -> JobOutcome {
    match convert(config) {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome::Failed(e),
    }
}

fn convert(config: &Config) -> Result<JobOutcome> {
    let root = config.road_root();
    let drives = discover_recordings(&root, &config.road.folder_marker)?;
    info!("{DATASET}: found {} drive recordings", drives.len());

    let extraction = run_units(DATASET, &drives, |drive| {
        extract_recording(&root.join(drive), drive, &config.road)
    });
    if extraction.succeeded.is_empty() {
        return Err(ProcessingError::EmptyResult { dataset: DATASET }.into());
    }

    let path = config.output_path(&config.road.output);
    write_table(extraction.rows.as_slice(), &path, config.format)?;

    Ok(JobOutcome::Written {
        path,
        rows: extraction.rows.len(),
        succeeded: extraction.succeeded.len(),
        skipped: extraction.failed.len(),
    })
}
