use anyhow::Result;
use log::info;

use super::JobOutcome;
use crate::config::Config;
use crate::data::loader::load_spreadsheet;
use crate::data::writer::write_table;

pub const DATASET: &str = "SWELL";

/// Copy the SWELL sheet through with a `Dataset` tag column.
///
/// With `swell.skip_existing` set, an existing output is kept as is and the
/// spreadsheet is not opened.
pub fn run(config: &Config) -> JobOutcome {
    let path = config.output_path(&config.swell.output);
    if config.swell.skip_existing && path.exists() {
        info!("{DATASET}: {} already exists, skipping (use --force to rebuild)", path.display());
        return JobOutcome::Cached { path };
    }

    match convert(config) {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome::Failed(e),
    }
}

fn convert(config: &Config) -> Result<JobOutcome> {
    let source = config.swell_source();
    info!("{DATASET}: reading {}", source.display());
    let sheet = load_spreadsheet(&source)?.with_dataset_tag();

    let path = config.output_path(&config.swell.output);
    write_table(&sheet, &path, config.format)?;

    Ok(JobOutcome::Written { path, rows: sheet.len(), succeeded: 1, skipped: 0 })
}
