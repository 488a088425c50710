//! Batch jobs, one per dataset.
//!
//! ```text
//!   discover units (subjects / recordings)
//!        │
//!        ▼
//!   ┌────────────┐
//!   │ run_units  │  Result<Vec<Row>, ProcessingError> per unit, logged
//!   └────────────┘
//!        │  successes only, in discovery order
//!        ▼
//!   ┌────────────┐
//!   │ write_table│  one CSV / parquet table per dataset
//!   └────────────┘
//! ```

pub mod road;
pub mod swell;
pub mod wesad;

use std::path::PathBuf;

use log::{debug, error, info, warn};

use crate::error::{ProcessingError, UnitStatus};

// ---------------------------------------------------------------------------
// Per-unit extraction
// ---------------------------------------------------------------------------

/// Concatenated rows of the successful units plus the failures, by unit.
#[derive(Debug)]
pub struct Extraction<T> {
    pub rows: Vec<T>,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ProcessingError)>,
}

impl<T> Extraction<T> {
    pub fn skipped(&self, status: UnitStatus) -> usize {
        self.failed.iter().filter(|(_, e)| e.status() == status).count()
    }
}

/// Run `extract` for every unit, logging each outcome as it happens.
/// A failing unit is recorded and skipped; it never stops the batch.
pub fn run_units<T, F>(dataset: &str, units: &[String], mut extract: F) -> Extraction<T>
where
    F: FnMut(&str) -> Result<Vec<T>, ProcessingError>,
{
    let mut extraction = Extraction { rows: Vec::new(), succeeded: Vec::new(), failed: Vec::new() };

    for unit in units {
        debug!("{dataset}: processing {unit}");
        match extract(unit) {
            Ok(rows) => {
                info!("{dataset}: {unit} extracted ({} rows)", rows.len());
                extraction.rows.extend(rows);
                extraction.succeeded.push(unit.clone());
            }
            Err(e) => {
                match e.status() {
                    UnitStatus::SkippedMissing => warn!("{dataset}: skipping {unit}: {e}"),
                    _ => error!("{dataset}: failed to process {unit}: {e}"),
                }
                extraction.failed.push((unit.clone(), e));
            }
        }
    }

    extraction
}

// ---------------------------------------------------------------------------
// Dataset-level outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum JobOutcome {
    /// A table was written.
    Written {
        path: PathBuf,
        rows: usize,
        succeeded: usize,
        skipped: usize,
    },
    /// The output already existed and was kept.
    Cached { path: PathBuf },
    Failed(anyhow::Error),
}

impl JobOutcome {
    /// True when the dataset's table exists after the run.
    pub fn produced(&self) -> bool {
        !matches!(self, JobOutcome::Failed(_))
    }

    /// One summary line per dataset.
    pub fn log_summary(&self, dataset: &str) {
        match self {
            JobOutcome::Written { path, rows, succeeded, skipped } => info!(
                "{dataset}: wrote {rows} rows from {succeeded} units to {} ({skipped} skipped)",
                path.display()
            ),
            JobOutcome::Cached { path } => info!("{dataset}: kept existing {}", path.display()),
            JobOutcome::Failed(e) => error!("{dataset}: no output produced: {e:#}"),
        }
    }
}
