//! Unit-level error taxonomy.
//!
//! Every subject or recording is processed into a
//! `Result<Vec<Row>, ProcessingError>`. Errors are logged against the unit and
//! turn into a skip; only [`ProcessingError::EmptyResult`] and output-side
//! failures surface at the dataset level.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("missing input {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("archive {} has no member '{member}'", archive.display())]
    MissingMember { archive: PathBuf, member: String },

    #[error("malformed data in {}: {reason}", path.display())]
    MalformedData { path: PathBuf, reason: String },

    #[error("no {dataset} units could be extracted")]
    EmptyResult { dataset: &'static str },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessingError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ProcessingError::MalformedData { path: path.into(), reason: reason.to_string() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessingError::Io { path: path.into(), source }
    }

    /// The per-unit outcome this error maps to.
    pub fn status(&self) -> UnitStatus {
        match self {
            ProcessingError::MissingInput { .. } | ProcessingError::MissingMember { .. } => {
                UnitStatus::SkippedMissing
            }
            _ => UnitStatus::SkippedMalformed,
        }
    }
}

/// Outcome of one processing unit, used for logging and the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Succeeded,
    SkippedMissing,
    SkippedMalformed,
}
