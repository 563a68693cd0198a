//! Error kinds shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by stage functions.
///
/// Only [`StageError::FatalConfig`] aborts a batch. Everything else is
/// recorded and the batch moves on to the next unit.
#[derive(Debug, Error)]
pub enum StageError {
    /// A required external tool, script or input root is missing or invalid.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    /// This (sequence, variant) unit cannot continue.
    #[error("unit skipped: {0}")]
    UnitSkip(String),

    /// The external transform of a variant failed; the variant is disabled.
    #[error("variant '{variant}' failed: {reason}")]
    VariantFailed { variant: String, reason: String },

    /// File-system failure inside a unit.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        StageError::FatalConfig(msg.into())
    }

    pub fn skip(msg: impl Into<String>) -> Self {
        StageError::UnitSkip(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io { path: path.into(), source }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::FatalConfig(_))
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Attach a path to an `io::Result`.
pub trait IoContext<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> StageResult<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> StageResult<T> {
        self.map_err(|e| StageError::io(path, e))
    }
}

impl<T> IoContext<T> for Result<T, csv::Error> {
    fn at_path(self, path: impl Into<PathBuf>) -> StageResult<T> {
        self.map_err(|e| StageError::io(path, e.into()))
    }
}
