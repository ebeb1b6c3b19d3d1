// src/error.rs
//! Fatal errors and row-level data-quality issues.
//!
//! Anything in [`PipelineError`] aborts a run before a single partition is
//! replaced. [`RowIssue`] values never propagate: the offending row is
//! excluded and counted in the job report.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The selection matched zero input rows; nothing to process.
    #[error("no rows found in `{table}` for {selection}")]
    PartitionNotFound { table: String, selection: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}

impl PipelineError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Extension for attaching the offending path to `io::Result`s.
pub trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| PipelineError::storage(path, e))
    }
}

/// Why a single input row was excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RowIssue {
    /// Region text is neither a `ZIP NAME` header nor a dated reading.
    MalformedRegion,
    /// A count is missing or not purely digits once `.` separators are gone.
    NumericParse,
    /// A reading with no valid header before it.
    Orphaned,
    InvalidZip,
    InvalidQuarter,
}

impl RowIssue {
    pub fn as_str(&self) -> &str {
        match self {
            RowIssue::MalformedRegion => "malformed_region",
            RowIssue::NumericParse => "numeric_parse",
            RowIssue::Orphaned => "orphaned",
            RowIssue::InvalidZip => "invalid_zip",
            RowIssue::InvalidQuarter => "invalid_quarter",
        }
    }
}

impl std::fmt::Display for RowIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
