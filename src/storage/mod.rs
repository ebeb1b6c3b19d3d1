// src/storage/mod.rs
//! Hive-partitioned Parquet tables (`<table>/year=2020/quarter=1/*.parquet`)
//! and landed CSV slices (`<dataset>/data_date=2024-01-31/*.csv`).

pub mod reader;
pub mod rows;
pub mod writer;

use std::fmt;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::Field;
use arrow::record_batch::RecordBatch;

use crate::error::{PipelineError, Result};

pub use reader::{CsvOptions, Reader};
pub use writer::{Audit, ParquetCompression, PartitionedWriter, WriteSummary};

/// Root of all landed and curated data. Resolved by whoever launches the
/// run and handed to [`Reader`] and [`PartitionedWriter`].
#[derive(Debug, Clone)]
pub struct StorageLocation {
    root: PathBuf,
}

impl StorageLocation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }
}

/// A row type stored in a partitioned table.
///
/// Partition columns are written into the data files as well as the
/// directory names, so `from_batch` never needs the path.
pub trait TableRow: Sized + Send + Sync {
    /// Partition columns, outermost first.
    const PARTITION_COLUMNS: &'static [&'static str];
    /// Data fields, in file order (audit columns are appended by the writer).
    fn fields() -> Vec<Field>;
    /// Values aligned with `PARTITION_COLUMNS`.
    fn partition_values(&self) -> Vec<String>;
    fn to_arrays(rows: &[&Self]) -> Vec<ArrayRef>;
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

/// `-1` on the command line means every quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuarterSelector {
    #[default]
    All,
    Only(u8),
}

impl QuarterSelector {
    pub fn from_sentinel(q: i32) -> Result<Self> {
        match q {
            -1 => Ok(QuarterSelector::All),
            1..=4 => Ok(QuarterSelector::Only(q as u8)),
            other => Err(PipelineError::InvalidParameter(format!(
                "quarter must be 1..=4 or -1, got {}",
                other
            ))),
        }
    }
}

/// What a run asks the reader for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    DataDate(String),
    Period { year: i32, quarter: QuarterSelector },
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::DataDate(d) => write!(f, "data_date={}", d),
            Selection::Period {
                year,
                quarter: QuarterSelector::All,
            } => write!(f, "year={} (all quarters)", year),
            Selection::Period {
                year,
                quarter: QuarterSelector::Only(q),
            } => write!(f, "year={} quarter={}", year, q),
        }
    }
}

/// Equality predicates on partition columns; columns not named match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionFilter {
    eq: Vec<(String, String)>,
}

impl PartitionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl ToString) -> Self {
        self.eq.push((column.to_string(), value.to_string()));
        self
    }

    /// `year = y` plus `quarter = q` unless every quarter is wanted.
    pub fn period(year: i32, quarter: QuarterSelector) -> Self {
        let f = Self::all().with("year", year);
        match quarter {
            QuarterSelector::All => f,
            QuarterSelector::Only(q) => f.with("quarter", q),
        }
    }

    pub fn accepts(&self, column: &str, value: &str) -> bool {
        self.eq
            .iter()
            .filter(|(c, _)| c == column)
            .all(|(_, v)| v == value)
    }
}

/// `["2020", "1"]` → `year=2020/quarter=1`
pub fn partition_path(columns: &[&str], values: &[String]) -> PathBuf {
    columns
        .iter()
        .zip(values)
        .map(|(c, v)| format!("{}={}", c, v))
        .collect()
}

/// Typed column lookup by name.
pub(crate) fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A> {
    let arr = batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::Schema(format!("missing column `{}`", name)))?;
    arr.as_any().downcast_ref::<A>().ok_or_else(|| {
        PipelineError::Schema(format!(
            "column `{}` has unexpected type {:?}",
            name,
            arr.data_type()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_sentinel() {
        assert_eq!(QuarterSelector::from_sentinel(-1).unwrap(), QuarterSelector::All);
        assert_eq!(QuarterSelector::from_sentinel(3).unwrap(), QuarterSelector::Only(3));
        assert!(QuarterSelector::from_sentinel(0).is_err());
        assert!(QuarterSelector::from_sentinel(5).is_err());
    }

    #[test]
    fn test_partition_filter() {
        let f = PartitionFilter::period(2020, QuarterSelector::Only(2));
        assert!(f.accepts("year", "2020"));
        assert!(!f.accepts("year", "2021"));
        assert!(f.accepts("quarter", "2"));
        assert!(!f.accepts("quarter", "1"));
        let all = PartitionFilter::period(2020, QuarterSelector::All);
        assert!(all.accepts("quarter", "4"));
    }

    #[test]
    fn test_partition_path() {
        let p = partition_path(&["year", "quarter"], &["2020".into(), "1".into()]);
        assert_eq!(p, PathBuf::from("year=2020").join("quarter=1"));
    }

    #[test]
    fn test_selection_display() {
        let s = Selection::Period {
            year: 2020,
            quarter: QuarterSelector::All,
        };
        assert_eq!(s.to_string(), "year=2020 (all quarters)");
        assert_eq!(
            Selection::DataDate("2024-01-31".into()).to_string(),
            "data_date=2024-01-31"
        );
    }
}
