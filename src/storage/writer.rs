// src/storage/writer.rs
//! Dynamic partition overwrite.
//!
//! Only the partitions present in the incoming rows are replaced. Every
//! partition is staged in full under a hidden temporary directory inside the
//! table before any destination is touched; the commit then swaps one
//! partition directory at a time via rename, so a partition is always either
//! entirely old or entirely new.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::{BrotliLevel, Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{IoContext, Result};
use crate::storage::{partition_path, StorageLocation, TableRow};

const TRASH_SUFFIX: &str = ".trash";
const STAGING_PREFIX: &str = ".staging-";
const DATA_FILE: &str = "part-00000.parquet";

/// Who wrote a row, and from which ingestion slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub run_id: String,
    pub run_date: DateTime<Utc>,
    pub data_date: Option<String>,
}

impl Audit {
    pub fn new(run_id: impl Into<String>, data_date: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            run_date: Utc::now(),
            data_date,
        }
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::new("run_id", DataType::Utf8, false),
            Field::new(
                "run_date",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("data_date", DataType::Utf8, true),
        ]
    }

    fn to_arrays(&self, n: usize) -> Vec<ArrayRef> {
        let ts = self.run_date.timestamp_micros();
        vec![
            Arc::new(StringArray::from_iter_values(
                std::iter::repeat(self.run_id.as_str()).take(n),
            )),
            Arc::new(TimestampMicrosecondArray::from(vec![ts; n]).with_timezone("UTC")),
            Arc::new(StringArray::from(vec![self.data_date.as_deref(); n])),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    #[default]
    Snappy,
    Zstd,
    Brotli,
    Uncompressed,
}

impl ParquetCompression {
    fn codec(self) -> Compression {
        match self {
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Brotli => Compression::BROTLI(BrotliLevel::default()),
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub table: String,
    /// Relative partition paths that were replaced, e.g. `year=2020`.
    pub partitions: Vec<String>,
    pub rows: u64,
}

pub struct PartitionedWriter {
    location: StorageLocation,
    props: WriterProperties,
}

impl PartitionedWriter {
    pub fn new(location: StorageLocation, compression: ParquetCompression) -> Self {
        let props = WriterProperties::builder()
            .set_compression(compression.codec())
            .set_dictionary_enabled(true)
            .build();
        Self { location, props }
    }

    /// Replace exactly the partitions represented in `rows`.
    #[instrument(level = "info", skip(self, rows, audit), fields(rows = rows.len(), run_id = %audit.run_id))]
    pub fn write<R: TableRow>(&self, table: &str, rows: &[R], audit: &Audit) -> Result<WriteSummary> {
        let table_dir = self.location.join(table);
        let mut summary = WriteSummary {
            table: table.to_string(),
            ..Default::default()
        };
        if rows.is_empty() {
            warn!("empty batch, no partitions replaced");
            return Ok(summary);
        }

        // 1) settle any commit a previous run did not finish
        fs::create_dir_all(&table_dir).at(&table_dir)?;
        recover(&table_dir)?;

        // 2) group by partition, keeping input order inside each group
        let mut groups: BTreeMap<Vec<String>, Vec<&R>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.partition_values()).or_default().push(row);
        }

        // 3) stage every partition; dropping `staging` on error removes it all
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&table_dir)
            .at(&table_dir)?;
        let schema = Arc::new(ArrowSchema::new(
            R::fields().into_iter().chain(Audit::fields()).collect::<Vec<_>>(),
        ));

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(groups.len());
        for (values, group) in &groups {
            let rel = partition_path(R::PARTITION_COLUMNS, values);
            let dir = staging.path().join(&rel);
            fs::create_dir_all(&dir).at(&dir)?;

            let mut columns = R::to_arrays(group);
            columns.extend(audit.to_arrays(group.len()));
            let batch = RecordBatch::try_new(schema.clone(), columns)?;

            let path = dir.join(DATA_FILE);
            let file = File::create(&path).at(&path)?;
            let mut writer =
                ArrowWriter::try_new(BufWriter::new(file), schema.clone(), Some(self.props.clone()))?;
            writer.write(&batch)?;
            writer.close()?;
            debug!(partition = %rel.display(), rows = group.len(), "staged partition");
            staged.push((dir, rel));
        }

        // 4) swap partitions into place one by one
        for (src, rel) in staged {
            let dest = table_dir.join(&rel);
            commit_partition(&src, &dest)?;
            summary.partitions.push(rel.to_string_lossy().to_string());
        }
        summary.rows = rows.len() as u64;

        info!(
            table,
            partitions = ?summary.partitions,
            rows = summary.rows,
            "partitions replaced"
        );
        Ok(summary)
    }
}

fn trash_path(dest: &Path) -> PathBuf {
    let leaf = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}{}", leaf, TRASH_SUFFIX))
}

/// Old partition → trash, staged → final, drop trash.
fn commit_partition(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let trash = trash_path(dest);
    if trash.exists() {
        fs::remove_dir_all(&trash).at(&trash)?;
    }
    let had_old = dest.exists();
    if had_old {
        fs::rename(dest, &trash).at(dest)?;
    }
    if let Err(e) = fs::rename(src, dest) {
        if had_old {
            // put the previous version back before reporting
            if let Err(restore) = fs::rename(&trash, dest) {
                warn!(
                    partition = %dest.display(),
                    error = %restore,
                    "could not restore previous partition, next write will recover it"
                );
            }
        }
        return Err(crate::error::PipelineError::storage(dest, e));
    }
    if had_old {
        fs::remove_dir_all(&trash).at(&trash)?;
    }
    Ok(())
}

/// Walk the table and undo what an interrupted writer left behind: a trash
/// directory whose partition is gone is the last committed version and goes
/// back; other trash and leftover staging directories are deleted.
fn recover(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with(STAGING_PREFIX) {
            warn!(path = %path.display(), "removing abandoned staging directory");
            fs::remove_dir_all(&path).at(&path)?;
        } else if let Some(leaf) = name
            .strip_prefix('.')
            .and_then(|n| n.strip_suffix(TRASH_SUFFIX))
        {
            let live = dir.join(leaf);
            if live.exists() {
                fs::remove_dir_all(&path).at(&path)?;
            } else {
                warn!(partition = %live.display(), "restoring partition from interrupted commit");
                fs::rename(&path, &live).at(&path)?;
                recover(&live)?;
            }
        } else if !name.starts_with('.') {
            recover(&path)?;
        }
    }
    Ok(())
}
