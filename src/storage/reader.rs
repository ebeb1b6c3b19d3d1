// src/storage/reader.rs

use std::{
    fs::{self, File},
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use arrow::array::{Array, StringArray, TimestampMicrosecondArray};
use chrono::{TimeZone, Utc};
use csv::ReaderBuilder;
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use zip::ZipArchive;

use crate::error::{IoContext, PipelineError, Result};
use crate::process::crime::RawCrimeRow;
use crate::process::raw_table::RawRecord;
use crate::storage::writer::Audit;
use crate::storage::{column, PartitionFilter, Selection, StorageLocation, TableRow};

/// How landed CSV files are laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub delimiter: char,
    pub has_headers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_headers: true,
        }
    }
}

pub struct Reader {
    location: StorageLocation,
    csv: CsvOptions,
}

impl Reader {
    pub fn new(location: StorageLocation, csv: CsvOptions) -> Self {
        Self { location, csv }
    }

    fn delimiter(&self) -> Result<u8> {
        u8::try_from(self.csv.delimiter).map_err(|_| {
            PipelineError::InvalidParameter(format!(
                "CSV delimiter must be a single-byte character, got {:?}",
                self.csv.delimiter
            ))
        })
    }

    /// Landed CSV payloads for one ingestion slice, in a stable order: files
    /// by name, and `.csv` entries inside a `.zip` in archive order.
    pub fn landed_payloads(&self, dataset: &str, data_date: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if data_date.is_empty() || data_date.contains(['/', '\\']) || data_date.contains("..") {
            return Err(PipelineError::InvalidParameter(format!(
                "invalid data_date {:?}",
                data_date
            )));
        }
        let dir = self
            .location
            .join(dataset)
            .join(format!("data_date={}", data_date));
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .at(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let mut payloads = Vec::new();
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let lower = name.to_lowercase();
            if lower.ends_with(".csv") {
                let buf = fs::read(&path).at(&path)?;
                payloads.push((name, buf));
            } else if lower.ends_with(".zip") {
                payloads.extend(read_zip_csvs(&path)?);
            } else {
                debug!(file = %name, "skipping non-CSV landed file");
            }
        }
        Ok(payloads)
    }

    /// Raw demographic rows for `data_date`, concatenated across files.
    #[instrument(level = "info", skip(self))]
    pub fn read_landed_demographics(&self, dataset: &str, data_date: &str) -> Result<Vec<RawRecord>> {
        let delimiter = self.delimiter()?;
        let mut rows = Vec::new();
        for (name, data) in self.landed_payloads(dataset, data_date)? {
            let mut rdr = ReaderBuilder::new()
                .has_headers(self.csv.has_headers)
                .delimiter(delimiter)
                .flexible(true)
                .from_reader(Cursor::new(data));
            let before = rows.len();
            for record in rdr.records() {
                let record = record?;
                rows.push(RawRecord::from_fields(record.iter()));
            }
            debug!(file = %name, rows = rows.len() - before, "read landed file");
        }
        if rows.is_empty() {
            return Err(not_found(dataset, Selection::DataDate(data_date.into())));
        }
        info!(rows = rows.len(), "landed demographics loaded");
        Ok(rows)
    }

    /// Raw crime rows for `data_date`. Crime files are always read by header name.
    #[instrument(level = "info", skip(self))]
    pub fn read_landed_crime(&self, dataset: &str, data_date: &str) -> Result<Vec<RawCrimeRow>> {
        let delimiter = self.delimiter()?;
        let mut rows = Vec::new();
        for (name, data) in self.landed_payloads(dataset, data_date)? {
            let mut rdr = ReaderBuilder::new()
                .has_headers(true)
                .delimiter(delimiter)
                .trim(csv::Trim::All)
                .from_reader(Cursor::new(data));
            for row in rdr.deserialize::<RawCrimeRow>() {
                rows.push(row?);
            }
            debug!(file = %name, "read landed crime file");
        }
        if rows.is_empty() {
            return Err(not_found(dataset, Selection::DataDate(data_date.into())));
        }
        info!(rows = rows.len(), "landed crime loaded");
        Ok(rows)
    }

    /// Rows of `table` whose partitions pass `filter`. Partitions are visited
    /// in ascending value order and files by name.
    #[instrument(level = "info", skip(self, filter))]
    pub fn read_table<R: TableRow>(&self, table: &str, filter: &PartitionFilter) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        for file in self.table_files::<R>(table, filter)? {
            let f = File::open(&file).at(&file)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(f)?
                .with_batch_size(8192)
                .build()?;
            for batch in reader {
                rows.extend(R::from_batch(&batch?)?);
            }
        }
        debug!(rows = rows.len(), "table rows loaded");
        Ok(rows)
    }

    /// Same as [`Reader::read_table`] but with each row's audit columns.
    pub fn read_table_audited<R: TableRow>(
        &self,
        table: &str,
        filter: &PartitionFilter,
    ) -> Result<Vec<(R, Audit)>> {
        let mut rows = Vec::new();
        for file in self.table_files::<R>(table, filter)? {
            let f = File::open(&file).at(&file)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(f)?.build()?;
            for batch in reader {
                let batch = batch?;
                let audits = audits_from_batch(&batch)?;
                rows.extend(R::from_batch(&batch)?.into_iter().zip(audits));
            }
        }
        Ok(rows)
    }

    /// Like [`Reader::read_table`], but an empty result is `PartitionNotFound`.
    pub fn read_selection<R: TableRow>(&self, table: &str, selection: &Selection) -> Result<Vec<R>> {
        let filter = match selection {
            Selection::Period { year, quarter } => PartitionFilter::period(*year, *quarter),
            Selection::DataDate(_) => {
                return Err(PipelineError::InvalidParameter(format!(
                    "table `{}` is partitioned by period, not {}",
                    table, selection
                )))
            }
        };
        let rows = self.read_table::<R>(table, &filter)?;
        if rows.is_empty() {
            return Err(not_found(table, selection.clone()));
        }
        Ok(rows)
    }

    fn table_files<R: TableRow>(&self, table: &str, filter: &PartitionFilter) -> Result<Vec<PathBuf>> {
        let mut dirs = vec![self.location.join(table)];
        for col in R::PARTITION_COLUMNS {
            let mut next = Vec::new();
            for dir in &dirs {
                next.extend(partition_children(dir, col, filter)?);
            }
            dirs = next;
        }

        let mut files = Vec::new();
        for dir in dirs {
            let mut found: Vec<PathBuf> = glob(&format!("{}/*.parquet", dir.display()))?
                .filter_map(|e| e.ok())
                .collect();
            found.sort();
            files.extend(found);
        }
        Ok(files)
    }
}

fn not_found(table: &str, selection: Selection) -> PipelineError {
    PipelineError::PartitionNotFound {
        table: table.to_string(),
        selection: selection.to_string(),
    }
}

/// Subdirectories `column=value` of `dir` accepted by `filter`, ordered by
/// value (numerically when both sides are integers). Hidden entries are
/// in-flight writer state and never visible.
fn partition_children(dir: &Path, column: &str, filter: &PartitionFilter) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let prefix = format!("{}=", column);
    let mut children: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        if let Some(value) = name.strip_prefix(&prefix) {
            if filter.accepts(column, value) {
                children.push((value.to_string(), entry.path()));
            }
        }
    }
    children.sort_by(|(a, _), (b, _)| match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });
    Ok(children.into_iter().map(|(_, p)| p).collect())
}

fn read_zip_csvs(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(path).at(path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_file() && name.to_lowercase().ends_with(".csv") {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf).at(path)?;
            out.push((format!("{}!{}", path.display(), name), buf));
        }
    }
    Ok(out)
}

fn audits_from_batch(batch: &arrow::record_batch::RecordBatch) -> Result<Vec<Audit>> {
    let run_id = column::<StringArray>(batch, "run_id")?;
    let run_date = column::<TimestampMicrosecondArray>(batch, "run_date")?;
    let data_date = column::<StringArray>(batch, "data_date")?;
    (0..batch.num_rows())
        .map(|i| -> Result<Audit> {
            let run_date = Utc
                .timestamp_micros(run_date.value(i))
                .single()
                .ok_or_else(|| PipelineError::Schema(format!("run_date out of range at row {}", i)))?;
            Ok(Audit {
                run_id: run_id.value(i).to_string(),
                run_date,
                data_date: (!data_date.is_null(i)).then(|| data_date.value(i).to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::flatten::FlattenedRecord;
    use crate::storage::writer::PartitionedWriter;
    use crate::storage::QuarterSelector;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn land(root: &Path, dataset: &str, date: &str, name: &str, body: &str) {
        let dir = root.join(dataset).join(format!("data_date={}", date));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_landed_files_read_in_name_order() {
        let tmp = tempdir().unwrap();
        land(tmp.path(), "landing/demo", "2024-01-31", "b.csv", "region,men,women\n08002 Badalona,,\n");
        land(
            tmp.path(),
            "landing/demo",
            "2024-01-31",
            "a.csv",
            "region,men,women\n08001 Barcelona,,\n2020-01-01,120.500,130.200\n",
        );
        let reader = Reader::new(StorageLocation::new(tmp.path()), CsvOptions::default());
        let rows = reader
            .read_landed_demographics("landing/demo", "2024-01-31")
            .unwrap();
        assert_eq!(
            rows,
            vec![
                RawRecord::new("08001 Barcelona", None, None),
                RawRecord::new("2020-01-01", Some("120.500"), Some("130.200")),
                RawRecord::new("08002 Badalona", None, None),
            ]
        );
    }

    #[test]
    fn test_landed_zip_is_unpacked() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("landing/demo/data_date=2024-02-29");
        fs::create_dir_all(&dir).unwrap();
        let file = File::create(dir.join("slice.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("padron.csv", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"08001 Barcelona;;\n2021-01-01;1.000;2.000\n").unwrap();
        zip.finish().unwrap();

        let reader = Reader::new(
            StorageLocation::new(tmp.path()),
            CsvOptions {
                delimiter: ';',
                has_headers: false,
            },
        );
        let rows = reader
            .read_landed_demographics("landing/demo", "2024-02-29")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].men.as_deref(), Some("1.000"));
    }

    #[test]
    fn test_missing_slice_is_partition_not_found() {
        let tmp = tempdir().unwrap();
        let reader = Reader::new(StorageLocation::new(tmp.path()), CsvOptions::default());
        let err = reader
            .read_landed_demographics("landing/demo", "2030-01-01")
            .unwrap_err();
        assert!(matches!(err, PipelineError::PartitionNotFound { .. }));
        let err = reader
            .read_landed_demographics("landing/demo", "../etc")
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
    }

    #[test]
    fn test_read_landed_crime() {
        let tmp = tempdir().unwrap();
        land(
            tmp.path(),
            "landing/crime",
            "2024-01-31",
            "crime.csv",
            "zip,district,year,quarter,category,count\n08001, Ciutat Vella ,2020,1,theft,501\n",
        );
        let reader = Reader::new(StorageLocation::new(tmp.path()), CsvOptions::default());
        let rows = reader.read_landed_crime("landing/crime", "2024-01-31").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].district, "Ciutat Vella");
        assert_eq!(rows[0].count, "501");
    }

    #[test]
    fn test_read_selection_filters_partitions() {
        let tmp = tempdir().unwrap();
        let location = StorageLocation::new(tmp.path());
        let rec = |year| FlattenedRecord {
            zip: "08001".into(),
            district: "Barcelona".into(),
            year,
            men: 1,
            women: 1,
            total: 2,
        };
        let writer = PartitionedWriter::new(location.clone(), Default::default());
        writer
            .write("demographics", &[rec(2021), rec(2020), rec(2021)], &Audit::new("r1", None))
            .unwrap();

        let reader = Reader::new(location, CsvOptions::default());
        let all: Vec<FlattenedRecord> = reader
            .read_table("demographics", &PartitionFilter::all())
            .unwrap();
        assert_eq!(all.iter().map(|r| r.year).collect::<Vec<_>>(), vec![2020, 2021, 2021]);

        let sel = Selection::Period {
            year: 2021,
            quarter: QuarterSelector::All,
        };
        let only: Vec<FlattenedRecord> = reader.read_selection("demographics", &sel).unwrap();
        assert_eq!(only.len(), 2);

        let missing = Selection::Period {
            year: 1999,
            quarter: QuarterSelector::All,
        };
        let err = reader
            .read_selection::<FlattenedRecord>("demographics", &missing)
            .unwrap_err();
        assert!(matches!(err, PipelineError::PartitionNotFound { .. }));
    }
}
