// src/history/mod.rs
//! Append-only log of completed runs, one tiny Parquet file per run under
//! `date=YYYYMMDD/`, each written to `.tmp` and renamed into place.

use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, TimeZone, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tracing::{debug, info};

use crate::error::{IoContext, PipelineError, Result};
use crate::storage::column;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_written: u64,
    pub partitions: Vec<String>,
    /// Job report as JSON.
    pub report: String,
}

impl RunRecord {
    fn unique_key(&self) -> String {
        format!("{}---{}", self.job, self.run_id)
    }

    fn schema() -> ArrowSchema {
        let ts = || ArrowDataType::Timestamp(TimeUnit::Microsecond, None);
        ArrowSchema::new(vec![
            Field::new("run_id", ArrowDataType::Utf8, false),
            Field::new("job", ArrowDataType::Utf8, false),
            Field::new("started_at", ts(), false),
            Field::new("finished_at", ts(), false),
            Field::new("rows_written", ArrowDataType::UInt64, false),
            Field::new("partitions", ArrowDataType::Utf8, false),
            Field::new("report", ArrowDataType::Utf8, false),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.run_id.clone()])),
            Arc::new(StringArray::from(vec![self.job.clone()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .started_at
                .timestamp_micros()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .finished_at
                .timestamp_micros()])),
            Arc::new(UInt64Array::from(vec![self.rows_written])),
            Arc::new(StringArray::from(vec![self.partitions.join(",")])),
            Arc::new(StringArray::from(vec![self.report.clone()])),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let run_id = column::<StringArray>(batch, "run_id")?;
        let job = column::<StringArray>(batch, "job")?;
        let started = column::<TimestampMicrosecondArray>(batch, "started_at")?;
        let finished = column::<TimestampMicrosecondArray>(batch, "finished_at")?;
        let rows = column::<UInt64Array>(batch, "rows_written")?;
        let partitions = column::<StringArray>(batch, "partitions")?;
        let report = column::<StringArray>(batch, "report")?;

        let ts = |micros: i64| {
            Utc.timestamp_micros(micros)
                .single()
                .ok_or_else(|| PipelineError::Schema(format!("timestamp {} out of range", micros)))
        };
        (0..batch.num_rows())
            .map(|i| -> Result<RunRecord> {
                Ok(RunRecord {
                    run_id: run_id.value(i).to_string(),
                    job: job.value(i).to_string(),
                    started_at: ts(started.value(i))?,
                    finished_at: ts(finished.value(i))?,
                    rows_written: rows.value(i),
                    partitions: partitions
                        .value(i)
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                    report: report.value(i).to_string(),
                })
            })
            .collect()
    }
}

pub struct RunLog {
    dir: PathBuf,
    /// `(job, run_id)` keys already on disk.
    seen: Mutex<HashSet<String>>,
}

impl RunLog {
    /// Open (creating if needed) and load the keys of every recorded run.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).at(&dir)?;
        let log = Self {
            dir,
            seen: Mutex::new(HashSet::new()),
        };
        let keys: HashSet<String> = log.load()?.iter().map(RunRecord::unique_key).collect();
        debug!(runs = keys.len(), "run log opened");
        *log.seen.lock().unwrap_or_else(|e| e.into_inner()) = keys;
        Ok(log)
    }

    /// Append `rec`; a second record for the same job and run id is a no-op.
    /// Returns whether anything was written.
    pub fn record(&self, rec: &RunRecord) -> Result<bool> {
        let key = rec.unique_key();
        {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            if !seen.insert(key.clone()) {
                debug!(key = %key, "run already recorded");
                return Ok(false);
            }
        }

        if let Err(e) = self.write_record(rec, &key) {
            self.seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            return Err(e);
        }
        info!(job = %rec.job, run_id = %rec.run_id, "run recorded");
        Ok(true)
    }

    fn write_record(&self, rec: &RunRecord, key: &str) -> Result<()> {
        let partition = format!("date={}", rec.finished_at.date_naive().format("%Y%m%d"));
        let dir = self.dir.join(partition);
        fs::create_dir_all(&dir).at(&dir)?;

        let fname = format!("{}.parquet", sanitize(key));
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let schema = Arc::new(RunRecord::schema());
        let file = File::create(&tmp).at(&tmp)?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), schema.clone(), None)?;
        let batch = RecordBatch::try_new(schema, rec.to_arrays())?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path).at(&final_path)?;
        Ok(())
    }

    /// Every recorded run, oldest partition first.
    pub fn load(&self) -> Result<Vec<RunRecord>> {
        let mut files: Vec<PathBuf> = glob(&format!("{}/date=*/*.parquet", self.dir.display()))?
            .filter_map(|e| e.ok())
            .collect();
        files.sort();

        let mut out = Vec::new();
        for path in files {
            let f = File::open(&path).at(&path)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(f)?.build()?;
            for batch in reader {
                out.extend(RunRecord::from_batch(&batch?)?);
            }
        }
        Ok(out)
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(run_id: &str) -> RunRecord {
        let now = Utc.timestamp_micros(Utc::now().timestamp_micros()).unwrap();
        RunRecord {
            run_id: run_id.to_string(),
            job: "demographics".to_string(),
            started_at: now,
            finished_at: now,
            rows_written: 3,
            partitions: vec!["year=2020".into(), "year=2021".into()],
            report: r#"{"output_rows":3}"#.to_string(),
        }
    }

    #[test]
    fn test_record_and_load() {
        let tmp = tempdir().unwrap();
        let log = RunLog::open(tmp.path()).unwrap();
        let rec = run("run-1");
        assert!(log.record(&rec).unwrap());
        assert_eq!(log.load().unwrap(), vec![rec]);
    }

    #[test]
    fn test_duplicate_run_is_skipped_across_restarts() {
        let tmp = tempdir().unwrap();
        {
            let log = RunLog::open(tmp.path()).unwrap();
            assert!(log.record(&run("run-1")).unwrap());
            assert!(!log.record(&run("run-1")).unwrap());
        }
        let log = RunLog::open(tmp.path()).unwrap();
        assert!(!log.record(&run("run-1")).unwrap());
        assert!(log.record(&run("run/2")).unwrap());
        assert_eq!(log.load().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_write_can_be_retried() {
        let tmp = tempdir().unwrap();
        let log = RunLog::open(tmp.path()).unwrap();
        let rec = run("run-1");

        // a plain file where the date partition directory should go
        let blocker = tmp
            .path()
            .join(format!("date={}", rec.finished_at.date_naive().format("%Y%m%d")));
        fs::write(&blocker, b"").unwrap();
        assert!(log.record(&rec).is_err());

        fs::remove_file(&blocker).unwrap();
        assert!(log.record(&rec).unwrap());
        assert_eq!(log.load().unwrap(), vec![rec]);
    }
}
