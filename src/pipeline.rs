// src/pipeline.rs
//! The three batch jobs. Each reads everything it needs first, so a missing
//! input or unreachable storage fails before any partition is replaced.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::history::{RunLog, RunRecord};
use crate::process::crime::{normalize_crime, CrimeRecord, CrimeReport};
use crate::process::flatten::{FlattenReport, FlattenedRecord, HierarchyFlattener};
use crate::process::integrate::{IntegrationReport, Integrator};
use crate::storage::{
    Audit, PartitionedWriter, QuarterSelector, Reader, Selection, WriteSummary,
};

/// Parameters handed over by whoever schedules the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub data_date: Option<String>,
    pub run_id: String,
    pub year: Option<i32>,
    pub quarter: QuarterSelector,
}

impl RunParams {
    fn data_date(&self) -> Result<&str> {
        self.data_date
            .as_deref()
            .ok_or_else(|| PipelineError::InvalidParameter("data_date is required".into()))
    }

    fn year(&self) -> Result<i32> {
        self.year
            .ok_or_else(|| PipelineError::InvalidParameter("year is required".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quality {
    Flatten(FlattenReport),
    Crime(CrimeReport),
    Integration(IntegrationReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job: String,
    pub run_id: String,
    pub selection: String,
    pub write: WriteSummary,
    pub quality: Quality,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    reader: Reader,
    writer: PartitionedWriter,
    runs: RunLog,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        let location = cfg.location();
        let reader = Reader::new(location.clone(), cfg.csv.clone());
        let writer = PartitionedWriter::new(location.clone(), cfg.compression);
        let runs = RunLog::open(cfg.run_log_path())?;
        debug!(root = %location.root().display(), "pipeline ready");
        Ok(Self {
            cfg,
            reader,
            writer,
            runs,
        })
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn runs(&self) -> &RunLog {
        &self.runs
    }

    /// Landed demographics for `data_date` → flattened → `year` partitions.
    #[instrument(level = "info", skip(self), fields(run_id = %params.run_id))]
    pub fn run_demographics(&self, params: &RunParams) -> Result<JobReport> {
        let started = Utc::now();
        let data_date = params.data_date()?;

        let raw = self
            .reader
            .read_landed_demographics(&self.cfg.landing.demographics, data_date)?;
        let flattened = HierarchyFlattener::new(self.cfg.fill_shard_len).flatten(&raw);

        let audit = Audit::new(&params.run_id, Some(data_date.to_string()));
        let write = self
            .writer
            .write(&self.cfg.tables.demographics, &flattened.records, &audit)?;

        let report = JobReport {
            job: "demographics".into(),
            run_id: params.run_id.clone(),
            selection: Selection::DataDate(data_date.into()).to_string(),
            write,
            quality: Quality::Flatten(flattened.report),
        };
        self.finish(started, &report);
        Ok(report)
    }

    /// Landed crime counts for `data_date` → `year`/`quarter` partitions.
    #[instrument(level = "info", skip(self), fields(run_id = %params.run_id))]
    pub fn run_crime(&self, params: &RunParams) -> Result<JobReport> {
        let started = Utc::now();
        let data_date = params.data_date()?;

        let raw = self
            .reader
            .read_landed_crime(&self.cfg.landing.crime, data_date)?;
        let (records, quality) = normalize_crime(&raw);

        let audit = Audit::new(&params.run_id, Some(data_date.to_string()));
        let write = self.writer.write(&self.cfg.tables.crime, &records, &audit)?;

        let report = JobReport {
            job: "crime".into(),
            run_id: params.run_id.clone(),
            selection: Selection::DataDate(data_date.into()).to_string(),
            write,
            quality: Quality::Crime(quality),
        };
        self.finish(started, &report);
        Ok(report)
    }

    /// Demographics for `year` joined with crime for `year` (and quarter) →
    /// `year`/`quarter` partitions of the incidence table.
    #[instrument(level = "info", skip(self), fields(run_id = %params.run_id))]
    pub fn run_integration(&self, params: &RunParams) -> Result<JobReport> {
        let started = Utc::now();
        let year = params.year()?;
        let demo_sel = Selection::Period {
            year,
            quarter: QuarterSelector::All,
        };
        let crime_sel = Selection::Period {
            year,
            quarter: params.quarter,
        };

        let (demographics, crime) = rayon::join(
            || {
                self.reader
                    .read_selection::<FlattenedRecord>(&self.cfg.tables.demographics, &demo_sel)
            },
            || {
                self.reader
                    .read_selection::<CrimeRecord>(&self.cfg.tables.crime, &crime_sel)
            },
        );
        let (demographics, crime) = (demographics?, crime?);

        let (joined, quality) = Integrator.integrate(&demographics, &crime);
        if joined.is_empty() {
            warn!(%crime_sel, "join produced no rows, nothing replaced");
        }

        let audit = Audit::new(&params.run_id, params.data_date.clone());
        let write = self
            .writer
            .write(&self.cfg.tables.crime_incidence, &joined, &audit)?;

        let report = JobReport {
            job: "integration".into(),
            run_id: params.run_id.clone(),
            selection: crime_sel.to_string(),
            write,
            quality: Quality::Integration(quality),
        };
        self.finish(started, &report);
        Ok(report)
    }

    /// Log the report and append it to the run log. The data is already
    /// committed at this point, so a run-log failure only warns.
    fn finish(&self, started: chrono::DateTime<Utc>, report: &JobReport) {
        let json = match serde_json::to_string(report) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "could not serialize job report");
                return;
            }
        };
        info!(job = %report.job, report = %json, "job finished");

        let rec = RunRecord {
            run_id: report.run_id.clone(),
            job: report.job.clone(),
            started_at: started,
            finished_at: Utc::now(),
            rows_written: report.write.rows,
            partitions: report.write.partitions.clone(),
            report: json,
        };
        if let Err(e) = self.runs.record(&rec) {
            warn!(error = %e, "could not append to run log");
        }
    }
}
