use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use district_etl::{
    config::{PipelineConfig, ROOT_ENV},
    pipeline::{JobReport, Pipeline, RunParams},
    storage::QuarterSelector,
};
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "District demographics and crime batch jobs")]
struct Cli {
    /// YAML config file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage root, overriding the config file.
    #[arg(long, global = true, env = ROOT_ENV)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    job: Job,
}

#[derive(Subcommand)]
enum Job {
    /// Flatten landed demographics into yearly partitions.
    Demographics(LandedArgs),
    /// Normalize landed crime counts into quarterly partitions.
    Crime(LandedArgs),
    /// Join crime onto demographics and compute incidence.
    Integrate(PeriodArgs),
}

#[derive(Args)]
struct LandedArgs {
    #[arg(long)]
    data_date: String,
    #[arg(long)]
    run_id: Option<String>,
}

#[derive(Args)]
struct PeriodArgs {
    #[arg(long)]
    year: i32,
    /// 1..=4, or -1 for every quarter.
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    quarter: i32,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    data_date: Option<String>,
}

fn default_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,district_etl=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) config ───────────────────────────────────────────────────
    let cli = Cli::parse();
    let mut cfg = PipelineConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(root) = cli.root {
        cfg.storage_root = root;
    }
    info!(root = %cfg.storage_root.display(), "startup");

    // ─── 3) params ───────────────────────────────────────────────────
    let (name, params) = match cli.job {
        Job::Demographics(a) => ("demographics", landed_params(a)),
        Job::Crime(a) => ("crime", landed_params(a)),
        Job::Integrate(a) => (
            "integrate",
            RunParams {
                data_date: a.data_date,
                run_id: a.run_id.unwrap_or_else(default_run_id),
                year: Some(a.year),
                quarter: QuarterSelector::from_sentinel(a.quarter)?,
            },
        ),
    };

    // ─── 4) run the job off the async runtime ────────────────────────
    let t0 = Instant::now();
    let run_id = params.run_id.clone();
    let outcome: district_etl::error::Result<JobReport> =
        tokio::task::spawn_blocking(move || {
            let pipeline = Pipeline::new(cfg)?;
            match name {
                "demographics" => pipeline.run_demographics(&params),
                "crime" => pipeline.run_crime(&params),
                _ => pipeline.run_integration(&params),
            }
        })
        .await
        .context("job task panicked")?;

    match outcome {
        Ok(report) => {
            info!(
                job = name,
                run_id = %run_id,
                rows = report.write.rows,
                partitions = report.write.partitions.len(),
                elapsed = ?t0.elapsed(),
                "done"
            );
            Ok(())
        }
        Err(e) => {
            error!(job = name, run_id = %run_id, error = %e, "job failed");
            Err(e).with_context(|| format!("{} job failed", name))
        }
    }
}

fn landed_params(a: LandedArgs) -> RunParams {
    RunParams {
        data_date: Some(a.data_date),
        run_id: a.run_id.unwrap_or_else(default_run_id),
        year: None,
        quarter: QuarterSelector::All,
    }
}
