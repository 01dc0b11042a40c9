// Worker binary entry point
// Runs the configured extraction jobs and writes their output locally

use anyhow::Result;
use chrono::Utc;
use common::config::{Action, Settings};
use common::extraction::{ExtractionJob, Extractor};
use common::output::OutputWriter;
use common::state::{JsonFileStateStore, StateStore};
use common::telemetry;
use common::transport;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    telemetry::init_logging(&settings.log_level)?;
    telemetry::describe_metrics();

    info!("Starting remote file extractor");

    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        anyhow::anyhow!("Invalid configuration: {}", e)
    })?;

    let jobs = settings
        .jobs
        .iter()
        .map(ExtractionJob::from_config)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Invalid job configuration: {}", e))?;

    info!(
        jobs = jobs.len(),
        action = ?settings.action,
        max_parallel_jobs = settings.max_parallel_jobs,
        "Configuration loaded successfully"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, cancelling running jobs");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let state_store: Arc<dyn StateStore> = Arc::new(JsonFileStateStore::new(&settings.state_dir));

    let outcomes: Vec<bool> = stream::iter(jobs.iter())
        .map(|job| {
            let extractor = Extractor::new(
                transport::client_for(job.connection.protocol),
                state_store.clone(),
                shutdown_rx.clone(),
            );
            let settings = &settings;
            async move { run_action(settings, &extractor, job).await }
        })
        .buffer_unordered(settings.max_parallel_jobs)
        .collect()
        .await;

    let failed = outcomes.iter().filter(|ok| !**ok).count();
    if failed > 0 {
        anyhow::bail!("{} of {} job(s) failed", failed, outcomes.len());
    }

    info!("All jobs finished successfully");
    Ok(())
}

async fn run_action(settings: &Settings, extractor: &Extractor, job: &ExtractionJob) -> bool {
    match settings.action {
        Action::Run => run_job(extractor, job, &settings.output_dir).await,
        Action::TestConnection => match extractor.test_connection(job).await {
            Ok(()) => {
                info!(job_name = %job.name, "Connection successful");
                true
            }
            Err(e) => {
                error!(job_name = %job.name, error = %e, "Connection test failed");
                false
            }
        },
        Action::ListFiles => match extractor.list_files(job).await {
            Ok(entries) => {
                let listing = serde_json::json!({
                    "job_name": job.name,
                    "files": entries,
                });
                println!("{}", listing);
                true
            }
            Err(e) => {
                error!(job_name = %job.name, error = %e, "Listing failed");
                false
            }
        },
    }
}

async fn run_job(extractor: &Extractor, job: &ExtractionJob, output_dir: &Path) -> bool {
    let writer = OutputWriter::new(output_dir, &job.name, job.output.clone(), Utc::now());
    let report = match extractor.run(job, &writer).await {
        Ok(report) => report,
        Err(e) => {
            error!(job_name = %job.name, error = %e, kind = e.kind(), "Job aborted");
            return false;
        }
    };

    for failure in &report.failures {
        warn!(
            job_name = %job.name,
            remote_path = %failure.path,
            kind = %failure.kind,
            message = %failure.message,
            "File not extracted"
        );
    }

    info!(
        job_name = %job.name,
        run_id = %report.run_id,
        output_dir = %writer.dir().display(),
        transferred = report.transferred_count(),
        skipped = report.skipped_count(),
        failed = report.failures.len(),
        missing = report.missing.len(),
        duration_ms = (report.completed_at - report.started_at).num_milliseconds(),
        "Job finished"
    );

    report.is_success()
}
