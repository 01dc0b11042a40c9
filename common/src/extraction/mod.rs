// Extraction orchestrator
// connect → select → filter → transfer → finalize, one session per job

mod phase;

pub use phase::{Phase, PhaseTracker};

use crate::config::{ConnectionConfig, JobConfig};
use crate::errors::{ErrorKind, JobError, JobFailure, TransferError, ValidationError};
use crate::incremental::{self, FilterPlan};
use crate::models::{ExtractionState, FailureRecord, JobReport, RemoteEntry, TransferResult};
use crate::output::{OutputOptions, OutputSink};
use crate::retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
use crate::selection::{self, Selection, SelectionSpec};
use crate::state::StateStore;
use crate::telemetry;
use crate::transport::{RetryingSession, TransportClient};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// ExtractionJob is a validated job row
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub name: String,
    pub connection: ConnectionConfig,
    pub selection: SelectionSpec,
    pub incremental: bool,
    pub reset_state: bool,
    pub output: OutputOptions,
}

impl ExtractionJob {
    pub fn from_config(config: &JobConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            connection: config.connection.resolve()?,
            selection: config.selection()?,
            incremental: config.incremental_mode,
            reset_state: config.reset_state,
            output: config.output_options(),
        })
    }
}

/// Extractor runs jobs against servers reached through one transport client
pub struct Extractor {
    client: Arc<dyn TransportClient>,
    state_store: Arc<dyn StateStore>,
    shutdown: watch::Receiver<bool>,
    fixed_retry_delay: Option<Duration>,
}

/// Resolves once shutdown was requested; never if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl Extractor {
    pub fn new(
        client: Arc<dyn TransportClient>,
        state_store: Arc<dyn StateStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            state_store,
            shutdown,
            fixed_retry_delay: None,
        }
    }

    /// Replace exponential backoff with a constant delay between attempts
    pub fn with_fixed_retry_delay(mut self, delay: Duration) -> Self {
        self.fixed_retry_delay = Some(delay);
        self
    }

    fn session_for(&self, connection: &ConnectionConfig) -> RetryingSession {
        let strategy: Box<dyn RetryStrategy> = match self.fixed_retry_delay {
            Some(delay) => Box::new(FixedDelay::new(connection.max_retries, delay)),
            None => Box::new(ExponentialBackoff::new(connection.max_retries)),
        };
        RetryingSession::with_strategy(self.client.clone(), connection.clone(), strategy)
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Connect, authenticate and disconnect
    #[instrument(skip(self, job), fields(job_name = %job.name, host = %job.connection.host))]
    pub async fn test_connection(&self, job: &ExtractionJob) -> Result<(), JobError> {
        let mut session = self.session_for(&job.connection);
        let opened = session.open().await;
        session.close().await;
        opened.result.map_err(JobError::Connection)?;
        info!("Connection test succeeded");
        Ok(())
    }

    /// Every file reachable from the root, for building interactive selections
    #[instrument(skip(self, job), fields(job_name = %job.name, host = %job.connection.host))]
    pub async fn list_files(&self, job: &ExtractionJob) -> Result<Vec<RemoteEntry>, JobError> {
        let mut session = self.session_for(&job.connection);
        let opened = session.open().await;
        let listed = match opened.result {
            Ok(()) => selection::resolve(&mut session, &SelectionSpec::everything())
                .await
                .map_err(JobError::from),
            Err(e) => Err(JobError::Connection(e)),
        };
        session.close().await;
        Ok(listed?.entries)
    }

    /// Run one job to completion
    ///
    /// Every retrieved file is handed to `sink` before it counts as
    /// transferred. Connection and selection-root failures before the first
    /// transfer are returned as errors with the state untouched. Everything
    /// else ends in a report, whose `failure` is set when the run must be
    /// considered failed.
    #[instrument(skip(self, job, sink), fields(job_name = %job.name, protocol = %job.connection.protocol, host = %job.connection.host))]
    pub async fn run(
        &self,
        job: &ExtractionJob,
        sink: &dyn OutputSink,
    ) -> Result<JobReport, JobError> {
        let mut phases = PhaseTracker::new(&job.name);
        let mut session = self.session_for(&job.connection);

        let outcome = self.drive(job, sink, &mut session, &mut phases).await;
        session.close().await;

        match &outcome {
            Ok(report) if report.is_success() => {
                phases.advance(Phase::Done);
                info!(
                    transferred = report.transferred_count(),
                    skipped = report.skipped_count(),
                    failed = report.failures.len(),
                    "Extraction completed"
                );
            }
            Ok(report) => {
                phases.fail();
                if let Some(failure) = &report.failure {
                    error!(reason = %failure, failed = report.failures.len(), "Extraction failed");
                }
            }
            Err(e) => {
                phases.fail();
                error!(error = %e, kind = e.kind(), "Extraction aborted");
            }
        }
        outcome
    }

    async fn load_state(&self, job: &ExtractionJob) -> ExtractionState {
        if !job.incremental {
            return ExtractionState::new();
        }
        if job.reset_state {
            info!("State reset requested, extracting everything");
            return ExtractionState::new();
        }
        match self.state_store.load(&job.name).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Previous state unreadable, falling back to full extraction");
                ExtractionState::new()
            }
        }
    }

    async fn drive(
        &self,
        job: &ExtractionJob,
        sink: &dyn OutputSink,
        session: &mut RetryingSession,
        phases: &mut PhaseTracker,
    ) -> Result<JobReport, JobError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut shutdown = self.shutdown.clone();
        let protocol = job.connection.protocol.to_string();

        let previous = self.load_state(job).await;

        if self.is_shutting_down() {
            return Err(JobError::Cancelled);
        }

        let opened = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => return Err(JobError::Cancelled),
            opened = session.open() => opened,
        };
        opened.result.map_err(JobError::Connection)?;
        phases.advance(Phase::Connected);

        phases.advance(Phase::Selecting);
        let Selection { entries, missing } = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => return Err(JobError::Cancelled),
            resolved = selection::resolve(&mut *session, &job.selection) => resolved?,
        };
        let selected_count = entries.len();

        phases.advance(Phase::Filtering);
        let FilterPlan { work, skipped } = if job.incremental {
            incremental::plan(entries, &previous)
        } else {
            FilterPlan {
                work: entries,
                skipped: Vec::new(),
            }
        };
        if !skipped.is_empty() {
            info!(skipped = skipped.len(), "Unchanged files skipped");
            telemetry::record_files_skipped(&job.name, skipped.len() as u64);
        }

        phases.advance(Phase::Transferring);
        let attempted = work.len();
        let mut results = Vec::with_capacity(selected_count);
        let mut failures = Vec::new();
        let mut cancelled = false;
        let mut connection_lost = None;

        for entry in work {
            if self.is_shutting_down() {
                cancelled = true;
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    warn!(remote_path = %entry.path, "Shutdown requested, abandoning transfer");
                    cancelled = true;
                    break;
                }
                outcome = session.retrieve(&entry.path) => outcome,
            };

            let data = match outcome.result {
                Ok(data) => data,
                Err(e) => {
                    error!(remote_path = %entry.path, error = %e, attempts = outcome.attempts, "File retrieval failed");
                    telemetry::record_file_failed(&job.name, &protocol, &e.kind().to_string());
                    failures.push(FailureRecord {
                        path: entry.path.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    let lost = matches!(e, TransferError::Connection { .. });
                    if lost {
                        error!(remote_path = %entry.path, "Connection lost, abandoning remaining files");
                        connection_lost = Some(JobFailure::ConnectionLost {
                            path: entry.path.clone(),
                            message: e.to_string(),
                        });
                    }
                    results.push(TransferResult::failed(entry, &e, outcome.attempts));
                    if lost {
                        break;
                    }
                    continue;
                }
            };

            let bytes = data.len() as u64;
            match sink.store(&entry, &data).await {
                Ok(local_path) => {
                    info!(remote_path = %entry.path, local_path = %local_path.display(), size = bytes, attempts = outcome.attempts, "File retrieved");
                    telemetry::record_file_transferred(&job.name, &protocol, bytes);
                    results.push(TransferResult::succeeded(entry, local_path, bytes, outcome.attempts));
                }
                Err(e) => {
                    error!(remote_path = %entry.path, error = %e, "Failed to write local copy");
                    telemetry::record_file_failed(&job.name, &protocol, &ErrorKind::Output.to_string());
                    failures.push(FailureRecord {
                        path: entry.path.clone(),
                        kind: ErrorKind::Output,
                        message: e.to_string(),
                    });
                    results.push(TransferResult::failed_with(
                        entry,
                        ErrorKind::Output,
                        e.to_string(),
                        outcome.attempts,
                    ));
                }
            }
        }
        results.extend(skipped.into_iter().map(TransferResult::skipped));

        phases.advance(Phase::Finalizing);
        let state = if job.incremental {
            let next = incremental::record_successes(&previous, &results, started_at);
            self.state_store.save(&job.name, &next).await?;
            next
        } else {
            previous
        };

        let transferred = results.iter().filter(|r| r.is_success()).count();
        let failure = if cancelled {
            Some(JobFailure::Cancelled)
        } else if let Some(lost) = connection_lost {
            Some(lost)
        } else if !missing.is_empty() {
            Some(JobFailure::MissingRequiredFiles {
                paths: missing.clone(),
            })
        } else if selected_count == 0 {
            Some(JobFailure::NoFilesSelected)
        } else if attempted > 0 && transferred == 0 {
            Some(JobFailure::NothingTransferred { attempted })
        } else {
            None
        };

        Ok(JobReport {
            job_name: job.name.clone(),
            run_id,
            started_at,
            completed_at: Utc::now(),
            results,
            failures,
            missing,
            state,
            failure,
        })
    }
}
