// End-to-end tests for the extraction orchestrator
// Jobs run against an in-memory server with state kept in a temp directory

mod support;

use common::errors::{ErrorKind, JobError, JobFailure, RetrievalErrorKind};
use common::extraction::{ExtractionJob, Extractor};
use common::models::{ExtractionState, TransferOutcome};
use common::output::OutputWriter;
use common::state::{JsonFileStateStore, StateStore};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use support::{job_config, ts, FakeServer, MemorySink};
use tempfile::TempDir;
use tokio::sync::watch;

struct Harness {
    _dir: TempDir,
    store: Arc<JsonFileStateStore>,
    shutdown: watch::Sender<bool>,
    sink: MemorySink,
    extractor: Extractor,
}

fn harness(server: &FakeServer) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStateStore::new(dir.path().join("state")));
    let (shutdown, rx) = watch::channel(false);
    let extractor = Extractor::new(server.client(), store.clone(), rx)
        .with_fixed_retry_delay(Duration::ZERO);
    Harness {
        _dir: dir,
        store,
        shutdown,
        sink: MemorySink::new(),
        extractor,
    }
}

fn job(name: &str, selection: serde_json::Value) -> ExtractionJob {
    ExtractionJob::from_config(&job_config(name, selection)).unwrap()
}

fn data_server() -> FakeServer {
    FakeServer::new()
        .with_file("/data/a.csv", b"a", Some(ts(1)))
        .with_file("/data/b.csv", b"b", Some(ts(2)))
        .with_file("/data/sub/c.csv", b"c", Some(ts(3)))
}

fn transferred_paths(report: &common::models::JobReport) -> Vec<String> {
    report.transferred().map(|r| r.entry.path.clone()).collect()
}

#[tokio::test]
async fn test_wildcard_job_transfers_matches() {
    let server = data_server();
    let h = harness(&server);
    let job = job("daily", json!({ "pattern": "/data/*.csv" }));

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert!(report.is_success());
    assert_eq!(transferred_paths(&report), vec!["/data/a.csv", "/data/b.csv"]);
    let stored: Vec<String> = h.sink.stored().into_keys().collect();
    assert_eq!(stored, vec!["/data/a.csv", "/data/b.csv"]);
    assert!(report.transferred().all(|r| r.local_path.is_some()));
    assert_eq!(server.connects(), 1);
    assert_eq!(server.closes(), 1);
    // Full mode leaves no state behind
    assert!(!h.store.path_for("daily").exists());
}

#[tokio::test]
async fn test_incremental_job_skips_unchanged_files() {
    let server = data_server();
    let h = harness(&server);
    let previous = ExtractionState {
        files: BTreeMap::from([("/data/a.csv".to_string(), ts(1))]),
        last_run_at: Some(ts(1)),
    };
    h.store.save("daily", &previous).await.unwrap();

    let job = job(
        "daily",
        json!({ "pattern": "/data/**/*.csv", "incremental_mode": true }),
    );
    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        transferred_paths(&report),
        vec!["/data/b.csv", "/data/sub/c.csv"]
    );
    assert_eq!(report.skipped_count(), 1);
    assert!(!server.retrievals().contains(&"/data/a.csv".to_string()));

    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.last_modified("/data/a.csv"), Some(ts(1)));
    assert_eq!(saved.last_modified("/data/b.csv"), Some(ts(2)));
    assert_eq!(saved.last_modified("/data/sub/c.csv"), Some(ts(3)));
    assert_eq!(saved, report.state);
}

#[tokio::test]
async fn test_reset_state_extracts_everything() {
    let server = data_server();
    let h = harness(&server);
    let previous = ExtractionState {
        files: BTreeMap::from([
            ("/data/a.csv".to_string(), ts(9)),
            ("/data/b.csv".to_string(), ts(9)),
        ]),
        last_run_at: Some(ts(9)),
    };
    h.store.save("daily", &previous).await.unwrap();

    let job = job(
        "daily",
        json!({ "pattern": "/data/*.csv", "incremental_mode": true, "reset_state": true }),
    );
    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert_eq!(report.transferred_count(), 2);
    assert_eq!(report.skipped_count(), 0);
}

#[tokio::test]
async fn test_corrupt_state_falls_back_to_full_extraction() {
    let server = data_server();
    let h = harness(&server);
    let path = h.store.path_for("daily");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{ not json").unwrap();

    let job = job(
        "daily",
        json!({ "pattern": "/data/*.csv", "incremental_mode": true }),
    );
    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert_eq!(report.transferred_count(), 2);
    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.len(), 2);
}

#[tokio::test]
async fn test_authentication_failure_aborts_without_state_change() {
    let server = data_server().reject_login();
    let h = harness(&server);
    let previous = ExtractionState {
        files: BTreeMap::from([("/data/a.csv".to_string(), ts(1))]),
        last_run_at: Some(ts(1)),
    };
    h.store.save("daily", &previous).await.unwrap();

    let job = job(
        "daily",
        json!({ "pattern": "/data/*.csv", "incremental_mode": true }),
    );
    let err = h.extractor.run(&job, &h.sink).await.unwrap_err();

    assert!(matches!(err, JobError::Connection(_)));
    assert_eq!(err.kind(), "connection_error");
    assert_eq!(server.connects(), 1);
    assert!(server.listings().is_empty());
    assert_eq!(h.store.load("daily").await.unwrap(), previous);
}

#[tokio::test]
async fn test_partial_failure_keeps_successes() {
    let server = data_server().fail_retrieval("/data/b.csv", RetrievalErrorKind::PermissionDenied);
    let h = harness(&server);
    let job = job(
        "daily",
        json!({ "pattern": "/data/*.csv", "incremental_mode": true }),
    );

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert!(report.is_success());
    assert_eq!(transferred_paths(&report), vec!["/data/a.csv"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "/data/b.csv");
    assert_eq!(
        report.failures[0].kind,
        ErrorKind::Retrieval(RetrievalErrorKind::PermissionDenied)
    );

    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.last_modified("/data/a.csv"), Some(ts(1)));
    assert_eq!(saved.last_modified("/data/b.csv"), None);
}

#[tokio::test]
async fn test_dropped_connection_retried_until_budget_spent() {
    let server = data_server().fail_retrieval("/data/a.csv", RetrievalErrorKind::ConnectionDropped);
    let h = harness(&server);
    let job = job("daily", json!({ "pattern": "/data/a.csv" }));

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert_eq!(
        report.failure,
        Some(JobFailure::NothingTransferred { attempted: 1 })
    );
    let failed = report
        .results
        .iter()
        .find(|r| r.entry.path == "/data/a.csv")
        .unwrap();
    match &failed.outcome {
        TransferOutcome::RetriedThenFailed { attempts, .. } => assert_eq!(*attempts, 2),
        other => panic!("unexpected outcome: {:?}", other),
    }
    // Every dropped connection forces a reconnect
    assert_eq!(server.connects(), 2);
}

#[tokio::test]
async fn test_missing_explicit_paths_fail_job() {
    let server = data_server();
    let h = harness(&server);
    let job = job(
        "explicit",
        json!({
            "file_selection_mode": "explicit-paths",
            "paths": ["/data/a.csv", "/data/missing.csv"],
        }),
    );

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert_eq!(transferred_paths(&report), vec!["/data/a.csv"]);
    assert_eq!(report.missing, vec!["/data/missing.csv"]);
    assert_eq!(
        report.failure,
        Some(JobFailure::MissingRequiredFiles {
            paths: vec!["/data/missing.csv".to_string()]
        })
    );
}

#[tokio::test]
async fn test_empty_selection_fails_job() {
    let server = data_server();
    let h = harness(&server);
    let job = job("daily", json!({ "pattern": "/data/*.parquet" }));

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert_eq!(report.failure, Some(JobFailure::NoFilesSelected));
    assert!(server.retrievals().is_empty());
}

#[tokio::test]
async fn test_inaccessible_root_is_selection_error() {
    let server = data_server();
    let h = harness(&server);
    let job = job("daily", json!({ "pattern": "/archive/**/*.csv" }));

    let err = h.extractor.run(&job, &h.sink).await.unwrap_err();

    match err {
        JobError::SelectionRoot { root, .. } => assert_eq!(root, "/archive"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(server.closes(), 1);
}

#[tokio::test]
async fn test_shutdown_before_start_cancels() {
    let server = data_server();
    let h = harness(&server);
    h.shutdown.send(true).unwrap();

    let job = job("daily", json!({ "pattern": "/data/*.csv" }));
    let err = h.extractor.run(&job, &h.sink).await.unwrap_err();

    assert!(matches!(err, JobError::Cancelled));
    assert_eq!(server.connects(), 0);
}

#[tokio::test]
async fn test_shutdown_during_transfer_keeps_finished_files() {
    let server = data_server().hang_on("/data/b.csv");
    let h = harness(&server);
    let job = job(
        "daily",
        json!({ "pattern": "/data/**/*.csv", "incremental_mode": true }),
    );

    let sender = h.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = sender.send(true);
    });

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert_eq!(report.failure, Some(JobFailure::Cancelled));
    assert_eq!(transferred_paths(&report), vec!["/data/a.csv"]);
    assert!(!server.retrievals().contains(&"/data/sub/c.csv".to_string()));
    assert_eq!(server.closes(), 1);

    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.last_modified("/data/a.csv"), Some(ts(1)));
    assert_eq!(saved.last_modified("/data/b.csv"), None);
}

#[tokio::test]
async fn test_list_files_returns_whole_tree() {
    let server = data_server();
    let h = harness(&server);
    let job = job("daily", json!({ "pattern": "/data/*.csv" }));

    let entries = h.extractor.list_files(&job).await.unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();

    assert_eq!(paths, vec!["/data/a.csv", "/data/b.csv", "/data/sub/c.csv"]);
    assert_eq!(server.closes(), 1);
}

#[tokio::test]
async fn test_connection_check() {
    let server = data_server();
    let h = harness(&server);
    let job = job("daily", json!({ "pattern": "/data/*.csv" }));
    h.extractor.test_connection(&job).await.unwrap();
    assert_eq!(server.closes(), 1);

    let rejecting = data_server().reject_login();
    let h = harness(&rejecting);
    assert!(matches!(
        h.extractor.test_connection(&job).await,
        Err(JobError::Connection(_))
    ));
}

#[tokio::test]
async fn test_server_lost_mid_job_stops_remaining_transfers() {
    let server = data_server().go_down_after(1);
    let h = harness(&server);
    let job = job(
        "daily",
        json!({ "pattern": "/data/**/*.csv", "incremental_mode": true }),
    );

    let report = h.extractor.run(&job, &h.sink).await.unwrap();

    assert!(!report.is_success());
    match &report.failure {
        Some(JobFailure::ConnectionLost { path, .. }) => assert_eq!(path, "/data/b.csv"),
        other => panic!("unexpected failure: {:?}", other),
    }
    assert_eq!(transferred_paths(&report), vec!["/data/a.csv"]);
    // One reconnect attempt for b.csv, none for c.csv
    assert_eq!(server.connects(), 2);
    assert!(!server.retrievals().contains(&"/data/sub/c.csv".to_string()));
    assert!(!report
        .results
        .iter()
        .any(|r| r.entry.path == "/data/sub/c.csv"));

    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.last_modified("/data/a.csv"), Some(ts(1)));
    assert_eq!(saved.last_modified("/data/b.csv"), None);
}

#[tokio::test]
async fn test_unwritable_output_not_recorded_as_extracted() {
    let server = data_server();
    let h = harness(&server);
    let sink = MemorySink::refusing("/data/b.csv");
    let job = job(
        "daily",
        json!({ "pattern": "/data/*.csv", "incremental_mode": true }),
    );

    let report = h.extractor.run(&job, &sink).await.unwrap();

    assert_eq!(transferred_paths(&report), vec!["/data/a.csv"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "/data/b.csv");
    assert_eq!(report.failures[0].kind, ErrorKind::Output);
    let stored: Vec<String> = sink.stored().into_keys().collect();
    assert_eq!(stored, vec!["/data/a.csv"]);

    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.last_modified("/data/a.csv"), Some(ts(1)));
    assert_eq!(saved.last_modified("/data/b.csv"), None);
}

#[tokio::test]
async fn test_nothing_written_fails_job() {
    let server = data_server();
    let h = harness(&server);
    let sink = MemorySink::refusing("/data/a.csv");
    let job = job(
        "daily",
        json!({ "pattern": "/data/a.csv", "incremental_mode": true }),
    );

    let report = h.extractor.run(&job, &sink).await.unwrap();

    assert_eq!(
        report.failure,
        Some(JobFailure::NothingTransferred { attempted: 1 })
    );
    assert_eq!(report.transferred_count(), 0);
    let saved = h.store.load("daily").await.unwrap();
    assert_eq!(saved.last_modified("/data/a.csv"), None);
}

#[tokio::test]
async fn test_report_output_written_with_manifest() {
    let server = data_server();
    let h = harness(&server);
    let job = job(
        "daily",
        json!({
            "pattern": "/data/**/*.csv",
            "flatten_output": true,
            "tags": ["finance"],
        }),
    );
    let out = TempDir::new().unwrap();
    let writer = OutputWriter::new(out.path(), &job.name, job.output.clone(), ts(5));

    let report = h.extractor.run(&job, &writer).await.unwrap();
    assert!(report.is_success());

    let target = out.path().join("daily").join("data_sub_c.csv");
    let reported = report
        .transferred()
        .find(|r| r.entry.path == "/data/sub/c.csv")
        .and_then(|r| r.local_path.clone());
    assert_eq!(reported, Some(target.clone()));
    assert_eq!(std::fs::read(&target).unwrap(), b"c");
    let manifest: serde_json::Value = serde_json::from_slice(
        &std::fs::read(out.path().join("daily").join("data_sub_c.csv.manifest")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["tags"], json!(["finance"]));
    assert_eq!(manifest["remote_path"], "/data/sub/c.csv");
}
