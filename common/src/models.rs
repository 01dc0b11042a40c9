// Domain models for remote file extraction

use crate::errors::{ErrorKind, JobFailure, TransferError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Protocol
// ============================================================================

/// Protocol represents the transport used to reach a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "ftp")]
    Ftp,
    #[serde(rename = "sftp")]
    Sftp,
    #[serde(rename = "ex-ftps", alias = "ftps-explicit")]
    FtpsExplicit,
    #[serde(rename = "im-ftps", alias = "ftps-implicit")]
    FtpsImplicit,
}

impl Protocol {
    /// Port used when the configuration leaves it unset
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::FtpsExplicit => 21,
            Protocol::Sftp => 22,
            Protocol::FtpsImplicit => 990,
        }
    }

    /// Whether this protocol belongs to the FTP control/data connection family
    pub fn is_ftp_family(&self) -> bool {
        !matches!(self, Protocol::Sftp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Ftp => "FTP",
            Protocol::Sftp => "SFTP",
            Protocol::FtpsExplicit => "FTPS-Explicit",
            Protocol::FtpsImplicit => "FTPS-Implicit",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Remote entries
// ============================================================================

/// RemoteEntry is one item produced by a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Absolute, `/`-separated path
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn file(
        path: impl Into<String>,
        size: Option<u64>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            modified,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: None,
            modified: None,
        }
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

// ============================================================================
// Extraction state
// ============================================================================

/// ExtractionState maps remote paths to the modification time observed when
/// the file was last extracted successfully
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionState {
    #[serde(default)]
    pub files: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ExtractionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_modified(&self, path: &str) -> Option<DateTime<Utc>> {
        self.files.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ============================================================================
// Transfer results
// ============================================================================

/// Outcome of one selected entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Succeeded { bytes: u64, attempts: u32 },
    RetriedThenFailed { attempts: u32, kind: ErrorKind, message: String },
    /// Failed on the first attempt, not retryable
    Failed { kind: ErrorKind, message: String },
    SkippedByFilter,
}

/// TransferResult pairs a selected entry with where its content was stored
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub entry: RemoteEntry,
    pub local_path: Option<PathBuf>,
    pub outcome: TransferOutcome,
}

impl TransferResult {
    pub fn succeeded(entry: RemoteEntry, local_path: PathBuf, bytes: u64, attempts: u32) -> Self {
        Self {
            entry,
            local_path: Some(local_path),
            outcome: TransferOutcome::Succeeded { bytes, attempts },
        }
    }

    pub fn failed(entry: RemoteEntry, error: &TransferError, attempts: u32) -> Self {
        Self::failed_with(entry, error.kind(), error.to_string(), attempts)
    }

    pub fn failed_with(
        entry: RemoteEntry,
        kind: ErrorKind,
        message: String,
        attempts: u32,
    ) -> Self {
        let outcome = if attempts > 1 {
            TransferOutcome::RetriedThenFailed {
                attempts,
                kind,
                message,
            }
        } else {
            TransferOutcome::Failed { kind, message }
        };
        Self {
            entry,
            local_path: None,
            outcome,
        }
    }

    pub fn skipped(entry: RemoteEntry) -> Self {
        Self {
            entry,
            local_path: None,
            outcome: TransferOutcome::SkippedByFilter,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Succeeded { .. })
    }
}

/// FailureRecord is one line of the structured failure list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

// ============================================================================
// Job report
// ============================================================================

/// JobReport is everything a finished job hands to the host
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: Vec<TransferResult>,
    pub failures: Vec<FailureRecord>,
    pub missing: Vec<String>,
    pub state: ExtractionState,
    pub failure: Option<JobFailure>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn transferred(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn transferred_count(&self) -> usize {
        self.transferred().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == TransferOutcome::SkippedByFilter)
            .count()
    }
}
