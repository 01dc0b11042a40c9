// Error handling framework
// Transfer, selection, state and configuration failures with retry classification

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sub-kinds of a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// Host name could not be resolved
    Dns,
    /// TCP level failure (refused, unreachable, reset before login)
    Network,
    /// Connect or read deadline exceeded
    Timeout,
    /// SSH identification banner not received in time
    BannerTimeout,
    /// Established connection dropped
    ConnectionReset,
    /// TLS or SSH handshake failure
    Handshake,
    /// Credentials rejected
    Authentication,
}

impl ConnectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::BannerTimeout => "banner_timeout",
            Self::ConnectionReset => "connection_reset",
            Self::Handshake => "handshake",
            Self::Authentication => "authentication",
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kinds of a failed directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingErrorKind {
    NotFound,
    PermissionDenied,
}

impl fmt::Display for ListingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not_found"),
            Self::PermissionDenied => f.write_str("permission_denied"),
        }
    }
}

/// Sub-kinds of a failed file retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalErrorKind {
    NotFound,
    PermissionDenied,
    ConnectionDropped,
}

impl fmt::Display for RetrievalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not_found"),
            Self::PermissionDenied => f.write_str("permission_denied"),
            Self::ConnectionDropped => f.write_str("connection_dropped"),
        }
    }
}

/// Stable label attached to every entry of the failure list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection(ConnectionErrorKind),
    Listing(ListingErrorKind),
    Retrieval(RetrievalErrorKind),
    /// Local copy could not be written
    Output,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(kind) => write!(f, "connection.{}", kind),
            Self::Listing(kind) => write!(f, "listing.{}", kind),
            Self::Retrieval(kind) => write!(f, "retrieval.{}", kind),
            Self::Output => f.write_str("output"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Errors raised by transport clients and the retry wrapper
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Connection failed ({kind}): {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    #[error("Listing of '{path}' failed ({kind}): {message}")]
    Listing {
        path: String,
        kind: ListingErrorKind,
        message: String,
    },

    #[error("Retrieval of '{path}' failed ({kind}): {message}")]
    Retrieval {
        path: String,
        kind: RetrievalErrorKind,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self::Connection {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::connection(ConnectionErrorKind::Timeout, message)
    }

    pub fn listing(
        path: impl Into<String>,
        kind: ListingErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Listing {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn retrieval(
        path: impl Into<String>,
        kind: RetrievalErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Retrieval {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether another attempt with the same parameters may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { kind, .. } => matches!(
                kind,
                ConnectionErrorKind::Network
                    | ConnectionErrorKind::Timeout
                    | ConnectionErrorKind::BannerTimeout
                    | ConnectionErrorKind::ConnectionReset
            ),
            Self::Retrieval { kind, .. } => *kind == RetrievalErrorKind::ConnectionDropped,
            Self::Listing { .. } | Self::Cancelled => false,
        }
    }

    /// Whether the session that produced this error can no longer be used
    pub fn invalidates_session(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Cancelled => true,
            Self::Retrieval { kind, .. } => *kind == RetrievalErrorKind::ConnectionDropped,
            Self::Listing { .. } => false,
        }
    }

    /// Whether this was a timed-out attempt
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Connection {
                kind: ConnectionErrorKind::Timeout,
                ..
            }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { kind, .. } => ErrorKind::Connection(*kind),
            Self::Listing { kind, .. } => ErrorKind::Listing(*kind),
            Self::Retrieval { kind, .. } => ErrorKind::Retrieval(*kind),
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Extraction state persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file '{path}' is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("State I/O failed for '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("State serialization failed: {0}")]
    Serialization(String),
}

/// Failures while resolving a selection against the server
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Selection root '{root}' is not accessible: {source}")]
    Root {
        root: String,
        #[source]
        source: TransferError,
    },

    #[error("Directory listing failed: {0}")]
    Listing(#[source] TransferError),
}

impl From<SelectionError> for JobError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::Root { root, source } => JobError::SelectionRoot { root, source },
            SelectionError::Listing(TransferError::Cancelled) => JobError::Cancelled,
            SelectionError::Listing(source) => JobError::Selection(source),
        }
    }
}

/// Errors that abort an extraction job before it reaches the output stage
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to connect to server: {0}")]
    Connection(#[source] TransferError),

    #[error("No files found: selection root '{root}' is not accessible: {source}")]
    SelectionRoot {
        root: String,
        #[source]
        source: TransferError,
    },

    #[error("File selection failed: {0}")]
    Selection(#[source] TransferError),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Failed to persist extraction state: {0}")]
    State(#[from] StateError),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::SelectionRoot { .. } => "listing_error",
            Self::Selection(_) => "selection_error",
            Self::Cancelled => "cancelled",
            Self::State(_) => "state_error",
        }
    }
}

/// Reasons a job that ran to completion is still reported as failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("No files matched the selection")]
    NoFilesSelected,

    #[error("None of the {attempted} selected file(s) could be transferred")]
    NothingTransferred { attempted: usize },

    #[error("Required file(s) missing on server: {}", paths.join(", "))]
    MissingRequiredFiles { paths: Vec<String> },

    #[error("Connection lost while retrieving '{path}': {message}")]
    ConnectionLost { path: String, message: String },

    #[error("Job cancelled")]
    Cancelled,
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransferError::timeout("read").is_transient());
        assert!(
            TransferError::connection(ConnectionErrorKind::BannerTimeout, "no banner")
                .is_transient()
        );
        assert!(
            TransferError::retrieval("/a", RetrievalErrorKind::ConnectionDropped, "eof")
                .is_transient()
        );

        assert!(
            !TransferError::connection(ConnectionErrorKind::Authentication, "530").is_transient()
        );
        assert!(!TransferError::connection(ConnectionErrorKind::Dns, "nxdomain").is_transient());
        assert!(
            !TransferError::listing("/a", ListingErrorKind::PermissionDenied, "550")
                .is_transient()
        );
        assert!(
            !TransferError::retrieval("/a", RetrievalErrorKind::NotFound, "550").is_transient()
        );
    }

    #[test]
    fn test_session_invalidation() {
        assert!(TransferError::timeout("read").invalidates_session());
        assert!(
            TransferError::retrieval("/a", RetrievalErrorKind::ConnectionDropped, "eof")
                .invalidates_session()
        );
        assert!(
            !TransferError::retrieval("/a", RetrievalErrorKind::NotFound, "550")
                .invalidates_session()
        );
        assert!(
            !TransferError::listing("/a", ListingErrorKind::NotFound, "550").invalidates_session()
        );
    }

    #[test]
    fn test_error_kind_labels() {
        let err = TransferError::retrieval("/a", RetrievalErrorKind::PermissionDenied, "denied");
        assert_eq!(err.kind().to_string(), "retrieval.permission_denied");

        let err = TransferError::connection(ConnectionErrorKind::Authentication, "bad password");
        assert_eq!(err.kind().to_string(), "connection.authentication");
    }

    #[test]
    fn test_job_failure_display() {
        let failure = JobFailure::MissingRequiredFiles {
            paths: vec!["/a.csv".to_string(), "/b.csv".to_string()],
        };
        assert!(failure.to_string().contains("/a.csv, /b.csv"));

        let failure = JobFailure::NothingTransferred { attempted: 3 };
        assert!(failure.to_string().contains("3 selected"));

        let failure = JobFailure::ConnectionLost {
            path: "/b.csv".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(failure.to_string().contains("'/b.csv'"));
    }
}
