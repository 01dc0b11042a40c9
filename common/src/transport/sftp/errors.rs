// libssh2 error code classification

use crate::errors::{ConnectionErrorKind, ListingErrorKind, RetrievalErrorKind, TransferError};
use ssh2::ErrorCode;

// libssh2 session error codes
const BANNER_RECV: i32 = -2;
const KEX_FAILURE: i32 = -5;
const SOCKET_SEND: i32 = -7;
const KEY_EXCHANGE_FAILURE: i32 = -8;
const TIMEOUT: i32 = -9;
const SOCKET_DISCONNECT: i32 = -13;
const FILE: i32 = -16;
const AUTHENTICATION_FAILED: i32 = -18;
const PUBLICKEY_UNVERIFIED: i32 = -19;
const SOCKET_TIMEOUT: i32 = -30;
const SOCKET_RECV: i32 = -43;

// SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;

fn connection_kind(code: i32) -> ConnectionErrorKind {
    match code {
        TIMEOUT | SOCKET_TIMEOUT => ConnectionErrorKind::Timeout,
        BANNER_RECV => ConnectionErrorKind::BannerTimeout,
        SOCKET_SEND | SOCKET_RECV | SOCKET_DISCONNECT => ConnectionErrorKind::ConnectionReset,
        AUTHENTICATION_FAILED | PUBLICKEY_UNVERIFIED | FILE => {
            ConnectionErrorKind::Authentication
        }
        KEX_FAILURE | KEY_EXCHANGE_FAILURE => ConnectionErrorKind::Handshake,
        _ => ConnectionErrorKind::Handshake,
    }
}

/// Error raised while establishing or using the SSH session itself
pub(crate) fn session_error(err: &ssh2::Error, context: &str) -> TransferError {
    let kind = match err.code() {
        ErrorCode::Session(code) => connection_kind(code),
        ErrorCode::SFTP(_) => ConnectionErrorKind::Handshake,
    };
    TransferError::connection(kind, format!("{}: {}", context, err))
}

pub(crate) fn listing_error(dir: &str, err: &ssh2::Error) -> TransferError {
    match err.code() {
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => {
            TransferError::listing(dir, ListingErrorKind::PermissionDenied, err.to_string())
        }
        ErrorCode::SFTP(_) => {
            TransferError::listing(dir, ListingErrorKind::NotFound, err.to_string())
        }
        ErrorCode::Session(code) => TransferError::connection(
            connection_kind(code),
            format!("listing of '{}' failed: {}", dir, err),
        ),
    }
}

pub(crate) fn retrieval_error(path: &str, err: &ssh2::Error) -> TransferError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
            TransferError::retrieval(path, RetrievalErrorKind::NotFound, err.to_string())
        }
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => {
            TransferError::retrieval(path, RetrievalErrorKind::PermissionDenied, err.to_string())
        }
        ErrorCode::SFTP(_) => {
            TransferError::retrieval(path, RetrievalErrorKind::ConnectionDropped, err.to_string())
        }
        ErrorCode::Session(code) => match connection_kind(code) {
            ConnectionErrorKind::Timeout => TransferError::timeout(format!(
                "retrieval of '{}' timed out: {}",
                path, err
            )),
            ConnectionErrorKind::ConnectionReset => TransferError::retrieval(
                path,
                RetrievalErrorKind::ConnectionDropped,
                err.to_string(),
            ),
            other => TransferError::connection(other, err.to_string()),
        },
    }
}

/// Error raised by reading an open remote file
pub(crate) fn read_error(path: &str, err: &std::io::Error) -> TransferError {
    match crate::transport::classify_io_error(err) {
        ConnectionErrorKind::Timeout => {
            TransferError::timeout(format!("retrieval of '{}' timed out: {}", path, err))
        }
        _ => TransferError::retrieval(path, RetrievalErrorKind::ConnectionDropped, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn session(code: i32) -> ssh2::Error {
        ssh2::Error::new(ErrorCode::Session(code), "session error")
    }

    fn sftp(code: i32) -> ssh2::Error {
        ssh2::Error::new(ErrorCode::SFTP(code), "sftp error")
    }

    #[test]
    fn test_session_codes() {
        assert!(session_error(&session(TIMEOUT), "x").is_transient());
        assert!(session_error(&session(SOCKET_RECV), "x").is_transient());
        assert_eq!(
            session_error(&session(AUTHENTICATION_FAILED), "x").kind(),
            ErrorKind::Connection(ConnectionErrorKind::Authentication)
        );
        assert!(!session_error(&session(KEX_FAILURE), "x").is_transient());
    }

    #[test]
    fn test_sftp_status_codes() {
        assert_eq!(
            retrieval_error("/a", &sftp(FX_NO_SUCH_FILE)).kind(),
            ErrorKind::Retrieval(RetrievalErrorKind::NotFound)
        );
        assert_eq!(
            retrieval_error("/a", &sftp(FX_PERMISSION_DENIED)).kind(),
            ErrorKind::Retrieval(RetrievalErrorKind::PermissionDenied)
        );
        assert_eq!(
            listing_error("/a", &sftp(FX_NO_SUCH_PATH)).kind(),
            ErrorKind::Listing(ListingErrorKind::NotFound)
        );
        assert!(retrieval_error("/a", &session(SOCKET_DISCONNECT)).invalidates_session());
    }
}
