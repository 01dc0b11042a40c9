// Transport layer for remote file servers
// One client per protocol, selected by a total match on Protocol

pub mod ftp;
pub mod path;
pub mod retrying;
pub mod sftp;

pub use ftp::FtpClient;
pub use retrying::RetryingSession;
pub use sftp::SftpClient;

use crate::config::ConnectionConfig;
use crate::errors::{ConnectionErrorKind, TransferError};
use crate::models::{Protocol, RemoteEntry};
use async_trait::async_trait;
use std::sync::Arc;

/// TransportClient opens authenticated sessions to one kind of server
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Protocol this client speaks
    fn protocol(&self) -> Protocol;

    /// Connect and authenticate
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn TransportSession>, TransferError>;
}

/// TransportSession is one open, authenticated connection
#[async_trait]
pub trait TransportSession: Send {
    /// Entries directly inside `dir`, without `.` and `..`
    async fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    /// Full content of one remote file
    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError>;

    /// Release the connection; errors are logged and swallowed
    async fn close(&mut self);
}

/// Pick the client for a protocol
pub fn client_for(protocol: Protocol) -> Arc<dyn TransportClient> {
    match protocol {
        Protocol::Ftp | Protocol::FtpsExplicit | Protocol::FtpsImplicit => {
            Arc::new(FtpClient::new(protocol))
        }
        Protocol::Sftp => Arc::new(SftpClient::new()),
    }
}

/// Synchronous session driven from a blocking thread
pub(crate) trait BlockingSession: Send + 'static {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError>;
    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError>;
    fn close(&mut self);
}

/// Runs a BlockingSession on the blocking pool
///
/// The inner session is moved into each blocking call and handed back when it
/// completes. If the caller stops waiting (timeout, cancellation) the session
/// never comes back and every later call fails with a connection reset.
pub(crate) struct BlockingAdapter<S: BlockingSession> {
    inner: Option<S>,
}

impl<S: BlockingSession> BlockingAdapter<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner: Some(inner) }
    }

    async fn run<T, F>(&mut self, op: F) -> Result<T, TransferError>
    where
        F: FnOnce(&mut S) -> Result<T, TransferError> + Send + 'static,
        T: Send + 'static,
    {
        let mut inner = self.inner.take().ok_or_else(|| {
            TransferError::connection(
                ConnectionErrorKind::ConnectionReset,
                "session is no longer usable",
            )
        })?;

        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut inner);
            (inner, result)
        })
        .await
        .map_err(|e| {
            TransferError::connection(
                ConnectionErrorKind::ConnectionReset,
                format!("transfer task failed: {}", e),
            )
        })?;

        self.inner = Some(inner);
        result
    }
}

#[async_trait]
impl<S: BlockingSession> TransportSession for BlockingAdapter<S> {
    async fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let dir = dir.to_string();
        self.run(move |session| session.list(&dir)).await
    }

    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let path = path.to_string();
        self.run(move |session| session.retrieve(&path)).await
    }

    async fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            // Quit can block on a dead socket; nobody waits for it
            let _ = tokio::task::spawn_blocking(move || inner.close()).await;
        }
    }
}

/// Resolve `host:port` to the first socket address
pub(crate) fn resolve_address(
    host: &str,
    port: u16,
) -> Result<std::net::SocketAddr, TransferError> {
    use std::net::ToSocketAddrs;

    (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            TransferError::connection(
                ConnectionErrorKind::Dns,
                format!("failed to resolve {}: {}", host, e),
            )
        })?
        .next()
        .ok_or_else(|| {
            TransferError::connection(
                ConnectionErrorKind::Dns,
                format!("{} resolved to no addresses", host),
            )
        })
}

/// Classify a socket level error raised while talking to the server
pub(crate) fn classify_io_error(err: &std::io::Error) -> ConnectionErrorKind {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectionErrorKind::Timeout,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => ConnectionErrorKind::ConnectionReset,
        _ => ConnectionErrorKind::Network,
    }
}
