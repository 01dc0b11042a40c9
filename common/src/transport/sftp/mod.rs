// SFTP transport
// ssh2 sessions driven through the blocking adapter

mod connection;
mod errors;
mod operations;

use crate::config::ConnectionConfig;
use crate::errors::{ConnectionErrorKind, TransferError};
use crate::models::{Protocol, RemoteEntry};
use crate::transport::{BlockingAdapter, BlockingSession, TransportClient, TransportSession};
use async_trait::async_trait;
use tracing::instrument;

use connection::SftpConnection;

/// SftpClient opens SSH File Transfer Protocol sessions
#[derive(Debug, Default)]
pub struct SftpClient;

impl SftpClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportClient for SftpClient {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    #[instrument(skip(self, config), fields(host = %config.host, port = config.port))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn TransportSession>, TransferError> {
        let config = config.clone();
        let connection = tokio::task::spawn_blocking(move || SftpConnection::connect(&config))
            .await
            .map_err(|e| {
                TransferError::connection(
                    ConnectionErrorKind::Network,
                    format!("connect task failed: {}", e),
                )
            })??;

        Ok(Box::new(BlockingAdapter::new(connection)))
    }
}

impl BlockingSession for SftpConnection {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        operations::list_directory(self, dir)
    }

    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        operations::download_file(self, path)
    }

    fn close(&mut self) {
        self.disconnect();
    }
}
