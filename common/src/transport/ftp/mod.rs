// FTP and FTPS transport (plain, explicit TLS, implicit TLS)
// suppaftp's synchronous stream driven through the blocking adapter

mod listing;
mod tls;

use crate::config::ConnectionConfig;
use crate::errors::{
    ConnectionErrorKind, ListingErrorKind, RetrievalErrorKind, TransferError,
};
use crate::models::{Protocol, RemoteEntry};
use crate::transport::{
    classify_io_error, path, resolve_address, BlockingAdapter, BlockingSession,
    TransportClient, TransportSession,
};
use async_trait::async_trait;
use suppaftp::types::{FileType, Response};
use suppaftp::{FtpError, Mode, RustlsFtpStream};
use tracing::{debug, error, info, instrument, warn};

/// FtpClient connects to FTP, FTPS-Explicit and FTPS-Implicit servers
pub struct FtpClient {
    protocol: Protocol,
}

impl FtpClient {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }
}

#[async_trait]
impl TransportClient for FtpClient {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[instrument(skip(self, config), fields(host = %config.host, port = config.port, protocol = %self.protocol))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn TransportSession>, TransferError> {
        let config = ConnectionConfig {
            protocol: self.protocol,
            ..config.clone()
        };

        let session = tokio::task::spawn_blocking(move || FtpSession::open(&config))
            .await
            .map_err(|e| {
                TransferError::connection(
                    ConnectionErrorKind::Network,
                    format!("connect task failed: {}", e),
                )
            })??;

        Ok(Box::new(BlockingAdapter::new(session)))
    }
}

struct FtpSession {
    stream: RustlsFtpStream,
    mlsd_supported: bool,
    base_path: Option<String>,
}

impl FtpSession {
    fn open(config: &ConnectionConfig) -> Result<Self, TransferError> {
        info!(host = %config.host, port = config.port, protocol = %config.protocol, "Establishing FTP connection");

        let addr = resolve_address(&config.host, config.port)?;

        let mut stream = match config.protocol {
            Protocol::Ftp => RustlsFtpStream::connect_timeout(addr, config.connection_timeout)
                .map_err(connect_error)?,
            Protocol::FtpsExplicit => {
                let plain = RustlsFtpStream::connect_timeout(addr, config.connection_timeout)
                    .map_err(connect_error)?;
                let connector = tls::connector(config.accept_invalid_certs)?;
                plain.into_secure(connector, &config.host).map_err(|e| {
                    error!(error = %e, host = %config.host, "Explicit TLS upgrade failed");
                    handshake_error(e)
                })?
            }
            Protocol::FtpsImplicit => {
                let connector = tls::connector(config.accept_invalid_certs)?;
                RustlsFtpStream::connect_secure_implicit(addr, connector, &config.host).map_err(
                    |e| {
                        error!(error = %e, host = %config.host, "Implicit TLS connection failed");
                        handshake_error(e)
                    },
                )?
            }
            Protocol::Sftp => {
                return Err(TransferError::connection(
                    ConnectionErrorKind::Handshake,
                    "SFTP servers are not reachable over FTP",
                ))
            }
        };

        stream
            .get_ref()
            .set_read_timeout(Some(config.read_timeout))
            .map_err(|e| {
                TransferError::connection(
                    ConnectionErrorKind::Network,
                    format!("failed to set read timeout: {}", e),
                )
            })?;

        stream
            .login(config.username.as_str(), config.password.expose())
            .map_err(|e| {
                error!(error = %e, username = %config.username, "FTP login failed");
                connect_error(e)
            })?;

        stream.set_mode(if config.passive_mode {
            Mode::Passive
        } else {
            Mode::Active
        });

        stream.transfer_type(FileType::Binary).map_err(connect_error)?;

        if let Some(base) = &config.base_path {
            stream.cwd(base).map_err(|e| {
                error!(error = %e, base_path = %base, "Base directory is not accessible");
                TransferError::connection(
                    ConnectionErrorKind::Handshake,
                    format!("failed to change to base directory '{}': {}", base, e),
                )
            })?;
            info!(base_path = %base, "Using base directory");
        }

        info!(passive_mode = config.passive_mode, "FTP connection established successfully");
        Ok(Self {
            stream,
            mlsd_supported: true,
            base_path: config.base_path.clone(),
        })
    }
}

impl BlockingSession for FtpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let physical = path::rebase(self.base_path.as_deref(), dir);
        if self.mlsd_supported {
            match self.stream.mlsd(Some(&physical)) {
                Ok(lines) => return Ok(listing::parse_mlsd(dir, &lines)),
                Err(FtpError::UnexpectedResponse(resp)) if is_unsupported(&resp) => {
                    warn!("Server does not support MLSD, falling back to LIST");
                    self.mlsd_supported = false;
                }
                Err(e) => return Err(listing_error(dir, e)),
            }
        }

        let lines = self
            .stream
            .list(Some(&physical))
            .map_err(|e| listing_error(dir, e))?;
        Ok(listing::parse_list(dir, &lines))
    }

    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let physical = path::rebase(self.base_path.as_deref(), path);
        debug!(remote_path = %path, physical_path = %physical, "Retrieving file");
        let buffer = self
            .stream
            .retr_as_buffer(&physical)
            .map_err(|e| retrieval_error(path, e))?;
        Ok(buffer.into_inner())
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.quit() {
            debug!(error = %e, "FTP quit failed");
        }
    }
}

// ============================================================================
// Error classification
// ============================================================================

enum ReplyClass {
    Missing,
    Denied,
    LoggedOut,
    Transient,
    Other,
}

fn classify_reply(resp: &Response) -> ReplyClass {
    match resp.status.code() {
        421 | 425 | 426 | 451 => ReplyClass::Transient,
        430 | 530 => ReplyClass::LoggedOut,
        450 | 550 | 553 => {
            let text = reply_text(resp).to_ascii_lowercase();
            if text.contains("permission") || text.contains("denied") || text.contains("access")
            {
                ReplyClass::Denied
            } else {
                ReplyClass::Missing
            }
        }
        _ => ReplyClass::Other,
    }
}

fn is_unsupported(resp: &Response) -> bool {
    matches!(resp.status.code(), 500 | 502)
}

fn reply_text(resp: &Response) -> String {
    String::from_utf8_lossy(&resp.body).trim().to_string()
}

fn connect_error(err: FtpError) -> TransferError {
    match &err {
        FtpError::ConnectionError(io) => {
            TransferError::connection(classify_io_error(io), err.to_string())
        }
        FtpError::InvalidAddress(_) => {
            TransferError::connection(ConnectionErrorKind::Dns, err.to_string())
        }
        FtpError::UnexpectedResponse(resp) => match classify_reply(resp) {
            ReplyClass::LoggedOut => TransferError::connection(
                ConnectionErrorKind::Authentication,
                reply_text(resp),
            ),
            ReplyClass::Transient => {
                TransferError::connection(ConnectionErrorKind::Network, reply_text(resp))
            }
            _ => TransferError::connection(ConnectionErrorKind::Handshake, reply_text(resp)),
        },
        _ => TransferError::connection(ConnectionErrorKind::Handshake, err.to_string()),
    }
}

fn handshake_error(err: FtpError) -> TransferError {
    match &err {
        FtpError::ConnectionError(io) => {
            TransferError::connection(classify_io_error(io), err.to_string())
        }
        _ => TransferError::connection(ConnectionErrorKind::Handshake, err.to_string()),
    }
}

/// Failures that are not about the requested path itself
fn session_error(err: &FtpError) -> Option<TransferError> {
    match err {
        FtpError::ConnectionError(io) => Some(TransferError::connection(
            classify_io_error(io),
            err.to_string(),
        )),
        FtpError::UnexpectedResponse(resp) => match classify_reply(resp) {
            ReplyClass::LoggedOut => Some(TransferError::connection(
                ConnectionErrorKind::Authentication,
                reply_text(resp),
            )),
            ReplyClass::Transient => Some(TransferError::connection(
                ConnectionErrorKind::ConnectionReset,
                reply_text(resp),
            )),
            _ => None,
        },
        FtpError::BadResponse | FtpError::SecureError(_) => Some(TransferError::connection(
            ConnectionErrorKind::ConnectionReset,
            err.to_string(),
        )),
        _ => None,
    }
}

fn listing_error(dir: &str, err: FtpError) -> TransferError {
    if let Some(session) = session_error(&err) {
        return session;
    }
    let kind = match &err {
        FtpError::UnexpectedResponse(resp) => match classify_reply(resp) {
            ReplyClass::Denied => ListingErrorKind::PermissionDenied,
            _ => ListingErrorKind::NotFound,
        },
        _ => ListingErrorKind::NotFound,
    };
    TransferError::listing(dir, kind, err.to_string())
}

fn retrieval_error(path: &str, err: FtpError) -> TransferError {
    if let FtpError::ConnectionError(io) = &err {
        let kind = classify_io_error(io);
        if kind == ConnectionErrorKind::Timeout {
            return TransferError::timeout(format!("retrieval of '{}' timed out: {}", path, io));
        }
        return TransferError::retrieval(path, RetrievalErrorKind::ConnectionDropped, err.to_string());
    }
    if let Some(session) = session_error(&err) {
        return session;
    }
    let kind = match &err {
        FtpError::UnexpectedResponse(resp) => match classify_reply(resp) {
            ReplyClass::Denied => RetrievalErrorKind::PermissionDenied,
            _ => RetrievalErrorKind::NotFound,
        },
        _ => RetrievalErrorKind::NotFound,
    };
    TransferError::retrieval(path, kind, err.to_string())
}
