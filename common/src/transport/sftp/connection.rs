// SFTP connection management
// TCP connect, SSH banner wait, algorithm filtering, handshake and authentication

use crate::config::ConnectionConfig;
use crate::errors::{ConnectionErrorKind, TransferError};
use crate::transport::{classify_io_error, resolve_address};
use ssh2::{MethodType, Session, Sftp};
use std::collections::BTreeMap;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::errors::session_error;

/// SFTP connection wrapper
pub(crate) struct SftpConnection {
    // Dropping the session closes the socket
    session: Session,
    sftp: Sftp,
    base_path: Option<String>,
}

impl SftpConnection {
    /// Establish an authenticated SFTP connection
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub(crate) fn connect(config: &ConnectionConfig) -> Result<Self, TransferError> {
        info!("Establishing SFTP connection");

        let addr = resolve_address(&config.host, config.port)?;
        let tcp = TcpStream::connect_timeout(&addr, config.connection_timeout).map_err(|e| {
            error!(error = %e, address = %addr, "Failed to connect");
            TransferError::connection(
                classify_io_error(&e),
                format!("failed to connect to {}: {}", config.address(), e),
            )
        })?;

        wait_for_banner(&tcp, config.ssh.banner_timeout)?;

        tcp.set_read_timeout(Some(config.read_timeout))
            .and_then(|_| tcp.set_write_timeout(Some(config.read_timeout)))
            .map_err(|e| {
                TransferError::connection(
                    ConnectionErrorKind::Network,
                    format!("failed to set socket timeouts: {}", e),
                )
            })?;

        let mut session = Session::new().map_err(|e| {
            error!(error = %e, "Failed to create SSH session");
            TransferError::connection(
                ConnectionErrorKind::Handshake,
                format!("failed to create SSH session: {}", e),
            )
        })?;

        apply_disabled_algorithms(&session, &config.ssh.disabled_algorithms)?;

        session.set_tcp_stream(tcp);
        session.set_timeout(duration_ms(config.read_timeout));

        session.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            session_error(&e, "SSH handshake failed")
        })?;

        log_host_key(&session);
        authenticate(&session, config)?;

        if !session.authenticated() {
            error!("Authentication failed - session not authenticated");
            return Err(TransferError::connection(
                ConnectionErrorKind::Authentication,
                "server did not accept any credentials",
            ));
        }

        let sftp = session.sftp().map_err(|e| {
            error!(error = %e, "Failed to open SFTP channel");
            session_error(&e, "failed to open SFTP channel")
        })?;

        if let Some(base) = &config.base_path {
            let resolved = sftp.realpath(Path::new(base)).map_err(|e| {
                error!(error = %e, base_path = %base, "Base directory is not accessible");
                TransferError::connection(
                    ConnectionErrorKind::Handshake,
                    format!("failed to change to base directory '{}': {}", base, e),
                )
            })?;
            info!(base_path = %resolved.display(), "Using base directory");
        }

        info!("SFTP connection established successfully");
        Ok(Self {
            session,
            sftp,
            base_path: config.base_path.clone(),
        })
    }

    pub(crate) fn sftp(&self) -> &Sftp {
        &self.sftp
    }

    pub(crate) fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    pub(crate) fn disconnect(&self) {
        if let Err(e) = self.session.disconnect(None, "extraction finished", None) {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}

fn duration_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Wait until the server sends its identification line
fn wait_for_banner(tcp: &TcpStream, banner_timeout: Duration) -> Result<(), TransferError> {
    tcp.set_read_timeout(Some(banner_timeout)).map_err(|e| {
        TransferError::connection(
            ConnectionErrorKind::Network,
            format!("failed to set banner timeout: {}", e),
        )
    })?;

    let mut first_byte = [0u8; 1];
    match tcp.peek(&mut first_byte) {
        Ok(0) => Err(TransferError::connection(
            ConnectionErrorKind::ConnectionReset,
            "server closed the connection before sending its banner",
        )),
        Ok(_) => Ok(()),
        Err(e) => {
            let kind = match classify_io_error(&e) {
                ConnectionErrorKind::Timeout => ConnectionErrorKind::BannerTimeout,
                other => other,
            };
            warn!(error = %e, banner_timeout_secs = banner_timeout.as_secs(), "No SSH banner received");
            Err(TransferError::connection(
                kind,
                format!("no SSH banner within {:?}: {}", banner_timeout, e),
            ))
        }
    }
}

fn method_types(category: &str) -> Option<&'static [MethodType]> {
    match category {
        "kex" => Some(&[MethodType::Kex]),
        "keys" | "hostkeys" => Some(&[MethodType::HostKey]),
        "ciphers" => Some(&[MethodType::CryptCs, MethodType::CryptSc]),
        "macs" => Some(&[MethodType::MacCs, MethodType::MacSc]),
        "compression" => Some(&[MethodType::CompCs, MethodType::CompSc]),
        _ => None,
    }
}

/// Remove disabled algorithms from the session's preference lists
fn apply_disabled_algorithms(
    session: &Session,
    disabled: &BTreeMap<String, Vec<String>>,
) -> Result<(), TransferError> {
    for (category, names) in disabled {
        if names.is_empty() {
            continue;
        }
        if category == "pubkeys" {
            // libssh2 has no preference list for client signature algorithms
            warn!(category = %category, "Public key algorithm restrictions are not supported, ignoring");
            continue;
        }
        let Some(methods) = method_types(category) else {
            warn!(category = %category, "Ignoring unknown algorithm category");
            continue;
        };

        for method in methods {
            let supported = session.supported_algs(*method).map_err(|e| {
                session_error(&e, "failed to query supported algorithms")
            })?;
            let remaining: Vec<&str> = supported
                .into_iter()
                .filter(|alg| !names.iter().any(|n| n == alg))
                .collect();

            if remaining.is_empty() {
                return Err(TransferError::connection(
                    ConnectionErrorKind::Handshake,
                    format!("every '{}' algorithm is disabled", category),
                ));
            }

            session.method_pref(*method, &remaining.join(",")).map_err(|e| {
                session_error(&e, "failed to set algorithm preferences")
            })?;
        }
        debug!(category = %category, disabled = ?names, "Disabled SSH algorithms");
    }
    Ok(())
}

fn log_host_key(session: &Session) {
    if let Some((_, key_type)) = session.host_key() {
        if let Some(hash) = session.host_key_hash(ssh2::HashType::Sha256) {
            let fingerprint = hash
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":");
            info!(host_key_type = ?key_type, fingerprint = %fingerprint, "Server host key");
        }
    }
}

/// Private key first, password as fallback
fn authenticate(session: &Session, config: &ConnectionConfig) -> Result<(), TransferError> {
    let username = config.username.as_str();
    let mut last_error = None;

    if let Some(key) = &config.ssh.private_key {
        debug!(username = %username, "Authenticating with private key");
        let passphrase = config.ssh.passphrase.as_ref().map(|p| p.expose());
        match session.userauth_pubkey_memory(username, None, key.expose(), passphrase) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(error = %e, username = %username, "Private key authentication failed");
                last_error = Some(e);
            }
        }
    }

    if !config.password.is_empty() {
        debug!(username = %username, "Authenticating with password");
        match session.userauth_password(username, config.password.expose()) {
            Ok(()) => return Ok(()),
            Err(e) => {
                error!(error = %e, username = %username, "Password authentication failed");
                last_error = Some(e);
            }
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no credentials configured".to_string());
    Err(TransferError::connection(
        ConnectionErrorKind::Authentication,
        format!("authentication failed for user {}: {}", username, reason),
    ))
}
