// Retry wrapper around a transport session
// Reconnects after session-breaking failures and backs off between attempts

use crate::config::ConnectionConfig;
use crate::errors::{ConnectionErrorKind, TransferError};
use crate::models::RemoteEntry;
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::telemetry;
use crate::transport::{TransportClient, TransportSession};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of an operation together with the number of attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, TransferError>,
    pub attempts: u32,
}

#[async_trait]
trait SessionOp: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn run(
        &self,
        session: &mut dyn TransportSession,
    ) -> Result<Self::Output, TransferError>;
}

struct ConnectOp;

#[async_trait]
impl SessionOp for ConnectOp {
    type Output = ();

    fn name(&self) -> &'static str {
        "connect"
    }

    async fn run(&self, _session: &mut dyn TransportSession) -> Result<(), TransferError> {
        Ok(())
    }
}

struct ListOp<'a>(&'a str);

#[async_trait]
impl SessionOp for ListOp<'_> {
    type Output = Vec<RemoteEntry>;

    fn name(&self) -> &'static str {
        "list"
    }

    async fn run(
        &self,
        session: &mut dyn TransportSession,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        session.list(self.0).await
    }
}

struct RetrieveOp<'a>(&'a str);

#[async_trait]
impl SessionOp for RetrieveOp<'_> {
    type Output = Vec<u8>;

    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, session: &mut dyn TransportSession) -> Result<Vec<u8>, TransferError> {
        session.retrieve(self.0).await
    }
}

/// RetryingSession owns one logical connection to a server
///
/// Every operation gets at most `1 + max_retries` attempts. Only transient
/// failures are retried; a failure that breaks the session forces a fresh
/// connect on the next attempt.
pub struct RetryingSession {
    client: Arc<dyn TransportClient>,
    config: ConnectionConfig,
    session: Option<Box<dyn TransportSession>>,
    strategy: Box<dyn RetryStrategy>,
}

impl RetryingSession {
    pub fn new(client: Arc<dyn TransportClient>, config: ConnectionConfig) -> Self {
        let strategy = Box::new(ExponentialBackoff::new(config.max_retries));
        Self::with_strategy(client, config, strategy)
    }

    pub fn with_strategy(
        client: Arc<dyn TransportClient>,
        config: ConnectionConfig,
        strategy: Box<dyn RetryStrategy>,
    ) -> Self {
        Self {
            client,
            config,
            session: None,
            strategy,
        }
    }

    /// Effective configuration, including a passive mode switch made after timeouts
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Establish the connection, retrying transient failures
    pub async fn open(&mut self) -> Attempted<()> {
        self.execute(&ConnectOp).await
    }

    pub async fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        self.execute(&ListOp(dir)).await.result
    }

    pub async fn retrieve(&mut self, path: &str) -> Attempted<Vec<u8>> {
        self.execute(&RetrieveOp(path)).await
    }

    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            debug!(host = %self.config.host, "Session closed");
        }
    }

    async fn execute<O: SessionOp>(&mut self, op: &O) -> Attempted<O::Output> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let error = match self.attempt(op).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(error) => error,
            };

            if error.invalidates_session() {
                self.discard_session().await;
            }

            let delay = if error.is_transient() {
                self.strategy.next_delay(attempts - 1)
            } else {
                None
            };

            let Some(delay) = delay else {
                return Attempted {
                    result: Err(error),
                    attempts,
                };
            };

            if error.is_timeout() && self.config.protocol.is_ftp_family() && !self.config.passive_mode
            {
                warn!(host = %self.config.host, "Timeout in active mode, switching to passive mode");
                self.config = self.config.with_passive_mode(true);
                self.discard_session().await;
            }

            warn!(
                operation = op.name(),
                attempt = attempts,
                max_attempts = self.strategy.max_retries() + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            telemetry::record_retry(&self.config.protocol.to_string(), op.name());
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<O: SessionOp>(&mut self, op: &O) -> Result<O::Output, TransferError> {
        let deadline = self.config.read_timeout;
        let session = self.ensure_connected().await?;
        match tokio::time::timeout(deadline, op.run(session.as_mut())).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::timeout(format!(
                "{} exceeded {}",
                op.name(),
                describe(deadline)
            ))),
        }
    }

    async fn ensure_connected(
        &mut self,
    ) -> Result<&mut Box<dyn TransportSession>, TransferError> {
        if self.session.is_none() {
            let deadline = self.config.connect_deadline();
            let session = match tokio::time::timeout(deadline, self.client.connect(&self.config))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(TransferError::timeout(format!(
                        "connect to {} exceeded {}",
                        self.config.address(),
                        describe(deadline)
                    )))
                }
            };
            info!(host = %self.config.host, protocol = %self.config.protocol, "Connected");
            self.session = Some(session);
        }

        self.session.as_mut().ok_or_else(|| {
            TransferError::connection(ConnectionErrorKind::ConnectionReset, "no open session")
        })
    }

    async fn discard_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

fn describe(duration: Duration) -> String {
    format!("{}s deadline", duration.as_secs_f64())
}
