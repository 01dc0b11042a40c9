// Configuration management with layered configuration (file, env)
// Worker settings, per-job connection and selection options

use crate::errors::ValidationError;
use crate::models::Protocol;
use crate::output::OutputOptions;
use crate::selection::SelectionSpec;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Secrets
// ============================================================================

/// Secret holds credential material and never prints it
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn non_empty(&self) -> Option<Secret> {
        (!self.0.is_empty()).then(|| self.clone())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

fn default_protocol() -> Protocol {
    Protocol::Sftp
}

fn default_banner_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

/// Connection settings as they appear in a configuration row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(alias = "hostname")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(default, alias = "#pass")]
    pub password: Secret,
    #[serde(default, alias = "#passphrase")]
    pub passphrase: Secret,
    #[serde(default, alias = "#private_key")]
    pub private_key: Secret,
    /// Algorithm category (`kex`, `keys`, `ciphers`, `macs`, `compression`) to names
    #[serde(default)]
    pub disabled_algorithms: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_banner_timeout")]
    pub banner_timeout: u64,
    #[serde(default = "default_true")]
    pub passive_mode: bool,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// SSH specific options, only consulted by the SFTP transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub private_key: Option<Secret>,
    pub passphrase: Option<Secret>,
    pub disabled_algorithms: BTreeMap<String, Vec<String>>,
    pub banner_timeout: Duration,
}

/// ConnectionConfig is the resolved, immutable description of one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,
    pub ssh: SshOptions,
    pub passive_mode: bool,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
    pub max_retries: u32,
    pub base_path: Option<String>,
    pub accept_invalid_certs: bool,
}

impl ConnectionConfig {
    /// Deadline for one connect attempt, including the SSH banner wait
    pub fn connect_deadline(&self) -> Duration {
        match self.protocol {
            Protocol::Sftp => self.connection_timeout + self.ssh.banner_timeout,
            _ => self.connection_timeout,
        }
    }

    /// Copy of this configuration with a different data connection mode
    pub fn with_passive_mode(&self, passive_mode: bool) -> Self {
        Self {
            passive_mode,
            ..self.clone()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ConnectionSettings {
    /// Resolve defaults and validate into an immutable ConnectionConfig
    pub fn resolve(&self) -> Result<ConnectionConfig, ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingField("connection.host".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(ValidationError::MissingField(
                "connection.username".to_string(),
            ));
        }
        if self.connection_timeout == 0 {
            return Err(invalid("connection.connection_timeout", "must be greater than 0"));
        }
        if self.read_timeout == 0 {
            return Err(invalid("connection.read_timeout", "must be greater than 0"));
        }
        if self.protocol == Protocol::Sftp {
            if self.banner_timeout == 0 {
                return Err(invalid("connection.banner_timeout", "must be greater than 0"));
            }
            if self.password.is_empty() && self.private_key.is_empty() {
                return Err(invalid(
                    "connection.password",
                    "SFTP requires a password or a private key",
                ));
            }
        }

        let port = match self.port {
            None | Some(0) => self.protocol.default_port(),
            Some(port) => port,
        };

        let base_path = self
            .base_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "/")
            .map(str::to_string);

        Ok(ConnectionConfig {
            protocol: self.protocol,
            host: self.host.trim().to_string(),
            port,
            username: self.username.clone(),
            password: self.password.clone(),
            ssh: SshOptions {
                private_key: self.private_key.non_empty(),
                passphrase: self.passphrase.non_empty(),
                disabled_algorithms: self.disabled_algorithms.clone(),
                banner_timeout: Duration::from_secs(self.banner_timeout),
            },
            passive_mode: self.passive_mode,
            connection_timeout: Duration::from_secs(self.connection_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            max_retries: self.max_retries,
            base_path,
            accept_invalid_certs: self.accept_invalid_certs,
        })
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidFieldValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// How a job picks remote files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileSelectionMode {
    #[default]
    Wildcard,
    ExplicitPaths,
    InteractiveList,
}

/// JobConfig is one configuration row: a server plus what to take from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub file_selection_mode: FileSelectionMode,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default, alias = "files")]
    pub paths: Vec<String>,
    #[serde(default, alias = "include_path_in_filename")]
    pub flatten_output: bool,
    #[serde(default)]
    pub append_timestamp: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub incremental_mode: bool,
    #[serde(default)]
    pub reset_state: bool,
}

impl JobConfig {
    /// Build the selection for this row
    pub fn selection(&self) -> Result<SelectionSpec, ValidationError> {
        match self.file_selection_mode {
            FileSelectionMode::Wildcard => {
                let patterns: Vec<String> = self
                    .pattern
                    .iter()
                    .chain(self.patterns.iter())
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                if patterns.is_empty() {
                    return Err(ValidationError::MissingField(format!(
                        "jobs.{}.pattern",
                        self.name
                    )));
                }
                SelectionSpec::wildcard(patterns)
            }
            FileSelectionMode::ExplicitPaths => {
                let paths = self.non_empty_paths()?;
                Ok(SelectionSpec::ExplicitPaths(paths))
            }
            FileSelectionMode::InteractiveList => {
                let paths = self.non_empty_paths()?;
                SelectionSpec::interactive(paths)
            }
        }
    }

    fn non_empty_paths(&self) -> Result<Vec<String>, ValidationError> {
        let paths: Vec<String> = self
            .paths
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if paths.is_empty() {
            return Err(ValidationError::MissingField(format!(
                "jobs.{}.paths",
                self.name
            )));
        }
        Ok(paths)
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            flatten_output: self.flatten_output,
            append_timestamp: self.append_timestamp,
            tags: self.tags.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("jobs.name".to_string()));
        }
        if self
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(invalid(
                "jobs.name",
                "only ASCII letters, digits, '-' and '_' are allowed",
            ));
        }
        self.connection.resolve()?;
        self.selection()?;
        Ok(())
    }
}

// ============================================================================
// Worker settings
// ============================================================================

/// What the worker does with the configured jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    #[default]
    Run,
    TestConnection,
    ListFiles,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/out/files")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data/state")
}

fn default_max_parallel_jobs() -> usize {
    4
}

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Settings {
    /// Load configuration with layered precedence: file → local file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jobs.is_empty() {
            return Err(ValidationError::MissingField("jobs".to_string()));
        }
        if self.max_parallel_jobs == 0 {
            return Err(invalid("max_parallel_jobs", "must be greater than 0"));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !names.insert(job.name.as_str()) {
                return Err(invalid(
                    "jobs.name",
                    &format!("duplicate job name '{}'", job.name),
                ));
            }
        }

        Ok(())
    }
}
