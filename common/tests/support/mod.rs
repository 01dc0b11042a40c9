// In-memory file server shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::config::{ConnectionConfig, ConnectionSettings, JobConfig};
use common::errors::{
    ConnectionErrorKind, ListingErrorKind, RetrievalErrorKind, TransferError,
};
use common::models::{Protocol, RemoteEntry};
use common::output::OutputSink;
use common::selection::DirectoryLister;
use common::transport::{TransportClient, TransportSession};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

pub fn connection(max_retries: u32) -> ConnectionConfig {
    let settings: ConnectionSettings = serde_json::from_value(json!({
        "protocol": "sftp",
        "host": "files.example.com",
        "username": "reader",
        "password": "secret",
        "max_retries": max_retries,
    }))
    .unwrap();
    settings.resolve().unwrap()
}

pub fn job_config(name: &str, selection: serde_json::Value) -> JobConfig {
    let mut row = json!({
        "name": name,
        "connection": {
            "protocol": "sftp",
            "host": "files.example.com",
            "username": "reader",
            "password": "secret",
            "max_retries": 1,
        },
    });
    if let (Some(row), Some(extra)) = (row.as_object_mut(), selection.as_object()) {
        for (key, value) in extra {
            row.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(row).unwrap()
}

#[derive(Clone)]
struct StoredFile {
    content: Vec<u8>,
    modified: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct ServerState {
    files: BTreeMap<String, StoredFile>,
    denied_dirs: HashSet<String>,
    failing: HashMap<String, RetrievalErrorKind>,
    hanging: HashSet<String>,
    reject_login: bool,
    down_after: Option<usize>,
    served: usize,
    connects: u32,
    closes: u32,
    listings: Vec<String>,
    retrievals: Vec<String>,
}

impl ServerState {
    fn is_down(&self) -> bool {
        self.down_after.is_some_and(|limit| self.served >= limit)
    }
}

/// FakeServer serves a fixed tree of files and counts every interaction
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &[u8], modified: Option<DateTime<Utc>>) -> Self {
        self.state.lock().unwrap().files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_vec(),
                modified,
            },
        );
        self
    }

    pub fn deny_dir(self, dir: &str) -> Self {
        self.state.lock().unwrap().denied_dirs.insert(dir.to_string());
        self
    }

    /// Every retrieval of `path` fails with `kind`
    pub fn fail_retrieval(self, path: &str, kind: RetrievalErrorKind) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(path.to_string(), kind);
        self
    }

    /// Retrievals of `path` never complete
    pub fn hang_on(self, path: &str) -> Self {
        self.state.lock().unwrap().hanging.insert(path.to_string());
        self
    }

    /// Server stops answering once `retrievals` files were served
    pub fn go_down_after(self, retrievals: usize) -> Self {
        self.state.lock().unwrap().down_after = Some(retrievals);
        self
    }

    pub fn reject_login(self) -> Self {
        self.state.lock().unwrap().reject_login = true;
        self
    }

    pub fn client(&self) -> Arc<dyn TransportClient> {
        Arc::new(self.clone())
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn listings(&self) -> Vec<String> {
        self.state.lock().unwrap().listings.clone()
    }

    pub fn retrievals(&self) -> Vec<String> {
        self.state.lock().unwrap().retrievals.clone()
    }

    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.listings.push(dir.to_string());

        if state.denied_dirs.contains(dir) {
            return Err(TransferError::listing(
                dir,
                ListingErrorKind::PermissionDenied,
                "permission denied",
            ));
        }

        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        let mut exists = dir == "/";
        for (path, file) in &state.files {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            exists = true;
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(format!("{}{}", prefix, child));
                }
                None => entries.push(RemoteEntry::file(
                    path.clone(),
                    Some(file.content.len() as u64),
                    file.modified,
                )),
            }
        }

        if !exists {
            return Err(TransferError::listing(
                dir,
                ListingErrorKind::NotFound,
                "no such directory",
            ));
        }
        entries.extend(dirs.into_iter().map(RemoteEntry::directory));
        Ok(entries)
    }

    fn lookup(&self, path: &str) -> Result<Option<Vec<u8>>, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.retrievals.push(path.to_string());
        if state.is_down() {
            return Err(TransferError::connection(
                ConnectionErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        if state.hanging.contains(path) {
            return Ok(None);
        }
        if let Some(kind) = state.failing.get(path) {
            return Err(TransferError::retrieval(path, *kind, "injected failure"));
        }
        match state.files.get(path).map(|f| f.content.clone()) {
            Some(content) => {
                state.served += 1;
                Ok(Some(content))
            }
            None => Err(TransferError::retrieval(
                path,
                RetrievalErrorKind::NotFound,
                "no such file",
            )),
        }
    }
}

#[async_trait]
impl TransportClient for FakeServer {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(
        &self,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn TransportSession>, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.is_down() {
            return Err(TransferError::connection(
                ConnectionErrorKind::Network,
                "connection refused",
            ));
        }
        if state.reject_login {
            return Err(TransferError::connection(
                ConnectionErrorKind::Authentication,
                "authentication failed",
            ));
        }
        Ok(Box::new(FakeSession {
            server: self.clone(),
        }))
    }
}

struct FakeSession {
    server: FakeServer,
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        self.server.list(dir)
    }

    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        match self.server.lookup(path)? {
            Some(content) => Ok(content),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.server.state.lock().unwrap().closes += 1;
    }
}

#[async_trait]
impl DirectoryLister for FakeServer {
    async fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        self.list(dir)
    }
}

/// MemorySink keeps stored files in memory and can refuse chosen paths
#[derive(Default)]
pub struct MemorySink {
    stored: Mutex<BTreeMap<String, Vec<u8>>>,
    refused: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(path: &str) -> Self {
        Self {
            refused: HashSet::from([path.to_string()]),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> BTreeMap<String, Vec<u8>> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn store(&self, entry: &RemoteEntry, data: &[u8]) -> std::io::Result<PathBuf> {
        if self.refused.contains(&entry.path) {
            return Err(std::io::Error::other("no space left on device"));
        }
        self.stored
            .lock()
            .unwrap()
            .insert(entry.path.clone(), data.to_vec());
        Ok(PathBuf::from("memory").join(entry.path.trim_start_matches('/')))
    }
}
