// Extraction state persistence
// One JSON document per job, replaced atomically on save

use crate::errors::StateError;
use crate::models::ExtractionState;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// StateStore loads and saves the state of one job
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Previous state; a job that never ran gets an empty state
    async fn load(&self, job_name: &str) -> Result<ExtractionState, StateError>;

    async fn save(&self, job_name: &str, state: &ExtractionState) -> Result<(), StateError>;
}

/// JsonFileStateStore keeps `<dir>/<job name>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, job_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", job_name))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    #[instrument(skip(self))]
    async fn load(&self, job_name: &str) -> Result<ExtractionState, StateError> {
        let path = self.path_for(job_name);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No previous state");
                return Ok(ExtractionState::new());
            }
            Err(e) => return Err(io_error(&path, e)),
        };

        let state: ExtractionState =
            serde_json::from_slice(&raw).map_err(|e| StateError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!(path = %path.display(), files = state.len(), "Loaded state");
        Ok(state)
    }

    #[instrument(skip(self, state), fields(files = state.len()))]
    async fn save(&self, job_name: &str, state: &ExtractionState) -> Result<(), StateError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let path = self.path_for(job_name);
        let tmp = self.dir.join(format!(".{}.json.tmp", job_name));
        let body = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(path = %path.display(), "Saved state");
        Ok(())
    }
}
