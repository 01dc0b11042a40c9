// Local output of retrieved files
// File naming (flattened path, run timestamp) and manifest sidecars

use crate::models::RemoteEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// How retrieved files are named and tagged locally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputOptions {
    /// Encode the remote directory into the file name
    pub flatten_output: bool,
    pub append_timestamp: bool,
    pub tags: Vec<String>,
}

/// Split a file name into stem and extension, leading dots belong to the stem
fn split_extension(name: &str) -> (&str, &str) {
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    match name[leading_dots..].rfind('.') {
        Some(idx) => name.split_at(leading_dots + idx),
        None => (name, ""),
    }
}

/// Local file name for a remote path
pub fn local_file_name(
    remote_path: &str,
    options: &OutputOptions,
    run_started: DateTime<Utc>,
) -> String {
    let name = if options.flatten_output {
        remote_path
            .replace(['/', '\\'], "_")
            .trim_start_matches('_')
            .to_string()
    } else {
        crate::transport::path::file_name(remote_path).to_string()
    };

    if !options.append_timestamp {
        return name;
    }

    let (stem, extension) = split_extension(&name);
    format!(
        "{}_{}{}",
        stem,
        run_started.format("%Y%m%d%H%M%S"),
        extension
    )
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    remote_path: &'a str,
    modified: Option<DateTime<Utc>>,
    tags: &'a [String],
    is_public: bool,
    is_permanent: bool,
}

/// OutputSink receives each retrieved file as soon as it arrives
///
/// A file only counts as transferred once `store` succeeded.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Persist one file and return where it was stored
    async fn store(&self, entry: &RemoteEntry, data: &[u8]) -> std::io::Result<PathBuf>;
}

/// OutputWriter stores one job's files under `<output_dir>/<job name>/`
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    options: OutputOptions,
    run_started: DateTime<Utc>,
}

impl OutputWriter {
    pub fn new(
        output_dir: &Path,
        job_name: &str,
        options: OutputOptions,
        run_started: DateTime<Utc>,
    ) -> Self {
        Self {
            dir: output_dir.join(job_name),
            options,
            run_started,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write file content and its manifest; returns the file's local path
    #[instrument(skip(self, entry, data), fields(remote_path = %entry.path, size = data.len()))]
    pub async fn write(&self, entry: &RemoteEntry, data: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = local_file_name(&entry.path, &self.options, self.run_started);
        let target = self.dir.join(&name);
        tokio::fs::write(&target, data).await?;

        let manifest = Manifest {
            remote_path: &entry.path,
            modified: entry.modified,
            tags: &self.options.tags,
            is_public: false,
            is_permanent: true,
        };
        let body = serde_json::to_vec_pretty(&manifest).map_err(std::io::Error::other)?;
        tokio::fs::write(self.dir.join(format!("{}.manifest", name)), body).await?;

        debug!(local_path = %target.display(), "File written");
        Ok(target)
    }
}

#[async_trait]
impl OutputSink for OutputWriter {
    async fn store(&self, entry: &RemoteEntry, data: &[u8]) -> std::io::Result<PathBuf> {
        self.write(entry, data).await
    }
}
