// SFTP operations (list/retrieve)
// Paths handed in and out are logical: relative to the base directory when one is set

use crate::errors::TransferError;
use crate::models::RemoteEntry;
use crate::transport::path;
use chrono::{DateTime, Utc};
use ssh2::FileStat;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error, instrument};

use super::connection::SftpConnection;
use super::errors::{listing_error, read_error, retrieval_error};

/// List the entries directly inside `dir`
#[instrument(skip(connection))]
pub(crate) fn list_directory(
    connection: &SftpConnection,
    dir: &str,
) -> Result<Vec<RemoteEntry>, TransferError> {
    let physical = path::rebase(connection.base_path(), dir);
    let entries = connection
        .sftp()
        .readdir(Path::new(&physical))
        .map_err(|e| {
            error!(error = %e, remote_path = %physical, "Failed to list directory");
            listing_error(dir, &e)
        })?;

    let listed: Vec<RemoteEntry> = entries
        .iter()
        .filter_map(|(entry_path, stat)| {
            let name = entry_path.file_name()?.to_str()?;
            Some(to_entry(path::join(dir, name), stat))
        })
        .collect();

    debug!(remote_path = %physical, count = listed.len(), "Listed directory");
    Ok(listed)
}

/// Download a whole file into memory
#[instrument(skip(connection))]
pub(crate) fn download_file(
    connection: &SftpConnection,
    remote_path: &str,
) -> Result<Vec<u8>, TransferError> {
    let physical = path::rebase(connection.base_path(), remote_path);

    let mut remote_file = connection
        .sftp()
        .open(Path::new(&physical))
        .map_err(|e| {
            error!(error = %e, remote_path = %physical, "Failed to open remote file");
            retrieval_error(remote_path, &e)
        })?;

    let mut buffer = Vec::new();
    remote_file.read_to_end(&mut buffer).map_err(|e| {
        error!(error = %e, remote_path = %physical, "Failed to read file");
        read_error(remote_path, &e)
    })?;

    debug!(remote_path = %physical, size = buffer.len(), "File downloaded");
    Ok(buffer)
}

fn to_entry(logical_path: String, stat: &FileStat) -> RemoteEntry {
    if stat.is_dir() {
        return RemoteEntry::directory(logical_path);
    }
    let modified = stat
        .mtime
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    RemoteEntry::file(logical_path, stat.size, modified)
}
