// Directory listing parsers for MLSD and LIST replies

use crate::models::RemoteEntry;
use crate::transport::path;
use chrono::{DateTime, Utc};
use std::time::SystemTime;
use suppaftp::list::File;
use tracing::debug;

/// Parse machine readable MLSD lines
pub(crate) fn parse_mlsd(dir: &str, lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .filter_map(|line| match File::from_mlsx_line(line) {
            Ok(file) => to_entry(dir, &file),
            Err(e) => {
                debug!(line = %line, error = ?e, "Skipping unparsable MLSD line");
                None
            }
        })
        .collect()
}

/// Parse UNIX or DOS style LIST lines
pub(crate) fn parse_list(dir: &str, lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("total "))
        .filter_map(|line| match line.parse::<File>() {
            Ok(file) => to_entry(dir, &file),
            Err(e) => {
                debug!(line = %line, error = ?e, "Skipping unparsable LIST line");
                None
            }
        })
        .collect()
}

fn to_entry(dir: &str, file: &File) -> Option<RemoteEntry> {
    let name = file.name().trim_end_matches('/');
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    // Some servers answer with full paths
    let name = path::file_name(name);
    let full_path = path::join(dir, name);

    if file.is_directory() {
        return Some(RemoteEntry::directory(full_path));
    }

    Some(RemoteEntry::file(
        full_path,
        Some(file.size() as u64),
        modified(file.modified()),
    ))
}

fn modified(time: SystemTime) -> Option<DateTime<Utc>> {
    if time == SystemTime::UNIX_EPOCH {
        None
    } else {
        Some(DateTime::<Utc>::from(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_parse_mlsd_skips_dot_entries() {
        let entries = parse_mlsd(
            "/data",
            &lines(&[
                "type=cdir;modify=20240101000000; .",
                "type=pdir;modify=20240101000000; ..",
                "type=dir;modify=20240102000000; 2024",
                "type=file;size=42;modify=20240103101500; report.csv",
            ]),
        );

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], RemoteEntry::directory("/data/2024"));
        assert_eq!(entries[1].path, "/data/report.csv");
        assert_eq!(entries[1].size, Some(42));
        assert_eq!(
            entries[1].modified,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 10, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_unix_list() {
        let entries = parse_list(
            "/",
            &lines(&[
                "total 8",
                "drwxr-xr-x 2 ftp ftp 4096 Jan 10  2023 archive",
                "-rw-r--r-- 1 ftp ftp  128 Jan 10  2023 a.json",
            ]),
        );

        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].path, "/archive");
        assert_eq!(entries[1].path, "/a.json");
        assert_eq!(entries[1].size, Some(128));
    }
}
