// Remote path helpers
// Remote paths are always absolute and `/`-separated, whatever the server OS

/// Normalize a remote path: absolute, no empty or `.` segments, `..` resolved
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Join a directory and an entry name
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent directory; the root is its own parent
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Last segment of a path
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Prefix a path with the configured base directory
pub fn rebase(base: Option<&str>, path: &str) -> String {
    match base {
        Some(base) => normalize(&join(base, path.trim_start_matches('/'))),
        None => normalize(path),
    }
}
