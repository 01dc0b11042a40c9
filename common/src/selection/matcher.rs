// Remote traversal for wildcard and explicit selections

use crate::errors::{ListingErrorKind, SelectionError, TransferError};
use crate::models::RemoteEntry;
use crate::transport::{path, RetryingSession};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, instrument, warn};

use super::pattern::{CompiledPattern, Segment};

/// DirectoryLister lists the direct children of a remote directory
#[async_trait]
pub trait DirectoryLister: Send {
    async fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError>;
}

#[async_trait]
impl DirectoryLister for RetryingSession {
    async fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        self.list(dir).await
    }
}

/// Selector resolves selections with a per-run listing cache
pub struct Selector<'a, L: DirectoryLister + ?Sized> {
    lister: &'a mut L,
    cache: HashMap<String, Vec<RemoteEntry>>,
    unreadable: HashSet<String>,
    listings: usize,
}

impl<'a, L: DirectoryLister + ?Sized> Selector<'a, L> {
    pub fn new(lister: &'a mut L) -> Self {
        Self {
            lister,
            cache: HashMap::new(),
            unreadable: HashSet::new(),
            listings: 0,
        }
    }

    /// Number of remote listings performed so far
    pub fn listings_performed(&self) -> usize {
        self.listings
    }

    async fn listing(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        if let Some(entries) = self.cache.get(dir) {
            return Ok(entries.clone());
        }
        self.listings += 1;
        let entries = self.lister.list_dir(dir).await?;
        self.cache.insert(dir.to_string(), entries.clone());
        Ok(entries)
    }

    /// Listing below the selection root; inaccessible directories yield None
    async fn listing_below_root(
        &mut self,
        dir: &str,
    ) -> Result<Option<Vec<RemoteEntry>>, SelectionError> {
        if self.unreadable.contains(dir) {
            return Ok(None);
        }
        match self.listing(dir).await {
            Ok(entries) => Ok(Some(entries)),
            Err(TransferError::Listing { kind, message, .. }) => {
                warn!(directory = %dir, kind = %kind, error = %message, "Skipping inaccessible directory");
                self.unreadable.insert(dir.to_string());
                Ok(None)
            }
            Err(e) => Err(SelectionError::Listing(e)),
        }
    }

    /// Files matching one compiled pattern, sorted by path
    #[instrument(skip(self, pattern), fields(pattern = %pattern.source(), root = %pattern.root()))]
    pub async fn match_pattern(
        &mut self,
        pattern: &CompiledPattern,
    ) -> Result<Vec<RemoteEntry>, SelectionError> {
        let segments = pattern.segments();
        let root = pattern.root().to_string();

        // Root must be listable, anything else is a selection failure
        if let Err(source) = self.listing(&root).await {
            return match source {
                TransferError::Listing { .. } => Err(SelectionError::Root { root, source }),
                other => Err(SelectionError::Listing(other)),
            };
        }

        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut visited: HashSet<(String, usize)> = HashSet::new();
        let mut selected: BTreeMap<String, RemoteEntry> = BTreeMap::new();

        queue.push_back((root, pattern.start_index()));

        while let Some((dir, index)) = queue.pop_front() {
            if !visited.insert((dir.clone(), index)) {
                continue;
            }
            let Some(entries) = self.listing_below_root(&dir).await? else {
                continue;
            };

            // Only reachable through a trailing `**`
            let Some(segment) = segments.get(index) else {
                for entry in entries.into_iter().filter(|e| !e.is_dir) {
                    selected.entry(entry.path.clone()).or_insert(entry);
                }
                continue;
            };

            if *segment == Segment::Recursive {
                queue.push_back((dir.clone(), index + 1));
                for entry in entries.iter().filter(|e| e.is_dir) {
                    queue.push_back((entry.path.clone(), index));
                }
                continue;
            }

            let last = index + 1 == segments.len();
            for entry in entries {
                if !segment.matches(entry.name()) {
                    continue;
                }
                match (last, entry.is_dir) {
                    (true, false) => {
                        selected.entry(entry.path.clone()).or_insert(entry);
                    }
                    (false, true) => queue.push_back((entry.path.clone(), index + 1)),
                    _ => {}
                }
            }
        }

        debug!(matched = selected.len(), listings = self.listings, "Pattern resolved");
        Ok(selected.into_values().collect())
    }

    /// Validate literal paths by listing their parents
    ///
    /// Returns the found files in the given order and the missing paths.
    #[instrument(skip(self, paths), fields(count = paths.len()))]
    pub async fn resolve_explicit(
        &mut self,
        paths: &[String],
    ) -> Result<(Vec<RemoteEntry>, Vec<String>), SelectionError> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        let mut seen = HashSet::new();

        for raw in paths {
            let wanted = path::normalize(raw);
            if !seen.insert(wanted.clone()) {
                continue;
            }
            let parent = path::parent(&wanted);

            let entries = match self.listing(&parent).await {
                Ok(entries) => entries,
                Err(TransferError::Listing { kind, message, .. }) => {
                    if kind == ListingErrorKind::PermissionDenied {
                        warn!(directory = %parent, error = %message, "Parent directory is not readable");
                    }
                    missing.push(wanted);
                    continue;
                }
                Err(e) => return Err(SelectionError::Listing(e)),
            };

            match entries.into_iter().find(|e| e.path == wanted && !e.is_dir) {
                Some(entry) => found.push(entry),
                None => {
                    warn!(path = %wanted, "Required file not found on server");
                    missing.push(wanted);
                }
            }
        }

        Ok((found, missing))
    }
}
