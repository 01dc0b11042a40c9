// File selection: wildcard patterns, explicit paths and interactive lists

mod matcher;
mod pattern;

pub use matcher::{DirectoryLister, Selector};
pub use pattern::{has_wildcard, CompiledPattern, Segment};

use crate::errors::{SelectionError, ValidationError};
use crate::models::RemoteEntry;
use std::collections::HashSet;
use tracing::info;

/// What a job takes from the server
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionSpec {
    Wildcard(Vec<CompiledPattern>),
    ExplicitPaths(Vec<String>),
    /// Items picked by a user: wildcard items are patterns, the rest are literal paths
    Interactive {
        patterns: Vec<CompiledPattern>,
        paths: Vec<String>,
    },
}

impl SelectionSpec {
    pub fn wildcard<I, S>(patterns: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| CompiledPattern::compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SelectionSpec::Wildcard(compiled))
    }

    pub fn interactive<I, S>(items: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        let mut paths = Vec::new();
        for item in items {
            let item = item.as_ref();
            if has_wildcard(item) {
                patterns.push(CompiledPattern::compile(item)?);
            } else {
                paths.push(item.to_string());
            }
        }
        Ok(SelectionSpec::Interactive { patterns, paths })
    }

    /// Every file under `/`, used by the listing action
    pub fn everything() -> Self {
        SelectionSpec::Wildcard(vec![CompiledPattern::everything()])
    }
}

/// Selection is the resolved set of files plus required paths that were absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub entries: Vec<RemoteEntry>,
    pub missing: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn extend_unique(&mut self, entries: Vec<RemoteEntry>, seen: &mut HashSet<String>) {
        self.entries
            .extend(entries.into_iter().filter(|e| seen.insert(e.path.clone())));
    }
}

/// Resolve a selection against the server behind `lister`
pub async fn resolve<L>(lister: &mut L, spec: &SelectionSpec) -> Result<Selection, SelectionError>
where
    L: DirectoryLister + ?Sized,
{
    let mut selector = Selector::new(lister);
    let mut selection = Selection::default();
    let mut seen = HashSet::new();

    let (patterns, paths): (&[CompiledPattern], &[String]) = match spec {
        SelectionSpec::Wildcard(patterns) => (patterns.as_slice(), &[]),
        SelectionSpec::ExplicitPaths(paths) => (&[], paths.as_slice()),
        SelectionSpec::Interactive { patterns, paths } => (patterns.as_slice(), paths.as_slice()),
    };

    for pattern in patterns {
        let matched = selector.match_pattern(pattern).await?;
        info!(pattern = %pattern.source(), matched = matched.len(), "Pattern matched");
        selection.extend_unique(matched, &mut seen);
    }

    if !paths.is_empty() {
        let (found, missing) = selector.resolve_explicit(paths).await?;
        selection.extend_unique(found, &mut seen);
        selection.missing = missing;
    }

    info!(
        selected = selection.entries.len(),
        missing = selection.missing.len(),
        listings = selector.listings_performed(),
        "Selection resolved"
    );
    Ok(selection)
}
