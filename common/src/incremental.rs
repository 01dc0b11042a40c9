// Incremental filter
// Pure functions over (entries, previous state); no I/O

use crate::models::{ExtractionState, RemoteEntry, TransferResult};
use chrono::{DateTime, Utc};

/// Entries to transfer and entries skipped as unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPlan {
    pub work: Vec<RemoteEntry>,
    pub skipped: Vec<RemoteEntry>,
}

/// Whether an entry must be transferred given the previous state
///
/// Entries without a timestamp are always transferred.
pub fn is_new(entry: &RemoteEntry, state: &ExtractionState) -> bool {
    match (entry.modified, state.last_modified(&entry.path)) {
        (None, _) | (_, None) => true,
        (Some(current), Some(previous)) => current > previous,
    }
}

/// Split the selection into work and skipped, preserving order
pub fn plan(entries: Vec<RemoteEntry>, state: &ExtractionState) -> FilterPlan {
    let (work, skipped) = entries.into_iter().partition(|e| is_new(e, state));
    FilterPlan { work, skipped }
}

/// New state with every successful, timestamped transfer merged in
///
/// Failed and timestamp-less entries leave the previous value untouched.
pub fn record_successes<'a, I>(
    previous: &ExtractionState,
    results: I,
    run_at: DateTime<Utc>,
) -> ExtractionState
where
    I: IntoIterator<Item = &'a TransferResult>,
{
    let mut next = previous.clone();
    for result in results.into_iter().filter(|r| r.is_success()) {
        if let Some(modified) = result.entry.modified {
            let slot = next.files.entry(result.entry.path.clone()).or_insert(modified);
            if modified > *slot {
                *slot = modified;
            }
        }
    }
    next.last_run_at = Some(run_at);
    next
}
