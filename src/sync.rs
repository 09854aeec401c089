use crate::error::BackupError;
use crate::history::{FetchOptions, HistoryProvider, fetch_history};
use crate::store::{self, Snapshot};
use crate::timestamp::{max_timestamp, sort_by_timestamp};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    /// Number of newly merged messages.
    Updated(usize),
}

/// Bring the snapshot at `path` up to date with the remote conversation.
///
/// Nothing is written, and `metadata_factory` is not called, when the
/// provider has no messages past the stored watermark.
pub fn sync_conversation<P, F>(
    provider: &P,
    conversation_id: &str,
    path: &Path,
    metadata_factory: F,
    options: FetchOptions<'_>,
) -> Result<SyncOutcome, BackupError>
where
    P: HistoryProvider + ?Sized,
    F: FnOnce() -> Result<Value, BackupError>,
{
    let existing = store::load(path)?;
    let watermark = max_timestamp(&existing)?;
    debug!(
        conversation = conversation_id,
        stored = existing.len(),
        watermark,
        "resuming history"
    );

    let fresh = fetch_history(provider, conversation_id, watermark, options)?;
    if fresh.is_empty() {
        return Ok(SyncOutcome::Unchanged);
    }

    let count = fresh.len();
    let mut messages = existing;
    messages.extend(fresh);
    let messages = sort_by_timestamp(messages)?;

    let snapshot = Snapshot {
        channel_info: metadata_factory()?,
        messages,
    };
    store::save(path, &snapshot)?;

    Ok(SyncOutcome::Updated(count))
}
