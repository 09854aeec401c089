use crate::error::BackupError;
use crate::timestamp::{Record, sort_by_timestamp, timestamp_of};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One page of conversation history.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<Record>,
    pub has_more: bool,
}

/// Something that can serve conversation history one page at a time.
///
/// `oldest` is the lower bound the fetcher supplies; the provider may treat it
/// as inclusive or exclusive. `has_more` must eventually become `false`.
pub trait HistoryProvider {
    type Error: StdError + Send + Sync + 'static;

    fn history(
        &self,
        conversation_id: &str,
        oldest: f64,
        count: usize,
    ) -> Result<HistoryPage, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions<'a> {
    pub page_size: usize,
    /// Checked before each page request. In-flight requests always complete.
    pub stop: Option<&'a AtomicBool>,
}

impl Default for FetchOptions<'_> {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            stop: None,
        }
    }
}

impl FetchOptions<'_> {
    fn stopped(&self) -> bool {
        self.stop.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Fetch every record newer than `since`, sorted ascending.
///
/// Records are kept only if their timestamp is strictly greater than `since`,
/// never the moving cursor, so the record sitting exactly at the watermark is
/// not ingested twice while pages can still overlap at their edges.
pub fn fetch_history<P>(
    provider: &P,
    conversation_id: &str,
    since: f64,
    options: FetchOptions<'_>,
) -> Result<Vec<Record>, BackupError>
where
    P: HistoryProvider + ?Sized,
{
    let mut fetched = Vec::new();
    let mut cursor = since;
    let mut pages = 0usize;

    loop {
        if options.stopped() {
            return Err(BackupError::Cancelled);
        }

        let page = provider
            .history(conversation_id, cursor, options.page_size)
            .map_err(BackupError::provider)?;
        pages += 1;

        let received = page.messages.len();
        let (kept, page_max) = split_page(page.messages, since)?;
        debug!(
            conversation = conversation_id,
            page = pages,
            received,
            kept = kept.len(),
            has_more = page.has_more,
            "fetched history page"
        );
        fetched.extend(kept);

        if !page.has_more {
            break;
        }

        let next = advance(cursor, page_max);
        if next <= cursor {
            warn!(
                conversation = conversation_id,
                cursor, "history cursor did not advance; provider keeps returning the same page"
            );
        }
        cursor = next;
    }

    sort_by_timestamp(fetched)
}

/// Records newer than `since`, plus the largest timestamp in the whole page.
fn split_page(messages: Vec<Record>, since: f64) -> Result<(Vec<Record>, Option<f64>), BackupError> {
    let mut kept = Vec::with_capacity(messages.len());
    let mut page_max: Option<f64> = None;
    for record in messages {
        let ts = timestamp_of(&record)?;
        page_max = Some(page_max.map_or(ts, |m| m.max(ts)));
        if ts > since {
            kept.push(record);
        }
    }
    Ok((kept, page_max))
}

/// Next page bound: the raw page maximum, including boundary duplicates that
/// were filtered out. An empty page leaves the cursor where it was.
fn advance(cursor: f64, page_max: Option<f64>) -> f64 {
    page_max.unwrap_or(cursor)
}
