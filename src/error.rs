use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while syncing a single conversation.
///
/// Every variant is local to the conversation being processed. The driver
/// decides whether the remaining conversations keep going.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A record has no usable `ts` field, so ordering can no longer be derived.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Transport, auth or rate-limit failure reported by the history provider.
    #[error(transparent)]
    Provider(Box<dyn StdError + Send + Sync + 'static>),

    #[error("corrupt snapshot at {}", path.display())]
    CorruptSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist {}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history fetch cancelled")]
    Cancelled,
}

impl BackupError {
    pub fn provider<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        BackupError::Provider(Box::new(err))
    }
}
