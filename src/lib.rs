//! # slack-backup
//!
//! A CLI tool that backs up a Slack workspace's message history to local JSON files.
//!
//! ## What it does
//!
//! Every public channel, private channel and direct message conversation is written to
//! its own file:
//!
//! ```text
//! <output>/metadata.json              auth.test response + user id -> name map
//! <output>/channels/<name>.json
//! <output>/private_channels/<name>.json
//! <output>/direct_messages/<user>.json
//! ```
//!
//! Each conversation file holds `channel_info` and the full `messages` list sorted by
//! timestamp. Messages are stored exactly as the API returned them.
//!
//! ## Incremental backup
//!
//! On repeated runs only messages newer than the latest stored timestamp are fetched and
//! merged in. Conversations without new activity are not rewritten at all, so a scheduled
//! run against a quiet workspace leaves the backup byte-for-byte unchanged. Files are
//! replaced atomically: a crash mid-run never leaves a half-written conversation behind.
//!
//! ## Usage
//!
//! ```sh
//! SLACK_TOKEN=xoxp-... slack-backup ~/backups/slack
//!
//! # Skip direct messages, use 8 workers
//! slack-backup ~/backups/slack --skip-direct-messages --workers 8
//! ```
//!
//! Preferences can be persisted in `~/.config/slack-backup/config.toml`.

pub mod backup;
pub mod config;
pub mod error;
pub mod history;
pub mod slack;
pub mod store;
pub mod sync;
pub mod timestamp;
pub mod workspace;

pub use error::BackupError;
pub use history::{FetchOptions, HistoryPage, HistoryProvider, fetch_history};
pub use store::Snapshot;
pub use sync::{SyncOutcome, sync_conversation};
pub use timestamp::Record;
