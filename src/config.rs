use crate::history::DEFAULT_PAGE_SIZE;
use crate::slack::{DEFAULT_API_BASE, DEFAULT_MAX_RETRIES};
use crate::workspace::ConversationKind;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Fully resolved settings for one backup run, after CLI flags, `config.toml`
/// and defaults have been merged.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub output_dir: PathBuf,
    pub token: String,
    pub api_base: String,
    pub page_size: usize,
    pub workers: usize,
    pub max_retries: u32,
    pub skip_channels: bool,
    pub skip_private_channels: bool,
    pub skip_direct_messages: bool,
    /// Stop scheduling (and abandon in-flight fetches) after the first failure.
    pub fail_fast: bool,
}

impl BackupConfig {
    pub fn new(output_dir: impl Into<PathBuf>, token: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            workers: default_workers(),
            max_retries: DEFAULT_MAX_RETRIES,
            skip_channels: false,
            skip_private_channels: false,
            skip_direct_messages: false,
            fail_fast: false,
        }
    }

    /// Collections to back up, in the order they are processed.
    pub fn kinds(&self) -> Vec<ConversationKind> {
        ConversationKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ConversationKind::PublicChannel => !self.skip_channels,
                ConversationKind::PrivateChannel => !self.skip_private_channels,
                ConversationKind::DirectMessage => !self.skip_direct_messages,
            })
            .collect()
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Settings that may be persisted in `config.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub token: Option<String>,
    pub api_base: Option<String>,
    pub page_size: Option<usize>,
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("slack-backup/config.toml"))
}

/// Load the config file: an explicit path must exist, the default one is optional.
pub fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        default_config_path().filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}
