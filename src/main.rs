use clap::Parser;
use eyre::{Result, eyre};
use slack_backup::backup;
use slack_backup::config::{BackupConfig, default_workers, load_file_config};
use slack_backup::history::DEFAULT_PAGE_SIZE;
use slack_backup::slack::{DEFAULT_API_BASE, DEFAULT_MAX_RETRIES};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Back up a Slack workspace's message history.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to write the backup to.
    /// Defaults to ./slack-backup if not set in config.
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// A workspace user's API token.
    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/slack-backup/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Don't fetch history for public channels.
    #[arg(short = 'C', long)]
    skip_channels: bool,

    /// Don't fetch history for private channels.
    #[arg(short = 'P', long)]
    skip_private_channels: bool,

    /// Don't fetch history for direct messages.
    #[arg(short = 'M', long)]
    skip_direct_messages: bool,

    /// Messages requested per history page.
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,

    /// Conversations synced in parallel.
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Stop after the first conversation that fails.
    #[arg(long)]
    fail_fast: bool,

    /// Log every conversation, including unchanged ones.
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    // RUST_LOG wins over the command line
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve output_dir (CLI > Config > Default)
    let output_dir = cli
        .output_dir
        .or(file_cfg.output_dir)
        .unwrap_or_else(|| PathBuf::from("slack-backup"));

    // 3. Resolve token (CLI/env > Config)
    let token = cli.token.or(file_cfg.token).ok_or_else(|| {
        eyre!("No API token.\nUse --token, set SLACK_TOKEN, or set token in config.toml.")
    })?;

    let page_size = cli
        .page_size
        .or(file_cfg.page_size)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 {
        return Err(eyre!("page_size must be at least 1"));
    }

    // 4. Build the Backup Config
    let config = BackupConfig {
        output_dir,
        token,
        api_base: file_cfg
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        page_size,
        workers: cli.workers.or(file_cfg.workers).unwrap_or_else(default_workers),
        max_retries: file_cfg.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        skip_channels: cli.skip_channels,
        skip_private_channels: cli.skip_private_channels,
        skip_direct_messages: cli.skip_direct_messages,
        fail_fast: cli.fail_fast,
    };

    // 5. Run the Business Logic
    let summary = backup::execute(&config)?;
    if summary.failed > 0 {
        return Err(eyre!("{} conversation(s) failed to back up", summary.failed));
    }
    Ok(())
}
