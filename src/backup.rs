use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::history::FetchOptions;
use crate::slack::SlackClient;
use crate::store;
use crate::sync::{SyncOutcome, sync_conversation};
use crate::workspace::{AuthInfo, ConversationKind, Workspace};
use crossbeam_channel::{SendTimeoutError, bounded};
use eyre::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// Counts reported after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub new_messages: usize,
}

/// Top-level `metadata.json`, rewritten on every run.
#[derive(Serialize)]
struct Metadata<'a> {
    auth_info: &'a Value,
    users: &'a BTreeMap<String, String>,
}

/// One conversation to sync.
struct Job {
    id: String,
    name: String,
    path: PathBuf,
    metadata: MetadataSource,
}

enum MetadataSource {
    /// Ask the workspace for the channel's current info.
    Lookup,
    /// Direct messages only record who took part.
    Members(Vec<String>),
}

/// Back up the workspace reachable with `config.token`.
pub fn execute(config: &BackupConfig) -> Result<BackupSummary> {
    let client = SlackClient::new(config.token.clone())
        .wrap_err("Failed to build Slack client")?
        .with_base_url(config.api_base.clone())
        .with_max_retries(config.max_retries);
    run(&client, config)
}

pub fn run<W: Workspace>(workspace: &W, config: &BackupConfig) -> Result<BackupSummary> {
    let auth = workspace.auth_test().wrap_err("Authentication failed")?;
    let users: BTreeMap<String, String> = workspace
        .users()
        .wrap_err("Failed to list users")?
        .into_iter()
        .map(|u| (u.id, u.name))
        .collect();
    info!(
        "Authenticated to team {} ({} users) as {}.",
        auth.team,
        users.len(),
        auth.user
    );

    let metadata_path = config.output_dir.join("metadata.json");
    store::write_json(
        &metadata_path,
        &Metadata {
            auth_info: &auth.raw,
            users: &users,
        },
    )
    .wrap_err("Failed to write metadata")?;
    debug!(path = %metadata_path.display(), "wrote metadata");

    let mut jobs = Vec::new();
    for kind in config.kinds() {
        let listed = collect_jobs(workspace, kind, &config.output_dir, &auth, &users)
            .wrap_err_with(|| format!("Failed to list {}", kind.label().to_lowercase()))?;
        info!("{}: {} conversations", kind.label(), listed.len());
        jobs.extend(listed);
    }

    let (jobs, clashing) = split_path_collisions(jobs);
    for job in &clashing {
        error!(
            "Error [{}]: snapshot path {} is shared with another conversation ({}); skipped",
            job.name,
            job.path.display(),
            job.id
        );
    }

    let mut summary = run_jobs(workspace, config, &jobs);
    summary.failed += clashing.len();

    info!(
        "Done. {} updated ({} new messages), {} unchanged. Errors: {}",
        summary.updated, summary.new_messages, summary.unchanged, summary.failed
    );
    if summary.cancelled > 0 {
        info!("{} conversations cancelled", summary.cancelled);
    }

    Ok(summary)
}

fn collect_jobs<W: Workspace>(
    workspace: &W,
    kind: ConversationKind,
    output_dir: &Path,
    auth: &AuthInfo,
    users: &BTreeMap<String, String>,
) -> Result<Vec<Job>, W::Error> {
    let mut jobs: Vec<Job> = workspace
        .conversations(kind)?
        .into_iter()
        .map(|conversation| {
            let (name, metadata) = match kind {
                ConversationKind::DirectMessage => match conversation.user {
                    Some(peer) => {
                        let name = users
                            .get(&peer)
                            .cloned()
                            .unwrap_or_else(|| format!("{peer} (name unknown)"));
                        (
                            name,
                            MetadataSource::Members(vec![peer, auth.user_id.clone()]),
                        )
                    }
                    // No peer in the listing: the conversation id is the only unique name.
                    None => (
                        format!("{} (no peer)", conversation.id),
                        MetadataSource::Members(vec![auth.user_id.clone()]),
                    ),
                },
                _ => {
                    let name = conversation
                        .name
                        .unwrap_or_else(|| conversation.id.clone());
                    (name, MetadataSource::Lookup)
                }
            };
            Job {
                path: snapshot_path(output_dir, kind, &name),
                id: conversation.id,
                name,
                metadata,
            }
        })
        .collect();

    if kind == ConversationKind::DirectMessage {
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
    }
    Ok(jobs)
}

/// Separate jobs whose snapshot path is unique from those that share one.
/// Shared paths are never synced: two conversations would overwrite each
/// other and resume from each other's watermark.
fn split_path_collisions(jobs: Vec<Job>) -> (Vec<Job>, Vec<Job>) {
    let mut seen: HashMap<PathBuf, usize> = HashMap::new();
    for job in &jobs {
        *seen.entry(job.path.clone()).or_default() += 1;
    }
    jobs.into_iter().partition(|job| seen[&job.path] == 1)
}

/// `<output>/<collection>/<name>.json`, with path separators in `name` replaced.
pub fn snapshot_path(output_dir: &Path, kind: ConversationKind, name: &str) -> PathBuf {
    let stem: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    let stem = match stem.as_str() {
        "" | "." | ".." => format!("_{stem}"),
        _ => stem,
    };
    output_dir.join(kind.dir_name()).join(format!("{stem}.json"))
}

fn run_jobs<W: Workspace>(workspace: &W, config: &BackupConfig, jobs: &[Job]) -> BackupSummary {
    let (tx, rx) = bounded::<&Job>(64);
    let count_updated = AtomicUsize::new(0);
    let count_unchanged = AtomicUsize::new(0);
    let count_failed = AtomicUsize::new(0);
    let count_cancelled = AtomicUsize::new(0);
    let count_messages = AtomicUsize::new(0);
    let should_stop = AtomicBool::new(false);
    let n_workers = config.workers.clamp(1, jobs.len().max(1));

    std::thread::scope(|s| {
        for _ in 0..n_workers {
            let rx = rx.clone();
            let should_stop = &should_stop;
            let (count_updated, count_unchanged, count_failed, count_cancelled, count_messages) = (
                &count_updated,
                &count_unchanged,
                &count_failed,
                &count_cancelled,
                &count_messages,
            );
            let options = FetchOptions {
                page_size: config.page_size,
                stop: Some(should_stop),
            };

            s.spawn(move || {
                while let Ok(job) = rx.recv() {
                    if should_stop.load(Ordering::Relaxed) {
                        count_cancelled.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    match sync_job(workspace, job, options) {
                        Ok(SyncOutcome::Updated(n)) => {
                            count_updated.fetch_add(1, Ordering::Relaxed);
                            count_messages.fetch_add(n, Ordering::Relaxed);
                            info!("{}: {} new messages", job.name, n);
                        }
                        Ok(SyncOutcome::Unchanged) => {
                            count_unchanged.fetch_add(1, Ordering::Relaxed);
                            debug!("{}: up to date", job.name);
                        }
                        Err(BackupError::Cancelled) => {
                            count_cancelled.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            count_failed.fetch_add(1, Ordering::Relaxed);
                            error!("Error [{}]: {:#}", job.name, eyre::Report::new(e));
                            if config.fail_fast {
                                should_stop.store(true, Ordering::Relaxed);
                            }
                        }
                    }
                }
            });
        }

        drop(rx);

        'outer: for job in jobs {
            let mut pending = job;
            loop {
                match tx.send_timeout(pending, Duration::from_millis(50)) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Disconnected(_)) => break 'outer,
                    Err(SendTimeoutError::Timeout(j)) => pending = j,
                }
            }
        }

        drop(tx);
    });

    BackupSummary {
        updated: count_updated.into_inner(),
        unchanged: count_unchanged.into_inner(),
        failed: count_failed.into_inner(),
        cancelled: count_cancelled.into_inner(),
        new_messages: count_messages.into_inner(),
    }
}

fn sync_job<W: Workspace>(
    workspace: &W,
    job: &Job,
    options: FetchOptions<'_>,
) -> Result<SyncOutcome, BackupError> {
    sync_conversation(
        workspace,
        &job.id,
        &job.path,
        || match &job.metadata {
            MetadataSource::Lookup => workspace
                .conversation_info(&job.id)
                .map_err(BackupError::provider),
            MetadataSource::Members(members) => Ok(json!({ "members": members })),
        },
        options,
    )
}
