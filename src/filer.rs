//! Discovery and lifecycle of tracked log files.
//!
//! The filer owns every [`TailedFile`] it has ever seen, keyed by tracking id.
//! A reconcile pass lists the watch directory, matches entries to tracked
//! files by filesystem identity (so rotation renames keep their offset),
//! starts tailing whatever is visible and stops whatever vanished.

use crate::devices::{Decoder, Reading};
use crate::file_id::FileId;
use crate::metadata::{MetadataStore, StoreError};
use crate::metrics;
use crate::tailer::{StopOutcome, TailContext, TailOptions, TailedFile};
use crate::watcher::{watch_directory, NUDGE_CHANNEL_CAPACITY};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FilerError {
    #[error("metadata store unavailable: {0}")]
    MetadataStore(#[from] StoreError),
    #[error("failed to read watch directory {}: {source}", dir.display())]
    WatchDir { dir: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct FilerConfig {
    pub dir: PathBuf,
    /// Base name; rotations of it are tracked as well.
    pub file_name: String,
    pub scan_interval: Duration,
    pub watch_events: bool,
    pub tail: TailOptions,
    pub tailer_shutdown_wait: Duration,
    pub shutdown_wait: Duration,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Directory entries accepted by the name matcher.
    pub matched: usize,
    pub discovered: usize,
    pub started: usize,
    /// Tracked files that were tailing but are no longer visible.
    pub lost: usize,
}

struct Shared {
    config: FilerConfig,
    ctx: TailContext,
    files: tokio::sync::Mutex<HashMap<Uuid, TailedFile>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Filer {
    shared: Arc<Shared>,
}

impl Filer {
    pub fn new(
        config: FilerConfig,
        store: MetadataStore,
        decoder: Arc<Decoder>,
        output: mpsc::Sender<Box<dyn Reading>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ctx = TailContext {
            decoder,
            output,
            store,
            options: config.tail.clone(),
            parent: cancel.clone(),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                ctx,
                files: tokio::sync::Mutex::new(HashMap::new()),
                cancel,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn tracked_files(&self) -> Vec<TailedFile> {
        self.shared.files.lock().await.values().cloned().collect()
    }

    /// Load persisted metadata. Malformed entries are skipped; an unreadable
    /// store is an error.
    pub async fn load_known_files(&self) -> Result<usize, FilerError> {
        let loaded = self.shared.ctx.store.load_all().await?;
        let mut files = self.shared.files.lock().await;
        let mut added = 0;
        for metadata in loaded {
            if files.contains_key(&metadata.tracking_id) {
                continue;
            }
            debug!(
                tracking_id = %metadata.tracking_id,
                path = %metadata.path.display(),
                offset = metadata.offset,
                "restored tracked file"
            );
            files.insert(metadata.tracking_id, TailedFile::from_metadata(metadata));
            added += 1;
        }
        Ok(added)
    }

    pub async fn scan_and_reconcile(&self) -> Result<ScanSummary, FilerError> {
        let shared = &self.shared;
        let mut files = shared.files.lock().await;
        let candidates = match list_candidates(&shared.config.dir, &shared.config.file_name).await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                metrics::SCANS_TOTAL.with_label_values(&["error"]).inc();
                return Err(err);
            }
        };

        let mut summary = ScanSummary::default();
        for file in files.values() {
            file.set_found(false);
        }

        for (path, identity) in candidates {
            summary.matched += 1;
            let existing = files
                .values()
                .find(|file| file.identity() == identity)
                .cloned();

            let file = match existing {
                Some(file) => {
                    if file.update_path(&path) {
                        info!(
                            tracking_id = %file.tracking_id(),
                            path = %path.display(),
                            "tracked file renamed"
                        );
                        if let Err(err) = file.persist(&shared.ctx.store).await {
                            warn!(error = %err, path = %path.display(), "failed to persist new path");
                        }
                    }
                    file
                }
                None => {
                    let file = TailedFile::create(path.clone(), identity);
                    if let Err(err) = file.persist(&shared.ctx.store).await {
                        error!(
                            error = %err,
                            path = %path.display(),
                            "failed to persist new file; not tracking it"
                        );
                        continue;
                    }
                    info!(
                        tracking_id = %file.tracking_id(),
                        path = %path.display(),
                        %identity,
                        "discovered log file"
                    );
                    files.insert(file.tracking_id(), file.clone());
                    summary.discovered += 1;
                    file
                }
            };

            file.set_found(true);
            if file.start(&shared.ctx) {
                summary.started += 1;
            }
        }

        for file in files.values().filter(|file| !file.is_found()) {
            if file.is_tailing() {
                info!(
                    tracking_id = %file.tracking_id(),
                    path = %file.path().display(),
                    "tracked file disappeared; stopping"
                );
                file.request_stop();
                summary.lost += 1;
            }
        }

        metrics::SCANS_TOTAL.with_label_values(&["ok"]).inc();
        debug!(?summary, "reconcile pass complete");
        Ok(summary)
    }

    /// Load, run the first reconcile and keep reconciling in the background.
    pub async fn start(&self) -> Result<(), FilerError> {
        let restored = self.load_known_files().await?;
        info!(
            restored,
            dir = %self.shared.config.dir.display(),
            file_name = %self.shared.config.file_name,
            "filer starting"
        );

        match self.scan_and_reconcile().await {
            Ok(summary) => info!(
                matched = summary.matched,
                discovered = summary.discovered,
                "initial scan complete"
            ),
            Err(err) => error!(error = %err, "initial scan failed; will retry"),
        }

        let (nudge_tx, nudge_rx) = mpsc::channel(NUDGE_CHANNEL_CAPACITY);
        let mut tasks = Vec::new();

        if self.shared.config.watch_events {
            let dir = self.shared.config.dir.clone();
            let file_name = self.shared.config.file_name.clone();
            let cancel = self.shared.cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = watch_directory(dir, file_name, nudge_tx, cancel).await {
                    warn!(error = %err, "directory watcher unavailable; relying on periodic scans");
                }
            }));
        } else {
            drop(nudge_tx);
        }

        let filer = self.clone();
        tasks.push(tokio::spawn(async move {
            filer.reconcile_loop(nudge_rx).await;
        }));

        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
        Ok(())
    }

    async fn reconcile_loop(&self, mut nudge_rx: mpsc::Receiver<()>) {
        let period = self.shared.config.scan_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut nudges_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                nudge = nudge_rx.recv(), if nudges_open => {
                    if nudge.is_none() {
                        nudges_open = false;
                        continue;
                    }
                    debug!("rescanning after directory event");
                }
            }

            if let Err(err) = self.scan_and_reconcile().await {
                warn!(error = %err, "reconcile pass failed");
            }
        }
        debug!("reconcile loop stopped");
    }

    /// Cancel everything and wait, bounded by the shutdown wait, for the
    /// background tasks and every tailer to finish.
    pub async fn stop(&self) {
        let shared = &self.shared;
        info!("stopping filer");
        shared.cancel.cancel();

        let tasks = std::mem::take(
            &mut *shared
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let wait = async {
            join_all(tasks).await;
            let files: Vec<TailedFile> = shared.files.lock().await.values().cloned().collect();
            let outcomes = join_all(
                files
                    .iter()
                    .map(|file| file.stop(shared.config.tailer_shutdown_wait)),
            )
            .await;
            outcomes
        };

        match tokio::time::timeout(shared.config.shutdown_wait, wait).await {
            Ok(outcomes) => {
                let timed_out = outcomes
                    .iter()
                    .filter(|outcome| **outcome == StopOutcome::TimedOut)
                    .count();
                if timed_out > 0 {
                    warn!(timed_out, "some tailers did not stop in time");
                }
                info!("filer stopped");
            }
            Err(_) => warn!(
                wait_secs = shared.config.shutdown_wait.as_secs(),
                "filer shutdown exceeded its wait; detaching remaining tasks"
            ),
        }
    }
}

/// Entries of `dir` whose name matches `file_name` or one of its rotations,
/// with their identity, sorted by path.
async fn list_candidates(
    dir: &Path,
    file_name: &str,
) -> Result<Vec<(PathBuf, FileId)>, FilerError> {
    let dir_err = |source| FilerError::WatchDir {
        dir: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(dir_err)?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !validate_log_file_name(file_name, name) {
            continue;
        }

        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "cannot stat log file; skipping");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        match FileId::from_metadata(&metadata) {
            Ok(identity) => candidates.push((path, identity)),
            Err(err) => warn!(error = %err, path = %path.display(), "cannot identify log file"),
        }
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(candidates)
}

/// Whether `found` is `expected` or one of its numbered rotations:
/// `rtl_433.log.N` or `rtl_433.N.log`, where `N` is a positive integer
/// without leading zeros.
pub fn validate_log_file_name(expected: &str, found: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    if found == expected {
        return true;
    }

    let suffixed = found
        .strip_prefix(expected)
        .and_then(|rest| rest.strip_prefix('.'));
    if let Some(number) = suffixed {
        return is_rotation_number(number);
    }

    let Some((stem, ext)) = expected.rsplit_once('.') else {
        return false;
    };
    if stem.is_empty() {
        return false;
    }
    found
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(ext))
        .and_then(|rest| rest.strip_suffix('.'))
        .map_or(false, is_rotation_number)
}

fn is_rotation_number(value: &str) -> bool {
    !value.is_empty() && !value.starts_with('0') && value.bytes().all(|b| b.is_ascii_digit())
}
