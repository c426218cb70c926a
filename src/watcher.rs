use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::filer::validate_log_file_name;

/// A nudge is only a hint to rescan, so one pending nudge is enough.
pub const NUDGE_CHANNEL_CAPACITY: usize = 1;

/// Watch `dir` (non-recursively) and send a nudge whenever a file matching
/// `file_name` or one of its rotations is created, removed or renamed. Runs until
/// `cancel` fires.
pub async fn watch_directory(
    dir: PathBuf,
    file_name: String,
    nudge_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> Result<()> {
    let watcher_tx = nudge_tx.clone();
    let expected = file_name.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res| match res {
            Ok(event) => handle_event(&watcher_tx, &expected, event),
            Err(err) => error!(error = %err, "file watcher error"),
        },
        NotifyConfig::default(),
    )
    .context("failed to create notify watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch directory {}", dir.display()))?;

    info!(dir = %dir.display(), file_name = %file_name, "directory watcher started");

    // The watcher stops when dropped.
    cancel.cancelled().await;
    debug!(dir = %dir.display(), "directory watcher stopped");
    Ok(())
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_)
    )
}

fn handle_event(nudge_tx: &mpsc::Sender<()>, expected: &str, event: Event) {
    if !is_relevant(&event.kind) {
        return;
    }
    let matched = event.paths.iter().any(|path| path_matches(expected, path));
    if !matched {
        return;
    }

    debug!(kind = ?event.kind, paths = ?event.paths, "log file change detected");
    match nudge_tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Closed(())) => debug!("nudge channel closed; dropping event"),
    }
}

fn path_matches(expected: &str, path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| validate_log_file_name(expected, name))
}
