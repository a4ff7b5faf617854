//! Filesystem change signals for the worker and the settings publisher.
//!
//! Events only trigger a re-evaluation; what changed is worked out by the
//! receiver on its next pass. Signals go through a channel of capacity one, so
//! a burst of events collapses into a single pending signal.

use std::ffi::OsString;
use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keeps the underlying watcher alive; dropping it stops the signals.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

/// Watches `dir` (not recursively). With `only` set, events on other file names are ignored.
pub fn watch_directory(
    dir: &Path,
    only: Option<OsString>,
) -> notify::Result<(DirectoryWatcher, mpsc::Receiver<()>)> {
    let (tx, rx) = mpsc::channel(1);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event, only.as_deref()) => {
            debug!(kind = ?event.kind, paths = ?event.paths, "[WATCH] Change detected");
            // A full channel already holds a pending signal.
            let _ = tx.try_send(());
        }
        Ok(_) => {}
        Err(e) => warn!(error = ?e, "[WATCH] Watcher error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!(dir = %dir.display(), "[WATCH] Watching directory");
    Ok((DirectoryWatcher { _watcher: watcher }, rx))
}

fn is_relevant(event: &Event, only: Option<&std::ffi::OsStr>) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    match only {
        None => true,
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
    }
}
