//! Directory watcher used to hot-reload route fragments.

use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Watches a fragment directory and invokes a callback on every relevant change.
///
/// The callback runs on the notify backend thread, so it may block on disk reads.
pub struct FragmentDirWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl FragmentDirWatcher {
    pub fn new(path: &Path, poll_interval: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            poll_interval,
        }
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run<F>(self, mut on_change: F) -> Result<RecommendedWatcher, notify::Error>
    where
        F: FnMut() + Send + 'static,
    {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event.kind) {
                        tracing::debug!(paths = ?event.paths, kind = ?event.kind, "Fragment directory change detected");
                        on_change();
                    }
                }
                Err(e) => tracing::error!(error = %e, "Fragment watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Fragment watcher started");
        Ok(watcher)
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    kind.is_create() || kind.is_modify() || kind.is_remove()
}
