// src/watch/watcher.rs

//! `notify`-based watch backends.
//!
//! Both backends watch the project root recursively and report absolute file
//! paths. Directory events and plain read accesses are dropped before they
//! reach the change queue.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, CreateKind, RemoveKind};
use notify::{
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher, WatcherKind,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::routine::BoxFuture;
use crate::errors::{Result, WatchError};
use crate::types::BackendChoice;
use crate::watch::backend::{BackendEvent, WatchBackend};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A [`WatchBackend`] wrapping any `notify` watcher.
pub struct NotifyWatcher {
    label: &'static str,
    root: PathBuf,
    watcher: Option<Box<dyn Watcher + Send>>,
    events: Option<mpsc::UnboundedReceiver<BackendEvent>>,
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("label", &self.label)
            .field("root", &self.root)
            .field("open", &self.watcher.is_some())
            .finish()
    }
}

impl NotifyWatcher {
    /// Start the platform's native recursive watcher on `root`.
    pub fn native(root: impl Into<PathBuf>) -> Result<Self> {
        Self::start("native", root.into(), |handler| {
            RecommendedWatcher::new(handler, Config::default())
        })
    }

    /// Start a polling watcher on `root` that rescans every `interval`.
    pub fn polling(root: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
        Self::start("poll", root.into(), move |handler| {
            PollWatcher::new(handler, Config::default().with_poll_interval(interval))
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    fn start<W, F>(label: &'static str, root: PathBuf, make: F) -> Result<Self>
    where
        W: Watcher + Send + 'static,
        F: FnOnce(Box<dyn FnMut(notify::Result<Event>) + Send>) -> notify::Result<W>,
    {
        if !root.is_absolute() {
            return Err(WatchError::InvalidArgument(format!(
                "watch root must be absolute: {}",
                root.display()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let handler_tx = tx.clone();
        let handler: Box<dyn FnMut(notify::Result<Event>) + Send> = Box::new(move |res| match res {
            Ok(event) => {
                for path in relevant_paths(&event) {
                    // Receiver gone means the session is over.
                    let _ = handler_tx.send(BackendEvent::Change(path));
                }
            }
            Err(err) => {
                let _ = handler_tx.send(BackendEvent::Error(err.to_string()));
            }
        });

        let mut watcher =
            make(handler).map_err(|e| WatchError::WatchBackend(format!("{label} watcher: {e}")))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::WatchBackend(format!("watching {}: {e}", root.display())))?;

        info!(backend = label, root = %root.display(), "file watcher started");
        let _ = tx.send(BackendEvent::Ready);

        Ok(Self {
            label,
            root,
            watcher: Some(Box::new(watcher)),
            events: Some(rx),
        })
    }
}

impl WatchBackend for NotifyWatcher {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events.take()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(mut watcher) = self.watcher.take() {
                if let Err(err) = watcher.unwatch(&self.root) {
                    debug!(backend = self.label, error = %err, "unwatch failed during close");
                }
                drop(watcher);
                info!(backend = self.label, "file watcher closed");
            }
            Ok(())
        })
    }
}

/// Pick a backend for `root`.
///
/// `Auto` uses the native watcher unless the platform only offers polling,
/// and falls back to polling if the native watcher cannot be started (for
/// example when the inotify watch limit is exhausted).
pub fn select_backend(root: &Path, choice: BackendChoice) -> Result<NotifyWatcher> {
    match choice {
        BackendChoice::Native => NotifyWatcher::native(root),
        BackendChoice::Poll => NotifyWatcher::polling(root, DEFAULT_POLL_INTERVAL),
        BackendChoice::Auto => {
            if RecommendedWatcher::kind() == WatcherKind::PollWatcher {
                return NotifyWatcher::polling(root, DEFAULT_POLL_INTERVAL);
            }
            NotifyWatcher::native(root).or_else(|err| {
                warn!(error = %err, "native watcher unavailable; falling back to polling");
                NotifyWatcher::polling(root, DEFAULT_POLL_INTERVAL)
            })
        }
    }
}

/// File paths of an event worth reacting to.
fn relevant_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            return Vec::new();
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {}
        EventKind::Access(_) => return Vec::new(),
        _ => {}
    }

    event
        .paths
        .iter()
        .filter(|p| p.is_absolute() && !p.is_dir())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, ModifyKind};

    #[test]
    fn drops_directory_and_read_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).expect("mkdir");

        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub.clone());
        assert!(relevant_paths(&folder).is_empty());

        let modified_dir =
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(sub);
        assert!(relevant_paths(&modified_dir).is_empty());

        let file = dir.path().join("a.txt");
        let read = Event::new(EventKind::Access(AccessKind::Read)).add_path(file.clone());
        assert!(relevant_paths(&read).is_empty());

        let closed = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
            .add_path(file.clone());
        assert_eq!(relevant_paths(&closed), vec![file]);
    }

    #[test]
    fn keeps_removed_files() {
        let path = PathBuf::from("/definitely/not/here.txt");
        let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert_eq!(relevant_paths(&event), vec![path]);
    }
}
