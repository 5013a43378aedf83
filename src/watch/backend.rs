// src/watch/backend.rs

//! The contract every filesystem watcher implementation fulfils.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::engine::routine::BoxFuture;
use crate::errors::Result;

/// Notifications emitted by a watch backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Initial setup finished. Emitted exactly once, before any `Change`
    /// that is relevant to the watch session.
    Ready,
    /// A file (never a bare directory) changed. Always an absolute path.
    Change(PathBuf),
    /// The backend hit an error it cannot recover from.
    Error(String),
}

/// A filesystem watcher driving a watch session.
///
/// Events flow through a single channel, handed out once via
/// [`WatchBackend::take_events`]. `close` stops all OS watch handles; calling
/// it more than once is a no-op.
pub trait WatchBackend: Send {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<BackendEvent>>;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}
