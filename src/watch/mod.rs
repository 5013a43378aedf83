// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - the backend contract and the `notify`-based native and polling backends;
//! - debouncing raw changes into batches and routing them to triggers;
//! - (optionally) content hashing to drop changes that did not alter a file.
//!
//! It does **not** know how triggers schedule their work; it only hands
//! matching changes to a [`ChangeSubscriber`].

pub mod backend;
pub mod hash;
pub mod paths;
pub mod queue;
pub mod watcher;

pub use backend::{BackendEvent, WatchBackend};
pub use hash::compute_file_hash;
pub use queue::{ChangeQueue, ChangeSubscriber, DEFAULT_DEBOUNCE, QueueOptions};
pub use watcher::{DEFAULT_POLL_INTERVAL, NotifyWatcher, select_backend};
