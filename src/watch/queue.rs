// src/watch/queue.rs

//! Debounced change batching and fan-out to subscribers.
//!
//! Every change pushed into the [`ChangeQueue`] restarts the debounce timer.
//! When the timer fires, the batch is deduplicated by path (last event wins),
//! optionally filtered by content hash, and each subscriber receives the
//! subset of changes its expression matches.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::expression::Expression;
use crate::types::{ChangeEvent, deduplicate_changes};
use crate::watch::hash::hash_file;
use crate::watch::paths::relative_str;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1_000);

/// Something that wants to hear about matching changes.
///
/// `deliver` must not block: it is called from the queue's worker task.
pub trait ChangeSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn expression(&self) -> &Expression;
    fn deliver(&self, events: Vec<ChangeEvent>);
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub debounce: Duration,
    /// Compute content hashes and drop changes whose content is unchanged.
    pub use_hash: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            use_hash: false,
        }
    }
}

/// Items travel to the worker in arrival order. Hashes are computed
/// concurrently but applied in that same order, so a slow hash of an older
/// event can never overwrite the result of a newer one.
enum Incoming {
    Ready(ChangeEvent),
    Hashing {
        path: PathBuf,
        arrived: Instant,
        hash: JoinHandle<Option<String>>,
    },
}

/// Handle to the debounce worker. Cheap to clone.
#[derive(Clone)]
pub struct ChangeQueue {
    tx: mpsc::UnboundedSender<Incoming>,
    use_hash: bool,
}

impl std::fmt::Debug for ChangeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeQueue")
            .field("use_hash", &self.use_hash)
            .finish_non_exhaustive()
    }
}

impl ChangeQueue {
    /// Start the worker. It stops when `shutdown` is cancelled; a batch that
    /// is still waiting for its debounce window at that point is dropped.
    pub fn spawn(
        project: PathBuf,
        options: QueueOptions,
        subscribers: Vec<Arc<dyn ChangeSubscriber>>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let use_hash = options.use_hash;

        let worker = QueueWorker {
            project,
            debounce: options.debounce,
            subscribers,
            shutdown,
            pending: Vec::new(),
            known_hashes: HashMap::new(),
        };
        tokio::spawn(worker.run(rx));

        Self { tx, use_hash }
    }

    /// Record a change reported by the backend.
    pub fn push(&self, event: ChangeEvent) {
        let item = if self.use_hash && event.hash.is_none() {
            let path = event.path.clone();
            let hash = tokio::spawn(hash_file(path.clone()));
            Incoming::Hashing {
                path,
                arrived: Instant::now(),
                hash,
            }
        } else {
            Incoming::Ready(event)
        };

        if self.tx.send(item).is_err() {
            debug!("change queue stopped; dropping change");
        }
    }
}

struct QueueWorker {
    project: PathBuf,
    debounce: Duration,
    subscribers: Vec<Arc<dyn ChangeSubscriber>>,
    shutdown: CancellationToken,
    pending: Vec<ChangeEvent>,
    /// Last content hash seen per path, for the lifetime of the queue.
    known_hashes: HashMap<PathBuf, String>,
}

impl QueueWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Incoming>) {
        let mut deadline: Option<Instant> = None;
        // Items queued behind a hash that is still being computed.
        let mut inflight: VecDeque<Incoming> = VecDeque::new();

        loop {
            let hashing = matches!(inflight.front(), Some(Incoming::Hashing { .. }));

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                hash = next_hash(&mut inflight), if hashing => {
                    if let Some(Incoming::Hashing { path, arrived, .. }) = inflight.pop_front() {
                        self.pending.push(ChangeEvent { path, hash });
                        let due = arrived + self.debounce;
                        deadline = Some(deadline.map_or(due, |d| d.max(due)));
                    }
                    self.drain_ready(&mut inflight);
                }

                item = rx.recv() => {
                    let Some(item) = item else { break };
                    deadline = Some(Instant::now() + self.debounce);
                    match item {
                        Incoming::Ready(event) if inflight.is_empty() => self.pending.push(event),
                        item => inflight.push_back(item),
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush();
                }
            }
        }

        let undelivered = self.pending.len() + inflight.len();
        if undelivered > 0 {
            debug!(dropped = undelivered, "change queue stopped with undelivered changes");
        }
    }

    /// Move events that no longer wait on an earlier hash into the batch.
    fn drain_ready(&mut self, inflight: &mut VecDeque<Incoming>) {
        while let Some(Incoming::Ready(_)) = inflight.front() {
            if let Some(Incoming::Ready(event)) = inflight.pop_front() {
                self.pending.push(event);
            }
        }
    }

    fn flush(&mut self) {
        let batch = deduplicate_changes(std::mem::take(&mut self.pending));
        if batch.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        let batch: Vec<ChangeEvent> = batch
            .into_iter()
            .filter(|event| self.content_changed(event))
            .collect();
        if batch.is_empty() {
            debug!("all changes in batch had unchanged content");
            return;
        }

        // Resolve relative paths once per batch.
        let relative: Vec<(String, &ChangeEvent)> = batch
            .iter()
            .filter_map(|event| match relative_str(&self.project, &event.path) {
                Some(rel) => Some((rel, event)),
                None => {
                    debug!(path = %event.path.display(), "change outside project; ignoring");
                    None
                }
            })
            .collect();

        for subscriber in &self.subscribers {
            let matched: Vec<ChangeEvent> = relative
                .iter()
                .filter(|(rel, _)| match subscriber.expression().evaluate(rel) {
                    Ok(hit) => hit,
                    Err(err) => {
                        warn!(trigger = subscriber.name(), path = %rel, error = %err, "expression evaluation failed");
                        false
                    }
                })
                .map(|(_, event)| (*event).clone())
                .collect();

            if matched.is_empty() {
                continue;
            }

            debug!(trigger = subscriber.name(), files = matched.len(), "delivering changes");
            subscriber.deliver(matched);
        }
    }

    /// Unknown hashes always count as a change. A matching hash leaves the
    /// stored value untouched; a different one replaces it.
    fn content_changed(&mut self, event: &ChangeEvent) -> bool {
        let Some(hash) = &event.hash else {
            return true;
        };
        match self.known_hashes.get(&event.path) {
            Some(known) if known == hash => {
                debug!(path = %event.path.display(), "content unchanged; suppressing");
                false
            }
            _ => {
                self.known_hashes.insert(event.path.clone(), hash.clone());
                true
            }
        }
    }
}

/// Resolves with the hash at the head of `inflight`. The handle stays in
/// place, so dropping this future loses nothing.
async fn next_hash(inflight: &mut VecDeque<Incoming>) -> Option<String> {
    match inflight.front_mut() {
        Some(Incoming::Hashing { hash, .. }) => hash.await.ok().flatten(),
        _ => None,
    }
}
