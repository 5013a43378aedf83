use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use watchrun::engine::BoxFuture;
use watchrun::errors::Result;
use watchrun::watch::{BackendEvent, WatchBackend};

/// A watch backend whose events are injected by the test.
pub struct FakeBackend {
    events: Option<mpsc::UnboundedReceiver<BackendEvent>>,
    closes: Arc<AtomicUsize>,
}

/// Test side of a [`FakeBackend`].
#[derive(Clone)]
pub struct FakeBackendHandle {
    tx: mpsc::UnboundedSender<BackendEvent>,
    closes: Arc<AtomicUsize>,
}

pub fn fake_backend() -> (FakeBackend, FakeBackendHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        FakeBackend {
            events: Some(rx),
            closes: Arc::clone(&closes),
        },
        FakeBackendHandle { tx, closes },
    )
}

impl FakeBackendHandle {
    pub fn ready(&self) {
        let _ = self.tx.send(BackendEvent::Ready);
    }

    pub fn change(&self, path: impl Into<PathBuf>) {
        let _ = self.tx.send(BackendEvent::Change(path.into()));
    }

    pub fn error(&self, message: &str) {
        let _ = self.tx.send(BackendEvent::Error(message.to_string()));
    }

    /// How many times the orchestrator called `close`.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl WatchBackend for FakeBackend {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events.take()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
