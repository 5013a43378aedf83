// src/engine/orchestrator.rs

//! Watch session wiring: backend -> change queue -> subscriptions.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OnceCell, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::subscription::Subscription;
use crate::engine::trigger::{Trigger, validate_triggers};
use crate::errors::{Result, WatchError};
use crate::exec::DEFAULT_GRACE_PERIOD;
use crate::types::ChangeEvent;
use crate::watch::{
    BackendEvent, ChangeQueue, ChangeSubscriber, DEFAULT_DEBOUNCE, QueueOptions, WatchBackend,
};

/// Everything needed to start a watch session.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Absolute project root. Expressions match paths relative to it.
    pub project: PathBuf,
    pub debounce: Duration,
    pub use_hash: bool,
    /// Grace period granted to subprocess trees before they are killed.
    pub kill_grace: Duration,
    pub triggers: Vec<Trigger>,
}

impl WatchConfig {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            debounce: DEFAULT_DEBOUNCE,
            use_hash: false,
            kill_grace: DEFAULT_GRACE_PERIOD,
            triggers: Vec::new(),
        }
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn use_hash(mut self, use_hash: bool) -> Self {
        self.use_hash = use_hash;
        self
    }

    pub fn kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }
}

struct WatchInner {
    backend: Mutex<Option<Box<dyn WatchBackend>>>,
    subscriptions: Vec<Subscription>,
    shutdown_token: CancellationToken,
    stopped: CancellationToken,
    shutdown_once: OnceCell<()>,
}

/// A running watch session.
#[derive(Clone)]
pub struct Watch {
    inner: Arc<WatchInner>,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("subscriptions", &self.inner.subscriptions)
            .field("stopped", &self.inner.stopped.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Start watching.
///
/// Resolves once the backend reported `Ready` and initial runs were
/// requested. Fails with `InvalidArgument`/`InvalidExpression` for bad
/// configuration, and with `WatchBackend` if the backend errors (or goes
/// away) before becoming ready. The backend is closed on every error path.
pub async fn start_watch(config: WatchConfig, backend: impl WatchBackend + 'static) -> Result<Watch> {
    let mut backend: Box<dyn WatchBackend> = Box::new(backend);

    if let Err(err) = check_config(&config) {
        close_backend(backend.as_mut()).await;
        return Err(err);
    }

    let Some(mut events) = backend.take_events() else {
        close_backend(backend.as_mut()).await;
        return Err(WatchError::WatchBackend(
            "backend event stream was already taken".to_string(),
        ));
    };

    if let Err(err) = wait_ready(&mut events).await {
        close_backend(backend.as_mut()).await;
        return Err(err);
    }

    let shutdown_token = CancellationToken::new();
    let WatchConfig {
        project,
        debounce,
        use_hash,
        kill_grace,
        triggers,
    } = config;

    let subscriptions: Vec<Subscription> = triggers
        .into_iter()
        .map(|trigger| Subscription::with_kill_grace(trigger, shutdown_token.child_token(), kill_grace))
        .collect();

    let subscribers: Vec<Arc<dyn ChangeSubscriber>> = subscriptions
        .iter()
        .map(|s| Arc::new(s.clone()) as Arc<dyn ChangeSubscriber>)
        .collect();

    let queue = ChangeQueue::spawn(
        project.clone(),
        QueueOptions { debounce, use_hash },
        subscribers,
        shutdown_token.clone(),
    );

    for subscription in &subscriptions {
        if subscription.trigger_config().initial_run {
            subscription.deliver(Vec::new());
        }
    }

    let watch = Watch {
        inner: Arc::new(WatchInner {
            backend: Mutex::new(Some(backend)),
            subscriptions,
            shutdown_token,
            stopped: CancellationToken::new(),
            shutdown_once: OnceCell::new(),
        }),
    };

    tokio::spawn(pump(watch.clone(), events, queue));

    info!(
        project = %project.display(),
        triggers = watch.inner.subscriptions.len(),
        "watch started"
    );
    Ok(watch)
}

impl Watch {
    /// Stop the session: close the backend, cancel everything, wait for
    /// running tasks, then tear every subscription down in turn.
    ///
    /// Safe to call any number of times, concurrently or not. Every call
    /// resolves once the session has fully stopped.
    pub async fn shutdown(&self) {
        self.inner
            .shutdown_once
            .get_or_init(|| self.run_shutdown())
            .await;
    }

    /// Resolves once the session has stopped, whoever initiated it.
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.is_cancelled()
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.inner.subscriptions
    }

    pub fn subscription(&self, name: &str) -> Option<&Subscription> {
        self.inner
            .subscriptions
            .iter()
            .find(|s| s.trigger_config().name == name)
    }

    async fn run_shutdown(&self) {
        info!("shutting down watch");

        let backend = self
            .inner
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut backend) = backend {
            close_backend(backend.as_mut()).await;
        }

        self.inner.shutdown_token.cancel();

        for subscription in &self.inner.subscriptions {
            subscription.wait_idle().await;
        }
        for subscription in &self.inner.subscriptions {
            subscription.teardown().await;
        }

        self.inner.stopped.cancel();
        info!("watch stopped");
    }
}

fn check_config(config: &WatchConfig) -> Result<()> {
    if !config.project.is_absolute() {
        return Err(WatchError::InvalidArgument(format!(
            "project path must be absolute: {}",
            config.project.display()
        )));
    }
    validate_triggers(&config.triggers)
}

/// Consume events until `Ready`. Changes seen before that are part of the
/// backend's initial scan and are only counted.
async fn wait_ready(events: &mut mpsc::UnboundedReceiver<BackendEvent>) -> Result<()> {
    let mut buffered = 0usize;
    loop {
        match events.recv().await {
            Some(BackendEvent::Ready) => {
                debug!(buffered, "backend ready");
                return Ok(());
            }
            Some(BackendEvent::Change(_)) => buffered += 1,
            Some(BackendEvent::Error(message)) => {
                return Err(WatchError::WatchBackend(message));
            }
            None => {
                return Err(WatchError::WatchBackend(
                    "backend stopped before becoming ready".to_string(),
                ));
            }
        }
    }
}

async fn pump(watch: Watch, mut events: mpsc::UnboundedReceiver<BackendEvent>, queue: ChangeQueue) {
    let shutdown = watch.inner.shutdown_token.clone();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(BackendEvent::Change(path)) => queue.push(ChangeEvent::new(path)),
            Some(BackendEvent::Ready) => warn!("backend reported ready twice; ignoring"),
            Some(BackendEvent::Error(message)) => {
                error!(error = %message, "watch backend failed; shutting down");
                watch.shutdown().await;
                break;
            }
            None => {
                debug!("backend event stream closed");
                break;
            }
        }
    }
}

async fn close_backend(backend: &mut dyn WatchBackend) {
    if let Err(err) = backend.close().await {
        warn!(error = %err, "failed to close watch backend");
    }
}
