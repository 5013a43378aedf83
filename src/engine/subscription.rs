// src/engine/subscription.rs

//! Per-trigger task scheduling.
//!
//! A [`Subscription`] owns the lifecycle of one trigger's routine
//! invocations. At most one task is active at any time:
//!
//! - interruptible triggers cancel the running task and start a replacement
//!   once the cancellation has been observed;
//! - non-interruptible triggers queue at most one follow-up run behind the
//!   active task, coalescing any further triggers into it;
//! - persistent triggers ignore external triggers while their routine loops.
//!
//! Changes passed to [`Subscription::trigger`] accumulate until the next task
//! starts, so nothing is lost while waiting for a busy task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{OnceCell, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::routine::ChangeContext;
use crate::engine::trigger::Trigger;
use crate::errors::{Result, WatchError, is_abort_error};
use crate::exec::{DEFAULT_GRACE_PERIOD, Spawner};
use crate::expression::Expression;
use crate::types::{ChangeEvent, generate_short_id, merge_changes};
use crate::watch::ChangeSubscriber;

/// How a task invocation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Stopped by cancellation; never counted as a failure.
    Aborted,
    /// Retries exhausted; carries the last error.
    Failed(String),
}

type DoneRx = watch::Receiver<Option<TaskOutcome>>;

/// Handle to a started task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: String,
    trigger: String,
    done: DoneRx,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task to settle.
    pub async fn outcome(mut self) -> TaskOutcome {
        wait_done(&mut self.done).await
    }

    /// Wait for the task to settle, surfacing exhausted retries as an error.
    pub async fn wait(self) -> Result<()> {
        let trigger = self.trigger.clone();
        match self.outcome().await {
            TaskOutcome::Failed(message) => Err(WatchError::Routine { trigger, message }),
            TaskOutcome::Completed | TaskOutcome::Aborted => Ok(()),
        }
    }
}

struct ActiveTask {
    id: String,
    cancel: CancellationToken,
    done: DoneRx,
    /// A non-interruptible follow-up is already waiting for this task.
    queued: bool,
}

#[derive(Default)]
struct SchedulerState {
    active: Option<ActiveTask>,
    pending: Vec<ChangeEvent>,
    torn_down: bool,
}

enum Admission {
    Started(TaskHandle),
    Ignored,
    /// Wait for the active task to settle, then try to start.
    AwaitSlot(DoneRx),
}

struct Inner {
    trigger: Trigger,
    cancel: CancellationToken,
    kill_grace: Duration,
    first: AtomicBool,
    state: Mutex<SchedulerState>,
    teardown: OnceCell<()>,
}

/// Runtime scheduler for one [`Trigger`].
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("trigger", &self.inner.trigger.name)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Create a subscription whose tasks are cancelled when `cancel` fires.
    ///
    /// `cancel` is normally a child of the watch-wide shutdown token.
    pub fn new(trigger: Trigger, cancel: CancellationToken) -> Self {
        Self::with_kill_grace(trigger, cancel, DEFAULT_GRACE_PERIOD)
    }

    pub fn with_kill_grace(trigger: Trigger, cancel: CancellationToken, kill_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                trigger,
                cancel,
                kill_grace,
                first: AtomicBool::new(true),
                state: Mutex::new(SchedulerState::default()),
                teardown: OnceCell::new(),
            }),
        }
    }

    pub fn trigger_config(&self) -> &Trigger {
        &self.inner.trigger
    }

    /// Id of the currently active task, if any.
    pub fn active_task_id(&self) -> Option<String> {
        self.lock_state().active.as_ref().map(|a| a.id.clone())
    }

    /// Request a routine run for `files`.
    ///
    /// Returns the handle of the task that was started on behalf of this
    /// call, or `None` if the call was coalesced into another task, ignored
    /// because a persistent routine is looping, or arrived after teardown.
    pub async fn trigger(&self, files: Vec<ChangeEvent>) -> Option<TaskHandle> {
        match self.admit(files) {
            Admission::Started(handle) => Some(handle),
            Admission::Ignored => None,
            Admission::AwaitSlot(mut done) => {
                wait_done(&mut done).await;
                self.start_after_wait()
            }
        }
    }

    /// Wait until no task is active.
    pub async fn wait_idle(&self) {
        loop {
            let done = self.lock_state().active.as_ref().map(|a| a.done.clone());
            match done {
                Some(mut done) => {
                    wait_done(&mut done).await;
                }
                None => return,
            }
        }
    }

    /// Cancel any active task, wait for it, then run the teardown routine.
    ///
    /// Idempotent: the teardown routine runs at most once, even when called
    /// concurrently. Teardown errors are logged, never returned.
    pub async fn teardown(&self) {
        self.inner.teardown.get_or_init(|| self.run_teardown()).await;
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self, state: &SchedulerState) -> bool {
        state.torn_down || self.inner.cancel.is_cancelled()
    }

    /// Synchronous half of [`Subscription::trigger`]: record the changes and
    /// decide what to do about the active task.
    fn admit(&self, files: Vec<ChangeEvent>) -> Admission {
        let trigger = &self.inner.trigger;
        let mut state = self.lock_state();

        if self.is_closed(&state) {
            debug!(trigger = %trigger.name, "subscription is shutting down; ignoring trigger");
            return Admission::Ignored;
        }

        merge_changes(&mut state.pending, files);

        let Some(active) = state.active.as_mut() else {
            return Admission::Started(self.start_task(&mut state));
        };

        if trigger.persistent {
            debug!(
                trigger = %trigger.name,
                task = %active.id,
                "persistent task is running; ignoring trigger"
            );
            return Admission::Ignored;
        }

        if trigger.interruptible {
            warn!(trigger = %trigger.name, task = %active.id, "aborting task");
            active.cancel.cancel();
            return Admission::AwaitSlot(active.done.clone());
        }

        if active.queued {
            debug!(
                trigger = %trigger.name,
                task = %active.id,
                "follow-up run already queued; coalescing trigger"
            );
            return Admission::Ignored;
        }

        active.queued = true;
        warn!(trigger = %trigger.name, task = %active.id, "waiting for task to complete");
        Admission::AwaitSlot(active.done.clone())
    }

    fn start_after_wait(&self) -> Option<TaskHandle> {
        let mut state = self.lock_state();
        if self.is_closed(&state) {
            return None;
        }
        if state.active.is_some() {
            // Someone else started a task after our changes were recorded,
            // so that task already carries them.
            return None;
        }
        Some(self.start_task(&mut state))
    }

    fn start_task(&self, state: &mut SchedulerState) -> TaskHandle {
        let files = std::mem::take(&mut state.pending);
        let id = generate_short_id();
        let cancel = self.inner.cancel.child_token();
        let first = self.inner.first.swap(false, Ordering::SeqCst);
        let (done_tx, done_rx) = watch::channel(None);

        state.active = Some(ActiveTask {
            id: id.clone(),
            cancel: cancel.clone(),
            done: done_rx.clone(),
            queued: false,
        });

        info!(
            trigger = %self.inner.trigger.name,
            task = %id,
            files = files.len(),
            first,
            "started task"
        );

        let this = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            this.run_task(task_id, files, first, cancel, done_tx).await;
        });

        TaskHandle {
            id,
            trigger: self.inner.trigger.name.clone(),
            done: done_rx,
        }
    }

    async fn run_task(
        self,
        id: String,
        files: Vec<ChangeEvent>,
        first: bool,
        cancel: CancellationToken,
        done_tx: watch::Sender<Option<TaskOutcome>>,
    ) {
        let name = self.inner.trigger.name.clone();

        // Panics are already caught per attempt; this only guards the
        // scheduler bookkeeping around them.
        let runner = {
            let this = self.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_with_retry(&id, files, first, &cancel).await })
        };

        let outcome = match runner.await {
            Ok(outcome) => outcome,
            Err(err) => TaskOutcome::Failed(format!("task panicked: {err}")),
        };

        match &outcome {
            TaskOutcome::Completed => info!(trigger = %name, task = %id, "completed task"),
            TaskOutcome::Aborted => info!(trigger = %name, task = %id, "task stopped after cancellation"),
            TaskOutcome::Failed(message) => error!(
                trigger = %name,
                task = %id,
                error = %message,
                "task failed"
            ),
        }

        {
            let mut state = self.lock_state();
            if state.active.as_ref().is_some_and(|a| a.id == id) {
                state.active = None;
            }
        }

        done_tx.send_replace(Some(outcome));
    }

    /// Invoke the routine, retrying according to the trigger's policy.
    ///
    /// Persistent triggers restart after every exit, clean or not, until
    /// cancelled.
    async fn run_with_retry(
        &self,
        id: &str,
        files: Vec<ChangeEvent>,
        first: bool,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let trigger = &self.inner.trigger;
        let policy = &trigger.retry;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return TaskOutcome::Aborted;
            }

            let ctx = ChangeContext {
                task_id: id.to_string(),
                trigger: trigger.name.clone(),
                files: files.clone(),
                attempt,
                first,
                cancel: cancel.clone(),
                spawn: Spawner::new(id, cancel.clone()).with_grace_period(self.inner.kill_grace),
            };

            // Each attempt runs in its own task so a panicking routine counts
            // as a failed attempt instead of ending the retry loop.
            let routine = Arc::clone(&trigger.on_change);
            let result = match tokio::spawn(async move { routine.call(ctx).await }).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(anyhow!("routine panicked: {err}")),
                Err(err) => Err(anyhow!("routine task failed: {err}")),
            };

            if cancel.is_cancelled() {
                debug!(trigger = %trigger.name, task = %id, attempt, "routine observed cancellation");
                return TaskOutcome::Aborted;
            }

            match result {
                Ok(()) if !trigger.persistent => return TaskOutcome::Completed,
                Ok(()) => {
                    info!(trigger = %trigger.name, task = %id, attempt, "persistent routine exited; restarting");
                }
                Err(err) if is_abort_error(&err) => return TaskOutcome::Aborted,
                Err(err) if trigger.persistent => {
                    warn!(
                        trigger = %trigger.name,
                        task = %id,
                        attempt,
                        error = %format!("{err:#}"),
                        "persistent routine failed; restarting"
                    );
                }
                Err(err) => {
                    if attempt >= policy.max_retries {
                        return TaskOutcome::Failed(format!("{err:#}"));
                    }
                    warn!(
                        trigger = %trigger.name,
                        task = %id,
                        attempt,
                        error = %format!("{err:#}"),
                        "retrying task"
                    );
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = policy.delay_for(attempt);

            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancel.cancelled() => return TaskOutcome::Aborted,
            }
        }
    }

    async fn run_teardown(&self) {
        let trigger = &self.inner.trigger;

        let done = {
            let mut state = self.lock_state();
            state.torn_down = true;
            state.pending.clear();
            state.active.as_ref().map(|active| {
                debug!(trigger = %trigger.name, task = %active.id, "cancelling task for teardown");
                active.cancel.cancel();
                active.done.clone()
            })
        };

        if let Some(mut done) = done {
            wait_done(&mut done).await;
        }

        let Some(routine) = trigger.on_teardown.as_ref() else {
            return;
        };

        // The subscription token is usually already cancelled at this point;
        // teardown gets its own.
        let id = generate_short_id();
        let cancel = CancellationToken::new();
        let ctx = ChangeContext {
            task_id: id.clone(),
            trigger: trigger.name.clone(),
            files: Vec::new(),
            attempt: 0,
            first: false,
            cancel: cancel.clone(),
            spawn: Spawner::new(id.clone(), cancel).with_grace_period(self.inner.kill_grace),
        };

        info!(trigger = %trigger.name, task = %id, "running teardown routine");
        if let Err(err) = routine.call(ctx).await {
            error!(
                trigger = %trigger.name,
                task = %id,
                error = %format!("{err:#}"),
                "teardown routine failed"
            );
        }
    }
}

impl ChangeSubscriber for Subscription {
    fn name(&self) -> &str {
        &self.inner.trigger.name
    }

    fn expression(&self) -> &Expression {
        &self.inner.trigger.expression
    }

    /// Record the changes synchronously (so delivery order is preserved) and
    /// only defer the part that has to wait for a busy task.
    fn deliver(&self, events: Vec<ChangeEvent>) {
        if let Admission::AwaitSlot(mut done) = self.admit(events) {
            let this = self.clone();
            tokio::spawn(async move {
                wait_done(&mut done).await;
                this.start_after_wait();
            });
        }
    }
}

async fn wait_done(done: &mut DoneRx) -> TaskOutcome {
    match done.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(TaskOutcome::Aborted),
        // The task is gone without reporting; nothing left to wait for.
        Err(_) => TaskOutcome::Aborted,
    }
}
