//! Scriptable routines that record every invocation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use watchrun::engine::{BoxFuture, ChangeContext, Routine};
use watchrun::errors::WatchError;
use watchrun::types::ChangeEvent;

/// What a [`FakeRoutine`] does when called.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Return `Ok` right away.
    Succeed,
    /// Fail the first `n` invocations, then succeed.
    FailTimes(u32),
    /// Fail every invocation.
    AlwaysFail,
    /// Block until cancelled, then report the abort.
    WaitForCancel,
    /// Block until [`RoutineProbe::release`] hands out a permit or the task
    /// is cancelled; returns `Ok` either way.
    Gate,
    /// Sleep for the given time without looking at the cancellation token.
    Sleep(Duration),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub task_id: String,
    pub files: Vec<ChangeEvent>,
    pub attempt: u32,
    pub first: bool,
}

struct ProbeInner {
    calls: Mutex<Vec<Call>>,
    changed: Notify,
    running: AtomicUsize,
    max_running: AtomicUsize,
    finished: AtomicUsize,
    gate: Semaphore,
}

impl Default for ProbeInner {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            changed: Notify::new(),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

/// Observation side of a [`FakeRoutine`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct RoutineProbe {
    inner: Arc<ProbeInner>,
}

impl RoutineProbe {
    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    /// Invocations that have returned (successfully or not).
    pub fn finished_count(&self) -> usize {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Highest number of invocations that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_running.load(Ordering::SeqCst)
    }

    /// Let one gated invocation finish.
    pub fn release(&self) {
        self.inner.gate.add_permits(1);
    }

    /// Wait until at least `n` invocations have started.
    pub async fn wait_for_calls(&self, n: usize) {
        self.wait_until(|p| p.call_count() >= n).await;
    }

    /// Wait until at least `n` invocations have returned.
    pub async fn wait_for_finished(&self, n: usize) {
        self.wait_until(|p| p.finished_count() >= n).await;
    }

    async fn wait_until(&self, cond: impl Fn(&Self) -> bool) {
        loop {
            let notified = self.inner.changed.notified();
            if cond(self) {
                return;
            }
            // Guard against missed wake-ups from concurrent updates.
            let _ = tokio::time::timeout(Duration::from_millis(50), notified).await;
        }
    }

    fn enter(&self, ctx: &ChangeContext) {
        self.inner.calls.lock().unwrap().push(Call {
            task_id: ctx.task_id.clone(),
            files: ctx.files.clone(),
            attempt: ctx.attempt,
            first: ctx.first,
        });
        let running = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_running.fetch_max(running, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }

    fn exit(&self) {
        self.inner.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.finished.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }
}

/// A routine driven by a [`Behaviour`], reporting to a [`RoutineProbe`].
#[derive(Clone)]
pub struct FakeRoutine {
    behaviour: Behaviour,
    probe: RoutineProbe,
}

impl FakeRoutine {
    pub fn new(behaviour: Behaviour) -> (Self, RoutineProbe) {
        let probe = RoutineProbe::default();
        (
            Self {
                behaviour,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl Routine for FakeRoutine {
    fn call(&self, ctx: ChangeContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let behaviour = self.behaviour;
        let probe = self.probe.clone();

        Box::pin(async move {
            probe.enter(&ctx);
            let invocation = probe.call_count() as u32;

            let result = match behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::FailTimes(n) if invocation <= n => {
                    Err(anyhow::anyhow!("scripted failure {invocation}"))
                }
                Behaviour::FailTimes(_) => Ok(()),
                Behaviour::AlwaysFail => Err(anyhow::anyhow!("always fails")),
                Behaviour::WaitForCancel => {
                    ctx.cancel.cancelled().await;
                    Err(WatchError::Aborted.into())
                }
                Behaviour::Gate => {
                    tokio::select! {
                        permit = probe.inner.gate.acquire() => {
                            if let Ok(permit) = permit {
                                permit.forget();
                            }
                        }
                        _ = ctx.cancel.cancelled() => {}
                    }
                    Ok(())
                }
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
            };

            probe.exit();
            result
        })
    }
}
