// src/engine/routine.rs

//! The user-supplied work a trigger runs.
//!
//! A [`Routine`] receives a [`ChangeContext`] per invocation. Routines are
//! expected to watch `ctx.cancel` and return promptly once it fires; any
//! subprocess started through `ctx.spawn` is terminated automatically.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::exec::Spawner;
use crate::types::ChangeEvent;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a routine gets to know about one invocation.
#[derive(Debug, Clone)]
pub struct ChangeContext {
    /// Short id of this task invocation.
    pub task_id: String,
    /// Name of the trigger the invocation belongs to.
    pub trigger: String,
    /// Deduplicated changes that caused this invocation. Empty for the
    /// initial run.
    pub files: Vec<ChangeEvent>,
    /// Attempt number, starting at 0.
    pub attempt: u32,
    /// True only for the very first invocation of the trigger.
    pub first: bool,
    pub cancel: CancellationToken,
    pub spawn: Spawner,
}

/// Work executed when a trigger fires (or when it is torn down).
pub trait Routine: Send + Sync {
    fn call(&self, ctx: ChangeContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> Routine for F
where
    F: Fn(ChangeContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, ctx: ChangeContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(ctx))
    }
}

/// Routine that runs a shell command through the context's spawner.
#[derive(Debug, Clone)]
pub struct CommandRoutine {
    command: String,
}

impl CommandRoutine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Routine for CommandRoutine {
    fn call(&self, ctx: ChangeContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let command = self.command.clone();
        Box::pin(async move {
            ctx.spawn.run(&command).await?;
            Ok(())
        })
    }
}
