// src/exec/spawn.rs

//! Subprocess spawning bound to a task's cancellation token.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, WatchError};
use crate::exec::kill_tree::{self, DEFAULT_GRACE_PERIOD};

/// Spawns shell commands on behalf of one task invocation.
///
/// Every process started through a `Spawner` is tied to its cancellation
/// token: once the token fires, the whole process tree is terminated and
/// [`Spawner::run`] fails with [`WatchError::Aborted`].
#[derive(Debug, Clone)]
pub struct Spawner {
    task_id: String,
    cancel: CancellationToken,
    grace_period: Duration,
}

impl Spawner {
    pub fn new(task_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            task_id: task_id.into(),
            cancel,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Run `command` through the platform shell and wait for it to exit.
    ///
    /// Output lines are forwarded prefixed with the task id. A non-zero exit
    /// code fails with [`WatchError::ProcessExit`].
    pub async fn run(&self, command: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(WatchError::Aborted);
        }

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning '{command}' for task {}", self.task_id))?;

        debug!(task = %self.task_id, pid = ?child.id(), cmd = %command, "spawned process");

        if let Some(stdout) = child.stdout.take() {
            let prefix = self.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    println!("{prefix} > {line}");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let prefix = self.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    eprintln!("{prefix} > {line}");
                }
            });
        }

        tokio::select! {
            status_res = child.wait() => {
                let status = status_res
                    .with_context(|| format!("waiting for '{command}' of task {}", self.task_id))?;

                if status.success() {
                    return Ok(());
                }

                let code = status.code().unwrap_or(-1);
                error!(task = %self.task_id, exit_code = code, "task exited with an error");
                Err(WatchError::ProcessExit { code })
            }

            _ = self.cancel.cancelled() => {
                info!(task = %self.task_id, "cancellation requested; terminating process tree");

                if let Some(pid) = child.id() {
                    kill_tree::terminate(pid, self.grace_period).await?;
                }

                // Reap the root so it does not linger as a zombie.
                if let Err(e) = child.wait().await {
                    warn!(task = %self.task_id, error = %e, "failed to reap terminated process");
                }

                Err(WatchError::Aborted)
            }
        }
    }
}
