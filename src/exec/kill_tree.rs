// src/exec/kill_tree.rs

//! Process-tree termination.
//!
//! Signals a root process and every transitive descendant, first gracefully
//! (SIGTERM) and then forcefully (SIGKILL) once the grace period runs out,
//! polling until every process in the tree is gone.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use anyhow::anyhow;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::errors::Result;

/// Default time a process tree gets to exit after the graceful signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Graceful,
    Forceful,
}

/// Terminate `root_pid` and all of its descendants.
///
/// Resolves once every process of the original tree has exited, whether it
/// did so after the graceful signal or had to be killed.
pub async fn terminate(root_pid: u32, grace_period: Duration) -> Result<()> {
    let pids = tokio::task::spawn_blocking(move || process_tree(root_pid))
        .await
        .map_err(|e| anyhow!("enumerating process tree of {root_pid}: {e}"))?;

    debug!(root = root_pid, ?pids, "terminating process tree");

    for pid in &pids {
        send_signal(*pid, StopSignal::Graceful)?;
    }

    let deadline = Instant::now() + grace_period;
    let mut hanging = pids;
    let mut forced = false;

    loop {
        hanging = still_alive(hanging).await?;
        if hanging.is_empty() {
            break;
        }

        if !forced && Instant::now() >= deadline {
            warn!(?hanging, "grace period elapsed; sending SIGKILL to processes");
            for pid in &hanging {
                send_signal(*pid, StopSignal::Forceful)?;
            }
            forced = true;
        }

        sleep(POLL_INTERVAL).await;
    }

    debug!(root = root_pid, "all processes terminated");
    Ok(())
}

/// Collect `root_pid` plus every transitive child, root first.
pub fn process_tree(root_pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    let mut tree = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root_pid]);

    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }

    tree
}

/// Returns true if `pid` names a running (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    system
        .process(sys_pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

async fn still_alive(pids: Vec<u32>) -> Result<Vec<u32>> {
    let alive = tokio::task::spawn_blocking(move || {
        pids.into_iter().filter(|pid| is_alive(*pid)).collect::<Vec<_>>()
    })
    .await
    .map_err(|e| anyhow!("polling process liveness: {e}"))?;
    Ok(alive)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid as NixPid;

    use crate::errors::WatchError;

    let sig = match signal {
        StopSignal::Graceful => Signal::SIGTERM,
        StopSignal::Forceful => Signal::SIGKILL,
    };

    match kill(NixPid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(()),
        // Already gone.
        Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(WatchError::ProcessSignal { pid, source }),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    if let Some(process) = system.process(sys_pid) {
        let sent = match signal {
            StopSignal::Graceful => process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill()),
            StopSignal::Forceful => process.kill(),
        };
        if !sent {
            debug!(pid, ?signal, "signal was not delivered; process may have exited");
        }
    }
    Ok(())
}
