#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use watchrun::errors::WatchError;
use watchrun::exec::kill_tree::{is_alive, process_tree, terminate};
use watchrun::exec::Spawner;

type TestResult = Result<(), Box<dyn Error>>;

fn spawn_shell(script: &str) -> std::io::Result<Child> {
    Command::new("sh").arg("-c").arg(script).spawn()
}

/// Wait until the tree under `root` has at least `n` members.
async fn wait_for_tree(root: u32, n: usize) -> Vec<u32> {
    loop {
        let tree = process_tree(root);
        if tree.len() >= n {
            return tree;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn terminates_root_and_descendants() -> TestResult {
    init_tracing();

    let mut child = spawn_shell("sleep 30 & sleep 30 & wait")?;
    let root = child.id();
    let tree = with_timeout(wait_for_tree(root, 3)).await;
    assert_eq!(tree[0], root);

    with_timeout(terminate(root, Duration::from_secs(5))).await?;

    for pid in &tree {
        assert!(!is_alive(*pid), "pid {pid} survived");
    }
    child.wait()?;
    Ok(())
}

#[tokio::test]
async fn kills_processes_that_ignore_sigterm() -> TestResult {
    let mut child = spawn_shell("trap '' TERM; sleep 30 & wait")?;
    let root = child.id();
    let tree = with_timeout(wait_for_tree(root, 2)).await;

    let grace = Duration::from_millis(300);
    let started = Instant::now();
    with_timeout(terminate(root, grace)).await?;
    assert!(started.elapsed() >= grace, "forceful path should wait out the grace period");

    for pid in &tree {
        assert!(!is_alive(*pid), "pid {pid} survived");
    }
    child.wait()?;
    Ok(())
}

#[tokio::test]
async fn terminating_a_finished_process_is_fine() -> TestResult {
    let mut child = spawn_shell("exit 0")?;
    let root = child.id();
    child.wait()?;

    with_timeout(terminate(root, Duration::from_millis(100))).await?;
    Ok(())
}

#[tokio::test]
async fn spawner_reports_exit_codes() -> TestResult {
    let spawner = Spawner::new("exit-test", CancellationToken::new());

    with_timeout(spawner.run("echo hello; exit 0")).await?;

    let err = with_timeout(spawner.run("exit 3")).await.unwrap_err();
    assert!(matches!(err, WatchError::ProcessExit { code: 3 }), "{err}");
    Ok(())
}

#[tokio::test]
async fn spawner_aborts_on_cancellation() -> TestResult {
    let cancel = CancellationToken::new();
    let spawner = Spawner::new("abort-test", cancel.clone()).with_grace_period(Duration::from_secs(2));

    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let err = with_timeout(spawner.run("sleep 30 & sleep 30; wait")).await.unwrap_err();
    assert!(err.is_abort(), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
    canceller.await?;

    // Already-cancelled spawners refuse to start anything.
    let err = spawner.run("echo never").await.unwrap_err();
    assert!(matches!(err, WatchError::Aborted));
    Ok(())
}
