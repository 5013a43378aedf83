mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use watchrun::engine::{Trigger, WatchConfig, start_watch};
use watchrun::errors::WatchError;
use watchrun::expression::Expression;
use watchrun_test_utils::builders::{TriggerBuilder, basename};
use watchrun_test_utils::fake_backend::fake_backend;
use watchrun_test_utils::routines::{Behaviour, FakeRoutine};

type TestResult = Result<(), Box<dyn Error>>;

const DEBOUNCE: Duration = Duration::from_millis(30);

fn config(triggers: Vec<Trigger>) -> WatchConfig {
    let mut cfg = WatchConfig::new("/proj").debounce(DEBOUNCE);
    cfg.triggers = triggers;
    cfg
}

#[tokio::test]
async fn initial_run_fires_once_ready() -> TestResult {
    init_tracing();

    let (eager, eager_probe) = FakeRoutine::new(Behaviour::Succeed);
    let (lazy, lazy_probe) = FakeRoutine::new(Behaviour::Succeed);
    let triggers = vec![
        TriggerBuilder::new("eager").initial_run(true).build(eager),
        TriggerBuilder::new("lazy").build(lazy),
    ];

    let (backend, handle) = fake_backend();
    handle.ready();
    let watch = with_timeout(start_watch(config(triggers), backend)).await?;

    with_timeout(eager_probe.wait_for_calls(1)).await;
    let first = &eager_probe.calls()[0];
    assert!(first.first);
    assert!(first.files.is_empty());

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(lazy_probe.call_count(), 0);

    with_timeout(watch.shutdown()).await;
    Ok(())
}

#[tokio::test]
async fn changes_before_ready_are_not_forwarded() -> TestResult {
    let (routine, probe) = FakeRoutine::new(Behaviour::Succeed);
    let triggers = vec![TriggerBuilder::new("all").build(routine)];

    let (backend, handle) = fake_backend();
    handle.change("/proj/scanned-1.txt");
    handle.change("/proj/scanned-2.txt");
    handle.ready();
    let watch = with_timeout(start_watch(config(triggers), backend)).await?;

    tokio::time::sleep(DEBOUNCE * 3).await;
    assert_eq!(probe.call_count(), 0);

    handle.change("/proj/live.txt");
    with_timeout(probe.wait_for_calls(1)).await;
    assert_eq!(probe.calls()[0].files[0].path, PathBuf::from("/proj/live.txt"));

    with_timeout(watch.shutdown()).await;
    Ok(())
}

#[tokio::test]
async fn changes_reach_only_matching_triggers() -> TestResult {
    let (rust, rust_probe) = FakeRoutine::new(Behaviour::Succeed);
    let (docs, docs_probe) = FakeRoutine::new(Behaviour::Succeed);
    let triggers = vec![
        TriggerBuilder::new("rust").expression(basename("*.rs")).build(rust),
        TriggerBuilder::new("docs").expression(basename("*.md")).build(docs),
    ];

    let (backend, handle) = fake_backend();
    handle.ready();
    let watch = with_timeout(start_watch(config(triggers), backend)).await?;

    handle.change("/proj/src/lib.rs");
    handle.change("/proj/src/lib.rs");
    with_timeout(rust_probe.wait_for_calls(1)).await;
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(rust_probe.call_count(), 1);
    assert_eq!(rust_probe.calls()[0].files.len(), 1);
    assert_eq!(docs_probe.call_count(), 0);

    let rust_sub = watch.subscription("rust").expect("rust subscription");
    assert_eq!(rust_sub.trigger_config().name, "rust");

    with_timeout(watch.shutdown()).await;
    Ok(())
}

#[tokio::test]
async fn backend_error_before_ready_rejects_start() {
    let (routine, _probe) = FakeRoutine::new(Behaviour::Succeed);
    let triggers = vec![TriggerBuilder::new("all").build(routine)];

    let (backend, handle) = fake_backend();
    handle.error("inotify limit reached");

    let err = with_timeout(start_watch(config(triggers), backend))
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::WatchBackend(ref m) if m.contains("inotify")), "{err}");
    assert_eq!(handle.close_count(), 1);
}

#[tokio::test]
async fn backend_error_after_ready_shuts_the_watch_down() -> TestResult {
    let (routine, probe) = FakeRoutine::new(Behaviour::WaitForCancel);
    let (teardown, teardown_probe) = FakeRoutine::new(Behaviour::Succeed);
    let triggers = vec![
        TriggerBuilder::new("svc")
            .initial_run(true)
            .build(routine)
            .on_teardown(teardown),
    ];

    let (backend, handle) = fake_backend();
    handle.ready();
    let watch = with_timeout(start_watch(config(triggers), backend)).await?;
    with_timeout(probe.wait_for_calls(1)).await;

    handle.error("watch root removed");
    with_timeout(watch.stopped()).await;

    assert!(watch.is_stopped());
    assert_eq!(probe.finished_count(), 1);
    assert_eq!(teardown_probe.call_count(), 1);
    assert_eq!(handle.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_rejected_before_watching() {
    let (a, _) = FakeRoutine::new(Behaviour::Succeed);
    let (b, _) = FakeRoutine::new(Behaviour::Succeed);

    let persistent_without_initial = vec![
        Trigger::new("server", Expression::all_of([]), a)
            .persistent(true)
            .initial_run(false),
    ];
    let (backend, handle) = fake_backend();
    handle.ready();
    let err = start_watch(config(persistent_without_initial), backend)
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::InvalidArgument(_)), "{err}");
    assert_eq!(handle.close_count(), 1);

    let duplicate = vec![
        TriggerBuilder::new("same").build(b.clone()),
        TriggerBuilder::new("same").build(b),
    ];
    let (backend, handle) = fake_backend();
    handle.ready();
    let err = start_watch(config(duplicate), backend).await.unwrap_err();
    assert!(matches!(err, WatchError::InvalidArgument(_)), "{err}");

    let (c, _) = FakeRoutine::new(Behaviour::Succeed);
    let (backend, _handle) = fake_backend();
    let relative = WatchConfig::new("relative/dir").trigger(TriggerBuilder::new("x").build(c));
    let err = start_watch(relative, backend).await.unwrap_err();
    assert!(matches!(err, WatchError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn shutdown_is_idempotent_and_tears_down_every_trigger() -> TestResult {
    let (one, one_probe) = FakeRoutine::new(Behaviour::WaitForCancel);
    let (two, two_probe) = FakeRoutine::new(Behaviour::WaitForCancel);
    let (td_one, td_one_probe) = FakeRoutine::new(Behaviour::Succeed);
    let (td_two, td_two_probe) = FakeRoutine::new(Behaviour::Succeed);
    let triggers = vec![
        TriggerBuilder::new("one").initial_run(true).build(one).on_teardown(td_one),
        TriggerBuilder::new("two")
            .persistent(true)
            .build(two)
            .on_teardown(td_two),
    ];

    let (backend, handle) = fake_backend();
    handle.ready();
    let watch = with_timeout(start_watch(config(triggers), backend)).await?;
    with_timeout(one_probe.wait_for_calls(1)).await;
    with_timeout(two_probe.wait_for_calls(1)).await;

    let other = watch.clone();
    with_timeout(async { tokio::join!(watch.shutdown(), other.shutdown()) }).await;
    with_timeout(watch.shutdown()).await;

    assert!(watch.is_stopped());
    assert_eq!(handle.close_count(), 1);
    assert_eq!(one_probe.finished_count(), 1);
    assert_eq!(two_probe.finished_count(), 1);
    assert_eq!(td_one_probe.call_count(), 1);
    assert_eq!(td_two_probe.call_count(), 1);

    // Changes after shutdown go nowhere.
    handle.change("/proj/after.txt");
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(one_probe.call_count(), 1);
    Ok(())
}
