mod common;
use crate::common::{init_tracing, with_timeout, write_file};

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;
use watchrun::expression::Expression;
use watchrun::types::{deduplicate_changes, ChangeEvent};
use watchrun::watch::{compute_file_hash, ChangeQueue, ChangeSubscriber, QueueOptions};
use watchrun_test_utils::builders::{basename, match_all};
use watchrun_test_utils::subscriber::RecordingSubscriber;

type TestResult = Result<(), Box<dyn Error>>;

const DEBOUNCE: Duration = Duration::from_millis(40);

fn spawn_queue(
    project: &Path,
    use_hash: bool,
    subscribers: &[Arc<RecordingSubscriber>],
) -> (ChangeQueue, CancellationToken) {
    let shutdown = CancellationToken::new();
    let subs: Vec<Arc<dyn ChangeSubscriber>> = subscribers
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn ChangeSubscriber>)
        .collect();
    let queue = ChangeQueue::spawn(
        project.to_path_buf(),
        QueueOptions {
            debounce: DEBOUNCE,
            use_hash,
        },
        subs,
        shutdown.clone(),
    );
    (queue, shutdown)
}

fn paths(batch: &[ChangeEvent]) -> Vec<PathBuf> {
    batch.iter().map(|e| e.path.clone()).collect()
}

#[tokio::test]
async fn duplicate_events_collapse_to_last_seen() -> TestResult {
    init_tracing();

    let project = PathBuf::from("/proj");
    let sub = RecordingSubscriber::new("all", match_all());
    let (queue, _shutdown) = spawn_queue(&project, false, &[Arc::clone(&sub)]);

    queue.push(ChangeEvent::with_hash("/proj/f.txt", "hash-a"));
    queue.push(ChangeEvent::with_hash("/proj/f.txt", "hash-b"));

    with_timeout(sub.wait_for_batches(1)).await;
    let batches = sub.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![ChangeEvent::with_hash("/proj/f.txt", "hash-b")]);
    Ok(())
}

#[tokio::test]
async fn each_change_restarts_the_debounce_window() -> TestResult {
    let project = PathBuf::from("/proj");
    let sub = RecordingSubscriber::new("all", match_all());
    let (queue, _shutdown) = spawn_queue(&project, false, &[Arc::clone(&sub)]);

    queue.push(ChangeEvent::new("/proj/a.txt"));
    tokio::time::sleep(DEBOUNCE / 4).await;
    queue.push(ChangeEvent::new("/proj/b.txt"));
    tokio::time::sleep(DEBOUNCE / 4).await;
    queue.push(ChangeEvent::new("/proj/c.txt"));

    with_timeout(sub.wait_for_batches(1)).await;
    tokio::time::sleep(DEBOUNCE * 2).await;

    let batches = sub.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        paths(&batches[0]),
        vec![
            PathBuf::from("/proj/a.txt"),
            PathBuf::from("/proj/b.txt"),
            PathBuf::from("/proj/c.txt"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unchanged_hash_is_suppressed() -> TestResult {
    let project = PathBuf::from("/proj");
    let sub = RecordingSubscriber::new("all", match_all());
    let (queue, _shutdown) = spawn_queue(&project, false, &[Arc::clone(&sub)]);

    queue.push(ChangeEvent::with_hash("/proj/f.txt", "h1"));
    with_timeout(sub.wait_for_batches(1)).await;

    // Same content again, alongside an unhashed change so a batch still goes out.
    queue.push(ChangeEvent::with_hash("/proj/f.txt", "h1"));
    queue.push(ChangeEvent::new("/proj/g.txt"));
    with_timeout(sub.wait_for_batches(2)).await;

    queue.push(ChangeEvent::with_hash("/proj/f.txt", "h2"));
    with_timeout(sub.wait_for_batches(3)).await;

    // And back to h2 is now a duplicate.
    queue.push(ChangeEvent::with_hash("/proj/f.txt", "h2"));
    queue.push(ChangeEvent::new("/proj/g.txt"));
    with_timeout(sub.wait_for_batches(4)).await;

    let batches = sub.batches();
    assert_eq!(batches[0], vec![ChangeEvent::with_hash("/proj/f.txt", "h1")]);
    assert_eq!(paths(&batches[1]), vec![PathBuf::from("/proj/g.txt")]);
    assert_eq!(batches[2], vec![ChangeEvent::with_hash("/proj/f.txt", "h2")]);
    assert_eq!(paths(&batches[3]), vec![PathBuf::from("/proj/g.txt")]);
    Ok(())
}

#[tokio::test]
async fn use_hash_computes_content_hashes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let project = dir.path().canonicalize()?;
    let file = write_file(&project, "notes.md", "first");
    let marker = write_file(&project, "marker.txt", "m");

    let sub = RecordingSubscriber::new("all", match_all());
    let (queue, _shutdown) = spawn_queue(&project, true, &[Arc::clone(&sub)]);

    queue.push(ChangeEvent::new(&file));
    with_timeout(sub.wait_for_batches(1)).await;
    let first = sub.batches()[0].clone();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].hash.as_deref(), Some(compute_file_hash(&file)?.as_str()));

    // Touch without changing content: only the marker (new path) survives.
    queue.push(ChangeEvent::new(&file));
    queue.push(ChangeEvent::new(&marker));
    with_timeout(sub.wait_for_batches(2)).await;
    assert_eq!(paths(&sub.batches()[1]), vec![marker.clone()]);

    std::fs::write(&file, "second")?;
    queue.push(ChangeEvent::new(&file));
    with_timeout(sub.wait_for_batches(3)).await;
    assert_eq!(paths(&sub.batches()[2]), vec![file.clone()]);
    Ok(())
}

#[tokio::test]
async fn unreadable_files_are_never_suppressed() -> TestResult {
    let dir = tempfile::tempdir()?;
    let project = dir.path().canonicalize()?;
    let missing = project.join("gone.txt");

    let sub = RecordingSubscriber::new("all", match_all());
    let (queue, _shutdown) = spawn_queue(&project, true, &[Arc::clone(&sub)]);

    queue.push(ChangeEvent::new(&missing));
    with_timeout(sub.wait_for_batches(1)).await;
    queue.push(ChangeEvent::new(&missing));
    with_timeout(sub.wait_for_batches(2)).await;

    for batch in sub.batches() {
        assert_eq!(batch, vec![ChangeEvent::new(&missing)]);
    }
    Ok(())
}

#[tokio::test]
async fn changes_are_routed_by_expression() -> TestResult {
    let project = PathBuf::from("/proj");
    let rust = RecordingSubscriber::new("rust", basename("*.rs"));
    let docs = RecordingSubscriber::new("docs", basename("*.md"));
    let never = RecordingSubscriber::new("never", Expression::any_of([]));
    let (queue, _shutdown) = spawn_queue(
        &project,
        false,
        &[Arc::clone(&rust), Arc::clone(&docs), Arc::clone(&never)],
    );

    queue.push(ChangeEvent::new("/proj/src/lib.rs"));
    queue.push(ChangeEvent::new("/proj/README.md"));
    queue.push(ChangeEvent::new("/proj/src/main.rs"));
    // Outside the project: dropped for everyone.
    queue.push(ChangeEvent::new("/elsewhere/x.rs"));

    with_timeout(rust.wait_for_batches(1)).await;
    with_timeout(docs.wait_for_batches(1)).await;
    tokio::time::sleep(DEBOUNCE).await;

    assert_eq!(
        paths(&rust.batches()[0]),
        vec![PathBuf::from("/proj/src/lib.rs"), PathBuf::from("/proj/src/main.rs")]
    );
    assert_eq!(paths(&docs.batches()[0]), vec![PathBuf::from("/proj/README.md")]);
    assert!(never.batches().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_drops_the_pending_batch() -> TestResult {
    let project = PathBuf::from("/proj");
    let sub = RecordingSubscriber::new("all", match_all());
    let (queue, shutdown) = spawn_queue(&project, false, &[Arc::clone(&sub)]);

    queue.push(ChangeEvent::new("/proj/a.txt"));
    shutdown.cancel();
    tokio::time::sleep(DEBOUNCE * 3).await;

    assert!(sub.batches().is_empty());

    // Pushing after shutdown is harmless.
    queue.push(ChangeEvent::new("/proj/b.txt"));
    Ok(())
}

fn event_stream() -> impl Strategy<Value = Vec<(u8, u8)>> {
    proptest::collection::vec((0u8..5, any::<u8>()), 0..40)
}

proptest! {
    #[test]
    fn dedup_keeps_exactly_last_event_per_path(stream in event_stream()) {
        let events: Vec<ChangeEvent> = stream
            .iter()
            .map(|(p, h)| ChangeEvent::with_hash(format!("/proj/{p}"), format!("{h}")))
            .collect();

        let mut last: HashMap<PathBuf, ChangeEvent> = HashMap::new();
        for e in &events {
            last.insert(e.path.clone(), e.clone());
        }

        let deduped = deduplicate_changes(events);
        prop_assert_eq!(deduped.len(), last.len());
        for e in &deduped {
            prop_assert_eq!(Some(e), last.get(&e.path));
        }
    }
}
