//! Queue uniqueness and source-poller idempotence over the service loop.

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use fixtures::{scenario_config, scenario_factory, TestRepo};
use ticket_pilot::error::OrchError;
use ticket_pilot::queue::{OrchQueue, SourcePoller};
use ticket_pilot::test_support::{MockExecution, MockTracker};
use ticket_pilot::tracker::{IssueTracker, Labels};

/// A queue whose orchestrations stay busy long enough to observe them:
/// the architect takes two seconds, so the first claimed ticket occupies
/// the processing loop while assertions run.
async fn busy_queue(repo: &TestRepo, tracker: Arc<MockTracker>) -> OrchQueue {
    let service = Arc::new(MockExecution::new());
    service.set_latency(Duration::from_secs(2));

    let factory = scenario_factory(
        scenario_config(repo, "http://127.0.0.1:1/"),
        tracker,
        service,
    );
    OrchQueue::new(Arc::new(factory))
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_enqueues_are_rejected_even_while_running() {
    let repo = TestRepo::init();
    let tracker = Arc::new(MockTracker::new());
    let issue = tracker.seed_issue("work", "do it", &[]).await;
    let queue = busy_queue(&repo, tracker.clone()).await;

    queue.enqueue(issue).unwrap();
    // Give the processing loop a moment to pick it up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.snapshot().running, Some(issue));

    let err = queue.enqueue(issue).unwrap_err();
    assert!(matches!(err, OrchError::DuplicateQueueEntry(n) if n == issue));
}

#[tokio::test(flavor = "multi_thread")]
async fn source_poller_claims_and_then_ignores_known_tickets() {
    let repo = TestRepo::init();
    let tracker = Arc::new(MockTracker::new());
    let labels = Labels::new("");

    let first = tracker
        .seed_issue("first", "body", &["queue".to_string()])
        .await;
    let second = tracker
        .seed_issue("second", "body", &["queue".to_string()])
        .await;

    let queue = busy_queue(&repo, tracker.clone()).await;
    let poller = SourcePoller::new(
        tracker.clone(),
        labels.clone(),
        queue.clone(),
        "queue",
        Duration::from_secs(60),
    );

    let claimed = poller.poll_once().await.unwrap();
    assert_eq!(claimed, 2);

    // Claiming swapped the labels.
    for issue in [first, second] {
        let set = tracker.labels_of(issue);
        assert!(!set.contains(&"queue".to_string()));
        assert!(set.contains(&labels.processing()));
    }

    // The label reappears while the ticket is still queued or running;
    // the next poll must not claim it again.
    tracker
        .add_labels(second, &["queue".to_string()])
        .await
        .unwrap();
    assert!(queue.contains(second));

    let claimed = poller.poll_once().await.unwrap();
    assert_eq!(claimed, 0);

    let snapshot = queue.snapshot();
    let occurrences = snapshot
        .queued
        .iter()
        .filter(|&&queued| queued == second)
        .count()
        + usize::from(snapshot.running == Some(second));
    assert_eq!(occurrences, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_runs_land_in_history() {
    let repo = TestRepo::init();
    let tracker = Arc::new(MockTracker::new());
    // Issue 999 does not exist; the run fails fast and is recorded.
    let service = Arc::new(MockExecution::new());
    let factory = scenario_factory(
        scenario_config(&repo, "http://127.0.0.1:1/"),
        tracker,
        service,
    );
    let queue = OrchQueue::new(Arc::new(factory));

    queue.enqueue(999).unwrap();
    for _ in 0..100 {
        if queue.snapshot().total_failed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let snapshot = queue.snapshot();
    assert_eq!(snapshot.total_failed, 1);
    assert_eq!(snapshot.failed.len(), 1);
    assert_eq!(snapshot.failed[0].issue, 999);
    assert!(snapshot.failed[0].error.is_some());
    assert!(snapshot.running.is_none());
    assert!(!queue.contains(999));
}
