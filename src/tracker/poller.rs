use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{OrchError, Result};

use super::client::IssueTracker;
use super::labels::Labels;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls a sub-ticket until the agent marks it complete. Tracker errors
/// during a tick propagate; only running out the total budget is a
/// `PollTimeout`.
pub struct TaskPoller {
    tracker: Arc<dyn IssueTracker>,
    labels: Labels,
    interval: Duration,
}

impl TaskPoller {
    pub fn new(tracker: Arc<dyn IssueTracker>, labels: Labels) -> Self {
        Self {
            tracker,
            labels,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub async fn wait_for_completion(&self, issue: u64, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let complete_label = self.labels.agent_complete();

        loop {
            let ticket = self.tracker.get_issue(issue).await?;
            if ticket.has_label(&complete_label) {
                debug!(issue, elapsed_secs = started.elapsed().as_secs(), "Agent completed");
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(OrchError::PollTimeout {
                    issue,
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTracker;

    #[tokio::test]
    async fn completes_once_label_appears() {
        let tracker = Arc::new(MockTracker::new());
        let labels = Labels::new("");
        let issue = tracker.seed_issue("test task", "body", &[]).await;

        let poller =
            TaskPoller::new(tracker.clone(), labels.clone()).with_interval(Duration::from_millis(5));

        let tracker_bg = tracker.clone();
        let labels_bg = labels.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tracker_bg
                .add_labels(issue, &[labels_bg.agent_complete()])
                .await
                .unwrap();
        });

        poller
            .wait_for_completion(issue, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_without_label() {
        let tracker = Arc::new(MockTracker::new());
        let issue = tracker.seed_issue("never done", "body", &[]).await;

        let poller = TaskPoller::new(tracker, Labels::new(""))
            .with_interval(Duration::from_millis(5));

        let err = poller
            .wait_for_completion(issue, Duration::from_millis(25))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchError::PollTimeout { .. }));
    }

    #[tokio::test]
    async fn tracker_errors_propagate() {
        let tracker = Arc::new(MockTracker::new());
        let poller = TaskPoller::new(tracker, Labels::new(""))
            .with_interval(Duration::from_millis(5));

        // Issue 999 was never seeded.
        let err = poller
            .wait_for_completion(999, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchError::IssueNotFound(999)));
    }
}
