use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tracker::{IssueTracker, Labels};

use super::fifo::OrchQueue;

/// Feeds the queue from the tracker: every tick, tickets carrying the
/// queue label are claimed (queue label off, processing label on) and
/// enqueued. Overlapping polls are suppressed by a single-flight flag.
pub struct SourcePoller {
    tracker: Arc<dyn IssueTracker>,
    labels: Labels,
    queue: OrchQueue,
    queue_label: String,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl SourcePoller {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        labels: Labels,
        queue: OrchQueue,
        queue_label: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            tracker,
            labels,
            queue,
            queue_label: queue_label.into(),
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the polling loop. The returned handle stops with `stop`.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Release);
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = poller.interval.as_millis() as u64, "Source poller started");
            while poller.running.load(Ordering::Acquire) {
                if let Err(e) = poller.poll_once().await {
                    warn!(error = %e, "Source poll failed");
                }
                tokio::time::sleep(poller.interval).await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// One pass over the queue label. Returns how many tickets were
    /// claimed; a pass that overlaps an in-flight one is a no-op.
    pub async fn poll_once(&self) -> Result<usize> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Poll already in flight, skipping");
            return Ok(0);
        }

        let result = self.claim_queued().await;
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn claim_queued(&self) -> Result<usize> {
        let tickets = self
            .tracker
            .list_open_with_label(&self.queue_label)
            .await?;
        let mut claimed = 0;

        for ticket in tickets {
            if self.queue.contains(ticket.number) {
                debug!(issue = ticket.number, "Already queued or running, ignoring");
                continue;
            }

            self.tracker
                .remove_label(ticket.number, &self.queue_label)
                .await?;
            self.tracker
                .add_labels(ticket.number, &[self.labels.processing()])
                .await?;

            match self.queue.enqueue(ticket.number) {
                Ok(()) => {
                    info!(issue = ticket.number, "Claimed from queue label");
                    claimed += 1;
                }
                Err(e) => {
                    // Raced with another claim path; the labels already
                    // reflect ownership.
                    debug!(issue = ticket.number, error = %e, "Enqueue after claim rejected");
                }
            }
        }

        Ok(claimed)
    }
}
