use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{OrchError, Result};
use crate::orchestrator::OrchestratorFactory;
use crate::utils::format_duration;

/// Bounded history of finished runs.
const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub issue: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub running: Option<u64>,
    pub queued: Vec<u64>,
    pub completed: Vec<RunRecord>,
    pub failed: Vec<RunRecord>,
    pub total_completed: u64,
    pub total_failed: u64,
    pub processing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub success_rate: String,
    pub average_duration: String,
}

#[derive(Default)]
struct QueueInner {
    queued: VecDeque<u64>,
    running: Option<u64>,
    completed: VecDeque<RunRecord>,
    failed: VecDeque<RunRecord>,
    total_completed: u64,
    total_failed: u64,
    processing: bool,
}

/// FIFO queue of orchestrations. Strictly one runs at a time; the
/// processing loop re-arms itself on enqueue when idle. Cheap to clone.
#[derive(Clone)]
pub struct OrchQueue {
    inner: Arc<Mutex<QueueInner>>,
    factory: Arc<OrchestratorFactory>,
}

impl OrchQueue {
    pub fn new(factory: Arc<OrchestratorFactory>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            factory,
        }
    }

    /// Add an issue. Duplicates of the running or queued id are rejected.
    pub fn enqueue(&self, issue: u64) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.running == Some(issue) || inner.queued.contains(&issue) {
                return Err(OrchError::DuplicateQueueEntry(issue));
            }
            inner.queued.push_back(issue);
            info!(issue, depth = inner.queued.len(), "Issue enqueued");
        }
        self.arm();
        Ok(())
    }

    /// Whether the issue is currently queued or running.
    pub fn contains(&self, issue: u64) -> bool {
        let inner = self.inner.lock();
        inner.running == Some(issue) || inner.queued.contains(&issue)
    }

    /// Remove a queued issue. The running one cannot be removed.
    pub fn remove(&self, issue: u64) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.running == Some(issue) {
            return Err(OrchError::IssueRunning(issue));
        }
        let before = inner.queued.len();
        inner.queued.retain(|&queued| queued != issue);
        Ok(inner.queued.len() < before)
    }

    /// Drop every queued issue; the running one is unaffected.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let cleared = inner.queued.len();
        inner.queued.clear();
        cleared
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        QueueSnapshot {
            running: inner.running,
            queued: inner.queued.iter().copied().collect(),
            completed: inner.completed.iter().cloned().collect(),
            failed: inner.failed.iter().cloned().collect(),
            total_completed: inner.total_completed,
            total_failed: inner.total_failed,
            processing: inner.processing,
        }
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let total = inner.total_completed + inner.total_failed;

        let success_rate = if total == 0 {
            "n/a".to_string()
        } else {
            format!(
                "{:.1}%",
                inner.total_completed as f64 / total as f64 * 100.0
            )
        };

        let average_duration = if inner.completed.is_empty() {
            "n/a".to_string()
        } else {
            let sum: u64 = inner.completed.iter().map(|r| r.duration_secs).sum();
            format_duration(sum / inner.completed.len() as u64)
        };

        QueueStats {
            success_rate,
            average_duration,
        }
    }

    /// Start the processing loop if it is idle.
    fn arm(&self) {
        let mut inner = self.inner.lock();
        if inner.processing {
            return;
        }
        inner.processing = true;
        drop(inner);

        let queue = self.clone();
        tokio::spawn(async move {
            queue.process_loop().await;
        });
    }

    /// Single cooperative loop: dequeue, build a fresh engine, run, record,
    /// repeat until the queue drains.
    async fn process_loop(&self) {
        loop {
            let next = {
                let mut inner = self.inner.lock();
                match inner.queued.pop_front() {
                    Some(issue) => {
                        inner.running = Some(issue);
                        Some(issue)
                    }
                    None => {
                        inner.processing = false;
                        None
                    }
                }
            };
            let Some(issue) = next else {
                return;
            };

            let started_at = Utc::now();
            let orchestrator = self.factory.build(issue);
            let result = orchestrator.start(issue).await;
            let finished_at = Utc::now();

            let record = RunRecord {
                issue,
                started_at,
                finished_at,
                duration_secs: (finished_at - started_at).num_seconds().max(0) as u64,
                error: result.as_ref().err().map(|e| e.to_string()),
            };

            let mut inner = self.inner.lock();
            inner.running = None;
            match &result {
                Ok(outcome) => {
                    info!(issue, ?outcome, "Orchestration finished");
                    inner.total_completed += 1;
                    push_bounded(&mut inner.completed, record);
                }
                Err(error) => {
                    warn!(issue, error = %error, "Orchestration failed");
                    inner.total_failed += 1;
                    push_bounded(&mut inner.failed, record);
                }
            }
        }
    }
}

fn push_bounded(history: &mut VecDeque<RunRecord>, record: RunRecord) {
    if history.len() == HISTORY_CAP {
        history.pop_front();
    }
    history.push_back(record);
}
