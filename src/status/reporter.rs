use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::agent::ProgressSink;
use crate::config::StatusTableConfig;
use crate::error::Result;
use crate::notification::{Event, EventKind, Notifier};
use crate::tracker::{IssueBody, IssueTracker, Labels, ProgressMarkers};

use super::table::{render_table, SubTaskStatus, TaskRowData};

/// Tail of the per-sub-ticket progress debounce window.
const DEBOUNCE_TAIL: Duration = Duration::from_millis(500);

struct ReporterInner {
    tracker: Arc<dyn IssueTracker>,
    labels: Labels,
    notifier: Arc<Notifier>,
    issue: u64,
    interval: Duration,
    show_retry_history: bool,
    debounce: Duration,
    /// Merged pending progress per sub-ticket, flushed on tail expiry.
    pending: Mutex<HashMap<u64, (ProgressMarkers, Instant)>>,
    scheduled: Mutex<HashSet<u64>>,
    /// Serializes table regeneration; a concurrent refresh is a no-op.
    updating: AtomicBool,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

/// Maintains the status table on the master ticket and the progress
/// markers on sub-tickets. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StatusReporter {
    inner: Arc<ReporterInner>,
}

impl StatusReporter {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        labels: Labels,
        notifier: Arc<Notifier>,
        issue: u64,
        config: &StatusTableConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                tracker,
                labels,
                notifier,
                issue,
                interval: Duration::from_secs(config.update_interval_seconds),
                show_retry_history: config.show_retry_history,
                debounce: DEBOUNCE_TAIL,
                pending: Mutex::new(HashMap::new()),
                scheduled: Mutex::new(HashSet::new()),
                updating: AtomicBool::new(false),
                periodic: Mutex::new(None),
            }),
        }
    }

    #[cfg(test)]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("reporter not yet shared");
        inner.debounce = debounce;
        self
    }

    pub fn issue(&self) -> u64 {
        self.inner.issue
    }

    /// Start the periodic timer; idempotent.
    pub fn start_periodic(&self) {
        let mut periodic = self.inner.periodic.lock();
        if periodic.is_some() {
            return;
        }
        let reporter = self.clone();
        *periodic = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reporter.inner.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = reporter.refresh().await {
                    warn!(issue = reporter.inner.issue, error = %e, "Periodic status refresh failed");
                }
            }
        }));
    }

    pub fn stop_periodic(&self) {
        if let Some(handle) = self.inner.periodic.lock().take() {
            handle.abort();
        }
    }

    /// Event path: regenerate immediately and notify.
    pub async fn on_event(&self, kind: EventKind, message: impl Into<String>) {
        if let Err(e) = self.refresh().await {
            warn!(issue = self.inner.issue, error = %e, "Status refresh failed");
        }
        self.inner
            .notifier
            .notify(
                &Event::new(kind)
                    .with_issue(self.inner.issue)
                    .with_message(message),
            )
            .await;
    }

    /// Regenerate the status table and patch only that region of the master
    /// body. Serialized per reporter: if a refresh is already running this
    /// call is a no-op.
    pub async fn refresh(&self) -> Result<()> {
        if self
            .inner
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(issue = self.inner.issue, "Refresh already in flight, skipping");
            return Ok(());
        }
        let result = self.refresh_locked().await;
        self.inner.updating.store(false, Ordering::Release);
        result
    }

    async fn refresh_locked(&self) -> Result<()> {
        let rows = self.generate_rows().await?;
        let table = render_table(&rows, self.inner.show_retry_history);

        let master = self.inner.tracker.get_issue(self.inner.issue).await?;
        match IssueBody::update_status_table(&master.body, &table) {
            Ok(updated) => {
                if updated != master.body {
                    self.inner
                        .tracker
                        .update_body(self.inner.issue, &updated)
                        .await?;
                }
            }
            Err(_) => {
                debug!(issue = self.inner.issue, "Master body has no status-table region yet");
            }
        }
        Ok(())
    }

    async fn generate_rows(&self) -> Result<Vec<TaskRowData>> {
        let labels = &self.inner.labels;
        let master_ref = labels.master_ref(self.inner.issue);
        let subs = self.inner.tracker.list_all_with_label(&master_ref).await?;

        let mut rows = Vec::new();
        for sub in &subs {
            // Fix attempts are audit records, not table rows.
            if sub.has_label(&labels.fix_attempt()) {
                continue;
            }
            let is_test = sub.has_label(&labels.test());

            let fix_attempts = if is_test {
                self.inner
                    .tracker
                    .list_all_with_label(&labels.test_ref(sub.number))
                    .await?
                    .len() as u32
            } else {
                0
            };

            rows.push(TaskRowData {
                sub_issue: sub.number,
                title: sub.title.clone(),
                status: SubTaskStatus::from_labels(labels, &sub.labels),
                markers: ProgressMarkers::parse(&sub.body),
                is_test,
                fix_attempts,
            });
        }
        Ok(rows)
    }

    /// Debounced progress update: merged per-key, one body rewrite per
    /// sub-ticket once the tail expires with no further calls.
    pub fn update_task_progress(&self, sub_issue: u64, update: ProgressMarkers) {
        {
            let mut pending = self.inner.pending.lock();
            let entry = pending
                .entry(sub_issue)
                .or_insert_with(|| (ProgressMarkers::default(), Instant::now()));
            entry.0.merge(update);
            entry.1 = Instant::now();
        }

        let newly_scheduled = self.inner.scheduled.lock().insert(sub_issue);
        if !newly_scheduled {
            return;
        }

        let reporter = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(reporter.inner.debounce).await;
                let quiet = reporter
                    .inner
                    .pending
                    .lock()
                    .get(&sub_issue)
                    .map(|(_, last)| last.elapsed() >= reporter.inner.debounce)
                    .unwrap_or(true);
                if quiet {
                    break;
                }
            }
            reporter.flush_progress(sub_issue).await;
        });
    }

    async fn flush_progress(&self, sub_issue: u64) {
        let merged = {
            let mut pending = self.inner.pending.lock();
            pending.remove(&sub_issue).map(|(markers, _)| markers)
        };
        self.inner.scheduled.lock().remove(&sub_issue);

        let Some(merged) = merged else {
            return;
        };
        if merged.is_empty() {
            return;
        }

        let result = async {
            let ticket = self.inner.tracker.get_issue(sub_issue).await?;
            let mut markers = ProgressMarkers::parse(&ticket.body);
            markers.merge(merged);
            let updated = markers.apply(&ticket.body);
            if updated != ticket.body {
                self.inner.tracker.update_body(sub_issue, &updated).await?;
            }
            Ok::<(), crate::error::OrchError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(sub_issue, error = %e, "Progress flush failed");
        }
    }

    /// Wait until every scheduled debounce flush has drained. Test hook.
    #[cfg(test)]
    pub async fn drain(&self) {
        loop {
            if self.inner.scheduled.lock().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl ProgressSink for StatusReporter {
    fn on_retry(&self, sub_issue: u64, retry_count: u32) {
        self.update_task_progress(
            sub_issue,
            ProgressMarkers {
                retry_count: Some(retry_count),
                last_retry_time: Some(chrono::Utc::now()),
                ..Default::default()
            },
        );
    }

    fn on_tool_completed(&self, sub_issue: u64, tools_total: u32) {
        self.update_task_progress(
            sub_issue,
            ProgressMarkers {
                tools_used: Some(tools_total),
                ..Default::default()
            },
        );
    }

    fn on_message(&self, sub_issue: u64, text: &str) {
        self.update_task_progress(
            sub_issue,
            ProgressMarkers {
                agent_message: Some(text.to_string()),
                ..Default::default()
            },
        );
    }
}
