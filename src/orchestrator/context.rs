use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentExecutor, AgentRole};
use crate::config::OrchConfig;
use crate::error::Result;
use crate::logstream::LogHub;
use crate::notification::Notifier;
use crate::status::StatusReporter;
use crate::tracker::{IssueTracker, Labels, StateStore, TaskPoller};
use crate::worktree::WorktreeManager;

/// Everything a stage needs, assembled once per run by the factory. The
/// engine owns one context for the lifetime of a single orchestration.
pub struct OrchContext {
    pub config: OrchConfig,
    pub tracker: Arc<dyn IssueTracker>,
    pub labels: Labels,
    pub state: StateStore,
    pub executor: Arc<AgentExecutor>,
    pub poller: TaskPoller,
    pub reporter: StatusReporter,
    pub notifier: Arc<Notifier>,
    pub hub: Arc<LogHub>,
    pub worktrees: Arc<WorktreeManager>,
}

impl OrchContext {
    pub fn agent_timeout(&self, role: AgentRole) -> Duration {
        Duration::from_secs(self.config.agent_entry(role.as_str()).timeout)
    }

    /// Move a sub-ticket to a new sub-state label, clearing the others.
    pub async fn set_sub_state(&self, sub_issue: u64, to: &str) -> Result<()> {
        for label in self.sub_state_labels() {
            if label != to {
                self.tracker.remove_label(sub_issue, &label).await?;
            }
        }
        self.tracker
            .add_labels(sub_issue, &[to.to_string()])
            .await?;
        Ok(())
    }

    /// Clear completion and failure labels ahead of a test re-run.
    pub async fn clear_test_outcome(&self, sub_issue: u64) -> Result<()> {
        for label in [
            self.labels.agent_complete(),
            self.labels.test_failed(),
            self.labels.failed(),
        ] {
            self.tracker.remove_label(sub_issue, &label).await?;
        }
        Ok(())
    }

    fn sub_state_labels(&self) -> [String; 6] {
        [
            self.labels.pending(),
            self.labels.in_progress(),
            self.labels.agent_complete(),
            self.labels.failed(),
            self.labels.test_failed(),
            self.labels.max_attempts_reached(),
        ]
    }
}
