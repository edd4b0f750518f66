use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{OrchError, Result};

use super::context::OrchContext;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Waits for a human decision on the master ticket: the first of the
/// approval labels wins. No timeout by default; cancellable; `autoApprove`
/// short-circuits by stamping the approval label itself.
pub struct ApprovalMonitor<'a> {
    ctx: &'a OrchContext,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
}

impl<'a> ApprovalMonitor<'a> {
    pub fn new(ctx: &'a OrchContext) -> Self {
        Self {
            ctx,
            interval: POLL_INTERVAL,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling the wait from another task.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub async fn wait(&self, issue: u64) -> Result<ApprovalDecision> {
        let ctx = self.ctx;

        if ctx.config.execution.auto_approve {
            info!(issue, "Auto-approve enabled, stamping approval");
            ctx.tracker
                .add_labels(issue, &[ctx.labels.approved()])
                .await?;
            return Ok(ApprovalDecision::Approved);
        }

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(OrchError::Other("approval wait cancelled".to_string()));
            }

            let ticket = ctx.tracker.get_issue(issue).await?;
            if ticket.has_label(&ctx.labels.approved()) {
                info!(issue, "Approval label found");
                return Ok(ApprovalDecision::Approved);
            }
            if ticket.has_label(&ctx.labels.rejected()) {
                info!(issue, "Rejection label found");
                return Ok(ApprovalDecision::Rejected);
            }

            debug!(issue, "Awaiting approval");
            tokio::time::sleep(self.interval).await;
        }
    }
}
