use futures_util::future::join_all;
use tracing::{info, warn};

use crate::agent::{craftsman_prompt, AgentRole, ExecuteOptions};
use crate::error::{OrchError, Result};
use crate::graph::resolve_batches;
use crate::logstream::{LogEvent, LogLevel};
use crate::notification::{Event, EventKind};

use super::context::OrchContext;
use super::plan::{Plan, PlannedTask};

/// Implementation: batches run sequentially, tasks inside a batch run
/// concurrently and the batch always drains before failures are acted on.
pub struct ImplementationStage<'a> {
    ctx: &'a OrchContext,
}

impl<'a> ImplementationStage<'a> {
    pub fn new(ctx: &'a OrchContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, issue: u64) -> Result<()> {
        let ctx = self.ctx;
        let plan = super::engine::reconstruct_plan(ctx, issue).await?;
        self.run_with_plan(issue, &plan).await
    }

    pub async fn run_with_plan(&self, issue: u64, plan: &Plan) -> Result<()> {
        let ctx = self.ctx;
        let batches = resolve_batches(&plan.implementation)?;
        let worktree = ctx.worktrees.create(issue).await?;

        for (index, batch) in batches.iter().enumerate() {
            ctx.hub.publish(
                LogEvent::new(
                    LogLevel::Info,
                    format!("Implementation batch {}/{} ({} tasks)", index + 1, batches.len(), batch.len()),
                )
                .with_issue(issue)
                .with_stage("implementing"),
            );

            let results = join_all(
                batch
                    .iter()
                    .map(|task| self.run_task(issue, task, &worktree.path)),
            )
            .await;

            let mut first_error = None;
            for (task, result) in batch.iter().zip(results) {
                if let Err(e) = result {
                    warn!(issue, task = %task.id, error = %e, "Implementation task failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }

            // A failed batch stops all later batches.
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        info!(issue, "Implementation stage complete");
        Ok(())
    }

    async fn run_task(&self, issue: u64, task: &PlannedTask, worktree: &std::path::Path) -> Result<()> {
        let ctx = self.ctx;
        let sub = task.sub_issue.ok_or_else(|| {
            OrchError::Planning(format!("task {} has no sub-ticket", task.id))
        })?;

        ctx.set_sub_state(sub, &ctx.labels.in_progress()).await?;

        let ticket = ctx.tracker.get_issue(sub).await?;
        let timeout = ctx.agent_timeout(AgentRole::Craftsman);

        let result = async {
            ctx.executor
                .execute(
                    AgentRole::Craftsman,
                    &craftsman_prompt(&ticket.title, &ticket.body, worktree),
                    ExecuteOptions {
                        sub_issue: Some(sub),
                        working_dir: Some(worktree.to_path_buf()),
                        timeout: Some(timeout),
                    },
                )
                .await?;
            ctx.poller.wait_for_completion(sub, timeout).await
        }
        .await;

        match result {
            Ok(()) => {
                ctx.reporter
                    .on_event(EventKind::TaskCompleted, format!("{} (#{})", task.title, sub))
                    .await;
                Ok(())
            }
            Err(e) => {
                ctx.set_sub_state(sub, &ctx.labels.failed()).await?;

                if let OrchError::ServerUnreachable { log_path, message } = &e {
                    let event = Event::new(EventKind::CriticalError)
                        .with_issue(issue)
                        .with_message(format!("execution service unreachable: {}", message));
                    match log_path {
                        Some(path) => ctx.notifier.notify_with_attachment(&event, path).await,
                        None => ctx.notifier.notify(&event).await,
                    }
                }
                Err(e)
            }
        }
    }
}
