use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{AgentExecutor, ExecutionService};
use crate::config::OrchConfig;
use crate::error::{OrchError, Result};
use crate::logstream::{LogEvent, LogHub, LogLevel};
use crate::notification::{Event, EventKind, Notifier};
use crate::resilience::{ModelFailover, SessionWatchdog};
use crate::status::StatusReporter;
use crate::tracker::{IssueBody, IssueTracker, Labels, OrchState, StateStore, TaskPoller};
use crate::worktree::WorktreeManager;

use super::approval::{ApprovalDecision, ApprovalMonitor};
use super::completion::CompletionStage;
use super::context::OrchContext;
use super::implementing::ImplementationStage;
use super::plan::{parse_task_markers, spec_section, Plan, PlannedTask};
use super::planning::PlanningStage;
use super::testing::TestingStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Rejected,
}

/// Where a (possibly resumed) run enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryPoint {
    Planning,
    Approval,
    Implementing,
    Testing,
    Completing,
}

/// One orchestration run: owns the per-run context, sequences the stages,
/// routes failures. Built fresh by the factory for every `start`.
pub struct Orchestrator {
    ctx: OrchContext,
}

impl Orchestrator {
    pub fn new(ctx: OrchContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &OrchContext {
        &self.ctx
    }

    pub async fn start(&self, issue: u64) -> Result<RunOutcome> {
        self.drive(issue, EntryPoint::Planning).await
    }

    /// Resume from whatever state label the ticket carries. Terminal
    /// success states are a no-op; `failed` and `rejected` refuse.
    pub async fn resume(&self, issue: u64) -> Result<RunOutcome> {
        let current = self.ctx.state.current(issue).await?;
        let entry = match current {
            None | Some(OrchState::Planning) => EntryPoint::Planning,
            Some(OrchState::AwaitingApproval) => EntryPoint::Approval,
            Some(OrchState::Approved) | Some(OrchState::Implementing) => EntryPoint::Implementing,
            Some(OrchState::Testing) => EntryPoint::Testing,
            Some(OrchState::Completing) => EntryPoint::Completing,
            Some(OrchState::Completed) | Some(OrchState::PrCreated) => {
                info!(issue, "Already complete, nothing to resume");
                return Ok(RunOutcome::Completed);
            }
            Some(state @ (OrchState::Failed | OrchState::Rejected)) => {
                return Err(OrchError::NotResumable(state.to_string()));
            }
        };

        info!(issue, ?entry, "Resuming orchestration");
        self.drive(issue, entry).await
    }

    /// Run the pipeline with failure routing: any stage error notifies,
    /// stamps `failed`, and honors the cleanup policy.
    async fn drive(&self, issue: u64, entry: EntryPoint) -> Result<RunOutcome> {
        let outcome = self.run_pipeline(issue, entry).await;

        match &outcome {
            Ok(RunOutcome::Completed) => {
                if self.ctx.worktrees.should_cleanup(false)
                    && let Err(e) = self.ctx.worktrees.remove(issue).await
                {
                    warn!(issue, error = %e, "Worktree cleanup failed");
                }
            }
            Ok(RunOutcome::Rejected) => {}
            Err(error) => {
                self.ctx.hub.publish(
                    LogEvent::new(LogLevel::Fatal, format!("Orchestration failed: {}", error))
                        .with_issue(issue),
                );
                self.ctx
                    .notifier
                    .notify(
                        &Event::new(EventKind::OrchestrationFailed)
                            .with_issue(issue)
                            .with_message(error.to_string()),
                    )
                    .await;
                if let Err(e) = self.ctx.state.transition(issue, OrchState::Failed).await {
                    warn!(issue, error = %e, "Failed to stamp failure state");
                }
                self.ctx.reporter.stop_periodic();

                if self.ctx.worktrees.should_cleanup(true)
                    && let Err(e) = self.ctx.worktrees.remove(issue).await
                {
                    warn!(issue, error = %e, "Worktree cleanup failed");
                }
            }
        }

        outcome
    }

    async fn run_pipeline(&self, issue: u64, entry: EntryPoint) -> Result<RunOutcome> {
        let ctx = &self.ctx;
        let mut plan: Option<Plan> = None;

        if entry == EntryPoint::Planning {
            ctx.notifier
                .notify(&Event::new(EventKind::OrchestrationStarted).with_issue(issue))
                .await;
            ctx.state.transition(issue, OrchState::Planning).await?;
            ctx.worktrees.create(issue).await?;
            plan = Some(PlanningStage::new(ctx).run(issue).await?);
        }

        if entry <= EntryPoint::Approval {
            if entry == EntryPoint::Approval {
                // Planning normally starts the periodic reporter.
                ctx.reporter.start_periodic();
            }
            ctx.reporter
                .on_event(EventKind::AwaitingApproval, format!("issue #{}", issue))
                .await;

            match ApprovalMonitor::new(ctx).wait(issue).await? {
                ApprovalDecision::Approved => {
                    ctx.state.transition(issue, OrchState::Approved).await?;
                    ctx.reporter
                        .on_event(EventKind::Approved, format!("issue #{}", issue))
                        .await;
                }
                ApprovalDecision::Rejected => {
                    ctx.state.transition(issue, OrchState::Rejected).await?;
                    ctx.reporter
                        .on_event(EventKind::Rejected, format!("issue #{}", issue))
                        .await;
                    ctx.reporter.stop_periodic();
                    return Ok(RunOutcome::Rejected);
                }
            }
        } else {
            ctx.reporter.start_periodic();
        }

        let plan = match plan {
            Some(plan) => plan,
            None => reconstruct_plan(ctx, issue).await?,
        };

        if entry <= EntryPoint::Implementing {
            ctx.state.transition(issue, OrchState::Implementing).await?;
            ImplementationStage::new(ctx)
                .run_with_plan(issue, &plan)
                .await?;
        }

        if entry <= EntryPoint::Testing {
            ctx.state.transition(issue, OrchState::Testing).await?;
            TestingStage::new(ctx).run_with_plan(issue, &plan).await?;
        }

        ctx.state.transition(issue, OrchState::Completing).await?;
        CompletionStage::new(ctx).run_with_plan(issue, &plan).await?;

        Ok(RunOutcome::Completed)
    }
}

/// Rebuild the plan from durable state: sub-tickets listed by role labels,
/// task ids and dependencies from their body markers, the rendered spec
/// from the master's orchestration block. In-memory state is never
/// trusted to have survived.
pub async fn reconstruct_plan(ctx: &OrchContext, issue: u64) -> Result<Plan> {
    let master = ctx.tracker.get_issue(issue).await?;
    let spec_markdown = IssueBody::parse(&master.body)
        .block
        .as_deref()
        .and_then(spec_section)
        .unwrap_or_default();

    let subs = ctx
        .tracker
        .list_all_with_label(&ctx.labels.master_ref(issue))
        .await?;

    let mut implementation = Vec::new();
    let mut tests = Vec::new();

    for sub in subs {
        // Fix attempts carry the implementation label too; they are audit
        // records, not plan tasks.
        if sub.has_label(&ctx.labels.fix_attempt()) {
            continue;
        }

        let (id, dependencies) = parse_task_markers(&sub.body);
        let task = PlannedTask {
            id: id.unwrap_or_else(|| format!("ISSUE-{}", sub.number)),
            title: sub.title.clone(),
            description: sub.body.clone(),
            acceptance_criteria: Vec::new(),
            test_scenarios: Vec::new(),
            complexity: None,
            test_type: None,
            dependencies,
            sub_issue: Some(sub.number),
        };

        if sub.has_label(&ctx.labels.test()) {
            tests.push(task);
        } else if sub.has_label(&ctx.labels.implementation()) {
            implementation.push(task);
        }
    }

    Ok(Plan {
        spec_markdown,
        implementation,
        tests,
    })
}

/// Builds a fresh `Orchestrator` bound to all its collaborators for each
/// queue run; the engine owns its per-run plan and caches and is dropped at
/// the end of the run.
pub struct OrchestratorFactory {
    config: OrchConfig,
    tracker: Arc<dyn IssueTracker>,
    service: Arc<dyn ExecutionService>,
    notifier: Arc<Notifier>,
    hub: Arc<LogHub>,
}

impl OrchestratorFactory {
    pub fn new(
        config: OrchConfig,
        tracker: Arc<dyn IssueTracker>,
        service: Arc<dyn ExecutionService>,
        notifier: Arc<Notifier>,
        hub: Arc<LogHub>,
    ) -> Self {
        Self {
            config,
            tracker,
            service,
            notifier,
            hub,
        }
    }

    pub fn build(&self, issue: u64) -> Orchestrator {
        let labels = Labels::new(&self.config.tracker.label_prefix);
        let reporter = StatusReporter::new(
            Arc::clone(&self.tracker),
            labels.clone(),
            Arc::clone(&self.notifier),
            issue,
            &self.config.status_table,
        );
        let failover = Arc::new(ModelFailover::new(
            self.config.status_resilience.model_failover.clone(),
        ));
        let watchdog = Arc::new(SessionWatchdog::new(Arc::clone(&self.service)));
        let executor = Arc::new(
            AgentExecutor::new(
                Arc::clone(&self.service),
                self.config.clone(),
                failover,
                watchdog,
                Arc::clone(&self.notifier),
                Arc::clone(&self.hub),
            )
            .with_sink(Arc::new(reporter.clone())),
        );

        Orchestrator::new(OrchContext {
            state: StateStore::new(Arc::clone(&self.tracker), labels.clone()),
            poller: TaskPoller::new(Arc::clone(&self.tracker), labels.clone()).with_interval(
                std::time::Duration::from_secs(self.config.execution.poll_interval),
            ),
            worktrees: Arc::new(WorktreeManager::new(
                &self.config.tracker,
                self.config.worktree.clone(),
            )),
            config: self.config.clone(),
            tracker: Arc::clone(&self.tracker),
            labels,
            executor,
            reporter,
            notifier: Arc::clone(&self.notifier),
            hub: Arc::clone(&self.hub),
        })
    }
}
