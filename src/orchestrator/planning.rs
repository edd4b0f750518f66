use tracing::info;

use crate::agent::{architect_prompt, sculptor_prompt, sentinel_prompt, AgentRole, ExecuteOptions};
use crate::error::Result;
use crate::logstream::{LogEvent, LogLevel};
use crate::notification::EventKind;
use crate::retry::RetryPolicy;
use crate::status::{render_table, SubTaskStatus, TaskRowData};
use crate::tracker::{IssueBody, OrchState, ProgressMarkers};

use super::context::OrchContext;
use super::plan::{parse_tasks, task_body, Plan, PlannedTask, Specification, TaskKind};

/// Planning: one architect pass for the specification, then the two
/// planners in parallel, then one sub-ticket per task.
pub struct PlanningStage<'a> {
    ctx: &'a OrchContext,
}

impl<'a> PlanningStage<'a> {
    pub fn new(ctx: &'a OrchContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, issue: u64) -> Result<Plan> {
        let ctx = self.ctx;
        let master = ctx.tracker.get_issue(issue).await?;
        let original_request = IssueBody::parse(&master.body).original_request;

        ctx.hub.publish(
            LogEvent::new(LogLevel::Info, "Planning started")
                .with_issue(issue)
                .with_stage("planning"),
        );

        // Architect: specification from the original request. A response
        // that fails validation is retried within the configured budget.
        let retry = RetryPolicy::from_config(&ctx.config.execution.retry);
        let architect_input = architect_prompt(&original_request);
        let spec = retry
            .execute("architect-specification", {
                let prompt = architect_input.as_str();
                move || async move {
                    let run = ctx
                        .executor
                        .execute(
                            AgentRole::Architect,
                            prompt,
                            ExecuteOptions {
                                timeout: Some(ctx.agent_timeout(AgentRole::Architect)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    Specification::parse(&run.response)
                }
            })
            .await?;

        // Spec-only block first; plan and table come after the planners.
        let body = IssueBody::compose(&original_request, &spec.to_markdown(), None, None);
        ctx.tracker.update_body(issue, &body).await?;
        ctx.reporter.start_periodic();

        // The planners see the specification without the original request
        // and run in parallel, each with its own retry budget.
        let spec_md = spec.to_markdown();
        let sculptor_input = sculptor_prompt(&spec_md);
        let sentinel_input = sentinel_prompt(&spec_md);
        let (mut implementation, mut tests) = tokio::try_join!(
            self.run_planner(
                AgentRole::Sculptor,
                &sculptor_input,
                TaskKind::Implementation
            ),
            self.run_planner(AgentRole::Sentinel, &sentinel_input, TaskKind::Test),
        )?;

        self.create_sub_tickets(issue, &mut implementation, TaskKind::Implementation)
            .await?;
        self.create_sub_tickets(issue, &mut tests, TaskKind::Test)
            .await?;

        let plan = Plan {
            spec_markdown: spec.to_markdown(),
            implementation,
            tests,
        };

        // Full block: spec, quoted request, plan summary, live table.
        let table = render_table(&initial_rows(&plan), ctx.config.status_table.show_retry_history);
        let body = IssueBody::compose(
            &original_request,
            &plan.spec_markdown,
            Some(&plan.summary()),
            Some(&table),
        );
        ctx.tracker.update_body(issue, &body).await?;

        info!(
            issue,
            implementation = plan.implementation.len(),
            tests = plan.tests.len(),
            "Planning complete"
        );
        ctx.reporter
            .on_event(
                EventKind::PlanningComplete,
                format!(
                    "{} implementation tasks, {} test tasks",
                    plan.implementation.len(),
                    plan.tests.len()
                ),
            )
            .await;
        ctx.state.transition(issue, OrchState::AwaitingApproval).await?;

        Ok(plan)
    }

    async fn run_planner(
        &self,
        role: AgentRole,
        prompt: &str,
        kind: TaskKind,
    ) -> Result<Vec<PlannedTask>> {
        let ctx = self.ctx;
        RetryPolicy::from_config(&ctx.config.execution.retry)
            .execute(role.as_str(), move || async move {
                let run = ctx
                    .executor
                    .execute(
                        role,
                        prompt,
                        ExecuteOptions {
                            timeout: Some(ctx.agent_timeout(role)),
                            ..Default::default()
                        },
                    )
                    .await?;
                parse_tasks(&run.response, kind)
            })
            .await
    }

    async fn create_sub_tickets(
        &self,
        issue: u64,
        tasks: &mut [PlannedTask],
        kind: TaskKind,
    ) -> Result<()> {
        let labels = &self.ctx.labels;
        let role_label = match kind {
            TaskKind::Implementation => labels.implementation(),
            TaskKind::Test => labels.test(),
        };

        for task in tasks.iter_mut() {
            let ticket = self
                .ctx
                .tracker
                .create_issue(
                    &task.title,
                    &task_body(task, kind),
                    &[
                        labels.sub_issue(),
                        role_label.clone(),
                        labels.master_ref(issue),
                        labels.pending(),
                    ],
                )
                .await?;
            task.sub_issue = Some(ticket.number);
        }
        Ok(())
    }
}

fn initial_rows(plan: &Plan) -> Vec<TaskRowData> {
    plan.implementation
        .iter()
        .map(|t| (t, false))
        .chain(plan.tests.iter().map(|t| (t, true)))
        .filter_map(|(task, is_test)| {
            task.sub_issue.map(|sub| TaskRowData {
                sub_issue: sub,
                title: task.title.clone(),
                status: SubTaskStatus::Pending,
                markers: ProgressMarkers::default(),
                is_test,
                fix_attempts: 0,
            })
        })
        .collect()
}
