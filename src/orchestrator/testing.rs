use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;

use futures_util::future::join_all;
use regex::Regex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::agent::{craftsman_prompt, validator_prompt, AgentRole, ExecuteOptions};
use crate::error::{OrchError, Result};
use crate::graph::resolve_batches;
use crate::logstream::{LogEvent, LogLevel};
use crate::notification::EventKind;
use crate::status::MAX_FIX_ATTEMPTS;
use crate::vcs::{CommitInfo, Git};

use super::context::OrchContext;
use super::plan::{Plan, PlannedTask};

const RECENT_COMMIT_COUNT: usize = 5;
const MAX_STACK_FRAMES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct TestDetail {
    pub sub_issue: u64,
    pub task_id: String,
    pub title: String,
    pub passed: bool,
    pub fix_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub pass_rate: f64,
    pub details: Vec<TestDetail>,
}

/// Parsed failure context from the last comment on a failing test ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureContext {
    pub message: String,
    pub stack_frames: Vec<String>,
    pub logs: Vec<String>,
}

enum HealOutcome {
    Healed,
    Exhausted,
}

/// Testing: batched execution under a concurrency cap, then the bounded
/// self-heal loop for every failing test, then aggregation.
pub struct TestingStage<'a> {
    ctx: &'a OrchContext,
}

impl<'a> TestingStage<'a> {
    pub fn new(ctx: &'a OrchContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, issue: u64) -> Result<TestReport> {
        let plan = super::engine::reconstruct_plan(self.ctx, issue).await?;
        self.run_with_plan(issue, &plan).await
    }

    pub async fn run_with_plan(&self, issue: u64, plan: &Plan) -> Result<TestReport> {
        let ctx = self.ctx;
        let worktree = ctx.worktrees.create(issue).await?;

        // Phase A: execute all tests, capped. A batch always drains; what
        // happens after a failing batch is governed by configuration.
        let batches = resolve_batches(&plan.tests)?;
        let cap = ctx.config.execution.parallel.max_concurrency.resolve();
        let semaphore = Arc::new(Semaphore::new(cap));

        for batch in &batches {
            let results = join_all(batch.iter().map(|task| {
                let semaphore = Arc::clone(&semaphore);
                let worktree_path = worktree.path.clone();
                async move {
                    // The closed-semaphore case cannot happen; ignore errors.
                    let Ok(_permit) = semaphore.acquire().await else {
                        return (task, Ok(true));
                    };
                    let Some(sub) = task.sub_issue else {
                        return (task, Ok(true));
                    };
                    let result = self.run_validator(sub, &worktree_path).await;
                    if let Ok(passed) = &result {
                        info!(issue, test = %task.id, passed, "Test executed");
                    }
                    (task, result)
                }
            }))
            .await;

            for (task, result) in results {
                match result {
                    // Unreachable service and tracker failures are stage
                    // failures, not test failures.
                    Err(e) => return Err(e),
                    Ok(false) if !ctx.config.execution.testing.continue_on_failure => {
                        return Err(OrchError::Other(format!(
                            "test {} failed and continueOnFailure is disabled",
                            task.id
                        )));
                    }
                    Ok(_) => {}
                }
            }
        }

        // Phase B: identify failures from fresh label sets.
        let mut failing: Vec<&PlannedTask> = Vec::new();
        for task in &plan.tests {
            let Some(sub) = task.sub_issue else { continue };
            let ticket = ctx.tracker.get_issue(sub).await?;
            if ticket.has_label(&ctx.labels.test_failed()) || ticket.has_label(&ctx.labels.failed())
            {
                ctx.reporter
                    .on_event(EventKind::TestFailed, format!("{} (#{})", task.title, sub))
                    .await;
                failing.push(task);
            }
        }

        // Phase C: self-heal, sequential across failing tests.
        let mut exhausted: Vec<u64> = Vec::new();
        for task in failing {
            match self.self_heal(issue, plan, task, &worktree.path).await? {
                HealOutcome::Healed => {}
                HealOutcome::Exhausted => {
                    exhausted.push(task.sub_issue.unwrap_or_default());
                }
            }
        }

        // Phase D: aggregate from fresh state.
        let report = self.aggregate(plan).await?;
        info!(
            issue,
            passed = report.passed,
            failed = report.failed,
            "Testing stage aggregated"
        );

        if let Some(first) = exhausted.first() {
            return Err(OrchError::MaxFixAttempts {
                test: *first,
                attempts: MAX_FIX_ATTEMPTS,
            });
        }
        Ok(report)
    }

    /// Execute the validator against one test sub-ticket. A completed run
    /// passes iff the fresh label set carries neither failure label; agent
    /// errors and poll timeouts mark the test failed.
    async fn run_validator(&self, sub: u64, worktree: &Path) -> Result<bool> {
        let ctx = self.ctx;
        ctx.set_sub_state(sub, &ctx.labels.in_progress()).await?;

        let ticket = ctx.tracker.get_issue(sub).await?;
        let timeout = ctx.agent_timeout(AgentRole::Validator);

        let result = async {
            ctx.executor
                .execute(
                    AgentRole::Validator,
                    &validator_prompt(&ticket.title, &ticket.body, worktree),
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
                let fresh = ctx.tracker.get_issue(sub).await?;
                Ok(!fresh.has_label(&ctx.labels.test_failed())
                    && !fresh.has_label(&ctx.labels.failed()))
            }
            Err(e @ OrchError::ServerUnreachable { .. }) => Err(e),
            Err(e) => {
                warn!(sub, error = %e, "Validator run failed, marking test-failed");
                ctx.tracker
                    .add_labels(sub, &[ctx.labels.test_failed()])
                    .await?;
                Ok(false)
            }
        }
    }

    async fn self_heal(
        &self,
        issue: u64,
        plan: &Plan,
        task: &PlannedTask,
        worktree: &Path,
    ) -> Result<HealOutcome> {
        let ctx = self.ctx;
        let test_sub = task
            .sub_issue
            .ok_or_else(|| OrchError::Planning(format!("test {} has no sub-ticket", task.id)))?;

        for attempt in 1..=MAX_FIX_ATTEMPTS {
            ctx.hub.publish(
                LogEvent::new(
                    LogLevel::Info,
                    format!("Fix attempt {}/{} for test #{}", attempt, MAX_FIX_ATTEMPTS, test_sub),
                )
                .with_issue(issue)
                .with_sub_issue(test_sub)
                .with_stage("testing"),
            );

            // 1. Failure context from the last comment.
            let failure = match ctx.tracker.last_comment(test_sub).await? {
                Some(comment) => parse_failure_context(&comment.body),
                None => FailureContext::generic(),
            };

            // 2. Recent history from the worktree.
            let commits = Git::new(worktree)
                .recent_commits(RECENT_COMMIT_COUNT)
                .await
                .unwrap_or_default();

            // 3. Fix sub-ticket.
            let test_ticket = ctx.tracker.get_issue(test_sub).await?;
            let fix = ctx
                .tracker
                .create_issue(
                    &format!(
                        "[Fix] {} (Attempt {}/{})",
                        test_ticket.title, attempt, MAX_FIX_ATTEMPTS
                    ),
                    &fix_body(&test_ticket.body, &failure, &commits, attempt),
                    &[
                        ctx.labels.sub_issue(),
                        ctx.labels.fix_attempt(),
                        ctx.labels.implementation(),
                        ctx.labels.master_ref(issue),
                        ctx.labels.test_ref(test_sub),
                        ctx.labels.attempt(attempt),
                    ],
                )
                .await?;
            ctx.tracker
                .comment(
                    test_sub,
                    &format!("Fix attempt {}/{}: #{}", attempt, MAX_FIX_ATTEMPTS, fix.number),
                )
                .await?;
            ctx.reporter
                .on_event(
                    EventKind::TestFixStarted,
                    format!("test #{} attempt {}/{}", test_sub, attempt, MAX_FIX_ATTEMPTS),
                )
                .await;

            // 4. Run the fix.
            let timeout = ctx.agent_timeout(AgentRole::Craftsman);
            let fix_result = async {
                ctx.executor
                    .execute(
                        AgentRole::Craftsman,
                        &craftsman_prompt(&fix.title, &fix.body, worktree),
                        ExecuteOptions {
                            sub_issue: Some(fix.number),
                            working_dir: Some(worktree.to_path_buf()),
                            timeout: Some(timeout),
                        },
                    )
                    .await?;
                ctx.poller.wait_for_completion(fix.number, timeout).await
            }
            .await;

            match fix_result {
                Ok(()) => {
                    ctx.reporter
                        .on_event(
                            EventKind::TestFixCompleted,
                            format!("test #{} attempt {}/{}", test_sub, attempt, MAX_FIX_ATTEMPTS),
                        )
                        .await;
                }
                Err(e @ OrchError::ServerUnreachable { .. }) => return Err(e),
                Err(e) => {
                    warn!(fix = fix.number, error = %e, "Fix agent failed, consuming attempt");
                    ctx.tracker
                        .add_labels(fix.number, &[ctx.labels.failed()])
                        .await?;
                    if attempt == MAX_FIX_ATTEMPTS {
                        self.mark_exhausted(test_sub).await?;
                        return Ok(HealOutcome::Exhausted);
                    }
                    continue;
                }
            }

            // 5. Re-run the test.
            ctx.clear_test_outcome(test_sub).await?;
            let passed = self.run_validator(test_sub, worktree).await?;

            if passed {
                // 6. Success. The fix closes only once its dependents
                // re-run clean; a regression leaves it open as evidence.
                ctx.tracker
                    .comment(
                        test_sub,
                        &format!("Test passing after fix attempt {} (#{})", attempt, fix.number),
                    )
                    .await?;
                ctx.reporter
                    .on_event(
                        EventKind::TestPassedAfterFix,
                        format!("test #{} fixed on attempt {}", test_sub, attempt),
                    )
                    .await;

                self.rerun_dependents(plan, task, test_sub, worktree).await?;
                ctx.tracker.close_issue(fix.number).await?;
                return Ok(HealOutcome::Healed);
            }

            if attempt == MAX_FIX_ATTEMPTS {
                // 7. Exhausted.
                self.mark_exhausted(test_sub).await?;
                return Ok(HealOutcome::Exhausted);
            }
        }

        unreachable!("fix attempt loop returns inside its final iteration");
    }

    /// Re-run every test that declares a dependency on the fixed one; a
    /// dependent that now fails means the fix broke it.
    async fn rerun_dependents(
        &self,
        plan: &Plan,
        fixed: &PlannedTask,
        fixed_sub: u64,
        worktree: &Path,
    ) -> Result<()> {
        let ctx = self.ctx;
        for dependent in plan.dependents_of_test(&fixed.id) {
            let Some(dep_sub) = dependent.sub_issue else {
                continue;
            };
            ctx.clear_test_outcome(dep_sub).await?;
            let passed = self.run_validator(dep_sub, worktree).await?;
            if !passed {
                ctx.reporter
                    .on_event(
                        EventKind::DependentRegression,
                        format!("fix for #{} broke dependent test #{}", fixed_sub, dep_sub),
                    )
                    .await;
                return Err(OrchError::DependentRegression {
                    fixed: fixed_sub,
                    dependent: dep_sub,
                });
            }
        }
        Ok(())
    }

    async fn mark_exhausted(&self, test_sub: u64) -> Result<()> {
        let ctx = self.ctx;
        ctx.tracker
            .add_labels(test_sub, &[ctx.labels.max_attempts_reached()])
            .await?;
        ctx.tracker
            .comment(
                test_sub,
                &format!(
                    "Still failing after {} fix attempts; giving up.",
                    MAX_FIX_ATTEMPTS
                ),
            )
            .await?;
        ctx.reporter
            .on_event(
                EventKind::TestMaxAttemptsReached,
                format!("test #{} permanently failed", test_sub),
            )
            .await;
        Ok(())
    }

    async fn aggregate(&self, plan: &Plan) -> Result<TestReport> {
        let ctx = self.ctx;
        let mut details = Vec::new();

        for task in &plan.tests {
            let Some(sub) = task.sub_issue else { continue };
            let ticket = ctx.tracker.get_issue(sub).await?;
            let passed = !ticket.has_label(&ctx.labels.test_failed())
                && !ticket.has_label(&ctx.labels.failed())
                && !ticket.has_label(&ctx.labels.max_attempts_reached());
            let fix_attempts = ctx
                .tracker
                .list_all_with_label(&ctx.labels.test_ref(sub))
                .await?
                .len() as u32;

            details.push(TestDetail {
                sub_issue: sub,
                task_id: task.id.clone(),
                title: task.title.clone(),
                passed,
                fix_attempts,
            });
        }

        let total = details.len();
        let passed = details.iter().filter(|d| d.passed).count();
        Ok(TestReport {
            passed,
            failed: total - passed,
            total,
            pass_rate: if total == 0 {
                1.0
            } else {
                passed as f64 / total as f64
            },
            details,
        })
    }
}

impl FailureContext {
    fn generic() -> Self {
        Self {
            message: "No structured failure details found in the test output".to_string(),
            stack_frames: Vec::new(),
            logs: Vec::new(),
        }
    }
}

fn failure_message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:Error|AssertionError|FAILED|Exception):\s*(.+)$")
            .expect("failure message pattern compiles")
    })
}

fn stack_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // `at fn (file:line:col)` and the bare `at file:line:col` form.
        Regex::new(r"(?m)^\s*at\s+.+:\d+:\d+\)?\s*$").expect("stack frame pattern compiles")
    })
}

/// Pull structured failure details out of a test comment: the first error
/// line, up to ten stack frames, and all fenced code blocks as logs.
pub fn parse_failure_context(comment: &str) -> FailureContext {
    let message = failure_message_re()
        .captures(comment)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    let stack_frames: Vec<String> = stack_frame_re()
        .find_iter(comment)
        .take(MAX_STACK_FRAMES)
        .map(|m| m.as_str().trim().to_string())
        .collect();

    let logs = fenced_blocks(comment);

    match message {
        Some(message) => FailureContext {
            message,
            stack_frames,
            logs,
        },
        None if stack_frames.is_empty() && logs.is_empty() => FailureContext::generic(),
        None => FailureContext {
            message: "Unrecognized failure output".to_string(),
            stack_frames,
            logs,
        },
    }
}

fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => blocks.push(block.trim_end().to_string()),
                None => current = Some(String::new()),
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    blocks
}

fn fix_body(
    test_body: &str,
    failure: &FailureContext,
    commits: &[CommitInfo],
    attempt: u32,
) -> String {
    let mut body = format!(
        "Fix attempt {}/{}\n\n## Test Requirements\n\n{}\n\n## Failure\n\n{}\n",
        attempt, MAX_FIX_ATTEMPTS, test_body, failure.message
    );

    if !failure.stack_frames.is_empty() {
        body.push_str("\n### Stack\n\n```\n");
        for frame in &failure.stack_frames {
            body.push_str(frame);
            body.push('\n');
        }
        body.push_str("```\n");
    }

    for log in &failure.logs {
        body.push_str("\n### Log\n\n```\n");
        body.push_str(log);
        body.push_str("\n```\n");
    }

    if !commits.is_empty() {
        body.push_str("\n## Recent Commits\n\n");
        for commit in commits {
            body.push_str(&format!(
                "- {} {} ({}, {})\n",
                commit.short_hash, commit.subject, commit.author, commit.date
            ));
        }
    }

    body.push_str(&format!("\n<!-- attempt: {} -->\n", attempt));
    body
}
