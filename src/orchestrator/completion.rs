use tracing::info;

use crate::error::Result;
use crate::logstream::{LogEvent, LogLevel};
use crate::notification::EventKind;
use crate::tracker::{NewPullRequest, OrchState};
use crate::vcs::Git;

use super::context::OrchContext;
use super::plan::Plan;

/// Completion: push the branch, open the change request, link it back,
/// stamp the terminal label.
pub struct CompletionStage<'a> {
    ctx: &'a OrchContext,
}

impl<'a> CompletionStage<'a> {
    pub fn new(ctx: &'a OrchContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, issue: u64) -> Result<()> {
        let plan = super::engine::reconstruct_plan(self.ctx, issue).await?;
        self.run_with_plan(issue, &plan).await
    }

    pub async fn run_with_plan(&self, issue: u64, plan: &Plan) -> Result<()> {
        let ctx = self.ctx;
        let worktree = ctx.worktrees.create(issue).await?;
        let git = Git::new(&worktree.path);
        let base = ctx.config.tracker.base_branch.clone();

        let branch = git.current_branch().await?;
        git.push("origin", &branch).await?;

        let commits = git.commits_since(&format!("origin/{}", base)).await?;
        let changed_files = git.changed_files(&format!("origin/{}", base)).await?;
        let diff_stat = git.diff_stat(&format!("origin/{}", base)).await?;

        // A deployment may want the branch without a change request.
        if !ctx.config.tracker.create_pr {
            ctx.tracker
                .comment(
                    issue,
                    &format!("Branch `{}` pushed; change request creation is disabled.", branch),
                )
                .await?;
            ctx.state.transition(issue, OrchState::Completed).await?;
            self.finish(issue, format!("branch {} pushed", branch)).await?;
            return Ok(());
        }

        let mut body = pr_body(issue, plan, &commits, &changed_files, &diff_stat);
        let closes = format!("Closes #{}", issue);
        if !body.contains(&closes) {
            body.push_str(&format!("\n{}\n", closes));
        }

        let pull = ctx
            .tracker
            .create_pull_request(NewPullRequest {
                title: format!("[orch] Issue #{}", issue),
                body,
                head: branch.clone(),
                base,
                labels: vec![ctx.labels.orchestrated()],
            })
            .await?;

        // The tracker may template the body; make sure the close clause
        // survived.
        if !pull.body.contains(&closes) {
            let amended = format!("{}\n{}\n", pull.body.trim_end(), closes);
            ctx.tracker
                .update_pull_request_body(pull.number, &amended)
                .await?;
        }

        ctx.tracker
            .comment(issue, &format!("Change request opened: {}", pull.url))
            .await?;

        ctx.state.transition(issue, OrchState::Completed).await?;
        ctx.state.transition(issue, OrchState::PrCreated).await?;

        info!(issue, pr = pull.number, url = %pull.url, "Orchestration complete");
        ctx.hub.publish(
            LogEvent::new(LogLevel::Info, format!("Change request opened: {}", pull.url))
                .with_issue(issue)
                .with_stage("completing"),
        );

        self.finish(issue, pull.url.clone()).await?;
        Ok(())
    }

    async fn finish(&self, issue: u64, message: String) -> Result<()> {
        let ctx = self.ctx;
        if ctx.config.tracker.close_sub_on_completion {
            self.close_sub_tickets(issue).await?;
        }
        ctx.reporter
            .on_event(EventKind::OrchestrationComplete, message)
            .await;
        ctx.reporter.stop_periodic();
        Ok(())
    }

    /// Close the implementation and test sub-tickets. Fix attempts stay
    /// open as the audit trail.
    async fn close_sub_tickets(&self, issue: u64) -> Result<()> {
        let ctx = self.ctx;
        let subs = ctx
            .tracker
            .list_open_with_label(&ctx.labels.master_ref(issue))
            .await?;
        for sub in subs {
            if sub.has_label(&ctx.labels.fix_attempt()) {
                continue;
            }
            ctx.tracker.close_issue(sub.number).await?;
        }
        Ok(())
    }
}

fn pr_body(
    issue: u64,
    plan: &Plan,
    commits: &[String],
    changed_files: &[String],
    diff_stat: &str,
) -> String {
    let mut body = format!(
        "Automated change for issue #{}.\n\n## Specification\n\n{}\n\n\
         ## Work\n\n{} implementation tasks, {} test tasks.\n",
        issue,
        plan.spec_markdown,
        plan.implementation.len(),
        plan.tests.len()
    );

    if !commits.is_empty() {
        body.push_str("\n## Commits\n\n");
        for commit in commits {
            body.push_str(&format!("- {}\n", commit));
        }
    }

    if !changed_files.is_empty() {
        body.push_str(&format!("\n## Changed Files ({})\n\n", changed_files.len()));
        for file in changed_files {
            body.push_str(&format!("- `{}`\n", file));
        }
    }

    if !diff_stat.trim().is_empty() {
        body.push_str(&format!("\n## Diff\n\n```\n{}\n```\n", diff_stat.trim_end()));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::plan::Specification;

    fn plan() -> Plan {
        Plan {
            spec_markdown: Specification::parse(
                r#"{"requirements":["r"],"acceptance_criteria":["a"],"technical_approach":"t"}"#,
            )
            .unwrap()
            .to_markdown(),
            implementation: vec![],
            tests: vec![],
        }
    }

    #[test]
    fn pr_body_lists_stats() {
        let body = pr_body(
            7,
            &plan(),
            &["abc123 Add login".to_string()],
            &["src/login.rs".to_string()],
            " 1 file changed",
        );
        assert!(body.contains("issue #7"));
        assert!(body.contains("abc123 Add login"));
        assert!(body.contains("`src/login.rs`"));
        assert!(body.contains("1 file changed"));
    }

    #[test]
    fn closes_clause_is_appended_when_absent() {
        let mut body = pr_body(9, &plan(), &[], &[], "");
        assert!(!body.contains("Closes #9"));
        let closes = "Closes #9".to_string();
        if !body.contains(&closes) {
            body.push_str(&closes);
        }
        assert!(body.contains("Closes #9"));
    }
}
