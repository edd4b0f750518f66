//! Shared fixtures for the scenario tests: a throwaway git repo with an
//! origin, a webhook capture server, and the "remote agent" butler that
//! stamps completion labels the way the real execution service would.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use ticket_pilot::config::OrchConfig;
use ticket_pilot::logstream::LogHub;
use ticket_pilot::notification::Notifier;
use ticket_pilot::orchestrator::OrchestratorFactory;
use ticket_pilot::test_support::{MockExecution, MockTracker, ScriptedRun};
use ticket_pilot::tracker::{IssueTracker, Labels, Ticket};

/// A local repository with a bare origin, so worktree creation, pushes and
/// log inspection all work offline.
pub struct TestRepo {
    pub root: TempDir,
    pub work: PathBuf,
    pub worktree_base: PathBuf,
}

impl TestRepo {
    pub fn init() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let origin = root.path().join("origin.git");
        let work = root.path().join("work");
        let worktree_base = root.path().join("worktrees");
        std::fs::create_dir_all(&worktree_base).expect("create worktree base");

        git(root.path(), &["init", "--bare", "-b", "main", "origin.git"]);
        git(root.path(), &["init", "-b", "main", "work"]);
        std::fs::write(work.join("README.md"), "# demo\n").expect("write README");
        git(&work, &["add", "."]);
        git(&work, &["commit", "-m", "initial commit"]);
        git(
            &work,
            &["remote", "add", "origin", origin.to_str().unwrap()],
        );
        git(&work, &["push", "-u", "origin", "main"]);

        Self {
            root,
            work,
            worktree_base,
        }
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-c")
        .arg("user.name=fixture")
        .arg("-c")
        .arg("user.email=fixture@example.test")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Captures webhook deliveries so scenario tests can assert on the event
/// kinds the notifier sent.
pub struct WebhookCapture {
    pub url: String,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
    handle: JoinHandle<()>,
}

impl WebhookCapture {
    pub async fn start() -> Self {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));

        async fn capture(
            State(received): State<Arc<Mutex<Vec<serde_json::Value>>>>,
            body: String,
        ) -> &'static str {
            let value = serde_json::from_str(&body)
                .unwrap_or_else(|_| serde_json::json!({"raw": body}));
            received.lock().push(value);
            "ok"
        }

        let router = Router::new()
            .route("/", post(capture))
            .with_state(Arc::clone(&received));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind webhook capture");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            url: format!("http://{}/", addr),
            received,
            handle,
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|v| v["embeds"][0]["title"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.titles()
            .iter()
            .filter(|t| t.contains(kind))
            .count()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

pub const SPEC_RESPONSE: &str = r#"{
    "requirements": ["users can log in with Google"],
    "acceptance_criteria": ["a valid Google account signs in"],
    "technical_approach": "OAuth2 authorization-code flow",
    "edge_cases": ["expired refresh token"],
    "dependencies": [],
    "complexity": "medium"
}"#;

/// A runnable configuration pointed at the fixture repo and webhook.
pub fn scenario_config(repo: &TestRepo, webhook_url: &str) -> OrchConfig {
    let mut config = OrchConfig::default();
    config.tracker.owner = "acme".to_string();
    config.tracker.repo = "demo".to_string();
    config.tracker.repo_path = repo.work.clone();
    config.tracker.base_branch = "main".to_string();
    config.worktree.base_path = repo.worktree_base.clone();
    config.worktree.cleanup_on_completion = false;
    config.worktree.cleanup_on_failure = false;
    config.execution.auto_approve = true;
    config.execution.poll_interval = 1;
    config.notifier.webhook_url = webhook_url.to_string();
    config
}

/// Script the three planning agents with canned JSON responses.
pub fn script_planners(service: &MockExecution, impl_tasks: &str, test_tasks: &str) {
    service.script_for(
        "architect",
        ScriptedRun::Succeed {
            response: SPEC_RESPONSE.to_string(),
            events: vec![],
        },
    );
    service.script_for(
        "sculptor",
        ScriptedRun::Succeed {
            response: impl_tasks.to_string(),
            events: vec![],
        },
    );
    service.script_for(
        "sentinel",
        ScriptedRun::Succeed {
            response: test_tasks.to_string(),
            events: vec![],
        },
    );
}

/// Assemble the factory over the mocks the way the service entry point
/// does over the real clients.
pub fn scenario_factory(
    config: OrchConfig,
    tracker: Arc<MockTracker>,
    service: Arc<MockExecution>,
) -> OrchestratorFactory {
    let tracker: Arc<dyn IssueTracker> = tracker;
    OrchestratorFactory::new(
        config.clone(),
        tracker,
        service,
        Arc::new(Notifier::new(config.notifier.clone())),
        Arc::new(LogHub::new(config.service.max_buffer_size)),
    )
}

/// Decides whether a just-completed test run should be marked failed.
pub type FailRule = Arc<dyn Fn(&MockTracker, &Ticket) -> bool + Send + Sync>;

pub fn never_fail() -> FailRule {
    Arc::new(|_, _| false)
}

/// Count the fix attempts recorded against a test sub-ticket.
pub fn fix_count(tracker: &MockTracker, labels: &Labels, test_sub: u64) -> usize {
    let test_ref = labels.test_ref(test_sub);
    tracker
        .all_issues()
        .iter()
        .filter(|t| t.labels.iter().any(|l| *l == test_ref))
        .count()
}

/// Plays the remote agent: any sub-ticket that is in progress (or is a fix
/// attempt) gets its completion label stamped, with `test-failed` first
/// when the rule says the run failed.
pub fn spawn_butler(
    tracker: Arc<MockTracker>,
    labels: Labels,
    fail_rule: FailRule,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            for ticket in tracker.all_issues() {
                if !ticket.has_label(&labels.sub_issue())
                    || ticket.has_label(&labels.agent_complete())
                {
                    continue;
                }
                let is_fix = ticket.has_label(&labels.fix_attempt());
                if !is_fix && !ticket.has_label(&labels.in_progress()) {
                    continue;
                }

                if !is_fix
                    && ticket.has_label(&labels.test())
                    && fail_rule(&tracker, &ticket)
                {
                    let _ = tracker
                        .add_labels(ticket.number, &[labels.test_failed()])
                        .await;
                }
                let _ = tracker
                    .add_labels(ticket.number, &[labels.agent_complete()])
                    .await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}
