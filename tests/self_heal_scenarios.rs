//! Self-heal loop scenarios: recovery on a later attempt, exhaustion of
//! the attempt budget, and a fix that breaks a dependent test.

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use fixtures::{
    fix_count, scenario_config, scenario_factory, script_planners, spawn_butler, FailRule,
    TestRepo, WebhookCapture,
};
use ticket_pilot::error::OrchError;
use ticket_pilot::orchestrator::RunOutcome;
use ticket_pilot::test_support::{MockExecution, MockTracker};
use ticket_pilot::tracker::{Labels, OrchState};

const IMPL_TASKS: &str = r#"{"tasks": [
    {"id": "T001", "title": "Build the feature", "description": "All of it", "dependencies": []}
]}"#;

const ONE_TEST: &str = r#"{"tasks": [
    {"id": "V001", "title": "Verify A", "test_scenarios": ["happy path"], "dependencies": []}
]}"#;

const DEPENDENT_TESTS: &str = r#"{"tasks": [
    {"id": "V001", "title": "Verify A", "test_scenarios": ["happy path"], "dependencies": []},
    {"id": "V002", "title": "Verify B", "test_scenarios": ["downstream path"], "dependencies": ["V001"]}
]}"#;

struct Scenario {
    repo: TestRepo,
    webhook: WebhookCapture,
    tracker: Arc<MockTracker>,
    service: Arc<MockExecution>,
    labels: Labels,
    master: u64,
}

async fn scenario(test_tasks: &str) -> Scenario {
    let repo = TestRepo::init();
    let webhook = WebhookCapture::start().await;
    let tracker = Arc::new(MockTracker::new());
    let service = Arc::new(MockExecution::new());
    service.set_latency(Duration::from_millis(25));
    script_planners(&service, IMPL_TASKS, test_tasks);

    let master = tracker
        .seed_issue("Feature work", "Build the feature.", &[])
        .await;

    Scenario {
        repo,
        webhook,
        tracker,
        service,
        labels: Labels::new(""),
        master,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heals_on_third_fix_attempt() {
    let s = scenario(ONE_TEST).await;

    // The test fails until three fix attempts exist.
    let rule: FailRule = Arc::new(|tracker, ticket| {
        if ticket.title != "Verify A" {
            return false;
        }
        fix_count(tracker, &Labels::new(""), ticket.number) < 3
    });
    let butler = spawn_butler(s.tracker.clone(), s.labels.clone(), rule);

    let factory = scenario_factory(
        scenario_config(&s.repo, &s.webhook.url),
        s.tracker.clone(),
        s.service.clone(),
    );
    let outcome = factory.build(s.master).start(s.master).await.unwrap();
    butler.abort();

    assert_eq!(outcome, RunOutcome::Completed);

    let test_sub = s
        .tracker
        .all_issues()
        .into_iter()
        .find(|t| t.title == "Verify A")
        .unwrap()
        .number;
    let test_labels = s.tracker.labels_of(test_sub);
    assert!(!test_labels.contains(&s.labels.test_failed()));
    assert!(!test_labels.contains(&s.labels.max_attempts_reached()));

    // Three fix sub-tickets; only the third (the one that worked) closed.
    let fixes: Vec<_> = s
        .tracker
        .all_issues()
        .into_iter()
        .filter(|t| t.has_label(&s.labels.fix_attempt()))
        .collect();
    assert_eq!(fixes.len(), 3);
    let closed: Vec<bool> = fixes.iter().map(|f| s.tracker.is_closed(f.number)).collect();
    assert_eq!(closed, vec![false, false, true]);
    assert!(fixes[2].title.contains("(Attempt 3/10)"));

    assert_eq!(s.webhook.count_kind("test-failed"), 1);
    assert_eq!(s.webhook.count_kind("test-fix-started"), 3);
    assert_eq!(s.webhook.count_kind("test-fix-completed"), 3);
    assert_eq!(s.webhook.count_kind("test-passed-after-fix"), 1);
    s.webhook.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_test_reaches_max_attempts() {
    let s = scenario(ONE_TEST).await;

    // Never heals.
    let rule: FailRule = Arc::new(|_, ticket| ticket.title == "Verify A");
    let butler = spawn_butler(s.tracker.clone(), s.labels.clone(), rule);

    let factory = scenario_factory(
        scenario_config(&s.repo, &s.webhook.url),
        s.tracker.clone(),
        s.service.clone(),
    );
    let err = factory.build(s.master).start(s.master).await.unwrap_err();
    butler.abort();

    assert!(matches!(err, OrchError::MaxFixAttempts { attempts: 10, .. }));

    let test_sub = s
        .tracker
        .all_issues()
        .into_iter()
        .find(|t| t.title == "Verify A")
        .unwrap();
    assert!(test_sub.has_label(&s.labels.max_attempts_reached()));

    let fixes: Vec<_> = s
        .tracker
        .all_issues()
        .into_iter()
        .filter(|t| t.has_label(&s.labels.fix_attempt()))
        .collect();
    assert_eq!(fixes.len(), 10);

    assert!(s
        .tracker
        .labels_of(s.master)
        .contains(&s.labels.state(OrchState::Failed)));
    assert_eq!(s.webhook.count_kind("test-max-attempts-reached"), 1);
    s.webhook.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn fix_that_breaks_a_dependent_aborts_the_run() {
    let s = scenario(DEPENDENT_TESTS).await;

    // Verify A fails until it has one fix; Verify B regresses as soon as
    // that fix lands.
    let rule: FailRule = Arc::new(|tracker, ticket| {
        let labels = Labels::new("");
        match ticket.title.as_str() {
            "Verify A" => fix_count(tracker, &labels, ticket.number) < 1,
            "Verify B" => {
                let a = tracker
                    .all_issues()
                    .into_iter()
                    .find(|t| t.title == "Verify A")
                    .map(|t| t.number)
                    .unwrap_or(0);
                fix_count(tracker, &labels, a) >= 1
            }
            _ => false,
        }
    });
    let butler = spawn_butler(s.tracker.clone(), s.labels.clone(), rule);

    let factory = scenario_factory(
        scenario_config(&s.repo, &s.webhook.url),
        s.tracker.clone(),
        s.service.clone(),
    );
    let err = factory.build(s.master).start(s.master).await.unwrap_err();
    butler.abort();

    let (fixed, dependent) = match err {
        OrchError::DependentRegression { fixed, dependent } => (fixed, dependent),
        other => panic!("expected DependentRegression, got {:?}", other),
    };
    let a = s
        .tracker
        .all_issues()
        .into_iter()
        .find(|t| t.title == "Verify A")
        .unwrap()
        .number;
    let b = s
        .tracker
        .all_issues()
        .into_iter()
        .find(|t| t.title == "Verify B")
        .unwrap()
        .number;
    assert_eq!((fixed, dependent), (a, b));

    // The error message names both tickets.
    let message = OrchError::DependentRegression { fixed, dependent }.to_string();
    assert!(message.contains(&a.to_string()));
    assert!(message.contains(&b.to_string()));

    // The fix that broke the dependent stays open as evidence.
    let fix = s
        .tracker
        .all_issues()
        .into_iter()
        .find(|t| t.has_label(&s.labels.fix_attempt()))
        .unwrap();
    assert!(!s.tracker.is_closed(fix.number));

    assert!(s
        .tracker
        .labels_of(s.master)
        .contains(&s.labels.state(OrchState::Failed)));
    assert_eq!(s.webhook.count_kind("dependent-regression"), 1);
    s.webhook.stop();
}
