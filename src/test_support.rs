//! In-memory fakes of the capability interfaces, shared by unit and
//! integration tests. Not part of the public API contract.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::agent::{AgentOutcome, AgentRequest, ExecutionService, ProgressEvent};
use crate::error::{OrchError, Result};
use crate::tracker::{Comment, IssueTracker, NewPullRequest, PullRequest, Ticket};

#[derive(Default)]
struct MockTrackerInner {
    next_number: u64,
    issues: HashMap<u64, Ticket>,
    comments: HashMap<u64, Vec<Comment>>,
    closed: HashSet<u64>,
    pulls: HashMap<u64, PullRequest>,
}

/// In-memory issue tracker. Labels and bodies behave like the real one;
/// every mutation is observable through the inspection helpers.
#[derive(Default)]
pub struct MockTracker {
    inner: Mutex<MockTrackerInner>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_issue(&self, title: &str, body: &str, labels: &[String]) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_number += 1;
        let number = inner.next_number;
        inner.issues.insert(
            number,
            Ticket {
                number,
                title: title.to_string(),
                body: body.to_string(),
                labels: labels.to_vec(),
            },
        );
        number
    }

    pub fn labels_of(&self, number: u64) -> Vec<String> {
        self.inner
            .lock()
            .issues
            .get(&number)
            .map(|t| t.labels.clone())
            .unwrap_or_default()
    }

    pub fn body_of(&self, number: u64) -> String {
        self.inner
            .lock()
            .issues
            .get(&number)
            .map(|t| t.body.clone())
            .unwrap_or_default()
    }

    pub fn comments_of(&self, number: u64) -> Vec<String> {
        self.inner
            .lock()
            .comments
            .get(&number)
            .map(|cs| cs.iter().map(|c| c.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, number: u64) -> bool {
        self.inner.lock().closed.contains(&number)
    }

    pub fn issue_count(&self) -> usize {
        self.inner.lock().issues.len()
    }

    pub fn all_issues(&self) -> Vec<Ticket> {
        let mut issues: Vec<Ticket> = self.inner.lock().issues.values().cloned().collect();
        issues.sort_by_key(|t| t.number);
        issues
    }

    pub fn pulls(&self) -> Vec<PullRequest> {
        let mut pulls: Vec<PullRequest> = self.inner.lock().pulls.values().cloned().collect();
        pulls.sort_by_key(|p| p.number);
        pulls
    }

    /// Append a comment without going through the trait, for seeding test
    /// failure output.
    pub fn push_comment(&self, number: u64, body: &str) {
        self.inner
            .lock()
            .comments
            .entry(number)
            .or_default()
            .push(Comment {
                body: body.to_string(),
                created_at: Utc::now(),
            });
    }
}

#[async_trait]
impl IssueTracker for MockTracker {
    async fn get_issue(&self, number: u64) -> Result<Ticket> {
        self.inner
            .lock()
            .issues
            .get(&number)
            .cloned()
            .ok_or(OrchError::IssueNotFound(number))
    }

    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<Ticket> {
        let number = self.seed_issue(title, body, labels).await;
        self.get_issue(number).await
    }

    async fn update_body(&self, number: u64, body: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let ticket = inner
            .issues
            .get_mut(&number)
            .ok_or(OrchError::IssueNotFound(number))?;
        ticket.body = body.to_string();
        Ok(())
    }

    async fn close_issue(&self, number: u64) -> Result<()> {
        self.inner.lock().closed.insert(number);
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        let mut inner = self.inner.lock();
        let ticket = inner
            .issues
            .get_mut(&number)
            .ok_or(OrchError::IssueNotFound(number))?;
        for label in labels {
            if !ticket.labels.contains(label) {
                ticket.labels.push(label.clone());
            }
        }
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(ticket) = inner.issues.get_mut(&number) {
            ticket.labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn list_open_with_label(&self, label: &str) -> Result<Vec<Ticket>> {
        let inner = self.inner.lock();
        let mut matching: Vec<Ticket> = inner
            .issues
            .values()
            .filter(|t| !inner.closed.contains(&t.number) && t.labels.iter().any(|l| l == label))
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.number);
        Ok(matching)
    }

    async fn list_all_with_label(&self, label: &str) -> Result<Vec<Ticket>> {
        let inner = self.inner.lock();
        let mut matching: Vec<Ticket> = inner
            .issues
            .values()
            .filter(|t| t.labels.iter().any(|l| l == label))
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.number);
        Ok(matching)
    }

    async fn comment(&self, number: u64, body: &str) -> Result<()> {
        self.push_comment(number, body);
        Ok(())
    }

    async fn last_comment(&self, number: u64) -> Result<Option<Comment>> {
        Ok(self
            .inner
            .lock()
            .comments
            .get(&number)
            .and_then(|cs| cs.last().cloned()))
    }

    async fn create_pull_request(&self, new_pr: NewPullRequest) -> Result<PullRequest> {
        let mut inner = self.inner.lock();
        inner.next_number += 1;
        let number = inner.next_number;
        let pull = PullRequest {
            number,
            url: format!("https://example.test/pull/{}", number),
            body: new_pr.body.clone(),
        };
        inner.pulls.insert(number, pull.clone());
        Ok(pull)
    }

    async fn update_pull_request_body(&self, number: u64, body: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let pull = inner
            .pulls
            .get_mut(&number)
            .ok_or_else(|| OrchError::Tracker(format!("pull request {}: not found", number)))?;
        pull.body = body.to_string();
        Ok(())
    }
}

/// A scripted response for one execution-service call.
#[derive(Clone)]
pub enum ScriptedRun {
    /// Succeed with the given response text, emitting the events first.
    Succeed {
        response: String,
        events: Vec<ProgressEvent>,
    },
    /// Fail with an error built from the message.
    Fail(String),
    /// Report a hang for the given session id.
    Hang { session_id: String },
}

#[derive(Default)]
struct MockExecutionInner {
    script: Vec<ScriptedRun>,
    per_agent: HashMap<String, Vec<ScriptedRun>>,
    calls: Vec<AgentRequest>,
    latency: Duration,
    healthy: bool,
    killed_sessions: Vec<String>,
    /// Sessions the existence probe still reports alive.
    alive_sessions: HashSet<String>,
    has_existence_probe: bool,
}

/// Scripted execution service. Calls consume responses in order; once the
/// script is exhausted every call succeeds with an empty response.
pub struct MockExecution {
    inner: Mutex<MockExecutionInner>,
}

impl Default for MockExecution {
    fn default() -> Self {
        Self {
            inner: Mutex::new(MockExecutionInner {
                healthy: true,
                has_existence_probe: true,
                ..Default::default()
            }),
        }
    }
}

impl MockExecution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, run: ScriptedRun) {
        self.inner.lock().script.push(run);
    }

    /// Queue a response for a specific agent name; consumed before the
    /// order-based script.
    pub fn script_for(&self, agent: &str, run: ScriptedRun) {
        self.inner
            .lock()
            .per_agent
            .entry(agent.to_string())
            .or_default()
            .push(run);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.lock().healthy = healthy;
    }

    /// Simulated execution time per run, so tests can overlap label
    /// stamping with an in-flight agent.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    pub fn set_existence_probe(&self, available: bool) {
        self.inner.lock().has_existence_probe = available;
    }

    pub fn keep_session_alive(&self, session_id: &str) {
        self.inner.lock().alive_sessions.insert(session_id.to_string());
    }

    pub fn calls(&self) -> Vec<AgentRequest> {
        self.inner.lock().calls.clone()
    }

    pub fn killed_sessions(&self) -> Vec<String> {
        self.inner.lock().killed_sessions.clone()
    }
}

#[async_trait]
impl ExecutionService for MockExecution {
    async fn health(&self) -> Result<()> {
        if self.inner.lock().healthy {
            Ok(())
        } else {
            Err(OrchError::Other("connection refused".to_string()))
        }
    }

    async fn run_agent(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Result<AgentOutcome> {
        let (run, latency) = {
            let mut inner = self.inner.lock();
            inner.calls.push(request.clone());
            let script_empty = inner.script.is_empty();
            let run = match inner.per_agent.get_mut(&request.agent) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ if script_empty => None,
                _ => Some(inner.script.remove(0)),
            };
            (run, inner.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match run {
            None => Ok(AgentOutcome {
                response: String::new(),
                session_id: format!("session-{}", Utc::now().timestamp_micros()),
                duration: Duration::from_millis(1),
                tools_executed: 0,
            }),
            Some(ScriptedRun::Succeed { response, events: scripted }) => {
                let mut tools = 0;
                for event in scripted {
                    if matches!(event, ProgressEvent::ToolCompleted { .. }) {
                        tools += 1;
                    }
                    let _ = events.send(event).await;
                }
                Ok(AgentOutcome {
                    response,
                    session_id: format!("session-{}", Utc::now().timestamp_micros()),
                    duration: Duration::from_millis(1),
                    tools_executed: tools,
                })
            }
            Some(ScriptedRun::Fail(message)) => Err(OrchError::AgentExecution {
                agent: request.agent,
                message,
            }),
            Some(ScriptedRun::Hang { session_id }) => {
                let _ = events
                    .send(ProgressEvent::HangDetected {
                        session_id: session_id.clone(),
                    })
                    .await;
                Err(OrchError::SessionHung {
                    session_id,
                    agent: request.agent,
                })
            }
        }
    }

    async fn kill_session(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.killed_sessions.push(session_id.to_string());
        inner.alive_sessions.remove(session_id);
        Ok(())
    }

    async fn session_exists(&self, session_id: &str) -> Result<Option<bool>> {
        let inner = self.inner.lock();
        if !inner.has_existence_probe {
            return Ok(None);
        }
        Ok(Some(inner.alive_sessions.contains(session_id)))
    }
}

/// Shorthand for wiring a mock tracker into components that take the trait
/// object.
pub fn arc_tracker(tracker: MockTracker) -> Arc<dyn IssueTracker> {
    Arc::new(tracker)
}
