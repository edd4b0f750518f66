use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::OrchConfig;
use crate::error::{OrchError, Result};
use crate::logstream::{current_log_path, LogEvent, LogHub, LogLevel};
use crate::notification::{Event, EventKind, Notifier};
use crate::resilience::{FailoverDecision, ModelFailover, SessionWatchdog, TerminationOutcome};

use super::client::{AgentOutcome, AgentRequest, ExecutionService};
use super::events::ProgressEvent;
use super::roles::AgentRole;

/// Budget for the pre-flight health check.
const HEALTH_BUDGET: Duration = Duration::from_secs(5);

/// How many times a hung execution is retried with a refreshed model.
const MAX_FAILOVER_ATTEMPTS: u32 = 3;

/// Consumer of live progress, keyed by sub-ticket. The status reporter is
/// the production implementation; tests plug in their own.
pub trait ProgressSink: Send + Sync {
    fn on_retry(&self, sub_issue: u64, retry_count: u32);
    fn on_tool_completed(&self, sub_issue: u64, tools_total: u32);
    fn on_message(&self, sub_issue: u64, text: &str);
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Sub-ticket this run belongs to; progress events are attributed to it.
    pub sub_issue: Option<u64>,
    pub working_dir: Option<PathBuf>,
    /// Override of the per-agent configured timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AgentRun {
    pub response: String,
    pub session_id: String,
    pub duration: Duration,
    pub attempts: u32,
    pub tools_executed: u32,
}

/// Executes one agent role against the execution service, routing progress
/// events to the status sink and hangs to the resilience layer.
pub struct AgentExecutor {
    service: Arc<dyn ExecutionService>,
    config: OrchConfig,
    failover: Arc<ModelFailover>,
    watchdog: Arc<SessionWatchdog>,
    notifier: Arc<Notifier>,
    hub: Arc<LogHub>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl AgentExecutor {
    pub fn new(
        service: Arc<dyn ExecutionService>,
        config: OrchConfig,
        failover: Arc<ModelFailover>,
        watchdog: Arc<SessionWatchdog>,
        notifier: Arc<Notifier>,
        hub: Arc<LogHub>,
    ) -> Self {
        Self {
            service,
            config,
            failover,
            watchdog,
            notifier,
            hub,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub async fn execute(
        &self,
        role: AgentRole,
        prompt: &str,
        options: ExecuteOptions,
    ) -> Result<AgentRun> {
        let entry = self.config.agent_entry(role.as_str());
        let agent_name = if entry.agent.is_empty() {
            role.as_str().to_string()
        } else {
            entry.agent.clone()
        };

        self.preflight().await?;

        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_secs(entry.timeout));
        let mut attempts = 0;

        loop {
            attempts += 1;
            let model = self.failover.current_model_for(role.as_str(), &entry.model);

            self.hub.publish(
                LogEvent::new(
                    LogLevel::Info,
                    format!("Executing {} (attempt {})", role, attempts),
                )
                .with_agent(role.as_str()),
            );

            let mut request = AgentRequest::new(&agent_name, model.clone(), prompt)
                .with_timeout(timeout);
            if let Some(dir) = &options.working_dir {
                request = request.with_working_dir(dir);
            }

            match self.run_once(role, request, &options).await {
                Ok(outcome) => {
                    // Success resets the failover state for this agent.
                    self.failover.reset_agent(role.as_str());
                    self.dump_debug(role, prompt, Some(&outcome)).await;
                    return Ok(AgentRun {
                        response: outcome.response,
                        session_id: outcome.session_id,
                        duration: outcome.duration,
                        attempts,
                        tools_executed: outcome.tools_executed,
                    });
                }
                Err(OrchError::SessionHung { session_id, .. }) => {
                    if !self.config.status_resilience.features.hang_recovery {
                        warn!(role = %role, "Hang recovery disabled, failing the attempt");
                        return Err(OrchError::SessionHung {
                            session_id,
                            agent: role.as_str().to_string(),
                        }
                        .no_retry());
                    }
                    self.handle_hung_session(role, &session_id).await;

                    let decision =
                        self.failover
                            .on_model_timeout(role.as_str(), &entry.model, &session_id);
                    match decision {
                        FailoverDecision::SwitchedTo { from, to } => {
                            self.notifier
                                .notify(
                                    &Event::new(EventKind::ModelFailover).with_message(format!(
                                        "{}: {} -> {}",
                                        role, from, to
                                    )),
                                )
                                .await;
                            if attempts < MAX_FAILOVER_ATTEMPTS {
                                continue;
                            }
                        }
                        FailoverDecision::NoFailback => {
                            warn!(role = %role, "No failback model configured");
                        }
                        FailoverDecision::MaxFailoversExceeded => {
                            warn!(role = %role, "Max failovers exceeded");
                        }
                        FailoverDecision::Disabled => {}
                    }

                    return Err(OrchError::SessionHung {
                        session_id,
                        agent: role.as_str().to_string(),
                    }
                    .no_retry());
                }
                Err(e) => {
                    self.dump_debug(role, prompt, None).await;
                    return Err(e);
                }
            }
        }
    }

    /// Health check of the execution service with a fixed budget. Failure
    /// attaches the current log file so the notification carries context.
    async fn preflight(&self) -> Result<()> {
        let check = tokio::time::timeout(HEALTH_BUDGET, self.service.health()).await;
        let message = match check {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("health check exceeded {}s budget", HEALTH_BUDGET.as_secs()),
        };

        Err(OrchError::ServerUnreachable {
            message,
            log_path: Some(current_log_path(&self.config.logging.log_dir)),
        })
    }

    /// One run against the service: submit, consume the event stream, watch
    /// for silence. Returns `SessionHung` when the session stops making
    /// progress inside its budget.
    async fn run_once(
        &self,
        role: AgentRole,
        request: AgentRequest,
        options: &ExecuteOptions,
    ) -> Result<AgentOutcome> {
        let hang_threshold = Duration::from_secs(
            self.config
                .status_resilience
                .model_failover
                .timeout_threshold_seconds
                .max(1),
        );
        let deadline = Instant::now() + request.timeout;

        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(64);
        let service = Arc::clone(&self.service);
        let run_request = request.clone();
        let mut run = tokio::spawn(async move { service.run_agent(run_request, tx).await });

        let mut session_id = String::new();
        let mut retry_count = 0u32;
        let mut tools_total = 0u32;

        let hang = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break true;
            }
            let wait = hang_threshold.min(remaining);

            match tokio::time::timeout(wait, rx.recv()).await {
                Ok(Some(ProgressEvent::SessionStarted { session_id: id })) => {
                    session_id = id;
                }
                Ok(Some(ProgressEvent::Retry)) => {
                    retry_count += 1;
                    if let (Some(sink), Some(sub)) = (&self.sink, options.sub_issue) {
                        sink.on_retry(sub, retry_count);
                    }
                }
                Ok(Some(ProgressEvent::ToolCompleted { tool })) => {
                    tools_total += 1;
                    self.hub.publish(
                        LogEvent::new(LogLevel::Debug, format!("Tool completed: {}", tool))
                            .with_agent(role.as_str())
                            .with_tool(tool.clone()),
                    );
                    if let (Some(sink), Some(sub)) = (&self.sink, options.sub_issue) {
                        sink.on_tool_completed(sub, tools_total);
                    }
                }
                Ok(Some(ProgressEvent::MessageReceived { text })) => {
                    if let (Some(sink), Some(sub)) = (&self.sink, options.sub_issue) {
                        sink.on_message(sub, &text);
                    }
                }
                Ok(Some(ProgressEvent::HangDetected { session_id: id })) => {
                    session_id = id;
                    break true;
                }
                // Stream closed: the run is finishing, collect its result.
                Ok(None) => break false,
                // Silence past the hang threshold.
                Err(_) => break true,
            }
        };

        if hang {
            run.abort();
            self.hub.publish(
                LogEvent::new(LogLevel::Error, "Session hang detected")
                    .with_agent(role.as_str())
                    .with_session(session_id.clone()),
            );
            return Err(OrchError::SessionHung {
                session_id,
                agent: role.as_str().to_string(),
            });
        }

        match (&mut run).await {
            Ok(result) => result,
            Err(join_err) => Err(OrchError::AgentExecution {
                agent: role.as_str().to_string(),
                message: format!("execution task failed: {}", join_err),
            }),
        }
    }

    async fn handle_hung_session(&self, role: AgentRole, session_id: &str) {
        if session_id.is_empty() {
            return;
        }

        match self.watchdog.handle_hang(session_id).await {
            TerminationOutcome::SessionKilled { method } => {
                self.notifier
                    .notify(&Event::new(EventKind::SessionKilled).with_message(format!(
                        "{}: session {} terminated ({})",
                        role, session_id, method
                    )))
                    .await;
            }
            TerminationOutcome::FailedTermination => {
                self.notifier
                    .notify(&Event::new(EventKind::FailedTermination).with_message(format!(
                        "{}: session {} survived graceful termination",
                        role, session_id
                    )))
                    .await;
            }
        }
    }

    /// Per-agent request/response dump when debug mode is on.
    async fn dump_debug(&self, role: AgentRole, prompt: &str, outcome: Option<&AgentOutcome>) {
        if !self.config.logging.debug_mode {
            return;
        }

        let dir = &self.config.logging.debug_log_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            debug!(error = %e, "Failed to create debug log directory");
            return;
        }

        let dump = json!({
            "agent": role.as_str(),
            "at": Utc::now().to_rfc3339(),
            "prompt": prompt,
            "session_id": outcome.map(|o| o.session_id.clone()),
            "response": outcome.map(|o| o.response.clone()),
            "duration_ms": outcome.map(|o| o.duration.as_millis() as u64),
            "tools_executed": outcome.map(|o| o.tools_executed),
        });

        let path = dir.join(format!(
            "{}-{}.json",
            role.as_str(),
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        if let Err(e) = tokio::fs::write(&path, dump.to_string()).await {
            debug!(error = %e, path = %path.display(), "Failed to write debug dump");
        }
    }
}
