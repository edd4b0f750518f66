use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ExecutionConfig, ModelRef};
use crate::error::{OrchError, Result};

use super::events::ProgressEvent;

/// A single request to the execution service.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Agent name on the service.
    pub agent: String,
    pub model: ModelRef,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// Stable fingerprint of (agent, prompt); resubmissions after an outer
    /// retry reuse it so ambient service-side retries stay idempotent.
    pub fingerprint: String,
}

impl AgentRequest {
    pub fn new(agent: impl Into<String>, model: ModelRef, prompt: impl Into<String>) -> Self {
        let agent = agent.into();
        let prompt = prompt.into();
        let fingerprint = fingerprint(&agent, &prompt);
        Self {
            agent,
            model,
            prompt,
            working_dir: None,
            timeout: Duration::from_secs(600),
            fingerprint,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// FNV-1a over agent name and prompt; stable across retries of the same
/// submission.
fn fingerprint(agent: &str, prompt: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in agent.bytes().chain([b'\0']).chain(prompt.bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", hash)
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub response: String,
    pub session_id: String,
    pub duration: Duration,
    pub tools_executed: u32,
}

/// Capability interface over the AI execution service: an opaque
/// session-producing service with a known event stream.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Liveness probe. Callers apply their own budget.
    async fn health(&self) -> Result<()>;

    /// Submit a prompt and stream progress events until the run ends.
    async fn run_agent(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Result<AgentOutcome>;

    async fn kill_session(&self, session_id: &str) -> Result<()>;

    /// `None` when the service has no existence probe.
    async fn session_exists(&self, session_id: &str) -> Result<Option<bool>>;
}

#[derive(Debug, Deserialize)]
struct SessionWire {
    id: String,
}

/// One line of the service's newline-delimited JSON event stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum StreamEventWire {
    Retry,
    ToolCompleted {
        #[serde(default)]
        tool: String,
    },
    MessageReceived {
        #[serde(default)]
        text: String,
    },
    HangDetected,
    Done {
        #[serde(default)]
        response: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// HTTP implementation of the execution service.
pub struct HttpExecutionService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExecutionService {
    pub fn new(config: &ExecutionConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ExecutionService for HttpExecutionService {
    async fn health(&self) -> Result<()> {
        let response = self.http.get(self.url("health")).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(OrchError::Other(format!(
                "execution service health returned HTTP {}",
                response.status().as_u16()
            )))
        }
    }

    async fn run_agent(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Result<AgentOutcome> {
        let started = Instant::now();

        let session: SessionWire = self
            .http
            .post(self.url("session"))
            .json(&json!({"agent": request.agent}))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| OrchError::AgentExecution {
                agent: request.agent.clone(),
                message: format!("session create failed: {}", e),
            })?
            .json()
            .await?;

        debug!(agent = %request.agent, session = %session.id, "Session created");
        let _ = events
            .send(ProgressEvent::SessionStarted {
                session_id: session.id.clone(),
            })
            .await;

        let body = json!({
            "agent": request.agent,
            "model": {
                "providerID": request.model.provider_id,
                "modelID": request.model.model_id,
            },
            "prompt": request.prompt,
            "directory": request.working_dir,
            "requestID": request.fingerprint,
        });

        let response = self
            .http
            .post(self.url(&format!("session/{}/prompt", session.id)))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;
        let response = response
            .error_for_status()
            .map_err(|e| OrchError::AgentExecution {
                agent: request.agent.clone(),
                message: format!("prompt submit failed: {}", e),
            })?;

        // The service answers with newline-delimited JSON events; the final
        // line is `done` with the full response text.
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut final_response: Option<String> = None;
        let mut tools_executed = 0u32;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let event: StreamEventWire = match serde_json::from_str(line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Unparseable event line from execution service");
                        continue;
                    }
                };

                match event {
                    StreamEventWire::Retry => {
                        let _ = events.send(ProgressEvent::Retry).await;
                    }
                    StreamEventWire::ToolCompleted { tool } => {
                        tools_executed += 1;
                        let _ = events.send(ProgressEvent::ToolCompleted { tool }).await;
                    }
                    StreamEventWire::MessageReceived { text } => {
                        let _ = events.send(ProgressEvent::MessageReceived { text }).await;
                    }
                    StreamEventWire::HangDetected => {
                        let _ = events
                            .send(ProgressEvent::HangDetected {
                                session_id: session.id.clone(),
                            })
                            .await;
                    }
                    StreamEventWire::Done { response } => {
                        final_response = Some(response);
                    }
                    StreamEventWire::Error { message } => {
                        return Err(OrchError::AgentExecution {
                            agent: request.agent,
                            message,
                        });
                    }
                }
            }
        }

        let response = final_response.ok_or_else(|| OrchError::AgentExecution {
            agent: request.agent.clone(),
            message: "event stream ended without a done event".to_string(),
        })?;

        Ok(AgentOutcome {
            response,
            session_id: session.id,
            duration: started.elapsed(),
            tools_executed,
        })
    }

    async fn kill_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("session/{}", session_id)))
            .send()
            .await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(OrchError::Other(format!(
                "session kill returned HTTP {}",
                response.status().as_u16()
            )))
        }
    }

    async fn session_exists(&self, session_id: &str) -> Result<Option<bool>> {
        let response = self
            .http
            .get(self.url(&format!("session/{}", session_id)))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(Some(true)),
            StatusCode::NOT_FOUND => Ok(Some(false)),
            // No per-session endpoint on this service build.
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => Ok(None),
            status => Err(OrchError::Other(format!(
                "session probe returned HTTP {}",
                status.as_u16()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = fingerprint("architect", "build a login page");
        let b = fingerprint("architect", "build a login page");
        let c = fingerprint("sculptor", "build a login page");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = AgentRequest::new("craftsman", ModelRef::default(), "do the thing")
            .with_working_dir("/tmp/wt")
            .with_timeout(Duration::from_secs(30));
        assert_eq!(request.agent, "craftsman");
        assert_eq!(request.working_dir.as_deref(), Some(std::path::Path::new("/tmp/wt")));
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(!request.fingerprint.is_empty());
    }

    #[test]
    fn stream_event_lines_parse() {
        let event: StreamEventWire =
            serde_json::from_str(r#"{"type":"tool-completed","tool":"bash"}"#).unwrap();
        assert!(matches!(event, StreamEventWire::ToolCompleted { tool } if tool == "bash"));

        let event: StreamEventWire =
            serde_json::from_str(r#"{"type":"done","response":"all good"}"#).unwrap();
        assert!(matches!(event, StreamEventWire::Done { response } if response == "all good"));

        let event: StreamEventWire = serde_json::from_str(r#"{"type":"hang-detected"}"#).unwrap();
        assert!(matches!(event, StreamEventWire::HangDetected));
    }
}
