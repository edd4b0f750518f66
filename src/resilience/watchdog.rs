use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::agent::ExecutionService;

/// How a hung session was (or was not) put down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The session is gone; `method` tags how.
    SessionKilled { method: &'static str },
    /// The session survived termination. Reset-only; a full service restart
    /// is a future revision.
    FailedTermination,
}

/// Kills hung sessions and verifies they are really gone. Verification
/// re-checks existence with growing backoff; a service without an existence
/// probe is trusted.
pub struct SessionWatchdog {
    service: Arc<dyn ExecutionService>,
    verify_delays: Vec<Duration>,
}

impl SessionWatchdog {
    pub fn new(service: Arc<dyn ExecutionService>) -> Self {
        Self {
            service,
            verify_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        }
    }

    #[cfg(test)]
    pub fn with_verify_delays(mut self, delays: Vec<Duration>) -> Self {
        self.verify_delays = delays;
        self
    }

    pub async fn handle_hang(&self, session_id: &str) -> TerminationOutcome {
        warn!(session = %session_id, "Session hang reported, attempting graceful termination");

        if let Err(e) = self.service.kill_session(session_id).await {
            warn!(session = %session_id, error = %e, "Graceful kill request failed");
        }

        for delay in &self.verify_delays {
            tokio::time::sleep(*delay).await;

            match self.service.session_exists(session_id).await {
                Ok(None) => {
                    // No existence probe: assume the kill took.
                    info!(session = %session_id, "No existence probe, assuming termination succeeded");
                    return TerminationOutcome::SessionKilled {
                        method: "graceful-kill",
                    };
                }
                Ok(Some(false)) => {
                    info!(session = %session_id, "Session termination verified");
                    return TerminationOutcome::SessionKilled {
                        method: "graceful-kill",
                    };
                }
                Ok(Some(true)) => {
                    warn!(session = %session_id, "Session still exists, re-checking");
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Existence check failed, re-checking");
                }
            }
        }

        warn!(session = %session_id, "Session survived graceful termination");
        TerminationOutcome::FailedTermination
    }
}
