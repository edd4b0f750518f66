use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{FailoverConfig, ModelRef};

#[derive(Debug, Clone)]
pub struct FailoverRecord {
    pub from: ModelRef,
    pub to: ModelRef,
    pub reason: String,
    pub session: String,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Outcome of a model-timeout report.
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverDecision {
    /// The agent's next attempt should use this failback model.
    SwitchedTo { from: ModelRef, to: ModelRef },
    /// No failback model configured for this agent.
    NoFailback,
    /// The per-agent failover budget is spent.
    MaxFailoversExceeded,
    /// Failover is disabled by configuration.
    Disabled,
}

#[derive(Debug, Default)]
struct AgentState {
    current: Option<ModelRef>,
    count: u32,
    history: Vec<FailoverRecord>,
}

/// Per-agent failover state. The executor resolves every attempt's model
/// through `current_model_for`, reports timeouts, and resets the agent on
/// success.
pub struct ModelFailover {
    config: FailoverConfig,
    state: Mutex<HashMap<String, AgentState>>,
}

impl ModelFailover {
    pub fn new(config: FailoverConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// The active failback if one is engaged, else the caller's default.
    pub fn current_model_for(&self, agent: &str, default: &ModelRef) -> ModelRef {
        self.state
            .lock()
            .get(agent)
            .and_then(|s| s.current.clone())
            .unwrap_or_else(|| default.clone())
    }

    pub fn on_model_timeout(
        &self,
        agent: &str,
        default: &ModelRef,
        session: &str,
    ) -> FailoverDecision {
        if !self.config.enabled {
            return FailoverDecision::Disabled;
        }

        let mut state = self.state.lock();
        let entry = state.entry(agent.to_string()).or_default();

        if entry.count >= self.config.max_failovers_per_agent {
            warn!(agent, count = entry.count, "Max failovers exceeded");
            return FailoverDecision::MaxFailoversExceeded;
        }

        let Some(failback) = self.config.failback_models.get(agent) else {
            warn!(agent, "Model timeout but no failback configured");
            return FailoverDecision::NoFailback;
        };

        let from = entry.current.clone().unwrap_or_else(|| default.clone());
        entry.count += 1;
        entry.current = Some(failback.clone());
        entry.history.push(FailoverRecord {
            from: from.clone(),
            to: failback.clone(),
            reason: "model-timeout".to_string(),
            session: session.to_string(),
            attempt: entry.count,
            at: Utc::now(),
        });

        info!(agent, from = %from, to = %failback, "Model failover engaged");
        FailoverDecision::SwitchedTo {
            from,
            to: failback.clone(),
        }
    }

    /// Called when an agent completes successfully: clears the failback and
    /// the counter so the next run starts from the default model.
    pub fn reset_agent(&self, agent: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.get_mut(agent) {
            entry.current = None;
            entry.count = 0;
        }
    }

    pub fn history(&self, agent: &str) -> Vec<FailoverRecord> {
        self.state
            .lock()
            .get(agent)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }
}
