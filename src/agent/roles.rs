use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed cast of agents. Each role maps to a prompt template and, via
/// configuration, to a model and a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Produces the specification from the original request.
    Architect,
    /// Produces the implementation task list.
    Sculptor,
    /// Produces the test task list.
    Sentinel,
    /// Implements a task (and fix attempts) inside the worktree.
    Craftsman,
    /// Runs a test task inside the worktree.
    Validator,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Sculptor => "sculptor",
            Self::Sentinel => "sentinel",
            Self::Craftsman => "craftsman",
            Self::Validator => "validator",
        }
    }

    pub fn all() -> [AgentRole; 5] {
        [
            Self::Architect,
            Self::Sculptor,
            Self::Sentinel,
            Self::Craftsman,
            Self::Validator,
        ]
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_stable() {
        assert_eq!(AgentRole::Architect.as_str(), "architect");
        assert_eq!(AgentRole::Sculptor.as_str(), "sculptor");
        assert_eq!(AgentRole::Sentinel.as_str(), "sentinel");
        assert_eq!(AgentRole::Craftsman.as_str(), "craftsman");
        assert_eq!(AgentRole::Validator.as_str(), "validator");
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentRole::Sentinel).unwrap(),
            "\"sentinel\""
        );
    }
}
