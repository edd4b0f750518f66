use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchError, Result};

use super::client::IssueTracker;
use super::labels::Labels;

/// Orchestration state carried as the single state label on a master
/// ticket. Transitions are monotonic along the stage machine; `Rejected`
/// and `Failed` are terminal sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrchState {
    Planning,
    AwaitingApproval,
    Approved,
    Rejected,
    Implementing,
    Testing,
    Completing,
    Completed,
    PrCreated,
    Failed,
}

impl OrchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Implementing => "implementing",
            Self::Testing => "testing",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::PrCreated => "pr-created",
            Self::Failed => "failed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "planning" => Some(Self::Planning),
            "awaiting-approval" => Some(Self::AwaitingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "implementing" => Some(Self::Implementing),
            "testing" => Some(Self::Testing),
            "completing" => Some(Self::Completing),
            "completed" => Some(Self::Completed),
            "pr-created" => Some(Self::PrCreated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn allowed_transitions(&self) -> &'static [OrchState] {
        use OrchState::*;
        match self {
            Planning => &[AwaitingApproval, Failed],
            AwaitingApproval => &[Approved, Rejected, Failed],
            Approved => &[Implementing, Failed],
            Implementing => &[Testing, Failed],
            Testing => &[Completing, Failed],
            Completing => &[Completed, Failed],
            Completed => &[PrCreated, Failed],
            PrCreated => &[],
            Rejected => &[],
            Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrchState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PrCreated | Self::Rejected | Self::Failed)
    }

    pub fn can_resume(&self) -> bool {
        matches!(
            self,
            Self::Planning
                | Self::AwaitingApproval
                | Self::Approved
                | Self::Implementing
                | Self::Testing
                | Self::Completing
        )
    }
}

impl fmt::Display for OrchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label-backed state store. Every transition is a read-modify-write on
/// the ticket's label set: remove the current state label if any, add the
/// new one.
pub struct StateStore {
    tracker: Arc<dyn IssueTracker>,
    labels: Labels,
}

impl StateStore {
    pub fn new(tracker: Arc<dyn IssueTracker>, labels: Labels) -> Self {
        Self { tracker, labels }
    }

    pub async fn current(&self, issue: u64) -> Result<Option<OrchState>> {
        let ticket = self.tracker.get_issue(issue).await?;
        Ok(self.labels.state_of(&ticket.labels))
    }

    /// Transition the ticket, enforcing the stage machine. Any state may
    /// move to `Failed`; a fresh ticket (no state label) may only enter
    /// `Planning`.
    pub async fn transition(&self, issue: u64, to: OrchState) -> Result<()> {
        let current = self.current(issue).await?;

        let allowed = match current {
            Some(from) => from == to || from.can_transition_to(to) || to == OrchState::Failed,
            None => matches!(to, OrchState::Planning | OrchState::Failed),
        };
        if !allowed {
            return Err(OrchError::InvalidStateTransition {
                from: current.map(|s| s.to_string()).unwrap_or_else(|| "none".into()),
                to: to.to_string(),
            });
        }

        if let Some(from) = current {
            if from == to {
                return Ok(());
            }
            self.tracker
                .remove_label(issue, &self.labels.state(from))
                .await?;
        }
        self.tracker
            .add_labels(issue, &[self.labels.state(to)])
            .await?;

        debug!(issue, from = ?current, to = %to, "State transition");
        Ok(())
    }

    pub async fn can_resume(&self, issue: u64) -> Result<bool> {
        Ok(self
            .current(issue)
            .await?
            .map(|s| s.can_resume())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        use OrchState::*;
        assert!(Planning.can_transition_to(AwaitingApproval));
        assert!(AwaitingApproval.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Implementing));
        assert!(Implementing.can_transition_to(Testing));
        assert!(Testing.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Completed));
        assert!(Completed.can_transition_to(PrCreated));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(OrchState::PrCreated.allowed_transitions().is_empty());
        assert!(OrchState::Rejected.allowed_transitions().is_empty());
        assert!(OrchState::Failed.allowed_transitions().is_empty());
    }

    #[test]
    fn resumable_states() {
        assert!(OrchState::Planning.can_resume());
        assert!(OrchState::AwaitingApproval.can_resume());
        assert!(OrchState::Approved.can_resume());
        assert!(OrchState::Implementing.can_resume());
        assert!(OrchState::Testing.can_resume());
        assert!(OrchState::Completing.can_resume());

        assert!(!OrchState::Completed.can_resume());
        assert!(!OrchState::PrCreated.can_resume());
        assert!(!OrchState::Failed.can_resume());
        assert!(!OrchState::Rejected.can_resume());
    }

    #[test]
    fn skipping_stages_is_not_allowed() {
        assert!(!OrchState::Planning.can_transition_to(OrchState::Implementing));
        assert!(!OrchState::Approved.can_transition_to(OrchState::Completed));
    }

    #[test]
    fn parse_round_trips() {
        for state in [
            OrchState::Planning,
            OrchState::AwaitingApproval,
            OrchState::Approved,
            OrchState::Rejected,
            OrchState::Implementing,
            OrchState::Testing,
            OrchState::Completing,
            OrchState::Completed,
            OrchState::PrCreated,
            OrchState::Failed,
        ] {
            assert_eq!(OrchState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OrchState::parse("galloping"), None);
    }
}
