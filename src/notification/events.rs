use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NotificationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    OrchestrationStarted,
    PlanningComplete,
    AwaitingApproval,
    Approved,
    Rejected,
    TaskCompleted,
    TaskFailed,
    TestFailed,
    TestFixStarted,
    TestFixCompleted,
    TestPassedAfterFix,
    TestMaxAttemptsReached,
    DependentRegression,
    ModelFailover,
    SessionKilled,
    FailedTermination,
    CriticalError,
    OrchestrationComplete,
    OrchestrationFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrchestrationStarted => "orchestration-started",
            Self::PlanningComplete => "planning-complete",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TaskCompleted => "task-completed",
            Self::TaskFailed => "task-failed",
            Self::TestFailed => "test-failed",
            Self::TestFixStarted => "test-fix-started",
            Self::TestFixCompleted => "test-fix-completed",
            Self::TestPassedAfterFix => "test-passed-after-fix",
            Self::TestMaxAttemptsReached => "test-max-attempts-reached",
            Self::DependentRegression => "dependent-regression",
            Self::ModelFailover => "model-failover",
            Self::SessionKilled => "session-killed",
            Self::FailedTermination => "failed-termination",
            Self::CriticalError => "critical-error",
            Self::OrchestrationComplete => "orchestration-complete",
            Self::OrchestrationFailed => "orchestration-failed",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::OrchestrationStarted => "🚀",
            Self::PlanningComplete => "📋",
            Self::AwaitingApproval => "⏸️",
            Self::Approved => "👍",
            Self::Rejected => "🚫",
            Self::TaskCompleted => "✔️",
            Self::TaskFailed => "⚠️",
            Self::TestFailed => "❌",
            Self::TestFixStarted => "🔧",
            Self::TestFixCompleted => "🔩",
            Self::TestPassedAfterFix => "✅",
            Self::TestMaxAttemptsReached => "🛑",
            Self::DependentRegression => "💥",
            Self::ModelFailover => "🔀",
            Self::SessionKilled => "🔪",
            Self::FailedTermination => "☠️",
            Self::CriticalError => "🚨",
            Self::OrchestrationComplete => "🎉",
            Self::OrchestrationFailed => "❌",
        }
    }

    /// Embed accent color, as a 24-bit RGB integer.
    pub fn color(&self) -> u32 {
        if self.is_error() {
            0xe0_1e_5a
        } else if self.is_stage_transition() {
            0x58_65_f2
        } else {
            0x2e_a0_43
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::TaskFailed
                | Self::TestFailed
                | Self::TestMaxAttemptsReached
                | Self::DependentRegression
                | Self::FailedTermination
                | Self::CriticalError
                | Self::OrchestrationFailed
        )
    }

    pub fn is_stage_transition(&self) -> bool {
        matches!(
            self,
            Self::OrchestrationStarted
                | Self::PlanningComplete
                | Self::AwaitingApproval
                | Self::Approved
                | Self::Rejected
                | Self::OrchestrationComplete
        )
    }

    /// Whether this kind passes the configured filter level.
    pub fn delivered_at(&self, level: NotificationLevel) -> bool {
        match level {
            NotificationLevel::ErrorsOnly => self.is_error(),
            NotificationLevel::StageTransitions => self.is_error() || self.is_stage_transition(),
            NotificationLevel::AllMajorEvents => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            created_at: Utc::now(),
            issue: None,
            message: None,
            url: None,
        }
    }

    pub fn with_issue(mut self, issue: u64) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn title(&self) -> String {
        match self.issue {
            Some(issue) => format!("{} {} — issue #{}", self.kind.emoji(), self.kind.as_str(), issue),
            None => format!("{} {}", self.kind.emoji(), self.kind.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_classified() {
        assert!(EventKind::OrchestrationFailed.is_error());
        assert!(EventKind::CriticalError.is_error());
        assert!(EventKind::TestMaxAttemptsReached.is_error());
        assert!(!EventKind::TaskCompleted.is_error());
        assert!(!EventKind::PlanningComplete.is_error());
    }

    #[test]
    fn filter_levels_nest() {
        for kind in [
            EventKind::OrchestrationFailed,
            EventKind::PlanningComplete,
            EventKind::TaskCompleted,
        ] {
            if kind.delivered_at(NotificationLevel::ErrorsOnly) {
                assert!(kind.delivered_at(NotificationLevel::StageTransitions));
            }
            if kind.delivered_at(NotificationLevel::StageTransitions) {
                assert!(kind.delivered_at(NotificationLevel::AllMajorEvents));
            }
        }
    }

    #[test]
    fn errors_only_excludes_progress() {
        assert!(!EventKind::TaskCompleted.delivered_at(NotificationLevel::ErrorsOnly));
        assert!(!EventKind::PlanningComplete.delivered_at(NotificationLevel::ErrorsOnly));
        assert!(EventKind::TestFailed.delivered_at(NotificationLevel::ErrorsOnly));
    }

    #[test]
    fn stage_transitions_include_stages_and_errors() {
        assert!(EventKind::Approved.delivered_at(NotificationLevel::StageTransitions));
        assert!(EventKind::OrchestrationFailed.delivered_at(NotificationLevel::StageTransitions));
        assert!(!EventKind::TaskCompleted.delivered_at(NotificationLevel::StageTransitions));
    }

    #[test]
    fn title_includes_issue() {
        let event = Event::new(EventKind::TestFailed).with_issue(12);
        assert!(event.title().contains("test-failed"));
        assert!(event.title().contains("#12"));
    }
}
