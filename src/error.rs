use std::path::PathBuf;

use thiserror::Error;

/// Message fragments that mark an error as permanently failed. Retrying these
/// wastes the caller's budget: the tracker or execution service will answer
/// the same way every time.
const NON_RETRYABLE_PATTERNS: [&str; 5] = [
    "rate limit",
    "quota exceeded",
    "authentication",
    "not found",
    "permission denied",
];

#[derive(Error, Debug)]
pub enum OrchError {
    #[error("Issue #{0} not found")]
    IssueNotFound(u64),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Invalid dependency: task {task} requires unknown task {dependency}")]
    InvalidDependency { task: String, dependency: String },

    #[error("Cyclic dependency among tasks: {0}")]
    CyclicDependency(String),

    #[error("Timed out waiting for sub-issue #{issue} to complete after {waited_secs}s")]
    PollTimeout { issue: u64, waited_secs: u64 },

    #[error("Execution server unreachable: {message}")]
    ServerUnreachable {
        message: String,
        log_path: Option<PathBuf>,
    },

    #[error("Session {session_id} hung during {agent} execution")]
    SessionHung { session_id: String, agent: String },

    #[error("Agent {agent} execution failed: {message}")]
    AgentExecution { agent: String, message: String },

    #[error("Git error: {0}")]
    Git(String),

    #[error("Worktree error at {}: {message}", path.display())]
    Worktree { message: String, path: PathBuf },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Cannot resume orchestration from state '{0}'")]
    NotResumable(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Test #{test} still failing after {attempts} fix attempts")]
    MaxFixAttempts { test: u64, attempts: u32 },

    #[error("Fix for test #{fixed} broke dependent test #{dependent}")]
    DependentRegression { fixed: u64, dependent: u64 },

    #[error("'{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<OrchError>,
    },

    #[error("Issue #{0} is already queued or running")]
    DuplicateQueueEntry(u64),

    #[error("Issue #{0} is currently being processed")]
    IssueRunning(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    NonRetryable(#[source] Box<OrchError>),

    #[error("{0}")]
    Other(String),
}

impl OrchError {
    /// Wrap an error so the retry executor will not attempt it again.
    pub fn no_retry(self) -> Self {
        match self {
            already @ Self::NonRetryable(_) => already,
            other => Self::NonRetryable(Box::new(other)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NonRetryable(_) => false,
            // Structural failures a retry cannot cure. Plan validation is
            // not among them: a fresh planner sample may well pass.
            Self::InvalidDependency { .. }
            | Self::CyclicDependency(_)
            | Self::InvalidStateTransition { .. }
            | Self::NotResumable(_)
            | Self::Config(_)
            | Self::MissingEnv(_)
            | Self::DuplicateQueueEntry(_)
            | Self::IssueRunning(_)
            | Self::MaxFixAttempts { .. }
            | Self::DependentRegression { .. } => false,
            other => {
                let message = other.to_string().to_lowercase();
                !NON_RETRYABLE_PATTERNS
                    .iter()
                    .any(|pattern| message.contains(pattern))
            }
        }
    }

    /// The error this one wraps for retry purposes, unwrapping the
    /// non-retryable marker.
    pub fn into_inner(self) -> Self {
        match self {
            Self::NonRetryable(inner) => *inner,
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(OrchError::Tracker("connection reset".into()).is_retryable());
        assert!(
            OrchError::AgentExecution {
                agent: "craftsman".into(),
                message: "stream closed".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn message_patterns_disable_retry() {
        assert!(!OrchError::Tracker("API rate limit exceeded".into()).is_retryable());
        assert!(!OrchError::Tracker("authentication required".into()).is_retryable());
        assert!(!OrchError::Tracker("resource not found".into()).is_retryable());
        assert!(!OrchError::Git("permission denied (publickey)".into()).is_retryable());
        assert!(!OrchError::Other("monthly quota exceeded".into()).is_retryable());
    }

    #[test]
    fn no_retry_flag_short_circuits() {
        let err = OrchError::Tracker("connection reset".into()).no_retry();
        assert!(!err.is_retryable());
        // Wrapping twice stays a single layer.
        let err = err.no_retry();
        assert!(matches!(err.into_inner(), OrchError::Tracker(_)));
    }

    #[test]
    fn structural_errors_never_retry() {
        assert!(!OrchError::CyclicDependency("A, B".into()).is_retryable());
        assert!(
            !OrchError::InvalidDependency {
                task: "T2".into(),
                dependency: "T9".into(),
            }
            .is_retryable()
        );
    }
}
