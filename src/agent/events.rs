/// Progress events surfaced while an agent session runs. Consumed by the
/// executor, the status reporter, and the resilience layer independently.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The execution service opened a session for this run.
    SessionStarted { session_id: String },
    /// The service retried internally.
    Retry,
    /// A tool invocation finished.
    ToolCompleted { tool: String },
    /// The agent produced a new message; the latest one is the current
    /// status line.
    MessageReceived { text: String },
    /// The service itself flagged the session as hung.
    HangDetected { session_id: String },
}
