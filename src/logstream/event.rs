use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured context attached to a log event. All fields optional; the
/// filtered reads on the hub match against these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub context: LogContext,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context: LogContext::default(),
        }
    }

    pub fn with_issue(mut self, issue: u64) -> Self {
        self.context.issue = Some(issue);
        self
    }

    pub fn with_sub_issue(mut self, sub_issue: u64) -> Self {
        self.context.sub_issue = Some(sub_issue);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.context.agent = Some(agent.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.context.stage = Some(stage.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.context.tool = Some(tool.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    /// Single-line rendering used by the file sink.
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] {:5} {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level.as_str().to_uppercase(),
            self.message
        );
        if let Some(issue) = self.context.issue {
            line.push_str(&format!(" issue=#{}", issue));
        }
        if let Some(sub) = self.context.sub_issue {
            line.push_str(&format!(" sub=#{}", sub));
        }
        if let Some(agent) = &self.context.agent {
            line.push_str(&format!(" agent={}", agent));
        }
        if let Some(stage) = &self.context.stage {
            line.push_str(&format!(" stage={}", stage));
        }
        if let Some(session) = &self.context.session_id {
            line.push_str(&format!(" session={}", session));
        }
        line
    }
}
