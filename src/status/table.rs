use crate::tracker::{Labels, ProgressMarkers};
use crate::utils::{format_age, truncate_chars};

/// Cap on self-heal fix attempts per failing test.
pub const MAX_FIX_ATTEMPTS: u32 = 10;

const AGENT_MESSAGE_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTaskStatus {
    Pending,
    InProgress,
    AgentComplete,
    Failed,
    TestFailed,
    MaxAttemptsReached,
}

impl SubTaskStatus {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::InProgress => "🔄",
            Self::AgentComplete => "✅",
            Self::Failed => "❌",
            Self::TestFailed => "⚠️",
            Self::MaxAttemptsReached => "🛑",
        }
    }

    /// Derive the status from a sub-ticket's label set. More terminal
    /// states win when several are present.
    pub fn from_labels(labels: &Labels, set: &[String]) -> Self {
        let has = |label: String| set.iter().any(|l| *l == label);
        if has(labels.max_attempts_reached()) {
            Self::MaxAttemptsReached
        } else if has(labels.test_failed()) {
            Self::TestFailed
        } else if has(labels.failed()) {
            Self::Failed
        } else if has(labels.agent_complete()) {
            Self::AgentComplete
        } else if has(labels.in_progress()) {
            Self::InProgress
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRowData {
    pub sub_issue: u64,
    pub title: String,
    pub status: SubTaskStatus,
    pub markers: ProgressMarkers,
    pub is_test: bool,
    pub fix_attempts: u32,
}

/// Render the live status table. One row per sub-ticket; test rows carry
/// the fix-attempt column; the retry columns are elided when retry
/// history is configured off.
pub fn render_table(rows: &[TaskRowData], show_retry_history: bool) -> String {
    let mut out = if show_retry_history {
        String::from(
            "| Status | Task | # | Agent message | Tools | Retries | Last retry | Fixes |\n\
             |---|---|---|---|---|---|---|---|\n",
        )
    } else {
        String::from(
            "| Status | Task | # | Agent message | Tools | Fixes |\n\
             |---|---|---|---|---|---|\n",
        )
    };

    for row in rows {
        let message = row
            .markers
            .agent_message
            .as_deref()
            .map(|m| truncate_chars(m, AGENT_MESSAGE_WIDTH))
            .unwrap_or_else(|| "—".to_string());
        let tools = row
            .markers
            .tools_used
            .map(|t| t.to_string())
            .unwrap_or_else(|| "0".to_string());
        let retries = row
            .markers
            .retry_count
            .map(|r| r.to_string())
            .unwrap_or_else(|| "0".to_string());
        let last_retry = row
            .markers
            .last_retry_time
            .map(format_age)
            .unwrap_or_else(|| "—".to_string());

        let fixes = if !row.is_test {
            "—".to_string()
        } else if row.fix_attempts == 0 {
            "0/10".to_string()
        } else if row.fix_attempts >= MAX_FIX_ATTEMPTS {
            format!("🔧 {}/{} (max)", row.fix_attempts, MAX_FIX_ATTEMPTS)
        } else {
            format!("🔧 {}/{}", row.fix_attempts, MAX_FIX_ATTEMPTS)
        };

        if show_retry_history {
            out.push_str(&format!(
                "| {} | {} | #{} | {} | {} | {} | {} | {} |\n",
                row.status.emoji(),
                row.title,
                row.sub_issue,
                message,
                tools,
                retries,
                last_retry,
                fixes
            ));
        } else {
            out.push_str(&format!(
                "| {} | {} | #{} | {} | {} | {} |\n",
                row.status.emoji(),
                row.title,
                row.sub_issue,
                message,
                tools,
                fixes
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: SubTaskStatus, is_test: bool, fix_attempts: u32) -> TaskRowData {
        TaskRowData {
            sub_issue: 101,
            title: "Implement login".to_string(),
            status,
            markers: ProgressMarkers::default(),
            is_test,
            fix_attempts,
        }
    }

    #[test]
    fn status_derivation_prefers_terminal_labels() {
        let labels = Labels::new("");
        let set = vec!["in-progress".to_string(), "test-failed".to_string()];
        assert_eq!(
            SubTaskStatus::from_labels(&labels, &set),
            SubTaskStatus::TestFailed
        );

        let set = vec!["agent-complete".to_string()];
        assert_eq!(
            SubTaskStatus::from_labels(&labels, &set),
            SubTaskStatus::AgentComplete
        );

        let set = vec!["bug".to_string()];
        assert_eq!(
            SubTaskStatus::from_labels(&labels, &set),
            SubTaskStatus::Pending
        );
    }

    #[test]
    fn implementation_rows_have_no_fix_column() {
        let table = render_table(&[row(SubTaskStatus::InProgress, false, 0)], true);
        assert!(table.contains("| — |\n"));
    }

    #[test]
    fn test_rows_show_fix_attempts_with_wrench_once_nonzero() {
        let table = render_table(&[row(SubTaskStatus::TestFailed, true, 0)], true);
        assert!(table.contains("| 0/10 |"));
        assert!(!table.contains("🔧"));

        let table = render_table(&[row(SubTaskStatus::TestFailed, true, 3)], true);
        assert!(table.contains("🔧 3/10"));
    }

    #[test]
    fn max_attempts_get_the_marker() {
        let table = render_table(&[row(SubTaskStatus::MaxAttemptsReached, true, 10)], true);
        assert!(table.contains("🔧 10/10 (max)"));
        assert!(table.contains("🛑"));
    }

    #[test]
    fn long_agent_messages_are_truncated() {
        let mut data = row(SubTaskStatus::InProgress, false, 0);
        data.markers.agent_message = Some("x".repeat(120));
        let table = render_table(&[data], true);
        let line = table.lines().nth(2).unwrap();
        assert!(line.contains("..."));
        assert!(!line.contains(&"x".repeat(60)));
    }

    #[test]
    fn retry_columns_are_elided_when_history_is_off() {
        let table = render_table(&[row(SubTaskStatus::InProgress, false, 0)], false);
        assert!(!table.contains("Retries"));
        assert!(!table.contains("Last retry"));
        assert!(table.contains("Tools"));
    }
}
