use chrono::{DateTime, Utc};

use crate::error::{OrchError, Result};

/// Delimiters of the orchestration block inside a master ticket body.
/// Everything outside the pair belongs to the user and is never rewritten.
pub const ORCH_BLOCK_START: &str = "<!-- ticket-pilot:block:start -->";
pub const ORCH_BLOCK_END: &str = "<!-- ticket-pilot:block:end -->";

const TABLE_START: &str = "<!-- ticket-pilot:status-table:start -->";
const TABLE_END: &str = "<!-- ticket-pilot:status-table:end -->";

const BLOCK_HEADING: &str = "## Orchestration";

/// A master ticket body split at the orchestration block markers.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueBody {
    /// The user's original request (text outside the markers, leading part).
    pub original_request: String,
    /// Content between the markers, if the block exists.
    pub block: Option<String>,
    /// Text after the end marker, preserved verbatim.
    pub trailer: String,
}

impl IssueBody {
    pub fn parse(body: &str) -> Self {
        let Some(start) = body.find(ORCH_BLOCK_START) else {
            return Self {
                original_request: body.trim_end().to_string(),
                block: None,
                trailer: String::new(),
            };
        };

        let after_start = start + ORCH_BLOCK_START.len();
        let (block, trailer) = match body[after_start..].find(ORCH_BLOCK_END) {
            Some(rel_end) => {
                let end = after_start + rel_end;
                (
                    body[after_start..end].trim().to_string(),
                    body[end + ORCH_BLOCK_END.len()..].to_string(),
                )
            }
            // Unterminated block: treat the rest as block content.
            None => (body[after_start..].trim().to_string(), String::new()),
        };

        Self {
            original_request: body[..start].trim_end().to_string(),
            block: Some(block),
            trailer,
        }
    }

    pub fn has_block(&self) -> bool {
        self.block.is_some()
    }

    /// Build a full body: the original request untouched, then the
    /// orchestration block with specification, quoted request, plan summary
    /// and the live status table in that order.
    pub fn compose(
        original_request: &str,
        specification: &str,
        plan_summary: Option<&str>,
        status_table: Option<&str>,
    ) -> String {
        let mut block = String::new();
        block.push_str(BLOCK_HEADING);
        block.push_str("\n\n### Specification\n\n");
        block.push_str(specification.trim_end());

        block.push_str("\n\n### Original Request\n\n");
        for line in original_request.lines() {
            block.push_str("> ");
            block.push_str(line);
            block.push('\n');
        }

        if let Some(summary) = plan_summary {
            block.push_str("\n### Plan\n\n");
            block.push_str(summary.trim_end());
            block.push('\n');
        }

        if let Some(table) = status_table {
            block.push_str("\n### Status\n\n");
            block.push_str(TABLE_START);
            block.push('\n');
            block.push_str(table.trim_end());
            block.push('\n');
            block.push_str(TABLE_END);
            block.push('\n');
        }

        format!(
            "{}\n\n{}\n{}\n{}\n",
            original_request.trim_end(),
            ORCH_BLOCK_START,
            block.trim_end(),
            ORCH_BLOCK_END
        )
    }

    /// Replace only the status-table subregion, leaving every byte outside
    /// the table markers untouched.
    pub fn update_status_table(body: &str, table: &str) -> Result<String> {
        let start = body.find(TABLE_START).ok_or_else(|| {
            OrchError::Other("issue body has no status-table region".to_string())
        })?;
        let content_start = start + TABLE_START.len();
        let end = body[content_start..]
            .find(TABLE_END)
            .map(|rel| content_start + rel)
            .ok_or_else(|| OrchError::Other("status-table region unterminated".to_string()))?;

        let mut updated = String::with_capacity(body.len() + table.len());
        updated.push_str(&body[..content_start]);
        updated.push('\n');
        updated.push_str(table.trim_end());
        updated.push('\n');
        updated.push_str(&body[end..]);
        Ok(updated)
    }
}

/// Per-sub-ticket progress carried as single-line HTML-comment markers in
/// the sub-ticket body. The markers survive body edits by the agents
/// because renderers hide them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressMarkers {
    pub agent_message: Option<String>,
    pub tools_used: Option<u32>,
    pub retry_count: Option<u32>,
    pub last_retry_time: Option<DateTime<Utc>>,
}

const KEY_AGENT_MESSAGE: &str = "agent-message";
const KEY_TOOLS_USED: &str = "tools-used";
const KEY_RETRY_COUNT: &str = "retry-count";
const KEY_LAST_RETRY_TIME: &str = "last-retry-time";

impl ProgressMarkers {
    pub fn parse(body: &str) -> Self {
        let mut markers = Self::default();
        for line in body.lines() {
            let Some((key, value)) = parse_marker_line(line) else {
                continue;
            };
            match key {
                KEY_AGENT_MESSAGE => markers.agent_message = Some(value.to_string()),
                KEY_TOOLS_USED => markers.tools_used = value.parse().ok(),
                KEY_RETRY_COUNT => markers.retry_count = value.parse().ok(),
                KEY_LAST_RETRY_TIME => {
                    markers.last_retry_time = value.parse::<DateTime<Utc>>().ok()
                }
                _ => {}
            }
        }
        markers
    }

    /// Merge another bag into this one; set fields win, unset are kept.
    pub fn merge(&mut self, other: ProgressMarkers) {
        if other.agent_message.is_some() {
            self.agent_message = other.agent_message;
        }
        if other.tools_used.is_some() {
            self.tools_used = other.tools_used;
        }
        if other.retry_count.is_some() {
            self.retry_count = other.retry_count;
        }
        if other.last_retry_time.is_some() {
            self.last_retry_time = other.last_retry_time;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agent_message.is_none()
            && self.tools_used.is_none()
            && self.retry_count.is_none()
            && self.last_retry_time.is_none()
    }

    /// Rewrite the marker lines in a body: existing markers are replaced in
    /// place, missing ones appended at the end. Non-marker lines are
    /// untouched.
    pub fn apply(&self, body: &str) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(message) = &self.agent_message {
            // A newline inside the value would break the single-line format.
            pairs.push((KEY_AGENT_MESSAGE, message.replace('\n', " ")));
        }
        if let Some(tools) = self.tools_used {
            pairs.push((KEY_TOOLS_USED, tools.to_string()));
        }
        if let Some(retries) = self.retry_count {
            pairs.push((KEY_RETRY_COUNT, retries.to_string()));
        }
        if let Some(at) = self.last_retry_time {
            pairs.push((KEY_LAST_RETRY_TIME, at.to_rfc3339()));
        }

        let mut remaining: Vec<(&str, String)> = pairs.clone();
        let mut lines: Vec<String> = Vec::new();

        for line in body.lines() {
            match parse_marker_line(line) {
                Some((key, _)) if pairs.iter().any(|(k, _)| *k == key) => {
                    if let Some(pos) = remaining.iter().position(|(k, _)| *k == key) {
                        let (k, v) = remaining.remove(pos);
                        lines.push(format_marker_line(k, &v));
                    }
                    // Duplicate marker lines for an updated key collapse.
                }
                _ => lines.push(line.to_string()),
            }
        }

        for (key, value) in remaining {
            lines.push(format_marker_line(key, &value));
        }

        lines.join("\n")
    }
}

fn format_marker_line(key: &str, value: &str) -> String {
    format!("<!-- {}: {} -->", key, value)
}

fn parse_marker_line(line: &str) -> Option<(&str, &str)> {
    let inner = line
        .trim()
        .strip_prefix("<!--")?
        .strip_suffix("-->")?
        .trim();
    let (key, value) = inner.split_once(':')?;
    Some((key.trim(), value.trim()))
}
