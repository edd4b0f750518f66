use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Ticket {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub body: String,
}

/// Capability interface over the issue tracker. Labels and issue bodies are
/// the orchestrator's only durable state, so every mutation goes through
/// here.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<Ticket>;

    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<Ticket>;

    async fn update_body(&self, number: u64, body: &str) -> Result<()>;

    async fn close_issue(&self, number: u64) -> Result<()>;

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()>;

    /// Removing an absent label is not an error.
    async fn remove_label(&self, number: u64, label: &str) -> Result<()>;

    async fn list_open_with_label(&self, label: &str) -> Result<Vec<Ticket>>;

    /// Like `list_open_with_label` but including closed tickets, for audit
    /// counts (e.g. fix attempts).
    async fn list_all_with_label(&self, label: &str) -> Result<Vec<Ticket>>;

    async fn comment(&self, number: u64, body: &str) -> Result<()>;

    async fn last_comment(&self, number: u64) -> Result<Option<Comment>>;

    async fn create_pull_request(&self, new_pr: NewPullRequest) -> Result<PullRequest>;

    async fn update_pull_request_body(&self, number: u64, body: &str) -> Result<()>;
}
