use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::TrackerConfig;
use crate::error::{OrchError, Result};

use super::client::{Comment, IssueTracker, NewPullRequest, PullRequest, Ticket};

const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct LabelWire {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelWire>,
}

impl From<IssueWire> for Ticket {
    fn from(wire: IssueWire) -> Self {
        Self {
            number: wire.number,
            title: wire.title,
            body: wire.body.unwrap_or_default(),
            labels: wire.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentWire {
    #[serde(default)]
    body: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct PullWire {
    number: u64,
    html_url: String,
    #[serde(default)]
    body: Option<String>,
}

/// GitHub REST implementation of the tracker capability.
pub struct GitHubTracker {
    http: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubTracker {
    pub fn new(config: &TrackerConfig, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("ticket-pilot"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        let auth = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| OrchError::Config(format!("invalid tracker token: {}", e)))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_base: "https://api.github.com".to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    /// Map an error status onto a message the retry classifier understands.
    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        let message = match status {
            StatusCode::NOT_FOUND => format!("{}: not found", what),
            StatusCode::UNAUTHORIZED => format!("{}: authentication failed", what),
            StatusCode::FORBIDDEN if detail.contains("rate limit") => {
                format!("{}: rate limit exceeded", what)
            }
            StatusCode::FORBIDDEN => format!("{}: permission denied", what),
            _ => format!("{}: HTTP {} {}", what, status.as_u16(), detail),
        };
        Err(OrchError::Tracker(message))
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    async fn get_issue(&self, number: u64) -> Result<Ticket> {
        let response = self
            .http
            .get(self.url(&format!("issues/{}", number)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(OrchError::IssueNotFound(number));
        }
        let wire: IssueWire = Self::check(response, "get issue").await?.json().await?;
        Ok(wire.into())
    }

    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<Ticket> {
        debug!(title, labels = ?labels, "Creating issue");
        let response = self
            .http
            .post(self.url("issues"))
            .json(&json!({"title": title, "body": body, "labels": labels}))
            .send()
            .await?;
        let wire: IssueWire = Self::check(response, "create issue").await?.json().await?;
        Ok(wire.into())
    }

    async fn update_body(&self, number: u64, body: &str) -> Result<()> {
        let response = self
            .http
            .patch(self.url(&format!("issues/{}", number)))
            .json(&json!({"body": body}))
            .send()
            .await?;
        Self::check(response, "update issue body").await?;
        Ok(())
    }

    async fn close_issue(&self, number: u64) -> Result<()> {
        let response = self
            .http
            .patch(self.url(&format!("issues/{}", number)))
            .json(&json!({"state": "closed"}))
            .send()
            .await?;
        Self::check(response, "close issue").await?;
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let response = self
            .http
            .post(self.url(&format!("issues/{}/labels", number)))
            .json(&json!({"labels": labels}))
            .send()
            .await?;
        Self::check(response, "add labels").await?;
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("issues/{}/labels/{}", number, label)))
            .send()
            .await?;
        // Absent label: fine, the desired state holds.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response, "remove label").await?;
        Ok(())
    }

    async fn list_open_with_label(&self, label: &str) -> Result<Vec<Ticket>> {
        let response = self
            .http
            .get(self.url("issues"))
            .query(&[("state", "open"), ("labels", label), ("per_page", "100")])
            .send()
            .await?;
        let wires: Vec<IssueWire> = Self::check(response, "list issues").await?.json().await?;
        Ok(wires.into_iter().map(Into::into).collect())
    }

    async fn list_all_with_label(&self, label: &str) -> Result<Vec<Ticket>> {
        let response = self
            .http
            .get(self.url("issues"))
            .query(&[("state", "all"), ("labels", label), ("per_page", "100")])
            .send()
            .await?;
        let wires: Vec<IssueWire> = Self::check(response, "list issues").await?.json().await?;
        Ok(wires.into_iter().map(Into::into).collect())
    }

    async fn comment(&self, number: u64, body: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("issues/{}/comments", number)))
            .json(&json!({"body": body}))
            .send()
            .await?;
        Self::check(response, "create comment").await?;
        Ok(())
    }

    async fn last_comment(&self, number: u64) -> Result<Option<Comment>> {
        let response = self
            .http
            .get(self.url(&format!("issues/{}/comments", number)))
            .query(&[
                ("sort", "created"),
                ("direction", "desc"),
                ("per_page", "1"),
            ])
            .send()
            .await?;
        let wires: Vec<CommentWire> = Self::check(response, "list comments").await?.json().await?;
        Ok(wires.into_iter().next().map(|w| Comment {
            body: w.body.unwrap_or_default(),
            created_at: w.created_at,
        }))
    }

    async fn create_pull_request(&self, new_pr: NewPullRequest) -> Result<PullRequest> {
        debug!(title = %new_pr.title, head = %new_pr.head, base = %new_pr.base, "Opening pull request");
        let response = self
            .http
            .post(self.url("pulls"))
            .json(&json!({
                "title": new_pr.title,
                "body": new_pr.body,
                "head": new_pr.head,
                "base": new_pr.base,
            }))
            .send()
            .await?;
        let wire: PullWire = Self::check(response, "create pull request")
            .await?
            .json()
            .await?;

        // Labels go through the issues endpoint; a PR is an issue to GitHub.
        self.add_labels(wire.number, &new_pr.labels).await?;

        Ok(PullRequest {
            number: wire.number,
            url: wire.html_url,
            body: wire.body.unwrap_or_default(),
        })
    }

    async fn update_pull_request_body(&self, number: u64, body: &str) -> Result<()> {
        let response = self
            .http
            .patch(self.url(&format!("pulls/{}", number)))
            .json(&json!({"body": body}))
            .send()
            .await?;
        Self::check(response, "update pull request").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_wire_maps_to_ticket() {
        let wire: IssueWire = serde_json::from_value(json!({
            "number": 42,
            "title": "Add login",
            "body": "Please add login",
            "labels": [{"name": "queue"}, {"name": "bug"}]
        }))
        .unwrap();
        let ticket: Ticket = wire.into();
        assert_eq!(ticket.number, 42);
        assert!(ticket.has_label("queue"));
        assert!(!ticket.has_label("processing"));
    }

    #[test]
    fn null_body_becomes_empty() {
        let wire: IssueWire = serde_json::from_value(json!({
            "number": 1,
            "title": "t",
            "body": null,
            "labels": []
        }))
        .unwrap();
        let ticket: Ticket = wire.into();
        assert_eq!(ticket.body, "");
    }
}
