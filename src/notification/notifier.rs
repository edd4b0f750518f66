use std::path::Path;

use serde_json::json;
use tracing::{debug, warn};

use crate::config::NotifierConfig;
use crate::error::Result;

use super::events::Event;

/// Webhook notifier. Delivery failures are logged and never raised: a dead
/// webhook must not take an orchestration down with it.
#[derive(Clone)]
pub struct Notifier {
    config: NotifierConfig,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn enabled_for(&self, event: &Event) -> bool {
        !self.config.webhook_url.is_empty()
            && event.kind.delivered_at(self.config.notification_level)
    }

    fn payload(&self, event: &Event) -> serde_json::Value {
        let mut embed = json!({
            "title": event.title(),
            "color": event.kind.color(),
            "timestamp": event.created_at.to_rfc3339(),
        });
        if let Some(message) = &event.message {
            embed["description"] = json!(message);
        }
        if let Some(url) = &event.url {
            embed["url"] = json!(url);
        }

        let mut payload = json!({ "embeds": [embed] });
        if event.kind.is_error() && !self.config.mention_roles.is_empty() {
            let mentions: Vec<String> = self
                .config
                .mention_roles
                .iter()
                .map(|role| format!("<@&{}>", role))
                .collect();
            payload["content"] = json!(mentions.join(" "));
        }
        payload
    }

    pub async fn notify(&self, event: &Event) {
        if !self.enabled_for(event) {
            return;
        }

        let result = self
            .http
            .post(&self.config.webhook_url)
            .json(&self.payload(event))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(kind = event.kind.as_str(), "Notification delivered");
            }
            Ok(response) => {
                warn!(
                    kind = event.kind.as_str(),
                    status = response.status().as_u16(),
                    "Notification rejected by webhook"
                );
            }
            Err(e) => {
                warn!(kind = event.kind.as_str(), error = %e, "Notification delivery failed");
            }
        }
    }

    /// Deliver the event with a file attached as multipart form data. Used
    /// for critical errors carrying the current log file.
    pub async fn notify_with_attachment(&self, event: &Event, file_path: &Path) {
        if !self.enabled_for(event) {
            return;
        }

        let form = match self.attachment_form(event, file_path).await {
            Ok(form) => form,
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "Failed to read attachment, sending without it");
                self.notify(event).await;
                return;
            }
        };

        let result = self
            .http
            .post(&self.config.webhook_url)
            .multipart(form)
            .send()
            .await;

        if let Err(e) = result {
            warn!(kind = event.kind.as_str(), error = %e, "Notification with attachment failed");
        }
    }

    async fn attachment_form(
        &self,
        event: &Event,
        file_path: &Path,
    ) -> Result<reqwest::multipart::Form> {
        let bytes = tokio::fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment.log".to_string());

        Ok(reqwest::multipart::Form::new()
            .text("payload_json", self.payload(event).to_string())
            .part(
                "files[0]",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationLevel;
    use crate::notification::EventKind;

    fn notifier(level: NotificationLevel) -> Notifier {
        Notifier::new(NotifierConfig {
            webhook_url: "https://webhook.test/hook".to_string(),
            notification_level: level,
            mention_roles: vec!["123".to_string()],
        })
    }

    #[test]
    fn disabled_without_webhook_url() {
        let notifier = Notifier::new(NotifierConfig::default());
        let event = Event::new(EventKind::OrchestrationFailed);
        assert!(!notifier.enabled_for(&event));
    }

    #[test]
    fn filter_level_gates_events() {
        let errors_only = notifier(NotificationLevel::ErrorsOnly);
        assert!(errors_only.enabled_for(&Event::new(EventKind::CriticalError)));
        assert!(!errors_only.enabled_for(&Event::new(EventKind::TaskCompleted)));
    }

    #[test]
    fn error_payload_carries_mentions() {
        let notifier = notifier(NotificationLevel::AllMajorEvents);
        let payload = notifier.payload(&Event::new(EventKind::OrchestrationFailed));
        assert_eq!(payload["content"], "<@&123>");

        let payload = notifier.payload(&Event::new(EventKind::TaskCompleted));
        assert!(payload.get("content").is_none());
    }

    #[test]
    fn payload_embed_has_template_fields() {
        let notifier = notifier(NotificationLevel::AllMajorEvents);
        let event = Event::new(EventKind::ModelFailover)
            .with_issue(8)
            .with_message("architect: anthropic/claude-sonnet-4-5 -> providerA/modelB")
            .with_url("https://example.test/issue/8");
        let payload = notifier.payload(&event);
        let embed = &payload["embeds"][0];
        assert!(embed["title"].as_str().unwrap().contains("model-failover"));
        assert!(embed["description"].as_str().unwrap().contains("->"));
        assert_eq!(embed["url"], "https://example.test/issue/8");
        assert!(embed["color"].is_number());
    }
}
