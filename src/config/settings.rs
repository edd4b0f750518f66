use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{OrchError, Result};

/// Environment variable holding the issue-tracker authentication token.
pub const TRACKER_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchConfig {
    pub execution: ExecutionConfig,
    pub agents: HashMap<String, AgentEntry>,
    pub tracker: TrackerConfig,
    pub worktree: WorktreeConfig,
    pub notifier: NotifierConfig,
    pub status_table: StatusTableConfig,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub status_resilience: ResilienceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Base URL of the AI execution service.
    pub base_url: String,
    /// Default request timeout in seconds when an agent has none configured.
    pub timeout: u64,
    pub retries: u32,
    /// Seconds between completion-label polls.
    pub poll_interval: u64,
    pub parallel: ParallelConfig,
    pub retry: RetryConfig,
    pub testing: TestingConfig,
    pub auto_approve: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4096".to_string(),
            timeout: 600,
            retries: 3,
            poll_interval: 2,
            parallel: ParallelConfig::default(),
            retry: RetryConfig::default(),
            testing: TestingConfig::default(),
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParallelConfig {
    pub max_concurrency: MaxConcurrency,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: MaxConcurrency::Auto,
        }
    }
}

/// Test-agent concurrency cap: a fixed count or `"auto"` (logical CPU count).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaxConcurrency {
    Count(usize),
    Auto,
}

impl MaxConcurrency {
    pub fn resolve(&self) -> usize {
        match self {
            Self::Count(n) => (*n).max(1),
            Self::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl Serialize for MaxConcurrency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u64(*n as u64),
            Self::Auto => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxConcurrency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => {
                let count = n
                    .as_u64()
                    .ok_or_else(|| serde::de::Error::custom("maxConcurrency must be positive"))?;
                Ok(Self::Count(count as usize))
            }
            Value::String(s) if s == "auto" => Ok(Self::Auto),
            other => Err(serde::de::Error::custom(format!(
                "maxConcurrency must be a number or \"auto\", got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            initial_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestingConfig {
    pub continue_on_failure: bool,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            continue_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentEntry {
    pub model: ModelRef,
    /// Agent name on the execution service.
    pub agent: String,
    /// Per-agent execution timeout in seconds.
    pub timeout: u64,
}

impl Default for AgentEntry {
    fn default() -> Self {
        Self {
            model: ModelRef::default(),
            agent: String::new(),
            timeout: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

impl Default for ModelRef {
    fn default() -> Self {
        Self {
            provider_id: "anthropic".to_string(),
            model_id: "claude-sonnet-4-5".to_string(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    pub owner: String,
    pub repo: String,
    /// Local checkout the worktrees are created from.
    pub repo_path: PathBuf,
    pub base_branch: String,
    pub label_prefix: String,
    #[serde(rename = "createPR")]
    pub create_pr: bool,
    #[serde(rename = "autoMergePR")]
    pub auto_merge_pr: bool,
    pub close_sub_on_completion: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            repo_path: PathBuf::from("."),
            base_branch: "main".to_string(),
            label_prefix: String::new(),
            create_pr: true,
            auto_merge_pr: false,
            close_sub_on_completion: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorktreeConfig {
    /// Worktrees are created at `<basePath>/<repo>-<issue>`.
    pub base_path: PathBuf,
    pub cleanup_on_completion: bool,
    pub cleanup_on_failure: bool,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(".."),
            cleanup_on_completion: true,
            cleanup_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotifierConfig {
    pub webhook_url: String,
    pub notification_level: NotificationLevel,
    pub mention_roles: Vec<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            notification_level: NotificationLevel::AllMajorEvents,
            mention_roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationLevel {
    ErrorsOnly,
    StageTransitions,
    AllMajorEvents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusTableConfig {
    pub update_interval_seconds: u64,
    pub show_retry_history: bool,
    pub max_retry_history_entries: usize,
}

impl Default for StatusTableConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: 60,
            show_retry_history: true,
            max_retry_history_entries: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: String,
    pub debug_mode: bool,
    pub log_dir: PathBuf,
    pub debug_log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug_mode: false,
            log_dir: PathBuf::from("logs"),
            debug_log_dir: PathBuf::from("logs/debug"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    pub enabled: bool,
    pub port: u16,
    pub host: String,
    /// Milliseconds between source-poller wakeups.
    pub poll_interval: u64,
    pub queue_label: String,
    pub max_buffer_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8315,
            host: "127.0.0.1".to_string(),
            poll_interval: 60_000,
            queue_label: "queue".to_string(),
            max_buffer_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResilienceConfig {
    pub features: ResilienceFeatures,
    pub model_failover: FailoverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResilienceFeatures {
    pub hang_recovery: bool,
    pub use_occlient_events: bool,
    pub poll_based_fallback: bool,
}

impl Default for ResilienceFeatures {
    fn default() -> Self {
        Self {
            hang_recovery: true,
            use_occlient_events: true,
            poll_based_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FailoverConfig {
    pub enabled: bool,
    pub timeout_threshold_seconds: u64,
    pub max_failovers_per_agent: u32,
    pub failback_models: HashMap<String, ModelRef>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_threshold_seconds: 120,
            max_failovers_per_agent: 2,
            failback_models: HashMap::new(),
        }
    }
}

impl OrchConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await?;
        let raw: Value = serde_json::from_str(&content)?;

        let config = if contains_comment_keys(&raw) {
            Self::migrate_legacy(path, raw).await?
        } else {
            serde_json::from_value(raw)?
        };

        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Convert a legacy document: strip `_comment*` keys, rewrite in the
    /// current shape, back up the original next to it.
    async fn migrate_legacy(path: &Path, mut raw: Value) -> Result<Self> {
        let backup = path.with_extension("json.bak");
        fs::copy(path, &backup).await?;
        info!(backup = %backup.display(), "Migrating legacy configuration");

        strip_comment_keys(&mut raw);
        let config: Self = serde_json::from_value(raw)?;
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(path, content).await?;

        Ok(config)
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.execution.base_url.is_empty() {
            errors.push("execution.baseUrl must not be empty");
        }
        if self.execution.retry.max_attempts == 0 {
            errors.push("execution.retry.maxAttempts must be greater than 0");
        }
        if self.execution.retry.backoff_multiplier < 1.0 {
            errors.push("execution.retry.backoffMultiplier must be at least 1.0");
        }
        if self.execution.poll_interval == 0 {
            errors.push("execution.pollInterval must be greater than 0");
        }

        for (role, entry) in &self.agents {
            if entry.timeout == 0 {
                warn!(role = %role, "Agent timeout of 0 configured");
                errors.push("agent timeout must be greater than 0");
                break;
            }
        }

        if self.status_table.update_interval_seconds == 0 {
            errors.push("statusTable.updateIntervalSeconds must be greater than 0");
        }
        if self.service.poll_interval < 1000 {
            errors.push("service.pollInterval must be at least 1000ms");
        }
        if self.service.max_buffer_size == 0 {
            errors.push("service.maxBufferSize must be greater than 0");
        }
        if self.status_resilience.model_failover.max_failovers_per_agent == 0 {
            errors.push("modelFailover.maxFailoversPerAgent must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchError::Config(errors.join("; ")))
        }
    }

    /// Checks required only when actually driving an orchestration: the
    /// default config is valid for tests and tooling but not runnable.
    pub fn ensure_runnable(&self) -> Result<()> {
        if self.tracker.owner.is_empty() || self.tracker.repo.is_empty() {
            return Err(OrchError::Config(
                "tracker.owner and tracker.repo must be set".to_string(),
            ));
        }
        if std::env::var(TRACKER_TOKEN_ENV).is_err() {
            return Err(OrchError::MissingEnv(TRACKER_TOKEN_ENV));
        }
        Ok(())
    }

    /// Agent settings for a role, falling back to defaults with the
    /// execution-level timeout.
    pub fn agent_entry(&self, role: &str) -> AgentEntry {
        self.agents.get(role).cloned().unwrap_or_else(|| AgentEntry {
            agent: role.to_string(),
            timeout: self.execution.timeout,
            ..AgentEntry::default()
        })
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.execution.auto_approve = auto_approve;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.service.port = port;
        self
    }
}

fn contains_comment_keys(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k.starts_with("_comment") || contains_comment_keys(v)),
        Value::Array(items) => items.iter().any(contains_comment_keys),
        _ => false,
    }
}

fn strip_comment_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|k, _| !k.starts_with("_comment"));
            for v in map.values_mut() {
                strip_comment_keys(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_comment_keys(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(OrchConfig::default().validate().is_ok());
    }

    #[test]
    fn max_concurrency_parses_auto_and_count() {
        let auto: MaxConcurrency = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(auto, MaxConcurrency::Auto);
        assert!(auto.resolve() >= 1);

        let fixed: MaxConcurrency = serde_json::from_str("4").unwrap();
        assert_eq!(fixed, MaxConcurrency::Count(4));
        assert_eq!(fixed.resolve(), 4);
    }

    #[test]
    fn max_concurrency_rejects_other_strings() {
        let result: std::result::Result<MaxConcurrency, _> = serde_json::from_str("\"fast\"");
        assert!(result.is_err());
    }

    #[test]
    fn notification_level_uses_kebab_case() {
        let level: NotificationLevel = serde_json::from_str("\"errors-only\"").unwrap();
        assert_eq!(level, NotificationLevel::ErrorsOnly);
        assert_eq!(
            serde_json::to_string(&NotificationLevel::AllMajorEvents).unwrap(),
            "\"all-major-events\""
        );
    }

    #[test]
    fn model_ref_round_trips_wire_keys() {
        let model: ModelRef =
            serde_json::from_str(r#"{"providerID": "anthropic", "modelID": "claude-opus-4"}"#)
                .unwrap();
        assert_eq!(model.provider_id, "anthropic");
        assert_eq!(model.to_string(), "anthropic/claude-opus-4");
    }

    #[test]
    fn comment_keys_are_detected_and_stripped() {
        let mut value = serde_json::json!({
            "_comment": "legacy header",
            "execution": {
                "_comment_baseUrl": "where the service lives",
                "baseUrl": "http://localhost:4096"
            }
        });
        assert!(contains_comment_keys(&value));
        strip_comment_keys(&mut value);
        assert!(!contains_comment_keys(&value));
        assert_eq!(value["execution"]["baseUrl"], "http://localhost:4096");
    }

    #[test]
    fn invalid_retry_config_is_rejected() {
        let mut config = OrchConfig::default();
        config.execution.retry.max_attempts = 0;
        config.execution.retry.backoff_multiplier = 0.5;
        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("maxAttempts"));
        assert!(message.contains("backoffMultiplier"));
    }

    #[test]
    fn agent_entry_falls_back_to_execution_timeout() {
        let config = OrchConfig::default();
        let entry = config.agent_entry("architect");
        assert_eq!(entry.agent, "architect");
        assert_eq!(entry.timeout, config.execution.timeout);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let config = OrchConfig::load(Path::new("/nonexistent/orchestrator.json"))
            .await
            .unwrap();
        assert_eq!(config.service.queue_label, "queue");
    }

    #[tokio::test]
    async fn legacy_file_is_migrated_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.json");
        let legacy = serde_json::json!({
            "_comment": "old style",
            "service": {
                "_comment_port": "web port",
                "port": 9000
            }
        });
        tokio::fs::write(&path, legacy.to_string()).await.unwrap();

        let config = OrchConfig::load(&path).await.unwrap();
        assert_eq!(config.service.port, 9000);
        assert!(path.with_extension("json.bak").exists());

        let rewritten = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!rewritten.contains("_comment"));
    }
}
