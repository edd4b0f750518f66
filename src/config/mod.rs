//! Typed configuration: load, validation, overrides, legacy migration.

mod settings;

pub use settings::{
    AgentEntry, ExecutionConfig, FailoverConfig, LoggingConfig, MaxConcurrency, ModelRef,
    NotificationLevel, NotifierConfig, OrchConfig, ParallelConfig, ResilienceConfig,
    ResilienceFeatures, RetryConfig, ServiceConfig, StatusTableConfig, TestingConfig,
    TrackerConfig, WorktreeConfig, TRACKER_TOKEN_ENV,
};
