//! Agent execution: the role vocabulary, the execution-service capability
//! interface, progress events, and the executor that ties them to the
//! resilience layer.

mod client;
mod events;
mod executor;
mod prompts;
mod roles;

pub use client::{AgentOutcome, AgentRequest, ExecutionService, HttpExecutionService};
pub use events::ProgressEvent;
pub use executor::{AgentExecutor, AgentRun, ExecuteOptions, ProgressSink};
pub use prompts::{
    architect_prompt, craftsman_prompt, sculptor_prompt, sentinel_prompt, validator_prompt,
};
pub use roles::AgentRole;
