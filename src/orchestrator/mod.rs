//! The orchestration engine: per-run context, stage implementations, the
//! stage sequencer, and the factory the queue uses to build a fresh engine
//! per run.

mod approval;
mod completion;
mod context;
mod engine;
mod implementing;
mod plan;
mod planning;
mod testing;

pub use approval::{ApprovalDecision, ApprovalMonitor};
pub use completion::CompletionStage;
pub use context::OrchContext;
pub use engine::{reconstruct_plan, Orchestrator, OrchestratorFactory, RunOutcome};
pub use implementing::ImplementationStage;
pub use plan::{
    parse_task_markers, parse_tasks, spec_section, task_body, Plan, PlannedTask, Specification,
    TaskKind,
};
pub use planning::PlanningStage;
pub use testing::{parse_failure_context, FailureContext, TestDetail, TestReport, TestingStage};
