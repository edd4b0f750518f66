//! Resilience layer: session hang recovery and per-agent model failover.

mod failover;
mod watchdog;

pub use failover::{FailoverDecision, FailoverRecord, ModelFailover};
pub use watchdog::{SessionWatchdog, TerminationOutcome};
