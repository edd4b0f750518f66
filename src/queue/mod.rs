//! Service queue: one orchestration at a time, a bounded run history, and
//! the poller that feeds the queue from the tracker's queue label.

mod fifo;
mod source_poller;

pub use fifo::{OrchQueue, QueueSnapshot, QueueStats, RunRecord};
pub use source_poller::SourcePoller;
