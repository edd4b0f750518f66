//! Issue-tracker capability surface: the trait the engine consumes, the
//! GitHub REST implementation, the label vocabulary, the label-backed state
//! machine, the issue-body composer, and the completion poller.

mod body;
mod client;
mod github;
mod labels;
mod poller;
mod state;

pub use body::{IssueBody, ProgressMarkers, ORCH_BLOCK_END, ORCH_BLOCK_START};
pub use client::{Comment, IssueTracker, NewPullRequest, PullRequest, Ticket};
pub use github::GitHubTracker;
pub use labels::Labels;
pub use poller::TaskPoller;
pub use state::{OrchState, StateStore};
