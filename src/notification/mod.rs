//! Webhook notifications: typed event kinds, filter levels, rich message
//! templates, optional file attachments.

mod events;
mod notifier;

pub use events::{Event, EventKind};
pub use notifier::Notifier;
