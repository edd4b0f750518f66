//! Process-wide log bus: a bounded ring buffer with best-effort fan-out to
//! subscribers (WebSocket connections, file sinks). Lossy by design; the
//! tracker remains the system of record.

mod event;
mod file_sink;
mod hub;

pub use event::{LogContext, LogEvent, LogLevel};
pub use file_sink::{current_log_path, FileSink};
pub use hub::{LogHub, LogStats, SinkFrame, SinkId};
