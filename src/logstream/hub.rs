use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::event::{LogContext, LogEvent, LogLevel};

pub type SinkId = u64;

/// Frames delivered to a subscriber: one snapshot of the buffer at
/// subscription time, then individual events in publication order.
#[derive(Debug, Clone)]
pub enum SinkFrame {
    Init(Vec<LogEvent>),
    Event(LogEvent),
}

#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub buffered: usize,
    pub capacity: usize,
    pub subscribers: usize,
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub fatal: usize,
}

struct Sink {
    id: SinkId,
    tx: mpsc::UnboundedSender<SinkFrame>,
}

struct HubInner {
    buffer: VecDeque<LogEvent>,
    capacity: usize,
    sinks: Vec<Sink>,
    next_sink_id: SinkId,
}

/// Ring-buffered log bus. Publish is O(1) amortized; broadcast is
/// best-effort and drops sinks whose receiving side has gone away.
pub struct LogHub {
    inner: Mutex<HubInner>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                sinks: Vec::new(),
                next_sink_id: 0,
            }),
        }
    }

    pub fn publish(&self, event: LogEvent) {
        let mut inner = self.inner.lock();
        if inner.buffer.len() == inner.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(event.clone());
        inner
            .sinks
            .retain(|sink| sink.tx.send(SinkFrame::Event(event.clone())).is_ok());
    }

    pub fn subscribe(&self) -> (SinkId, mpsc::UnboundedReceiver<SinkFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_sink_id;
        inner.next_sink_id += 1;

        let snapshot: Vec<LogEvent> = inner.buffer.iter().cloned().collect();
        // A receiver we just created cannot be closed yet.
        let _ = tx.send(SinkFrame::Init(snapshot));
        inner.sinks.push(Sink { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SinkId) {
        self.inner.lock().sinks.retain(|sink| sink.id != id);
    }

    /// The most recent `count` events in publication order.
    pub fn recent(&self, count: usize) -> Vec<LogEvent> {
        let inner = self.inner.lock();
        let skip = inner.buffer.len().saturating_sub(count);
        inner.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn by_issue(&self, issue: u64) -> Vec<LogEvent> {
        self.filtered(|e| e.context.issue == Some(issue) || e.context.sub_issue == Some(issue))
    }

    pub fn by_agent(&self, agent: &str) -> Vec<LogEvent> {
        self.filtered(|e| e.context.agent.as_deref() == Some(agent))
    }

    pub fn by_level(&self, level: LogLevel) -> Vec<LogEvent> {
        self.filtered(|e| e.level == level)
    }

    fn filtered(&self, predicate: impl Fn(&LogEvent) -> bool) -> Vec<LogEvent> {
        self.inner
            .lock()
            .buffer
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> LogStats {
        let inner = self.inner.lock();
        let count = |level: LogLevel| inner.buffer.iter().filter(|e| e.level == level).count();
        LogStats {
            buffered: inner.buffer.len(),
            capacity: inner.capacity,
            subscribers: inner.sinks.len(),
            debug: count(LogLevel::Debug),
            info: count(LogLevel::Info),
            warn: count(LogLevel::Warn),
            error: count(LogLevel::Error),
            fatal: count(LogLevel::Fatal),
        }
    }

    // Convenience helpers used throughout the stages.

    pub fn debug(&self, message: impl Into<String>, context: LogContext) {
        self.log(LogLevel::Debug, message, context);
    }

    pub fn info(&self, message: impl Into<String>, context: LogContext) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn warn(&self, message: impl Into<String>, context: LogContext) {
        self.log(LogLevel::Warn, message, context);
    }

    pub fn error(&self, message: impl Into<String>, context: LogContext) {
        self.log(LogLevel::Error, message, context);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: LogContext) {
        let mut event = LogEvent::new(level, message);
        event.context = context;
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(message: &str) -> LogEvent {
        LogEvent::new(LogLevel::Info, message)
    }

    #[test]
    fn ring_evicts_oldest_when_full() {
        let hub = LogHub::new(3);
        for i in 0..5 {
            hub.publish(event(&format!("e{}", i)));
        }
        let recent = hub.recent(10);
        let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn recent_returns_publication_order() {
        let hub = LogHub::new(10);
        hub.publish(event("first"));
        hub.publish(event("second"));
        hub.publish(event("third"));
        let recent = hub.recent(2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "third");
    }

    #[tokio::test]
    async fn subscriber_gets_init_snapshot_then_events() {
        let hub = LogHub::new(10);
        hub.publish(event("a"));
        hub.publish(event("b"));
        hub.publish(event("c"));

        let (_id, mut rx) = hub.subscribe();
        match rx.recv().await.unwrap() {
            SinkFrame::Init(snapshot) => assert_eq!(snapshot.len(), 3),
            SinkFrame::Event(_) => panic!("expected init frame first"),
        }

        hub.publish(event("d"));
        match rx.recv().await.unwrap() {
            SinkFrame::Event(e) => assert_eq!(e.message, "d"),
            SinkFrame::Init(_) => panic!("expected event frame"),
        }
    }

    #[tokio::test]
    async fn dropped_subscriber_is_reaped_on_publish() {
        let hub = LogHub::new(10);
        let (_id, rx) = hub.subscribe();
        assert_eq!(hub.stats().subscribers, 1);

        drop(rx);
        hub.publish(event("after drop"));
        assert_eq!(hub.stats().subscribers, 0);
    }

    #[test]
    fn unsubscribe_removes_sink() {
        let hub = LogHub::new(10);
        let (id, _rx) = hub.subscribe();
        hub.unsubscribe(id);
        assert_eq!(hub.stats().subscribers, 0);
    }

    #[test]
    fn filtered_reads() {
        let hub = LogHub::new(10);
        hub.publish(event("plain"));
        hub.publish(LogEvent::new(LogLevel::Error, "boom").with_issue(42));
        hub.publish(LogEvent::new(LogLevel::Info, "agent msg").with_agent("sentinel"));

        assert_eq!(hub.by_issue(42).len(), 1);
        assert_eq!(hub.by_agent("sentinel").len(), 1);
        assert_eq!(hub.by_level(LogLevel::Error).len(), 1);
        assert_eq!(hub.by_level(LogLevel::Info).len(), 2);
    }
}
