use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::warn;

use super::hub::{LogHub, SinkFrame};

/// Path of today's log file under `log_dir`.
pub fn current_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("orchestrator-{}.log", Utc::now().format("%Y-%m-%d")))
}

/// Drains a hub subscription into daily log files. Durability is
/// best-effort: write failures are logged and the sink keeps going.
pub struct FileSink {
    handle: JoinHandle<()>,
}

impl FileSink {
    pub fn spawn(hub: Arc<LogHub>, log_dir: PathBuf) -> Self {
        let (_id, mut rx) = hub.subscribe();
        let handle = tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(error = %e, dir = %log_dir.display(), "Failed to create log directory");
                return;
            }

            while let Some(frame) = rx.recv().await {
                let line = match frame {
                    // The init snapshot was already written by a previous
                    // sink incarnation; skip it to avoid duplicates.
                    SinkFrame::Init(_) => continue,
                    SinkFrame::Event(event) => format!("{}\n", event.format_line()),
                };
                write_line(&log_dir, &line).await;
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn write_line(log_dir: &Path, line: &str) {
    let path = current_log_path(log_dir);
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await;

    match result {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!(error = %e, "Failed to write log line");
            }
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to open log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstream::{LogEvent, LogLevel};

    #[test]
    fn log_path_is_dated() {
        let path = current_log_path(Path::new("logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("orchestrator-"));
        assert!(name.ends_with(".log"));
    }

    #[tokio::test]
    async fn sink_appends_published_events() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(LogHub::new(100));
        let sink = FileSink::spawn(Arc::clone(&hub), dir.path().to_path_buf());

        hub.publish(LogEvent::new(LogLevel::Info, "hello sink").with_issue(1));

        // Give the sink task a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let content = tokio::fs::read_to_string(current_log_path(dir.path()))
            .await
            .unwrap();
        assert!(content.contains("hello sink"));
        assert!(content.contains("issue=#1"));
        sink.stop();
    }
}
