//! REST + WebSocket surface over the log hub and the queue, plus static
//! file serving for the web client build.

mod api;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;

use crate::error::{OrchError, Result};
use crate::logstream::LogHub;
use crate::queue::OrchQueue;

pub use api::AppState;

/// Build the full application router: API, WebSocket, static fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(Arc::clone(&state));

    // Unknown non-API paths fall back to the web client's index.html.
    if let Some(dir) = &state.static_dir {
        let serve = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        router = router.fallback_service(serve);
    }

    router.layer(CorsLayer::permissive())
}

pub struct ServerHandle {
    pub addr: std::net::SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Bind and serve in the background.
pub async fn start_server(
    host: &str,
    port: u16,
    hub: Arc<LogHub>,
    queue: OrchQueue,
    static_dir: Option<PathBuf>,
) -> Result<ServerHandle> {
    let state = Arc::new(AppState {
        hub,
        queue,
        started_at: Instant::now(),
        static_dir,
    });
    let router = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchError::Config(format!("cannot bind {}: {}", addr, e)))?;
    let addr = listener.local_addr()?;
    info!(%addr, "Web surface listening");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Web surface stopped");
        }
    });

    Ok(ServerHandle { addr, task })
}
