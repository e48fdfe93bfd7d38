use axum::Router;
use axum::routing::{get, post, put};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relay_engine::EngineHandle;

mod http;

#[derive(Clone)]
pub(crate) struct AppState {
    engine: EngineHandle,
}

/// HTTP routes for ingest, enrichment writes and inspection.
pub fn router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/api/events", post(http::handle_post_events))
        .route("/api/records/{id}", put(http::handle_put_record))
        .route("/api/dead-letters", get(http::handle_list_dead_letters))
        .route("/api/status", get(http::handle_status))
        .with_state(AppState { engine })
}

/// Bind `0.0.0.0:{port}` and serve until `shutdown` is cancelled.
pub async fn run(port: u16, engine: EngineHandle, shutdown: CancellationToken) -> Result<(), String> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    serve(listener, engine, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, engine: EngineHandle, shutdown: CancellationToken) -> Result<(), String> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "api server listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))
}
