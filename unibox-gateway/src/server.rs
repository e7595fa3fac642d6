use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    cancel_schedule_handler, create_schedule_handler, fetch_messages_handler, health_handler,
    job_status_handler, list_schedules_handler, submit_job_handler, sync_outbox_handler,
    webhook_handler,
};
use crate::state::AppState;
use crate::ws::ws_handler;

/// Build the gateway router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/jobs", post(submit_job_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .route(
            "/api/schedules",
            get(list_schedules_handler).post(create_schedule_handler),
        )
        .route(
            "/api/schedules/:id",
            axum::routing::delete(cancel_schedule_handler),
        )
        .route("/api/webhooks/:channel", post(webhook_handler))
        .route(
            "/api/channels/:channel/conversations/:id/messages",
            get(fetch_messages_handler),
        )
        .route("/api/outbox/sync", post(sync_outbox_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until the shutdown signal fires
pub async fn run_server(
    state: AppState,
    host: &str,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            tracing::info!("Server shutting down signal received");
        })
        .await?;

    Ok(())
}
