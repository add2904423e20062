//! Axum-based HTTP server.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::middleware::request_logging;
use crate::relay::{info_handler, relay_handler};
use crate::state::GatewayState;

/// Build the gateway router.
///
/// `ui` is merged after the runtime and health routes so those take priority
/// over any page catch-all.
pub fn gateway_router(state: Arc<GatewayState>, ui: Option<Router>) -> Router {
    let endpoint = state.endpoint.clone();
    let mut app = Router::new()
        // Run payloads are forwarded at any size.
        .route(&endpoint, post(relay_handler).layer(DefaultBodyLimit::disable()))
        .route(&format!("{endpoint}/info"), get(info_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if let Some(ui) = ui {
        app = app.merge(ui);
    }

    app.layer(axum::middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
}

/// Start the gateway server and run until Ctrl-C.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    port: u16,
    ui: Option<Router>,
) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr();
    let endpoint = state.endpoint.clone();
    let default_agent = state.agents.default_agent().name().to_string();
    let ui_enabled = ui.is_some();

    let app = gateway_router(state, ui);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, %endpoint, agent = %default_agent, "Gateway listening");
    if ui_enabled {
        info!("Page available at http://{bind_addr}:{port}/");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.agents.count(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
