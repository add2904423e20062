//! Runtime endpoint handlers.
//!
//! `POST {endpoint}` forwards the body to the default agent and relays the
//! response unchanged. There is no retry and no local processing.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::agents::AgentRequest;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Thread/run ids, read from the body for logging only.
#[derive(Debug, Default, Deserialize)]
struct RunIds {
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(rename = "runId")]
    run_id: Option<String>,
}

/// Forward an inbound run to the default agent.
pub async fn relay_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let agent = state.agents.default_agent();
    let ids: RunIds = serde_json::from_slice(&body).unwrap_or_default();
    info!(
        agent = agent.name(),
        thread_id = ids.thread_id.as_deref().unwrap_or("-"),
        run_id = ids.run_id.as_deref().unwrap_or("-"),
        "Relaying run"
    );

    let request = AgentRequest {
        body,
        content_type: headers.get(header::CONTENT_TYPE).cloned(),
        accept: headers.get(header::ACCEPT).cloned(),
    };

    let response = agent.run(request).await.map_err(|e| {
        warn!(agent = agent.name(), error = %e, "Agent request failed");
        ApiError::from(e)
    })?;

    if !response.status.is_success() {
        warn!(agent = agent.name(), status = response.status.as_u16(), "Agent returned an error status");
    } else {
        debug!(agent = agent.name(), status = response.status.as_u16(), "Streaming agent response");
    }

    let mut builder = Response::builder().status(response.status);
    if let Some(content_type) = response.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from_stream(response.body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// List the registered agents.
pub async fn info_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "agents": state.agents.list(),
        "defaultAgent": state.agents.default_agent().name(),
    }))
}
