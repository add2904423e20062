//! Server-rendered Proverbs page.
//!
//! Uses `rust-embed` to bake the `ui/` directory into the binary.
//! In debug mode (`debug-embed` feature), files are read from disk
//! so you can edit CSS and just refresh the browser.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use rust_embed::Embed;
use serde::Deserialize;
use tracing::{info, warn};

use proverbs_surface::{ProverbsPage, View};

pub const DOCUMENT_TITLE: &str = "ADK Agent Frontend";
pub const DOCUMENT_DESCRIPTION: &str = "Frontend for ADK agents with AG-UI and CopilotKit";

#[derive(Embed)]
#[folder = "ui/"]
struct UiAssets;

/// Build an axum `Router` that serves the page, the chat form, and assets.
///
/// Merge this **after** the runtime endpoint and `/health` so those routes
/// take priority.
pub fn ui_router(page: Arc<ProverbsPage>) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/chat", post(chat_handler))
        .route("/assets/{*path}", get(static_handler))
        .with_state(page)
}

/// Wrap a rendered page in the root HTML document.
pub fn render_document(body: &View) -> String {
    let head = View::el("head").children([
        View::el("meta").attr("charset", "utf-8"),
        View::el("meta")
            .attr("name", "viewport")
            .attr("content", "width=device-width, initial-scale=1"),
        View::el("title").with_text(DOCUMENT_TITLE),
        View::el("meta")
            .attr("name", "description")
            .attr("content", DOCUMENT_DESCRIPTION),
        View::el("link")
            .attr("rel", "stylesheet")
            .attr("href", "/assets/styles.css"),
    ]);

    let form = View::el("form")
        .class("chat-form")
        .attr("method", "post")
        .attr("action", "/chat")
        .children([
            View::el("input")
                .attr("type", "text")
                .attr("name", "message")
                .attr("placeholder", "Type a message...")
                .attr("autocomplete", "off"),
            View::el("button").attr("type", "submit").with_text("Send"),
        ]);

    let html = View::el("html")
        .attr("lang", "en")
        .child(head)
        .child(View::el("body").class("antialiased").child(body.clone()).child(form));

    format!("<!DOCTYPE html>\n{}", html.to_html())
}

async fn page_handler(State(page): State<Arc<ProverbsPage>>) -> impl IntoResponse {
    Html(render_document(&page.render()))
}

#[derive(Debug, Deserialize)]
struct ChatForm {
    #[serde(default)]
    message: String,
}

async fn chat_handler(
    State(page): State<Arc<ProverbsPage>>,
    Form(form): Form<ChatForm>,
) -> impl IntoResponse {
    let message = form.message.trim();
    if !message.is_empty() {
        match page.host().send_message(message).await {
            Ok(summary) => info!(runs = summary.run_ids.len(), "Chat turn complete"),
            // Already in the transcript.
            Err(e) => warn!(error = %e, "Chat turn failed"),
        }
    }
    Redirect::to("/")
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    serve_file(&path)
}

fn serve_file(path: &str) -> Response {
    match UiAssets::get(path) {
        Some(asset) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref())],
                asset.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, Html("<h1>404</h1>")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_shell() {
        let doc = render_document(&View::el("main").with_text("hi"));
        assert!(doc.starts_with("<!DOCTYPE html>\n<html lang=\"en\">"));
        assert!(doc.contains("<title>ADK Agent Frontend</title>"));
        assert!(doc.contains(
            "<meta name=\"description\" content=\"Frontend for ADK agents with AG-UI and CopilotKit\">"
        ));
        assert!(doc.contains("<body class=\"antialiased\"><main>hi</main>"));
        assert!(doc.contains("name=\"message\""));
    }

    #[test]
    fn test_stylesheet_embedded() {
        assert!(UiAssets::get("styles.css").is_some());
    }
}
