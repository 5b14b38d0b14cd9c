//! HTTP adapter: upload form and upload handler over [`Extractor`].
//!
//! The handler returns HTML *fragments* meant to be inserted into the page
//! that posted them, so request-shape problems (no `file` field, empty
//! filename) answer `200 OK` with an error fragment and never start the
//! pipeline. Only decode/OCR failures change the status code.

use crate::error::ReceiptError;
use crate::extract::Extractor;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Fragment returned when the request has no `file` field.
pub const NO_FILE_FRAGMENT: &str =
    r#"<div class="result" style="background:#ffe6e6;"><h3>❌ Error</h3><p>No file uploaded!</p></div>"#;

/// Fragment returned when the `file` field carries an empty filename.
pub const NO_FILE_SELECTED_FRAGMENT: &str =
    r#"<div class="result" style="background:#ffe6e6;"><h3>❌ Error</h3><p>No file selected!</p></div>"#;

/// Upload form served at `GET /`.
pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>receipt2json</title>
  <style>
    body { font-family: system-ui, sans-serif; max-width: 720px; margin: 2rem auto; }
    .result { margin-top: 1.5rem; padding: 1rem; border-radius: 6px; background: #eef6ee; }
    pre { white-space: pre-wrap; word-break: break-word; }
  </style>
</head>
<body>
  <h1>Receipt → JSON</h1>
  <form id="upload" method="post" action="/" enctype="multipart/form-data">
    <input type="file" name="file" accept="image/*">
    <button type="submit">Extract</button>
  </form>
  <div id="output"></div>
  <script>
    document.getElementById("upload").addEventListener("submit", async (ev) => {
      ev.preventDefault();
      const out = document.getElementById("output");
      out.innerHTML = "<p>Processing…</p>";
      const res = await fetch("/", { method: "POST", body: new FormData(ev.target) });
      out.innerHTML = await res.text();
    });
  </script>
</body>
</html>
"#;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    backend: String,
}

/// Build the router: `GET /`, `POST /`, `GET /health`.
///
/// The multipart body limit is taken from the extractor's
/// `max_upload_bytes`.
pub fn build_router(extractor: Arc<Extractor>) -> Router {
    let body_limit = extractor.config().max_upload_bytes;
    let state = AppState { extractor };

    Router::new()
        .route("/", get(index_handler).post(upload_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl+C / SIGTERM.
pub async fn run_server(
    extractor: Arc<Extractor>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Backend: {}", extractor.backend_name());
    let app = build_router(extractor);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", listener.local_addr()?);
    info!("  GET  /        - Upload form");
    info!("  POST /        - Extract expense from multipart field 'file'");
    info!("  GET  /health  - Health check");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.extractor.backend_name(),
    })
}

async fn upload_handler(
    State(state): State<AppState>,
    multipart: Option<Multipart>,
) -> impl IntoResponse {
    let request_id = uuid::Uuid::new_v4().to_string();
    let start = Instant::now();

    let Some(mut multipart) = multipart else {
        info!(request_id = %request_id, "Request is not multipart");
        return (StatusCode::OK, Html(NO_FILE_FRAGMENT.to_string()));
    };

    // ── Find the `file` field ────────────────────────────────────────────
    let upload = loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                // A part without a `filename` parameter is a form value, not a file.
                let Some(filename) = field.file_name().map(str::to_string) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(bytes) => break Some((filename, bytes)),
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Could not read upload");
                        return (e.status(), Html(render_error(&e.body_text())));
                    }
                }
            }
            Ok(None) => break None,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Malformed multipart body");
                return (e.status(), Html(render_error(&e.body_text())));
            }
        }
    };

    let Some((filename, bytes)) = upload else {
        info!(request_id = %request_id, "No file field in upload");
        return (StatusCode::OK, Html(NO_FILE_FRAGMENT.to_string()));
    };
    if filename.is_empty() {
        info!(request_id = %request_id, "Empty filename in upload");
        return (StatusCode::OK, Html(NO_FILE_SELECTED_FRAGMENT.to_string()));
    }

    info!(
        request_id = %request_id,
        filename = %filename,
        bytes = bytes.len(),
        "Processing upload"
    );

    // ── Run the pipeline ─────────────────────────────────────────────────
    match state.extractor.extract_upload(&bytes, &filename).await {
        Ok(result) => {
            info!(
                request_id = %request_id,
                source = ?result.source,
                ocr_ms = result.stats.ocr_ms,
                llm_ms = result.stats.llm_ms,
                total_ms = start.elapsed().as_millis() as u64,
                "Upload processed"
            );
            (StatusCode::OK, Html(render_result(&result.content)))
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Extraction failed");
            (status_for(&e), Html(render_error(&e.to_string())))
        }
    }
}

fn status_for(err: &ReceiptError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Wrap extraction output in the result fragment.
pub fn render_result(content: &str) -> String {
    format!(
        r#"<div class="result"><div class="ai-output"><h3>Extracted Information</h3><pre>{}</pre></div></div>"#,
        escape_pre(content)
    )
}

/// Error fragment for fatal pipeline failures.
pub fn render_error(message: &str) -> String {
    format!(
        r#"<div class="result" style="background:#ffe6e6;"><h3>❌ Error</h3><p>{}</p></div>"#,
        escape_pre(message)
    )
}

/// Escape `&`, `<` and `>`. Quotes are left alone so JSON reads verbatim.
pub fn escape_pre(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_keeps_quotes() {
        assert_eq!(
            escape_pre(r#"{"a": "<b> & c"}"#),
            r#"{"a": "&lt;b&gt; &amp; c"}"#
        );
    }

    #[test]
    fn result_fragment_shape() {
        let html = render_result("⚡ Processed in 1.00s\n\n{}");
        assert_eq!(
            html,
            "<div class=\"result\"><div class=\"ai-output\"><h3>Extracted Information</h3>\
             <pre>⚡ Processed in 1.00s\n\n{}</pre></div></div>"
        );
    }

    #[test]
    fn error_fragment_is_escaped() {
        let html = render_error("bad <input>");
        assert!(html.contains("<p>bad &lt;input&gt;</p>"));
        assert!(html.starts_with(r#"<div class="result" style="background:#ffe6e6;">"#));
    }

    #[test]
    fn decode_errors_are_422() {
        let e = ReceiptError::Decode {
            detail: "x".into(),
        };
        assert_eq!(status_for(&e), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_for(&ReceiptError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
