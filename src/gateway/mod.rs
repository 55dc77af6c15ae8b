//! Transport gateways bridging an MCP server on one transport to its
//! clients on another.
//!
//! ```text
//!   stdio_to_sse              child stdio   <->  HTTP + SSE server
//!   stdio_to_ws               child stdio   <->  WebSocket server
//!   sse_to_stdio              local stdio   <->  remote SSE endpoint
//!   streamable_http_to_stdio  local stdio   <->  remote streamable HTTP
//! ```
//!
//! Message envelopes are opaque: gateways validate that a payload is
//! well-formed JSON and reframe it for the target transport, but never
//! interpret ids or methods.

pub mod sse_to_stdio;
pub mod stdio_to_sse;
pub mod stdio_to_ws;
pub mod streamable_http_to_stdio;

pub use sse_to_stdio::SseToStdioOptions;
pub use stdio_to_sse::StdioToSseOptions;
pub use stdio_to_ws::StdioToWsOptions;
pub use streamable_http_to_stdio::StreamableHttpToStdioOptions;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use reqwest::header::HeaderMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info};

use crate::cors::CorsOrigin;

/// Session token header of the streamable HTTP transport. The SSE
/// message endpoint also accepts it in place of the `sessionId` query
/// parameter.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Renders an inbound payload as a single line suitable for newline
/// framing. Well-formed single-line JSON passes through byte for byte;
/// multi-line JSON is re-serialized compactly. Invalid JSON is an error.
pub(crate) fn to_single_line(raw: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let trimmed = raw.trim();
    if trimmed.contains('\n') {
        Ok(value.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Whether a child stdout line is a well-formed JSON envelope. Lines
/// that are not get logged and dropped instead of relayed.
pub(crate) fn is_json_line(line: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(line).is_ok()
}

/// Writes one newline-terminated message line, typically to local
/// stdout.
pub(crate) async fn write_stdout_line<W>(out: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

/// Applies the CORS policy and static response headers to a finished
/// router.
pub(crate) fn decorate_router(
    mut router: Router,
    cors: Option<&CorsOrigin>,
    headers: &HeaderMap,
) -> Router {
    for (name, value) in headers.iter() {
        router = router.layer(SetResponseHeaderLayer::overriding(
            name.clone(),
            value.clone(),
        ));
    }
    if let Some(cors) = cors {
        router = router.layer(cors.layer());
    }
    router
}

/// Adds a `200 ok` handler at each configured health path.
pub(crate) fn with_health_endpoints<S>(mut router: Router<S>, endpoints: &[String]) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    for path in endpoints {
        router = router.route(path, get(healthz));
    }
    router
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// ============================================================================
// Tests
// ============================================================================
