//! stdio child behind an HTTP + SSE server.
//!
//! Each `GET` on the SSE path spawns a dedicated child process and opens
//! a stream that first advertises the message endpoint, then relays the
//! child's stdout lines as `message` events. Clients POST envelopes to
//! the message endpoint with their `sessionId` and get `202 Accepted`
//! once the body is queued for the child's stdin. Dropping the SSE
//! connection, or the child exiting, tears the session down.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use futures::Stream;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    SESSION_ID_HEADER, decorate_router, is_json_line, shutdown_signal, to_single_line,
    with_health_endpoints,
};
use crate::cors::CorsOrigin;
use crate::error::GatewayError;
use crate::process::{ConnectionRegistry, ProcessSession, generate_session_id};

/// Configuration for the stdio-to-SSE gateway.
#[derive(Debug, Clone)]
pub struct StdioToSseOptions {
    /// Command line for the child MCP server.
    pub command: String,
    /// Extra arguments appended to the command line.
    pub args: Vec<String>,
    pub port: u16,
    /// Path clients connect to for the event stream.
    pub sse_path: String,
    /// Path clients POST message envelopes to.
    pub message_path: String,
    pub health_endpoints: Vec<String>,
    pub cors: Option<CorsOrigin>,
    /// Static headers injected into every HTTP response.
    pub headers: HeaderMap,
}

/// Runs the gateway until Ctrl+C or SIGTERM.
pub async fn run(options: StdioToSseOptions) -> Result<(), GatewayError> {
    let registry = ConnectionRegistry::new();
    let app = build_app(&options, registry.clone());

    let listener = TcpListener::bind(("0.0.0.0", options.port))
        .await
        .map_err(|source| GatewayError::Bind {
            port: options.port,
            source,
        })?;

    info!(command = %options.command, "Starting stdio-to-SSE gateway");
    info!(
        "SSE endpoint: http://localhost:{}{}",
        options.port, options.sse_path
    );
    info!(
        "Message endpoint: http://localhost:{}{}",
        options.port, options.message_path
    );

    // Sessions are closed as part of the shutdown future: an open event
    // stream only ends once its child exits, and the graceful drain
    // waits for exactly those streams.
    let shutdown_registry = registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_registry.close_all();
        })
        .await
        .map_err(GatewayError::Serve)?;

    registry.close_all();
    Ok(())
}

#[derive(Clone)]
struct AppState {
    registry: ConnectionRegistry,
    command: String,
    args: Vec<String>,
    message_path: String,
}

fn build_app(options: &StdioToSseOptions, registry: ConnectionRegistry) -> Router {
    let state = AppState {
        registry,
        command: options.command.clone(),
        args: options.args.clone(),
        message_path: options.message_path.clone(),
    };
    let router = Router::new()
        .route(&options.sse_path, get(sse_handler))
        .route(&options.message_path, post(message_handler));
    let router = with_health_endpoints(router, &options.health_endpoints).with_state(state);
    decorate_router(router, options.cors.as_ref(), &options.headers)
}

// ============================================================================
// Handlers
// ============================================================================

/// Opens a session: spawns the child and streams its output as SSE.
async fn sse_handler(State(state): State<AppState>) -> Response {
    let session_id = generate_session_id();
    let (session, out_rx) = match ProcessSession::spawn(&session_id, &state.command, &state.args) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Failed to spawn child process");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to start server").into_response();
        }
    };
    state.registry.insert(session.clone());
    info!(session = %session_id, "New SSE connection");

    let endpoint = format!("{}?sessionId={}", state.message_path, session_id);
    let stream = SessionStream {
        session_id,
        endpoint,
        out_rx,
        session,
        registry: state.registry.clone(),
        started: false,
        finished: false,
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Accepts one message envelope and queues it for the session's child.
/// The session is named by the `sessionId` query parameter or, failing
/// that, the `mcp-session-id` header.
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    request_headers: HeaderMap,
    body: String,
) -> Response {
    let session_id = query.session_id.or_else(|| {
        request_headers
            .get(SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    let Some(session_id) = session_id else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response();
    };

    let Some(session) = state.registry.get(&session_id) else {
        return session_not_found(&session_id);
    };
    if session.has_exited() {
        // The child is gone but stream teardown has not run yet.
        state.registry.remove(&session_id);
        return session_not_found(&session_id);
    }

    let line = match to_single_line(&body) {
        Ok(line) => line,
        Err(e) => {
            warn!(session = %session_id, error = %e, "Rejecting non-JSON message body");
            return (StatusCode::BAD_REQUEST, "Invalid JSON body").into_response();
        }
    };

    debug!(session = %session_id, bytes = line.len(), "Forwarding message to child");
    match session.send(line).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(e) => {
            // A child that stopped reading its stdin is torn down, not
            // just unregistered; it may still be running.
            warn!(session = %session_id, error = %e, "Failed to forward message");
            session.close();
            state.registry.remove(&session_id);
            session_not_found(&session_id)
        }
    }
}

fn session_not_found(session_id: &str) -> Response {
    let error = GatewayError::SessionNotFound(session_id.to_string());
    (StatusCode::NOT_FOUND, error.to_string()).into_response()
}

// ============================================================================
// Session stream
// ============================================================================

/// SSE body for one session. Emits the `endpoint` handshake event first,
/// then one `message` event per child stdout line, and a final `close`
/// event when the child exits. Dropping the stream closes the session
/// and removes it from the registry.
struct SessionStream {
    session_id: String,
    endpoint: String,
    out_rx: mpsc::Receiver<String>,
    session: ProcessSession,
    registry: ConnectionRegistry,
    started: bool,
    finished: bool,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if !this.started {
            this.started = true;
            let event = Event::default()
                .event("endpoint")
                .data(this.endpoint.clone());
            return Poll::Ready(Some(Ok(event)));
        }

        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match this.out_rx.poll_recv(cx) {
                Poll::Ready(Some(line)) => {
                    if !is_json_line(&line) {
                        error!(
                            session = %this.session_id,
                            "Child produced non-JSON output, dropping line"
                        );
                        continue;
                    }
                    debug!(
                        session = %this.session_id,
                        bytes = line.len(),
                        "Relaying message to SSE client"
                    );
                    return Poll::Ready(Some(Ok(Event::default().event("message").data(line))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(Some(Ok(Event::default().event("close").data(""))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.session.close();
        self.registry.remove(&self.session_id);
        let uptime = (Utc::now() - self.session.started_at()).num_seconds();
        info!(
            session = %self.session_id,
            uptime_secs = uptime,
            "SSE connection closed"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
