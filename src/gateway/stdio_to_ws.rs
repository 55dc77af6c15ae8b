//! stdio child behind a WebSocket server.
//!
//! Session identity is the socket itself: each accepted connection
//! spawns a dedicated child process, inbound text frames become lines on
//! the child's stdin, and child stdout lines become outbound text
//! frames. Socket close and child exit each tear down the other side.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use reqwest::header::HeaderMap;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::{decorate_router, is_json_line, shutdown_signal, to_single_line, with_health_endpoints};
use crate::cors::CorsOrigin;
use crate::error::GatewayError;
use crate::process::{ConnectionRegistry, ProcessSession, generate_session_id};

/// Configuration for the stdio-to-WebSocket gateway.
#[derive(Debug, Clone)]
pub struct StdioToWsOptions {
    /// Command line for the child MCP server.
    pub command: String,
    /// Extra arguments appended to the command line.
    pub args: Vec<String>,
    pub port: u16,
    /// Path clients connect their WebSocket to.
    pub message_path: String,
    pub health_endpoints: Vec<String>,
    pub cors: Option<CorsOrigin>,
}

/// Runs the gateway until Ctrl+C or SIGTERM.
pub async fn run(options: StdioToWsOptions) -> Result<(), GatewayError> {
    let registry = ConnectionRegistry::new();
    let app = build_app(&options, registry.clone());

    let listener = TcpListener::bind(("0.0.0.0", options.port))
        .await
        .map_err(|source| GatewayError::Bind {
            port: options.port,
            source,
        })?;

    info!(command = %options.command, "Starting stdio-to-WebSocket gateway");
    info!(
        "WebSocket endpoint: ws://localhost:{}{}",
        options.port, options.message_path
    );

    // Sessions are closed as part of the shutdown future: a live socket
    // loop only ends once its child exits, and the graceful drain waits
    // for exactly those connections.
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
}

fn build_app(options: &StdioToWsOptions, registry: ConnectionRegistry) -> Router {
    let state = AppState {
        registry,
        command: options.command.clone(),
        args: options.args.clone(),
    };
    let router = Router::new().route(&options.message_path, get(ws_handler));
    let router = with_health_endpoints(router, &options.health_endpoints).with_state(state);
    decorate_router(router, options.cors.as_ref(), &HeaderMap::new())
}

async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drives one connection: a dedicated child plus the two relay
/// directions, multiplexed on this task.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let session_id = generate_session_id();
    let (session, mut out_rx) = match ProcessSession::spawn(&session_id, &state.command, &state.args)
    {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Failed to spawn child process");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    state.registry.insert(session.clone());
    info!(session = %session_id, "New WebSocket connection");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(session = %session_id, "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session_id, "Client closed socket");
                        break;
                    }
                    // Pings are answered by the protocol layer.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                };
                match to_single_line(&text) {
                    Ok(line) => {
                        debug!(session = %session_id, bytes = line.len(), "Forwarding frame to child");
                        if let Err(e) = session.send(line).await {
                            warn!(session = %session_id, error = %e, "Failed to forward frame");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "Dropping non-JSON frame");
                    }
                }
            }
            line = out_rx.recv() => match line {
                Some(line) => {
                    if !is_json_line(&line) {
                        error!(
                            session = %session_id,
                            "Child produced non-JSON output, dropping line"
                        );
                        continue;
                    }
                    debug!(session = %session_id, bytes = line.len(), "Relaying message to client");
                    if sink.send(Message::Text(line.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Child exited; tell the client before tearing down.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    session.close();
    state.registry.remove(&session_id);
    info!(session = %session_id, "WebSocket connection closed");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
    use tower::ServiceExt;

    fn test_options() -> StdioToWsOptions {
        StdioToWsOptions {
            command: "cat".to_string(),
            args: Vec::new(),
            port: 0,
            message_path: "/message".to_string(),
            health_endpoints: vec!["/healthz".to_string()],
            cors: None,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_app(&test_options(), ConnectionRegistry::new());
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_plain_get_without_upgrade_is_rejected() {
        let app = build_app(&test_options(), ConnectionRegistry::new());
        let response = app
            .oneshot(Request::get("/message").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    async fn next_text(
        socket: &mut WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    ) -> String {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed early")
                .unwrap();
            if let tungstenite::Message::Text(text) = frame {
                return text.to_string();
            }
        }
    }

    async fn serve(
        options: &StdioToWsOptions,
        registry: ConnectionRegistry,
    ) -> std::net::SocketAddr {
        let app = build_app(options, registry);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_frame_roundtrip_preserves_order() {
        let registry = ConnectionRegistry::new();
        let addr = serve(&test_options(), registry.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/message")).await.unwrap();
        socket
            .send(tungstenite::Message::text(r#"{"id":1}"#))
            .await
            .unwrap();
        socket
            .send(tungstenite::Message::text(r#"{"id":2}"#))
            .await
            .unwrap();
        assert_eq!(next_text(&mut socket).await, r#"{"id":1}"#);
        assert_eq!(next_text(&mut socket).await, r#"{"id":2}"#);

        socket.close(None).await.unwrap();
        // The close frame unregisters the session and kills its child.
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_child_exit_closes_the_socket() {
        let registry = ConnectionRegistry::new();
        let mut options = test_options();
        options.command = "true".to_string();
        let addr = serve(&options, registry.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/message")).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for close");
        assert!(matches!(
            frame,
            None | Some(Ok(tungstenite::Message::Close(_)))
        ));
    }
}
