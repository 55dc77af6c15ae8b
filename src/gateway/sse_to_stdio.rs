//! Local stdio interface to a remote SSE server.
//!
//! Connects as an SSE client, waits for the remote's `endpoint`
//! handshake event, then relays in both directions: local stdin lines
//! are POSTed to the advertised endpoint, remote `message` events are
//! written to local stdout. The handshake is the one hard deadline; a
//! remote that never advertises its endpoint is a fatal error.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use url::Url;

use super::{to_single_line, write_stdout_line};
use crate::error::GatewayError;
use crate::sse_parser::SseParser;

/// Configuration for the SSE-to-stdio gateway.
#[derive(Debug, Clone)]
pub struct SseToStdioOptions {
    /// Remote SSE endpoint to connect to.
    pub sse_url: String,
    /// Headers attached to the SSE connect and every message POST.
    pub headers: HeaderMap,
    /// How long to wait for the remote's `endpoint` handshake event.
    pub handshake_timeout: Duration,
}

/// Runs the gateway until the remote stream or local stdin closes.
pub async fn run(options: SseToStdioOptions) -> Result<(), GatewayError> {
    let client = Client::new();
    info!(url = %options.sse_url, "Connecting to SSE endpoint");

    let response = client
        .get(&options.sse_url)
        .headers(options.headers.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::RemoteRequest {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }

    let base_url = Url::parse(&options.sse_url)?;
    let mut events = SseParser::new(response.bytes_stream());

    let endpoint = wait_for_endpoint(&mut events, &base_url, options.handshake_timeout).await?;
    info!(endpoint = %endpoint, "Connected to SSE endpoint");

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => match event.event.as_str() {
                    "message" => match to_single_line(&event.data) {
                        Ok(line) => {
                            debug!(bytes = line.len(), "Received message event");
                            write_stdout_line(&mut stdout, &line)
                                .await
                                .map_err(GatewayError::Stdio)?;
                        }
                        Err(e) => {
                            error!(error = %e, "Dropping non-JSON message event");
                        }
                    },
                    other => debug!(event = %other, "Ignoring event"),
                },
                Some(Err(e)) => return Err(GatewayError::Request(e)),
                None => {
                    info!("Remote event stream closed");
                    break;
                }
            },
            line = stdin_lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    forward_message(&client, &endpoint, &options.headers, &line).await;
                }
                Ok(None) => {
                    info!("Local stdin closed");
                    break;
                }
                Err(e) => return Err(GatewayError::Stdio(e)),
            },
        }
    }
    Ok(())
}

/// Consumes events until the remote advertises its message endpoint.
async fn wait_for_endpoint<S>(
    events: &mut SseParser<S>,
    base_url: &Url,
    timeout: Duration,
) -> Result<Url, GatewayError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    let handshake = async {
        while let Some(event) = events.next().await {
            let event = event?;
            if event.event == "endpoint" {
                return Ok(Some(event.data));
            }
            debug!(event = %event.event, "Ignoring pre-handshake event");
        }
        Ok(None)
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(Some(endpoint))) => resolve_endpoint(base_url, &endpoint),
        Ok(Ok(None)) => Err(GatewayError::HandshakeClosed),
        Ok(Err(e)) => Err(GatewayError::Request(e)),
        Err(_) => Err(GatewayError::HandshakeTimeout {
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Resolves an advertised endpoint, which may be relative to the SSE
/// URL or fully qualified.
fn resolve_endpoint(base_url: &Url, endpoint: &str) -> Result<Url, GatewayError> {
    Ok(base_url.join(endpoint)?)
}

/// POSTs one stdin line to the remote endpoint. A failed POST is only
/// surfaced through the logs; no synthetic error is written to stdout.
async fn forward_message(client: &Client, endpoint: &Url, headers: &HeaderMap, raw: &str) {
    let line = match to_single_line(raw) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "Dropping non-JSON input line");
            return;
        }
    };

    debug!(bytes = line.len(), "Forwarding message to remote endpoint");
    let result = client
        .post(endpoint.clone())
        .headers(headers.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(line)
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => {
            debug!(status = response.status().as_u16(), "Remote accepted message");
        }
        Ok(response) => {
            error!(
                status = response.status().as_u16(),
                "Remote endpoint rejected message"
            );
        }
        Err(e) => error!(error = %e, "Failed to reach remote endpoint"),
    }
}

// ============================================================================
// Tests
// ============================================================================
