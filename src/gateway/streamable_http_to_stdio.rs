//! Local stdio interface to a remote streamable HTTP server.
//!
//! Every stdin line becomes one POST to the remote endpoint. The server
//! issues a session token in the `mcp-session-id` response header which
//! is echoed on every subsequent request so the remote can keep
//! conversation state. Responses come back either as a single JSON body
//! or as an event stream whose `message` events are written to stdout
//! one line each, in arrival order.
//!
//! A `404` on a request that carried a token means the server no longer
//! recognizes the session. The gateway then re-issues the request once
//! without a token, capturing the fresh token from the reply. A second
//! `404` is fatal. Any other failure status is logged and the exchange
//! is abandoned without a synthetic reply.

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Response, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{SESSION_ID_HEADER, to_single_line, write_stdout_line};
use crate::error::GatewayError;
use crate::sse_parser::SseParser;

/// Configuration for the streamable-HTTP-to-stdio gateway.
#[derive(Debug, Clone)]
pub struct StreamableHttpToStdioOptions {
    /// Fully resolved endpoint URL, including any routing rewrite.
    pub url: Url,
    /// Headers attached to every request.
    pub headers: HeaderMap,
}

/// Runs the gateway until local stdin closes or an exchange fails
/// fatally.
pub async fn run(options: StreamableHttpToStdioOptions) -> Result<(), GatewayError> {
    let client = Client::new();
    info!(url = %options.url, "Starting streamable HTTP gateway");

    let mut session_token: Option<String> = None;
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(raw) = stdin_lines
        .next_line()
        .await
        .map_err(GatewayError::Stdio)?
    {
        if raw.trim().is_empty() {
            continue;
        }
        let line = match to_single_line(&raw) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Dropping non-JSON input line");
                continue;
            }
        };
        exchange(&client, &options, &mut session_token, line, &mut stdout).await?;
    }

    info!("Local stdin closed");
    Ok(())
}

/// Performs one request/response exchange, retrying exactly once with a
/// fresh handshake when the server rejects the session token.
async fn exchange<W>(
    client: &Client,
    options: &StreamableHttpToStdioOptions,
    session_token: &mut Option<String>,
    line: String,
    out: &mut W,
) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    let response = send_request(client, options, session_token.as_deref(), line.clone()).await?;

    if response.status() == StatusCode::NOT_FOUND && session_token.is_some() {
        warn!("Session token rejected, re-issuing handshake");
        *session_token = None;
        let retry = send_request(client, options, None, line).await?;
        if retry.status() == StatusCode::NOT_FOUND {
            // Even a fresh handshake is rejected; the session can never
            // make progress.
            return Err(GatewayError::RemoteRequest {
                status: retry.status().as_u16(),
                message: retry.text().await.unwrap_or_default(),
            });
        }
        return consume_response(retry, session_token, out).await;
    }

    consume_response(response, session_token, out).await
}

async fn send_request(
    client: &Client,
    options: &StreamableHttpToStdioOptions,
    session_token: Option<&str>,
    body: String,
) -> Result<Response, GatewayError> {
    debug!(bytes = body.len(), "Forwarding message to remote endpoint");
    let mut request = client
        .post(options.url.clone())
        .headers(options.headers.clone())
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json, text/event-stream");
    if let Some(token) = session_token {
        request = request.header(SESSION_ID_HEADER, token);
    }
    Ok(request.body(body).send().await?)
}

/// Captures the session token and writes the response's message units
/// to `out`, one line each.
async fn consume_response<W>(
    response: Response,
    session_token: &mut Option<String>,
    out: &mut W,
) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    let status = response.status();

    // The token can be issued or rotated on any response.
    let issued = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(token) = issued {
        if session_token.as_deref() != Some(token.as_str()) {
            debug!("Captured session token");
            *session_token = Some(token);
        }
    }

    if status == StatusCode::ACCEPTED {
        // Notification: no body comes back.
        debug!("Remote accepted notification");
        return Ok(());
    }
    if !status.is_success() {
        // No synthetic error reply is written locally; the caller's
        // request simply never gets an answer.
        let message = response.text().await.unwrap_or_default();
        error!(
            status = status.as_u16(),
            message = %message,
            "Remote endpoint rejected message"
        );
        return Ok(());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("text/event-stream") {
        let mut events = SseParser::new(response.bytes_stream());
        while let Some(event) = events.next().await {
            let event = event?;
            if event.event != "message" {
                debug!(event = %event.event, "Ignoring event");
                continue;
            }
            match to_single_line(&event.data) {
                Ok(line) => {
                    debug!(bytes = line.len(), "Received message event");
                    write_stdout_line(out, &line)
                        .await
                        .map_err(GatewayError::Stdio)?;
                }
                Err(e) => error!(error = %e, "Dropping non-JSON message event"),
            }
        }
        return Ok(());
    }

    // Plain JSON: the whole body is one message.
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Ok(());
    }
    match to_single_line(&body) {
        Ok(line) => {
            debug!(bytes = line.len(), "Received response body");
            write_stdout_line(out, &line)
                .await
                .map_err(GatewayError::Stdio)?;
        }
        Err(e) => error!(error = %e, "Dropping non-JSON response body"),
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
