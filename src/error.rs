//! Gateway error types.

use thiserror::Error;

/// Errors that can occur while configuring or running a gateway.
///
/// Configuration, bind, and handshake errors are fatal for the whole
/// gateway; the remaining variants are scoped to a single session or a
/// single remote exchange and are surfaced to the offending peer only.
/// Process-level failures keep their own type, [`SessionError`].
///
/// [`SessionError`]: crate::process::SessionError
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid or conflicting transport selection
    #[error("invalid transport configuration: {0}")]
    Configuration(String),

    /// Could not bind the server port
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// No session registered under the submitted identifier
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The remote never advertised its endpoint or session token in time
    #[error("remote did not complete the handshake within {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// The remote closed the event stream before the handshake completed
    #[error("event stream closed before the handshake completed")]
    HandshakeClosed,

    /// Local stdin or stdout failed
    #[error("stdio failed: {0}")]
    Stdio(#[source] std::io::Error),

    /// HTTP request could not be sent or its stream failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Remote answered with a non-success status
    #[error("remote request failed (status {status}): {message}")]
    RemoteRequest { status: u16, message: String },

    /// A configured URL did not parse
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
