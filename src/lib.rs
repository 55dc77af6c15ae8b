//! A transport gateway for MCP servers.
//!
//! Bridges a server speaking one transport to clients speaking another:
//! a local stdio child can be served over SSE or WebSocket, and a remote
//! SSE or streamable HTTP server can be driven through local stdio.
//! Message envelopes are relayed opaquely; only the framing changes.

pub mod cli;
pub mod cors;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod process;
pub mod proxy_url;
pub mod sse_parser;
