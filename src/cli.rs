//! Command line surface and transport pair selection.
//!
//! Exactly one input transport is chosen per invocation: `--stdio`,
//! `--sse`, or `--base-url` (streamable HTTP, also the default when no
//! input flag is given). The output transport defaults to `sse` for a
//! stdio input and `stdio` otherwise. Unsupported pairs are rejected
//! before any gateway starts.

use std::fmt;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::cors::CorsOrigin;
use crate::error::GatewayError;
use crate::gateway::{
    SseToStdioOptions, StdioToSseOptions, StdioToWsOptions, StreamableHttpToStdioOptions,
};
use crate::headers::build_headers;
use crate::proxy_url::build_proxy_url;

/// How long the client gateways wait for the remote handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bridges MCP servers between stdio, SSE, WebSocket, and streamable
/// HTTP transports.
#[derive(Debug, Parser)]
#[command(name = "mcp-proxy", version)]
pub struct Cli {
    /// Command to run an MCP server over stdio, e.g. "npx -y @modelcontextprotocol/server-filesystem"
    #[arg(long)]
    pub stdio: Option<String>,

    /// Arguments for the stdio command, e.g. --stdio-args "arg1" "arg2"
    #[arg(long = "stdio-args", num_args = 1.., value_name = "ARG")]
    pub stdio_args: Vec<String>,

    /// SSE URL to connect to
    #[arg(long)]
    pub sse: Option<String>,

    /// Path of the remote streamable HTTP endpoint
    #[arg(long = "mcp-path", value_name = "PATH")]
    pub mcp_path: Option<String>,

    /// Base URL of the remote streamable HTTP server
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Transport for the client-facing side. Defaults to "sse" when
    /// using --stdio and "stdio" otherwise.
    #[arg(long = "output-transport", value_enum)]
    pub output_transport: Option<OutputTransport>,

    /// Port for the stdio-to-SSE and stdio-to-WebSocket servers
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Path for SSE subscriptions
    #[arg(long = "sse-path", default_value = "/sse")]
    pub sse_path: String,

    /// Path for message submission, or the WebSocket endpoint
    #[arg(long = "message-path", default_value = "/message")]
    pub message_path: String,

    /// Logging level
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Enable CORS. Bare --cors allows all origins; values may be exact
    /// origins or /patterns/
    #[arg(long, num_args = 0.., value_name = "ORIGIN")]
    pub cors: Option<Vec<String>>,

    /// Endpoints answering 200 "ok", e.g. --health-endpoint /healthz
    #[arg(long = "health-endpoint", num_args = 1.., value_name = "PATH")]
    pub health_endpoints: Vec<String>,

    /// Extra headers, e.g. --header "x-user-id: 123"
    #[arg(long = "header", num_args = 1.., value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Adds "Authorization: Bearer <token>" to outbound requests
    #[arg(long = "oauth2-bearer", value_name = "TOKEN")]
    pub oauth2_bearer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputTransport {
    Stdio,
    Sse,
    Ws,
}

impl fmt::Display for OutputTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Ws => "ws",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    None,
}

impl LogLevel {
    /// The default tracing filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::None => "off",
        }
    }
}

/// The supported transport pairs. Anything else is rejected before a
/// gateway starts.
#[derive(Debug)]
pub enum GatewayMode {
    StdioToSse(StdioToSseOptions),
    StdioToWs(StdioToWsOptions),
    SseToStdio(SseToStdioOptions),
    StreamableHttpToStdio(StreamableHttpToStdioOptions),
}

impl Cli {
    /// Validates the flag combination and assembles the selected
    /// gateway's options.
    pub fn resolve(self) -> Result<GatewayMode, GatewayError> {
        let has_stdio = self.stdio.is_some();
        let has_sse = self.sse.is_some();
        let has_mcp_path = self.mcp_path.is_some();
        let has_base_url = self.base_url.is_some();

        // --mcp-path and --base-url select the same transport; together
        // they are one choice, not a conflict.
        let active = [has_stdio, has_sse, has_mcp_path || has_base_url]
            .into_iter()
            .filter(|&flag| flag)
            .count();
        if active > 1 {
            return Err(GatewayError::Configuration(
                "Specify only one of --stdio, --sse, or --base-url, not multiple".to_string(),
            ));
        }

        let output = self.output_transport.unwrap_or(if has_stdio {
            OutputTransport::Sse
        } else {
            OutputTransport::Stdio
        });

        if let Some(command) = self.stdio {
            // Local child process; --stdio-args extend its command line.
            match output {
                OutputTransport::Sse => {
                    validate_path(&self.sse_path)?;
                    validate_path(&self.message_path)?;
                    if self.sse_path == self.message_path {
                        return Err(GatewayError::Configuration(
                            "--sse-path and --message-path must differ".to_string(),
                        ));
                    }
                    validate_health_endpoints(
                        &self.health_endpoints,
                        &[&self.sse_path, &self.message_path],
                    )?;
                    Ok(GatewayMode::StdioToSse(StdioToSseOptions {
                        command,
                        args: self.stdio_args,
                        port: self.port,
                        sse_path: self.sse_path,
                        message_path: self.message_path,
                        health_endpoints: self.health_endpoints,
                        cors: parse_cors(self.cors.as_deref())?,
                        headers: build_headers(&self.headers, &[], self.oauth2_bearer.as_deref()),
                    }))
                }
                OutputTransport::Ws => {
                    validate_path(&self.message_path)?;
                    validate_health_endpoints(&self.health_endpoints, &[&self.message_path])?;
                    Ok(GatewayMode::StdioToWs(StdioToWsOptions {
                        command,
                        args: self.stdio_args,
                        port: self.port,
                        message_path: self.message_path,
                        health_endpoints: self.health_endpoints,
                        cors: parse_cors(self.cors.as_deref())?,
                    }))
                }
                OutputTransport::Stdio => Err(unsupported_pair("stdio", output)),
            }
        } else if let Some(sse_url) = self.sse {
            // Remote SSE server; --stdio-args ride along as a header for
            // a remotely spawned command.
            match output {
                OutputTransport::Stdio => Ok(GatewayMode::SseToStdio(SseToStdioOptions {
                    sse_url,
                    headers: build_headers(
                        &self.headers,
                        &self.stdio_args,
                        self.oauth2_bearer.as_deref(),
                    ),
                    handshake_timeout: HANDSHAKE_TIMEOUT,
                })),
                _ => Err(unsupported_pair("sse", output)),
            }
        } else if has_mcp_path && !has_base_url {
            Err(GatewayError::Configuration(
                "--mcp-path requires --base-url".to_string(),
            ))
        } else {
            // Streamable HTTP client, also the default input transport.
            match output {
                OutputTransport::Stdio => {
                    let base_url = self.base_url.ok_or_else(|| {
                        GatewayError::Configuration(
                            "a base URL is required for the streamable HTTP gateway (--base-url)"
                                .to_string(),
                        )
                    })?;
                    let headers = build_headers(
                        &self.headers,
                        &self.stdio_args,
                        self.oauth2_bearer.as_deref(),
                    );
                    let url = build_proxy_url(
                        &base_url,
                        self.mcp_path.as_deref().unwrap_or_default(),
                        &headers,
                    )?;
                    Ok(GatewayMode::StreamableHttpToStdio(
                        StreamableHttpToStdioOptions { url, headers },
                    ))
                }
                _ => Err(unsupported_pair("streamable HTTP", output)),
            }
        }
    }
}

fn unsupported_pair(input: &str, output: OutputTransport) -> GatewayError {
    GatewayError::Configuration(format!("{input} to {output} output is not supported"))
}

fn parse_cors(values: Option<&[String]>) -> Result<Option<CorsOrigin>, GatewayError> {
    values.map(CorsOrigin::parse).transpose()
}

fn validate_path(path: &str) -> Result<(), GatewayError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(GatewayError::Configuration(format!(
            "path must start with a slash: {path}"
        )))
    }
}

/// Health endpoints share the router with the gateway routes, and route
/// registration panics on an overlap. Repeats and collisions with
/// `reserved` paths are rejected here instead.
fn validate_health_endpoints(paths: &[String], reserved: &[&str]) -> Result<(), GatewayError> {
    let mut seen: Vec<&str> = Vec::new();
    for path in paths {
        validate_path(path)?;
        if reserved.contains(&path.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "health endpoint collides with a gateway path: {path}"
            )));
        }
        if seen.contains(&path.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "duplicate health endpoint: {path}"
            )));
        }
        seen.push(path);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::STDIO_ARGS_HEADER;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stdio_defaults_to_sse_output() {
        let cli = Cli::parse_from(["mcp-proxy", "--stdio", "cat"]);
        let GatewayMode::StdioToSse(options) = cli.resolve().unwrap() else {
            panic!("expected stdio-to-SSE mode");
        };
        assert_eq!(options.command, "cat");
        assert_eq!(options.port, 8000);
        assert_eq!(options.sse_path, "/sse");
        assert_eq!(options.message_path, "/message");
        assert!(options.cors.is_none());
    }

    #[test]
    fn test_stdio_with_ws_output() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--stdio",
            "cat",
            "--output-transport",
            "ws",
            "--port",
            "9000",
        ]);
        let GatewayMode::StdioToWs(options) = cli.resolve().unwrap() else {
            panic!("expected stdio-to-WebSocket mode");
        };
        assert_eq!(options.port, 9000);
        assert_eq!(options.message_path, "/message");
    }

    #[test]
    fn test_sse_defaults_to_stdio_output() {
        let cli = Cli::parse_from(["mcp-proxy", "--sse", "https://remote.example/sse"]);
        let GatewayMode::SseToStdio(options) = cli.resolve().unwrap() else {
            panic!("expected SSE-to-stdio mode");
        };
        assert_eq!(options.sse_url, "https://remote.example/sse");
        assert_eq!(options.handshake_timeout, HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn test_base_url_builds_routed_proxy_url() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--base-url",
            "https://gw.example.com",
            "--mcp-path",
            "/mcp",
            "--header",
            "x-mcp-pkg-id: my-pkg",
        ]);
        let GatewayMode::StreamableHttpToStdio(options) = cli.resolve().unwrap() else {
            panic!("expected streamable-HTTP-to-stdio mode");
        };
        assert_eq!(
            options.url.as_str(),
            "https://gw.example.com/my-pkg/us-east-1/mcp"
        );
        assert_eq!(options.headers.get("x-mcp-pkg-id").unwrap(), "my-pkg");
    }

    #[test]
    fn test_multiple_input_transports_conflict() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--stdio",
            "cat",
            "--sse",
            "https://remote.example/sse",
        ]);
        let err = cli.resolve().unwrap_err();
        assert!(err.to_string().contains("only one of"));
    }

    #[test]
    fn test_mcp_path_conflicts_with_stdio() {
        let cli = Cli::parse_from(["mcp-proxy", "--stdio", "cat", "--mcp-path", "/mcp"]);
        let err = cli.resolve().unwrap_err();
        assert!(err.to_string().contains("only one of"));
    }

    #[test]
    fn test_health_endpoint_collision_is_rejected() {
        let cli = Cli::parse_from(["mcp-proxy", "--stdio", "cat", "--health-endpoint", "/sse"]);
        let err = cli.resolve().unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_duplicate_health_endpoints_are_rejected() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--stdio",
            "cat",
            "--health-endpoint",
            "/a",
            "/a",
        ]);
        let err = cli.resolve().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_stdio_to_stdio_is_unsupported() {
        let cli = Cli::parse_from(["mcp-proxy", "--stdio", "cat", "--output-transport", "stdio"]);
        let err = cli.resolve().unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_sse_to_ws_is_unsupported() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--sse",
            "https://remote.example/sse",
            "--output-transport",
            "ws",
        ]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_mcp_path_requires_base_url() {
        let cli = Cli::parse_from(["mcp-proxy", "--mcp-path", "/mcp"]);
        let err = cli.resolve().unwrap_err();
        assert!(err.to_string().contains("--base-url"));
    }

    #[test]
    fn test_no_input_flags_requires_base_url() {
        let cli = Cli::parse_from(["mcp-proxy"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_stdio_args_extend_local_command() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--stdio",
            "server",
            "--stdio-args",
            "config.json",
            "verbose",
        ]);
        let GatewayMode::StdioToSse(options) = cli.resolve().unwrap() else {
            panic!("expected stdio-to-SSE mode");
        };
        assert_eq!(
            options.args,
            vec!["config.json".to_string(), "verbose".to_string()]
        );
        assert!(options.headers.get(STDIO_ARGS_HEADER).is_none());
    }

    #[test]
    fn test_stdio_args_become_header_for_remote_modes() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--sse",
            "https://remote.example/sse",
            "--stdio-args",
            "config.json",
            "verbose",
        ]);
        let GatewayMode::SseToStdio(options) = cli.resolve().unwrap() else {
            panic!("expected SSE-to-stdio mode");
        };
        assert_eq!(
            options.headers.get(STDIO_ARGS_HEADER).unwrap(),
            "config.json verbose"
        );
    }

    #[test]
    fn test_bare_cors_allows_all_origins() {
        let cli = Cli::parse_from(["mcp-proxy", "--stdio", "cat", "--cors"]);
        let GatewayMode::StdioToSse(options) = cli.resolve().unwrap() else {
            panic!("expected stdio-to-SSE mode");
        };
        assert!(matches!(options.cors, Some(CorsOrigin::Any)));
    }

    #[test]
    fn test_oauth2_bearer_sets_authorization() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--sse",
            "https://remote.example/sse",
            "--oauth2-bearer",
            "tok",
        ]);
        let GatewayMode::SseToStdio(options) = cli.resolve().unwrap() else {
            panic!("expected SSE-to-stdio mode");
        };
        assert_eq!(options.headers.get("authorization").unwrap(), "Bearer tok");
    }

    #[test]
    fn test_paths_must_start_with_slash() {
        let cli = Cli::parse_from(["mcp-proxy", "--stdio", "cat", "--sse-path", "events"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_equal_sse_and_message_paths_conflict() {
        let cli = Cli::parse_from([
            "mcp-proxy",
            "--stdio",
            "cat",
            "--sse-path",
            "/x",
            "--message-path",
            "/x",
        ]);
        assert!(cli.resolve().is_err());
    }
}
