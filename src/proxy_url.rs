//! Routed proxy URL construction for the streamable HTTP gateway.
//!
//! When the configured headers carry a package identifier, the request
//! path is rewritten to `/{pkg}/{region}/{path}` so a routing frontend
//! can dispatch the exchange to the right deployment. Without the
//! package header the path is resolved against the base URL unchanged.

use reqwest::header::HeaderMap;
use url::Url;

/// Header selecting the target package behind a routing frontend.
pub const PKG_ID_HEADER: &str = "x-mcp-pkg-id";

/// Header selecting the deployment region. Optional; defaults to
/// [`DEFAULT_REGION`].
pub const REGION_HEADER: &str = "x-mcp-region";

/// Region used when the package header is present but no region is given.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Resolves the URL the streamable HTTP gateway will POST to.
pub fn build_proxy_url(
    base_url: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<Url, url::ParseError> {
    let base = Url::parse(base_url)?;

    let pkg_id = headers.get(PKG_ID_HEADER).and_then(|v| v.to_str().ok());
    let Some(pkg_id) = pkg_id else {
        return base.join(path);
    };

    let region = headers
        .get(REGION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_REGION);
    let clean_path = path.strip_prefix('/').unwrap_or(path);

    base.join(&format!("/{pkg_id}/{region}/{clean_path}"))
}

// ============================================================================
// Tests
// ============================================================================
