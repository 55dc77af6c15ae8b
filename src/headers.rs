//! Parsing of `--header` CLI entries into an HTTP header map.
//!
//! Header entries arrive as raw `Name: Value` strings. Malformed entries
//! are skipped with a warning instead of aborting startup, so one bad
//! flag cannot take down an otherwise valid invocation.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// Header carrying extra arguments for a remotely spawned stdio server.
pub const STDIO_ARGS_HEADER: &str = "stdio-args";

/// Builds the header map from raw `Name: Value` entries.
///
/// Each entry is split on the first colon, with both sides trimmed. The
/// value may itself contain colons. Entries without a colon, or with an
/// empty name or value, are skipped.
///
/// `stdio_args` are joined with single spaces into the `stdio-args`
/// header. `oauth2_bearer`, when present, becomes the `Authorization`
/// header and overrides any explicit `Authorization` entry.
pub fn build_headers(
    entries: &[String],
    stdio_args: &[String],
    oauth2_bearer: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for raw in entries {
        let Some((name, value)) = split_entry(raw) else {
            warn!(header = %raw, "Invalid header format, ignoring");
            continue;
        };
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %raw, "Invalid header format, ignoring"),
        }
    }

    if !stdio_args.is_empty() {
        let joined = stdio_args.join(" ");
        match HeaderValue::from_str(&joined) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(STDIO_ARGS_HEADER), value);
            }
            Err(_) => warn!(args = %joined, "Invalid stdio args, ignoring"),
        }
    }

    if let Some(token) = oauth2_bearer {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Invalid oauth2 bearer token, ignoring"),
        }
    }

    headers
}

/// Splits a raw entry on its first colon. Returns `None` when the entry
/// has no colon or either side trims to empty.
fn split_entry(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_well_formed_entries() {
        let headers = build_headers(
            &[
                "Authorization: Bearer abc".to_string(),
                "X-Custom: v".to_string(),
            ],
            &[],
            None,
        );
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer abc");
        assert_eq!(headers.get("X-Custom").unwrap(), "v");
    }

    #[test]
    fn test_no_space_after_colon() {
        let headers = build_headers(&["X-Test:123".to_string()], &[], None);
        assert_eq!(headers.get("X-Test").unwrap(), "123");
    }

    #[test]
    fn test_value_may_contain_colons() {
        let headers = build_headers(&["X-Url: http://example.com:8080".to_string()], &[], None);
        assert_eq!(headers.get("X-Url").unwrap(), "http://example.com:8080");
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let headers = build_headers(
            &[
                "Invalid-Header".to_string(),
                ": value".to_string(),
                "Name:".to_string(),
                "X-Ok: yes".to_string(),
            ],
            &[],
            None,
        );
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-Ok").unwrap(), "yes");
    }

    #[test]
    fn test_stdio_args_are_joined() {
        let headers = build_headers(
            &[],
            &["--config".to_string(), "a b".to_string()],
            None,
        );
        assert_eq!(headers.get(STDIO_ARGS_HEADER).unwrap(), "--config a b");
    }

    #[test]
    fn test_empty_stdio_args_add_no_header() {
        let headers = build_headers(&[], &[], None);
        assert!(headers.get(STDIO_ARGS_HEADER).is_none());
    }

    #[test]
    fn test_bearer_token_overrides_explicit_authorization() {
        let headers = build_headers(
            &["Authorization: Basic xyz".to_string()],
            &[],
            Some("tok"),
        );
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
    }
}
