//! CORS origin policy for the HTTP-facing gateways.
//!
//! `--cors` without values allows every origin. With values, each entry
//! is either an exact origin string or, when wrapped in slashes
//! (`/pattern/`), a regular expression the origin must match.

use axum::http::{HeaderValue, request::Parts};
use regex::Regex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::GatewayError;

/// A single allowed origin entry.
#[derive(Debug, Clone)]
pub enum OriginMatcher {
    Exact(String),
    Pattern(Regex),
}

impl OriginMatcher {
    fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(value) => value == origin,
            Self::Pattern(regex) => regex.is_match(origin),
        }
    }
}

/// Origin policy derived from the repeated `--cors` flag.
#[derive(Debug, Clone)]
pub enum CorsOrigin {
    /// Allow every origin.
    Any,
    /// Allow origins matching at least one entry.
    Matchers(Vec<OriginMatcher>),
}

impl CorsOrigin {
    /// Parses `--cors` values. An empty list means allow-all. A broken
    /// `/pattern/` entry is a fatal configuration error.
    pub fn parse(values: &[String]) -> Result<Self, GatewayError> {
        if values.is_empty() {
            return Ok(Self::Any);
        }

        let mut matchers = Vec::with_capacity(values.len());
        for value in values {
            let pattern = value
                .strip_prefix('/')
                .and_then(|rest| rest.strip_suffix('/'));
            match pattern {
                Some(pattern) => {
                    let regex = Regex::new(pattern).map_err(|e| {
                        GatewayError::Configuration(format!(
                            "invalid CORS origin pattern {value}: {e}"
                        ))
                    })?;
                    matchers.push(OriginMatcher::Pattern(regex));
                }
                None => matchers.push(OriginMatcher::Exact(value.clone())),
            }
        }
        Ok(Self::Matchers(matchers))
    }

    /// Whether the given `Origin` header value is allowed.
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Matchers(matchers) => matchers.iter().any(|m| m.matches(origin)),
        }
    }

    /// Builds the tower-http layer implementing this policy.
    pub fn layer(&self) -> CorsLayer {
        let origin = match self {
            Self::Any => AllowOrigin::any(),
            Self::Matchers(_) => {
                let policy = self.clone();
                AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
                    origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
                })
            }
        };
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_allow_all() {
        let policy = CorsOrigin::parse(&[]).unwrap();
        assert!(policy.allows("http://anywhere.example"));
    }

    #[test]
    fn test_exact_origin() {
        let policy = CorsOrigin::parse(&["http://localhost:3000".to_string()]).unwrap();
        assert!(policy.allows("http://localhost:3000"));
        assert!(!policy.allows("http://localhost:3001"));
    }

    #[test]
    fn test_pattern_origin() {
        let policy =
            CorsOrigin::parse(&[r"/^https://.*\.example\.com$/".to_string()]).unwrap();
        assert!(policy.allows("https://app.example.com"));
        assert!(!policy.allows("http://evil.example.org"));
    }

    #[test]
    fn test_mixed_entries() {
        let policy = CorsOrigin::parse(&[
            "http://localhost:3000".to_string(),
            r"/^https://.*\.example\.com$/".to_string(),
        ])
        .unwrap();
        assert!(policy.allows("http://localhost:3000"));
        assert!(policy.allows("https://api.example.com"));
        assert!(!policy.allows("https://example.net"));
    }

    #[test]
    fn test_exact_entry_with_inner_slashes() {
        // An origin like http://x/ ends with a slash but is not a pattern.
        let policy = CorsOrigin::parse(&["http://localhost:3000/".to_string()]).unwrap();
        assert!(policy.allows("http://localhost:3000/"));
        assert!(!policy.allows("http://localhost:3000"));
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        assert!(CorsOrigin::parse(&["/[/".to_string()]).is_err());
    }
}
