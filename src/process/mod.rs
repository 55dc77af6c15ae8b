//! Child process lifecycle: line-framed stdio sessions and the registry
//! that tracks them.

mod registry;
mod session;

pub use registry::ConnectionRegistry;
pub use session::{ExitInfo, ProcessSession, SessionError};

/// Generates a session identifier: a lowercase ULID, sortable by
/// creation time.
pub fn generate_session_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
