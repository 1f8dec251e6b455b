//! MCP Protocol types

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// Protocol versions this server speaks, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Newest supported protocol version
pub const PROTOCOL_VERSION: &str = SUPPORTED_VERSIONS[0];

/// Pick the protocol version to answer `initialize` with: the client's
/// version when supported, otherwise the newest one we speak.
#[must_use]
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}
