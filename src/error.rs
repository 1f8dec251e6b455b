//! Error types for the Odoo MCP gateway
//!
//! [`Error`] covers process-level failures (startup, configuration, the
//! HTTP server). Failures of a single tool call are [`crate::fault::Fault`]
//! values and never surface as an `Error`.

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tool descriptor in the registry is malformed
    #[error("Tool registry error: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Server shutdown
    #[error("Server shutdown")]
    Shutdown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Implementation-defined server error, used for gateway auth rejections
    pub const UNAUTHORIZED: i32 = -32000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_with_context() {
        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "port taken").into();
        assert_eq!(err.to_string(), "IO error: port taken");
    }
}
