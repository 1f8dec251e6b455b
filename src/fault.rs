//! Per-request failures
//!
//! Everything below the dispatcher reports failure as a [`Fault`]. Faults are
//! ordinary values: the transport converts every library error into one,
//! and [`crate::normalize`] turns each into exactly one error envelope.

use thiserror::Error;

use crate::schema::ValidationFault;

/// Network-level failure talking to the backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    /// The per-call timeout or the request deadline elapsed
    #[error("request timed out")]
    Timeout,
    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),
    /// The backend answered with a non-success HTTP status
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    /// The body was not a valid XML-RPC response
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A failed tool call, before normalization
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    /// Arguments failed structural validation
    #[error(transparent)]
    Validation(#[from] ValidationFault),

    /// Pre-flight found a field the model does not have
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField {
        /// Model the field was looked up on
        model: String,
        /// Offending field name
        field: String,
    },

    /// Pre-flight found a model the backend does not have
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// No tool with this name is registered
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// The tool exists but its gate is closed
    #[error("tool '{tool}' is disabled (enable {setting})")]
    ToolDisabled {
        /// Tool name
        tool: String,
        /// Configuration key that opens the gate
        setting: &'static str,
    },

    /// The passthrough refused a method
    #[error("method '{method}' is not allowed: {reason}")]
    MethodDenied {
        /// Requested backend method
        method: String,
        /// Why it was refused
        reason: String,
    },

    /// The negotiated backend version cannot express the call
    #[error("not supported by Odoo {version}: {detail}")]
    Unsupported {
        /// Negotiated server series
        version: String,
        /// What could not be expressed
        detail: String,
    },

    /// Backend authentication was rejected or expired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend answered with an application fault
    #[error("backend fault {code}: {message}")]
    Backend {
        /// `faultCode`
        code: i64,
        /// Raw `faultString`, possibly with a traceback
        message: String,
    },

    /// The backend could not be reached
    #[error("transport error: {0}")]
    Transport(#[from] TransportFault),

    /// A gateway bug or an unexpected backend payload
    #[error("internal error: {0}")]
    Internal(String),
}

const AUTH_MARKERS: &[&str] = &[
    "AccessDenied",
    "Access Denied",
    "Access denied",
    "SessionExpired",
    "Session expired",
    "session_expired",
];

/// Whether a backend fault string reports a rejected or expired identity
#[must_use]
pub fn is_auth_message(message: &str) -> bool {
    AUTH_MARKERS.iter().any(|m| message.contains(m))
}

impl Fault {
    /// Whether this fault means the session should be re-established
    #[must_use]
    pub fn is_auth_class(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Backend { message, .. } => is_auth_message(message),
            _ => false,
        }
    }

    /// Shorthand for a payload shape the gateway did not expect
    pub fn unexpected(what: impl Into<String>) -> Self {
        Self::Internal(format!("unexpected backend payload: {}", what.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_backend_fault_is_auth_class() {
        let fault = Fault::Backend {
            code: 3,
            message: "Traceback (most recent call last):\nodoo.exceptions.AccessDenied: Access Denied".into(),
        };
        assert!(fault.is_auth_class());
    }

    #[test]
    fn access_error_on_records_is_not_auth_class() {
        let fault = Fault::Backend {
            code: 4,
            message: "AccessError: You are not allowed to modify 'Contact' (res.partner) records.".into(),
        };
        assert!(!fault.is_auth_class());
        assert!(!Fault::Transport(TransportFault::Timeout).is_auth_class());
    }

    #[test]
    fn transport_fault_display_includes_status() {
        let fault = Fault::from(TransportFault::Status(502));
        assert_eq!(fault.to_string(), "transport error: unexpected HTTP status 502");
    }
}
