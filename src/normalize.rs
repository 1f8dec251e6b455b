//! Fault classification
//!
//! [`normalize`] maps every [`Fault`] to exactly one [`ErrorEnvelope`]. The
//! envelope message never contains a traceback or transport internals; the
//! raw fault is logged by the caller together with the correlation id.

use serde::Serialize;

use crate::fault::{Fault, TransportFault, is_auth_message};
use crate::schema::ValidationKind;

/// Longest backend message shown to the caller
const MAX_MESSAGE_CHARS: usize = 300;

/// Closed set of error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Arguments or a domain filter failed structural validation
    InvalidDomain,
    /// A field does not exist on the model
    InvalidField,
    /// The model does not exist
    InvalidModel,
    /// Unknown tool, disabled tool or method the backend cannot run
    InvalidMethod,
    /// Authentication rejected or expired after the retry
    AuthFailed,
    /// Any other application fault reported by the backend
    OdooFault,
    /// Network failure or timeout
    TransportError,
    /// Anything unrecognized
    Unknown,
}

impl ErrorKind {
    /// Whether resending (after following the hint) can succeed
    #[must_use]
    pub const fn retryable(self) -> bool {
        match self {
            Self::InvalidDomain
            | Self::InvalidField
            | Self::InvalidModel
            | Self::OdooFault
            | Self::TransportError => true,
            Self::InvalidMethod | Self::AuthFailed | Self::Unknown => false,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidDomain => "invalid_domain",
            Self::InvalidField => "invalid_field",
            Self::InvalidModel => "invalid_model",
            Self::InvalidMethod => "invalid_method",
            Self::AuthFailed => "auth_failed",
            Self::OdooFault => "odoo_fault",
            Self::TransportError => "transport_error",
            Self::Unknown => "unknown",
        }
    }
}

/// The single error object of a failed tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    /// Error class
    pub kind: ErrorKind,
    /// Sanitized message
    pub message: String,
    /// What the caller should do next
    pub hint: String,
    /// Whether a corrected retry can succeed
    pub retryable: bool,
}

impl ErrorEnvelope {
    fn new(kind: ErrorKind, message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: hint.into(),
            retryable: kind.retryable(),
        }
    }
}

const FIELD_MARKERS: &[&str] = &["Invalid field", "Unknown field", "no field named"];
const MODEL_MARKERS: &[&str] = &["doesn't exist", "Unknown model", "KeyError"];
const METHOD_MARKERS: &[&str] = &["has no attribute", "does not exist on", "is private", "Private methods"];
const DOMAIN_MARKERS: &[&str] = &["Invalid leaf", "Invalid domain"];

/// Classify a fault
#[must_use]
pub fn normalize(fault: &Fault) -> ErrorEnvelope {
    match fault {
        Fault::Validation(validation) => {
            let hint = match validation.kind {
                ValidationKind::Domain => {
                    "write the domain as a list of [field, operator, value] conditions, optionally \
                     prefixed by '&', '|' or '!' operators, e.g. [[\"is_company\", \"=\", true]]"
                }
                ValidationKind::Shape => {
                    "fix the listed parameters to match the tool's input schema (see tools/list) and retry"
                }
            };
            ErrorEnvelope::new(ErrorKind::InvalidDomain, validation.to_string(), hint)
        }
        Fault::UnknownField { model, field } => ErrorEnvelope::new(
            ErrorKind::InvalidField,
            format!("field '{field}' does not exist on model '{model}'"),
            field_hint(Some(model)),
        ),
        Fault::UnknownModel(model) => ErrorEnvelope::new(
            ErrorKind::InvalidModel,
            format!("model '{model}' does not exist"),
            model_hint(),
        ),
        Fault::UnknownTool(tool) => ErrorEnvelope::new(
            ErrorKind::InvalidMethod,
            format!("unknown tool '{tool}'"),
            "call tools/list to see the available tools",
        ),
        Fault::ToolDisabled { tool, setting } => ErrorEnvelope::new(
            ErrorKind::InvalidMethod,
            format!("tool '{tool}' is disabled on this gateway"),
            format!("use a curated tool instead; an operator can enable it with {setting}"),
        ),
        Fault::MethodDenied { method, reason } => ErrorEnvelope::new(
            ErrorKind::InvalidMethod,
            format!("method '{method}' is not allowed: {reason}"),
            "use a curated tool or a public model method",
        ),
        Fault::Unsupported { version, detail } => ErrorEnvelope::new(
            ErrorKind::InvalidMethod,
            format!("not supported by Odoo {version}: {detail}"),
            "call get_server_info to see the negotiated version and use a tool it supports",
        ),
        Fault::Auth(message) => ErrorEnvelope::new(
            ErrorKind::AuthFailed,
            message.clone(),
            "check the gateway's Odoo credentials; retrying with the same credentials will fail again",
        ),
        Fault::Backend { message, .. } => classify_backend(message),
        Fault::Transport(transport) => {
            let message = match transport {
                TransportFault::Timeout => "backend request timed out".to_string(),
                TransportFault::Connect(_) => "could not connect to the Odoo server".to_string(),
                TransportFault::Status(status) => format!("Odoo server answered with HTTP status {status}"),
                TransportFault::Malformed(_) => "Odoo server returned a malformed response".to_string(),
            };
            ErrorEnvelope::new(
                ErrorKind::TransportError,
                message,
                "retry after a short delay; if it persists, check that the Odoo server is reachable",
            )
        }
        Fault::Internal(_) => ErrorEnvelope::new(
            ErrorKind::Unknown,
            "internal gateway error",
            "report the correlation id to the gateway operator",
        ),
    }
}

fn classify_backend(raw: &str) -> ErrorEnvelope {
    let message = sanitize(raw);
    let has = |markers: &[&str]| markers.iter().any(|m| raw.contains(m));

    if is_auth_message(raw) {
        ErrorEnvelope::new(
            ErrorKind::AuthFailed,
            message,
            "check the gateway's Odoo credentials; retrying with the same credentials will fail again",
        )
    } else if has(FIELD_MARKERS) {
        let model = quoted_after(raw, "model '");
        ErrorEnvelope::new(ErrorKind::InvalidField, message, field_hint(model.as_deref()))
    } else if has(DOMAIN_MARKERS) {
        ErrorEnvelope::new(
            ErrorKind::InvalidDomain,
            message,
            "check the domain's field names, operators and values, then retry",
        )
    } else if has(METHOD_MARKERS) {
        ErrorEnvelope::new(
            ErrorKind::InvalidMethod,
            message,
            "the model has no such public method; use a curated tool instead",
        )
    } else if has(MODEL_MARKERS) {
        ErrorEnvelope::new(ErrorKind::InvalidModel, message, model_hint())
    } else {
        ErrorEnvelope::new(
            ErrorKind::OdooFault,
            message,
            "Odoo rejected the operation; read the message, correct the values and retry",
        )
    }
}

fn field_hint(model: Option<&str>) -> String {
    match model {
        Some(model) => format!(
            "call get_model_fields with model '{model}' to list valid field names before retrying"
        ),
        None => "call get_model_fields for the model to list valid field names before retrying".to_string(),
    }
}

fn model_hint() -> &'static str {
    "call list_models to find the technical model name (e.g. 'res.partner') before retrying"
}

fn quoted_after(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    rest.find('\'').map(|end| rest[..end].to_string())
}

/// Last non-empty line of a fault string, without a leading exception class
/// name, truncated to [`MAX_MESSAGE_CHARS`].
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("the backend reported an error");
    let line = strip_exception_class(line);

    if line.chars().count() > MAX_MESSAGE_CHARS {
        let mut cut: String = line.chars().take(MAX_MESSAGE_CHARS - 3).collect();
        cut.push_str("...");
        cut
    } else {
        line.to_string()
    }
}

/// `odoo.exceptions.ValidationError: text` becomes `text`
fn strip_exception_class(line: &str) -> &str {
    let Some((prefix, rest)) = line.split_once(": ") else {
        return line;
    };
    let is_path = !prefix.is_empty()
        && prefix
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    let class_like = prefix
        .rsplit('.')
        .next()
        .and_then(|last| last.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase());

    if is_path && class_like && !rest.trim().is_empty() {
        rest.trim()
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ValidationFault, ValidationViolation};
    use pretty_assertions::assert_eq;

    fn backend(message: &str) -> Fault {
        Fault::Backend {
            code: 1,
            message: message.to_string(),
        }
    }

    #[test]
    fn validation_is_invalid_domain_and_retryable() {
        let fault = Fault::from(ValidationFault::domain(vec![ValidationViolation::new(
            "domain[0]",
            "a condition must have exactly 3 elements",
        )]));
        let envelope = normalize(&fault);
        assert_eq!(envelope.kind, ErrorKind::InvalidDomain);
        assert!(envelope.retryable);
        assert!(envelope.message.contains("domain[0]"));
    }

    #[test]
    fn unknown_field_fault_from_backend() {
        let envelope = normalize(&backend(
            "Traceback (most recent call last):\n  File \"odoo/models.py\", line 1\nValueError: Invalid field 'colour' on model 'res.partner'\n",
        ));
        assert_eq!(envelope.kind, ErrorKind::InvalidField);
        assert!(envelope.retryable);
        assert_eq!(envelope.message, "Invalid field 'colour' on model 'res.partner'");
        assert!(envelope.hint.contains("get_model_fields with model 'res.partner'"));
        assert!(!envelope.message.contains("Traceback"));
    }

    #[test]
    fn unknown_model_and_method_faults() {
        assert_eq!(normalize(&backend("KeyError: 'res.partnr'")).kind, ErrorKind::InvalidModel);
        assert_eq!(
            normalize(&backend("Object res.partnr doesn't exist")).kind,
            ErrorKind::InvalidModel
        );
        let method = normalize(&backend(
            "AttributeError: type object 'res.partner' has no attribute 'frobnicate'",
        ));
        assert_eq!(method.kind, ErrorKind::InvalidMethod);
        assert!(!method.retryable);
    }

    #[test]
    fn other_backend_faults_are_odoo_fault() {
        let envelope = normalize(&backend(
            "odoo.exceptions.ValidationError: The email address is invalid",
        ));
        assert_eq!(envelope.kind, ErrorKind::OdooFault);
        assert_eq!(envelope.message, "The email address is invalid");
        assert!(envelope.retryable);
    }

    #[test]
    fn transport_messages_are_generic() {
        let envelope = normalize(&Fault::from(TransportFault::Connect(
            "tcp connect error: 10.0.0.5:8069 refused".into(),
        )));
        assert_eq!(envelope.kind, ErrorKind::TransportError);
        assert!(!envelope.message.contains("10.0.0.5"));
        assert_eq!(
            normalize(&Fault::from(TransportFault::Timeout)).message,
            "backend request timed out"
        );
    }

    #[test]
    fn gated_tools_are_invalid_method_and_final() {
        let envelope = normalize(&Fault::ToolDisabled {
            tool: "execute_kw".into(),
            setting: "tools.passthrough.enabled",
        });
        assert_eq!(envelope.kind, ErrorKind::InvalidMethod);
        assert!(!envelope.retryable);
    }

    #[test]
    fn auth_and_internal_are_not_retryable() {
        assert!(!normalize(&Fault::Auth("expired".into())).retryable);
        let internal = normalize(&Fault::Internal("secret detail".into()));
        assert_eq!(internal.kind, ErrorKind::Unknown);
        assert!(!internal.message.contains("secret"));
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(1000);
        let sanitized = sanitize(&long);
        assert_eq!(sanitized.chars().count(), MAX_MESSAGE_CHARS);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn plain_messages_with_colons_are_kept() {
        assert_eq!(sanitize("Wrong value: expected 3"), "Wrong value: expected 3");
        assert_eq!(
            serde_json::to_value(ErrorKind::TransportError).unwrap(),
            serde_json::json!("transport_error")
        );
    }
}
