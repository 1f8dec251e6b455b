//! Tool result envelopes
//!
//! Every `tools/call` answer carries exactly one JSON object as text:
//! `{ok: true, data, meta}` or `{ok: false, error, meta}`.

use serde_json::{Value, json};

use crate::dispatch::DispatchOutcome;
use crate::fault::Fault;
use crate::normalize::{ErrorEnvelope, normalize};
use crate::protocol::{Content, ToolsCallResult};

/// Success envelope
#[must_use]
pub fn success(outcome: &DispatchOutcome, correlation_id: &str) -> Value {
    json!({
        "ok": true,
        "data": outcome.payload,
        "meta": {
            "backend_version": outcome.backend_version,
            "cache": outcome.cache.map(|c| c.as_str()),
            "correlation_id": correlation_id,
        }
    })
}

/// Failure envelope
#[must_use]
pub fn failure(error: &ErrorEnvelope, correlation_id: &str) -> Value {
    json!({
        "ok": false,
        "error": error,
        "meta": {
            "correlation_id": correlation_id,
        }
    })
}

/// MCP `tools/call` result for a dispatch outcome
#[must_use]
pub fn tool_call_result(result: &Result<DispatchOutcome, Fault>, correlation_id: &str) -> ToolsCallResult {
    let (envelope, is_error) = match result {
        Ok(outcome) => (success(outcome, correlation_id), false),
        Err(fault) => (failure(&normalize(fault), correlation_id), true),
    };
    ToolsCallResult {
        content: vec![Content::Text {
            text: envelope.to_string(),
        }],
        is_error,
    }
}
