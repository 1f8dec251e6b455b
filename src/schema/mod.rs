//! Structural validation of tool arguments
//!
//! Every tool call is checked against its declared JSON Schema before any
//! backend call is made. Errors are phrased for the calling model: each
//! violation names the parameter and says what to change.
//!
//! # Validation steps (in order)
//!
//! 1. **Shape** – arguments must be an object (`null` counts as `{}`).
//! 2. **Required parameters** – present and non-null.
//! 3. **Unknown parameters** – keys not listed under `properties` are
//!    rejected, with the valid names in the message.
//! 4. **Types with safe coercion** – `"10"` → `10` for integers, `"true"` →
//!    `true` for booleans, a JSON-encoded string → array, and a
//!    comma-separated string → array of strings.
//! 5. **Constraints** – `enum`, `minimum`/`maximum`, `minLength`/`maxLength`,
//!    `minItems`/`maxItems`, and `items` recursively for array elements.
//!
//! Domain filters get a further structural check in [`domain`].
//!
//! [`check_schema`] is the builder-side counterpart: it rejects schemas in
//! which an array-typed property has no `items` schema.

pub mod domain;

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// A single validation violation with a human-readable, LLM-actionable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationViolation {
    /// Parameter path that caused the violation (empty for top-level issues).
    pub param: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationViolation {
    /// Create a violation for `param`
    pub fn new(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.param.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "parameter '{}': {}", self.param, self.message)
        }
    }
}

/// Which rule family rejected the arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Schema shape: required, unknown, type or constraint violations
    Shape,
    /// A domain filter is malformed
    Domain,
}

/// Arguments were rejected before reaching the backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationFault {
    /// Rule family
    pub kind: ValidationKind,
    /// Every violation found, in order
    pub violations: Vec<ValidationViolation>,
}

impl fmt::Display for ValidationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tool call validation failed: ")?;
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl ValidationFault {
    /// Shape fault from a list of violations
    #[must_use]
    pub fn shape(violations: Vec<ValidationViolation>) -> Self {
        Self {
            kind: ValidationKind::Shape,
            violations,
        }
    }

    /// Domain fault from a list of violations
    #[must_use]
    pub fn domain(violations: Vec<ValidationViolation>) -> Self {
        Self {
            kind: ValidationKind::Domain,
            violations,
        }
    }
}

// ── Argument validation ───────────────────────────────────────────────────────

/// Validate `arguments` against `input_schema`.
///
/// On success returns the argument object after safe coercions; use it for
/// the backend call instead of the raw input.
pub fn validate_arguments(
    arguments: &Value,
    input_schema: &Value,
) -> Result<Map<String, Value>, ValidationFault> {
    let arg_map = match arguments {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        _ => {
            return Err(ValidationFault::shape(vec![ValidationViolation::new(
                "",
                "arguments must be a JSON object",
            )]));
        }
    };

    let empty = Map::new();
    let properties = input_schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut violations = Vec::new();

    for name in &required {
        match arg_map.get(*name) {
            None => violations.push(ValidationViolation::new(*name, "required parameter is missing")),
            Some(Value::Null) => violations.push(ValidationViolation::new(
                *name,
                "required parameter must not be null",
            )),
            _ => {}
        }
    }

    for key in arg_map.keys() {
        if !properties.contains_key(key.as_str()) {
            let known: Vec<&str> = properties.keys().map(String::as_str).collect();
            violations.push(ValidationViolation::new(
                key,
                format!("unknown parameter, valid parameters are: {}", known.join(", ")),
            ));
        }
    }

    // Stop before type checks so cascading errors do not bury the real one.
    if !violations.is_empty() {
        return Err(ValidationFault::shape(violations));
    }

    let mut coerced = Map::new();
    for (name, raw) in arg_map {
        if raw.is_null() {
            continue;
        }
        let prop_schema = &properties[name.as_str()];
        let value = validate_value(&name, raw, prop_schema, &mut violations);
        coerced.insert(name, value);
    }

    if violations.is_empty() {
        Ok(coerced)
    } else {
        Err(ValidationFault::shape(violations))
    }
}

/// Validate one value against its property schema, returning the coerced
/// value. Violations are appended to `out`.
fn validate_value(
    path: &str,
    value: Value,
    schema: &Value,
    out: &mut Vec<ValidationViolation>,
) -> Value {
    let declared = declared_types(schema);

    let coerced = if declared.is_empty() {
        value
    } else {
        let mut first_error = None;
        let mut accepted = None;
        for ty in &declared {
            match try_coerce(&value, ty, schema) {
                Ok(v) => {
                    accepted = Some(v);
                    break;
                }
                Err(msg) => {
                    first_error.get_or_insert(msg);
                }
            }
        }
        if let Some(v) = accepted {
            v
        } else {
            let message = if declared.len() > 1 {
                format!("expected one of {}, got {}", declared.join(" or "), json_type_name(&value))
            } else {
                first_error.unwrap_or_else(|| "invalid value".to_string())
            };
            out.push(ValidationViolation::new(path, message));
            return value;
        }
    };

    check_constraints(path, &coerced, schema, out);

    match coerced {
        Value::Array(items) => {
            let item_schema = schema.get("items").cloned().unwrap_or(Value::Null);
            Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| validate_value(&format!("{path}[{i}]"), item, &item_schema, out))
                    .collect(),
            )
        }
        other => other,
    }
}

fn check_constraints(path: &str, value: &Value, schema: &Value, out: &mut Vec<ValidationViolation>) {
    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            let shown: Vec<String> = options.iter().map(value_to_display_string).collect();
            out.push(ValidationViolation::new(
                path,
                format!("must be one of: {}", shown.join(", ")),
            ));
        }
    }

    if let Some(num) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if num < min {
                out.push(ValidationViolation::new(path, format!("must be >= {min}")));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if num > max {
                out.push(ValidationViolation::new(path, format!("must be <= {max}")));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min_len) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min_len {
                out.push(ValidationViolation::new(
                    path,
                    format!("must be at least {min_len} characters long"),
                ));
            }
        }
        if let Some(max_len) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max_len {
                out.push(ValidationViolation::new(
                    path,
                    format!("must be at most {max_len} characters long"),
                ));
            }
        }
    }

    if let Some(items) = value.as_array() {
        let len = items.len() as u64;
        if let Some(min_items) = schema.get("minItems").and_then(Value::as_u64) {
            if len < min_items {
                out.push(ValidationViolation::new(
                    path,
                    format!("must contain at least {min_items} item(s)"),
                ));
            }
        }
        if let Some(max_items) = schema.get("maxItems").and_then(Value::as_u64) {
            if len > max_items {
                out.push(ValidationViolation::new(
                    path,
                    format!("must contain at most {max_items} item(s)"),
                ));
            }
        }
    }
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(ty)) => vec![ty.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

// ── Type coercion ─────────────────────────────────────────────────────────────

fn try_coerce(value: &Value, declared_type: &str, schema: &Value) -> Result<Value, String> {
    match declared_type {
        "string" => coerce_to_string(value),
        "integer" => coerce_to_integer(value),
        "number" => coerce_to_number(value),
        "boolean" => coerce_to_boolean(value),
        "array" => coerce_to_array(value, schema),
        "object" => coerce_to_object(value),
        _ => Ok(value.clone()),
    }
}

fn coerce_to_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        _ => Err(format!("expected string, got {}", json_type_name(value))),
    }
}

fn coerce_to_integer(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    #[allow(clippy::cast_possible_truncation)]
                    return Ok(Value::Number((f as i64).into()));
                }
            }
            Err(format!("expected integer, got float {n}"))
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .map_err(|_| format!("expected integer, got string \"{s}\"")),
        _ => Err(format!("expected integer, got {}", json_type_name(value))),
    }
}

fn coerce_to_number(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
            .ok_or_else(|| format!("expected number, got string \"{s}\"")),
        _ => Err(format!("expected number, got {}", json_type_name(value))),
    }
}

fn coerce_to_boolean(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("expected boolean, got string \"{s}\", use true or false")),
        },
        _ => Err(format!("expected boolean, got {}", json_type_name(value))),
    }
}

/// Arrays also arrive JSON-encoded or, for lists of names, comma-separated.
fn coerce_to_array(value: &Value, schema: &Value) -> Result<Value, String> {
    match value {
        Value::Array(_) => Ok(value.clone()),
        Value::String(s) if s.trim_start().starts_with('[') => {
            match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) => Ok(parsed),
                _ => Err("expected array, got a string that is not a JSON-encoded array".to_string()),
            }
        }
        Value::String(s) if items_are_strings(schema) => Ok(Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        )),
        _ => Err(format!("expected array, got {}", json_type_name(value))),
    }
}

fn items_are_strings(schema: &Value) -> bool {
    schema
        .get("items")
        .and_then(|items| items.get("type"))
        .and_then(Value::as_str)
        == Some("string")
}

fn coerce_to_object(value: &Value) -> Result<Value, String> {
    match value {
        Value::Object(_) => Ok(value.clone()),
        Value::String(s) if s.trim_start().starts_with('{') => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            _ => Err("expected object, got a string that is not a JSON-encoded object".to_string()),
        },
        _ => Err(format!("expected object, got {}", json_type_name(value))),
    }
}

// ── Schema invariant ──────────────────────────────────────────────────────────

/// Find array-typed schema nodes that lack an `items` schema.
///
/// Returns JSON pointers (`#/properties/fields`) of every offending node; an
/// empty result means the schema is publishable. An empty `items: {}` is
/// allowed and means "any JSON value".
#[must_use]
pub fn check_schema(schema: &Value) -> Vec<String> {
    let mut offenders = Vec::new();
    walk_schema(schema, "#", &mut offenders);
    offenders
}

fn walk_schema(node: &Value, pointer: &str, out: &mut Vec<String>) {
    if declared_types(node).contains(&"array") && !node.get("items").is_some_and(Value::is_object) {
        out.push(pointer.to_string());
    }

    if let Some(items) = node.get("items") {
        walk_schema(items, &format!("{pointer}/items"), out);
    }

    if let Some(props) = node.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            walk_schema(prop, &format!("{pointer}/properties/{name}"), out);
        }
    }

    for keyword in ["anyOf", "oneOf", "allOf"] {
        if let Some(branches) = node.get(keyword).and_then(Value::as_array) {
            for (i, branch) in branches.iter().enumerate() {
                walk_schema(branch, &format!("{pointer}/{keyword}/{i}"), out);
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_display_string(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{s}\""),
        _ => v.to_string(),
    }
}
