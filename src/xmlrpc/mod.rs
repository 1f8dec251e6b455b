//! XML-RPC value model and wire codec
//!
//! [`RpcValue`] is the tagged value every backend result is represented as
//! at the transport boundary. Curated operations convert it into JSON (or
//! typed structs) themselves; nothing above the transport sees XML.

mod codec;

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};

pub use codec::{DecodeError, Response, decode_call, decode_response, encode_call, encode_fault, encode_response};

/// Keyed mapping of XML-RPC values (`<struct>`)
pub type RpcStruct = BTreeMap<String, RpcValue>;

/// A single XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    /// `<nil/>`
    Nil,
    /// `<boolean>`
    Bool(bool),
    /// `<int>`, `<i4>` or `<i8>`
    Int(i64),
    /// `<double>`
    Double(f64),
    /// `<string>` or an untyped `<value>`
    String(String),
    /// `<dateTime.iso8601>`, kept in its wire form
    DateTime(String),
    /// `<base64>`, decoded
    Base64(Vec<u8>),
    /// `<array>`
    Array(Vec<RpcValue>),
    /// `<struct>`
    Struct(RpcStruct),
}

impl RpcValue {
    /// Integer value, if this is an `Int`
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String slice, if this is a `String`
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array elements, if this is an `Array`
    #[must_use]
    pub fn as_array(&self) -> Option<&[RpcValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Struct members, if this is a `Struct`
    #[must_use]
    pub fn as_struct(&self) -> Option<&RpcStruct> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Odoo signals "no value" with `false`; treat `false`, `0`, nil and
    /// empty strings as falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Convert into JSON. Dates stay ISO strings and binary payloads are
    /// base64-encoded, so the conversion never fails.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Nil => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Number(i.into()),
            Self::Double(d) => Number::from_f64(d).map_or(Value::Null, Value::Number),
            Self::String(s) | Self::DateTime(s) => Value::String(s),
            Self::Base64(bytes) => Value::String(STANDARD.encode(bytes)),
            Self::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Struct(members) => Value::Object(
                members
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<Value> for RpcValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Nil,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Double(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(members) => {
                Self::Struct(members.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for RpcValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for RpcValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for RpcValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<RpcValue>> for RpcValue {
    fn from(value: Vec<RpcValue>) -> Self {
        Self::Array(value)
    }
}

impl From<RpcStruct> for RpcValue {
    fn from(value: RpcStruct) -> Self {
        Self::Struct(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn json_integers_become_ints_and_floats_doubles() {
        assert_eq!(RpcValue::from(json!(7)), RpcValue::Int(7));
        assert_eq!(RpcValue::from(json!(2.5)), RpcValue::Double(2.5));
        assert_eq!(RpcValue::from(json!(null)), RpcValue::Nil);
    }

    #[test]
    fn nested_json_converts_both_ways() {
        let original = json!({"domain": [["name", "ilike", "acme"]], "limit": 5, "active": true});
        let value = RpcValue::from(original.clone());
        assert!(matches!(value, RpcValue::Struct(_)));
        assert_eq!(value.into_json(), original);
    }

    #[test]
    fn base64_and_dates_render_as_strings() {
        assert_eq!(RpcValue::Base64(b"PDF".to_vec()).into_json(), json!("UERG"));
        assert_eq!(
            RpcValue::DateTime("20240101T10:00:00".into()).into_json(),
            json!("20240101T10:00:00")
        );
    }

    #[test]
    fn truthiness_follows_odoo_conventions() {
        assert!(!RpcValue::Bool(false).is_truthy());
        assert!(!RpcValue::Int(0).is_truthy());
        assert!(RpcValue::Int(2).is_truthy());
        assert!(!RpcValue::Nil.is_truthy());
        assert!(RpcValue::Array(vec![]).is_truthy());
    }
}
