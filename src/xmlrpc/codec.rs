//! XML-RPC document encoding and decoding
//!
//! Decoding builds a small element tree with `quick-xml` first and then
//! interprets it, which keeps the value grammar independent of event
//! plumbing. Both `methodCall` and `methodResponse` documents are supported
//! in each direction so test servers can speak the same codec.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::escape::{escape, resolve_predefined_entity};
use quick_xml::events::Event;
use thiserror::Error;

use super::{RpcStruct, RpcValue};

/// A decoded `methodResponse`
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The single return value
    Value(RpcValue),
    /// `<fault>` returned by the server
    Fault {
        /// `faultCode` (0 when the server sent a non-integer code)
        code: i64,
        /// `faultString`
        message: String,
    },
}

/// The document could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not well-formed XML
    #[error("invalid XML: {0}")]
    Xml(String),
    /// Well-formed XML that is not a valid XML-RPC document
    #[error("invalid XML-RPC document: {0}")]
    Structure(String),
}

/// Encode a `methodCall` document
#[must_use]
pub fn encode_call(method: &str, params: &[RpcValue]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Encode a successful `methodResponse` document
#[must_use]
pub fn encode_response(value: &RpcValue) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>");
    out
}

/// Encode a fault `methodResponse` document
#[must_use]
pub fn encode_fault(code: i64, message: &str) -> String {
    let mut fault = RpcStruct::new();
    fault.insert("faultCode".to_string(), RpcValue::Int(code));
    fault.insert("faultString".to_string(), RpcValue::String(message.to_string()));

    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    write_value(&mut out, &RpcValue::Struct(fault));
    out.push_str("</fault></methodResponse>");
    out
}

fn write_value(out: &mut String, value: &RpcValue) {
    out.push_str("<value>");
    match value {
        RpcValue::Nil => out.push_str("<nil/>"),
        RpcValue::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        RpcValue::Int(i) => {
            if i32::try_from(*i).is_ok() {
                let _ = write!(out, "<int>{i}</int>");
            } else {
                let _ = write!(out, "<i8>{i}</i8>");
            }
        }
        RpcValue::Double(d) => {
            let _ = write!(out, "<double>{d}</double>");
        }
        RpcValue::String(s) => {
            let _ = write!(out, "<string>{}</string>", escape(s.as_str()));
        }
        RpcValue::DateTime(s) => {
            let _ = write!(out, "<dateTime.iso8601>{}</dateTime.iso8601>", escape(s.as_str()));
        }
        RpcValue::Base64(bytes) => {
            let _ = write!(out, "<base64>{}</base64>", STANDARD.encode(bytes));
        }
        RpcValue::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        RpcValue::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(out, "<member><name>{}</name>", escape(name.as_str()));
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Decode a `methodResponse` document
pub fn decode_response(body: &str) -> Result<Response, DecodeError> {
    let root = parse_tree(body)?;
    if root.name != "methodResponse" {
        return Err(structure(format!("expected <methodResponse>, found <{}>", root.name)));
    }

    if let Some(fault) = root.find("fault") {
        let value = parse_value(child(fault, "value")?)?;
        let members = value
            .as_struct()
            .ok_or_else(|| structure("fault value is not a struct"))?;
        let code = members.get("faultCode").and_then(RpcValue::as_i64).unwrap_or(0);
        let message = match members.get("faultString") {
            Some(RpcValue::String(s)) => s.clone(),
            Some(other) => format!("{other:?}"),
            None => String::new(),
        };
        return Ok(Response::Fault { code, message });
    }

    let param = child(child(&root, "params")?, "param")?;
    Ok(Response::Value(parse_value(child(param, "value")?)?))
}

/// Decode a `methodCall` document into the method name and parameters
pub fn decode_call(body: &str) -> Result<(String, Vec<RpcValue>), DecodeError> {
    let root = parse_tree(body)?;
    if root.name != "methodCall" {
        return Err(structure(format!("expected <methodCall>, found <{}>", root.name)));
    }
    let method = child(&root, "methodName")?.text.trim().to_string();
    let params = match root.find("params") {
        Some(params) => params
            .children
            .iter()
            .filter(|n| n.name == "param")
            .map(|p| child(p, "value").and_then(parse_value))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok((method, params))
}

// ── Element tree ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn find(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|n| n.name == name)
    }
}

fn child<'a>(node: &'a Node, name: &str) -> Result<&'a Node, DecodeError> {
    node.find(name)
        .ok_or_else(|| structure(format!("<{}> is missing <{name}>", node.name)))
}

fn structure(message: impl Into<String>) -> DecodeError {
    DecodeError::Structure(message.into())
}

fn xml_err(err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Xml(err.to_string())
}

fn parse_tree(body: &str) -> Result<Node, DecodeError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().expand_empty_elements = true;

    let mut stack = vec![Node::default()];
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                stack.push(Node::named(name));
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| structure("unbalanced end tag"))?;
                stack
                    .last_mut()
                    .ok_or_else(|| structure("unbalanced end tag"))?
                    .children
                    .push(node);
            }
            Event::Text(text) => {
                let decoded = text.decode().map_err(xml_err)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decoded);
                }
            }
            Event::CData(data) => {
                let decoded = data.decode().map_err(xml_err)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decoded);
                }
            }
            Event::GeneralRef(reference) => {
                let resolved = match reference.resolve_char_ref().map_err(xml_err)? {
                    Some(ch) => ch.to_string(),
                    None => {
                        let name = reference.decode().map_err(xml_err)?;
                        resolve_predefined_entity(&name)
                            .ok_or_else(|| DecodeError::Xml(format!("unknown entity &{name};")))?
                            .to_string()
                    }
                };
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(structure("document ended inside an element"));
    }
    stack
        .pop()
        .and_then(|root| root.children.into_iter().next())
        .ok_or_else(|| structure("empty document"))
}

// ── Value grammar ─────────────────────────────────────────────────────────────

fn parse_value(node: &Node) -> Result<RpcValue, DecodeError> {
    let Some(typed) = node.children.first() else {
        return Ok(RpcValue::String(node.text.clone()));
    };
    let text = typed.text.trim();

    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse::<i64>()
            .map(RpcValue::Int)
            .map_err(|_| structure(format!("invalid integer '{text}'"))),
        "boolean" => match text {
            "1" | "true" => Ok(RpcValue::Bool(true)),
            "0" | "false" => Ok(RpcValue::Bool(false)),
            _ => Err(structure(format!("invalid boolean '{text}'"))),
        },
        "double" => text
            .parse::<f64>()
            .map(RpcValue::Double)
            .map_err(|_| structure(format!("invalid double '{text}'"))),
        "string" => Ok(RpcValue::String(typed.text.clone())),
        "dateTime.iso8601" => Ok(RpcValue::DateTime(text.to_string())),
        "base64" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map(RpcValue::Base64)
                .map_err(|e| structure(format!("invalid base64: {e}")))
        }
        "nil" => Ok(RpcValue::Nil),
        "array" => {
            let data = child(typed, "data")?;
            data.children
                .iter()
                .filter(|n| n.name == "value")
                .map(parse_value)
                .collect::<Result<Vec<_>, _>>()
                .map(RpcValue::Array)
        }
        "struct" => {
            let mut members = RpcStruct::new();
            for member in typed.children.iter().filter(|n| n.name == "member") {
                let name = child(member, "name")?.text.clone();
                let value = parse_value(child(member, "value")?)?;
                members.insert(name, value);
            }
            Ok(RpcValue::Struct(members))
        }
        other => Err(structure(format!("unsupported value type <{other}>"))),
    }
}
