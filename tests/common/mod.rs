//! Shared test double: an in-process Odoo that records every call

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use odoo_mcp_gateway::LogLevelHandle;
use odoo_mcp_gateway::config::Config;
use odoo_mcp_gateway::fault::Fault;
use odoo_mcp_gateway::gateway::Gateway;
use odoo_mcp_gateway::transport::{Endpoint, Transport};
use odoo_mcp_gateway::xmlrpc::{RpcStruct, RpcValue};

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub endpoint: Endpoint,
    /// Endpoint method (`authenticate`, `execute_kw`, ...)
    pub method: String,
    /// Model and model method for object calls
    pub target: Option<(String, String)>,
}

/// Scriptable Odoo server
pub struct MockOdoo {
    pub version: Mutex<String>,
    pub calls: Mutex<Vec<Call>>,
    /// Object calls to answer with "Session expired" before behaving
    pub expire_next: AtomicUsize,
    /// Reject every login
    pub reject_login: AtomicBool,
    /// Delay applied to `fields_get`
    pub fields_delay: Mutex<Duration>,
    /// Fault string returned by `write`
    pub write_fault: Mutex<Option<String>>,
    /// Records returned by `search_read` / `read`
    pub records: Mutex<Vec<Value>>,
    /// uid handed out by `authenticate`
    pub uid: AtomicUsize,
    /// Object calls made with this uid are answered "Session expired"
    pub stale_uid: AtomicUsize,
}

impl MockOdoo {
    pub fn new() -> Arc<Self> {
        Self::with_version("17.0")
    }

    pub fn with_version(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: Mutex::new(version.to_string()),
            calls: Mutex::new(Vec::new()),
            expire_next: AtomicUsize::new(0),
            reject_login: AtomicBool::new(false),
            fields_delay: Mutex::new(Duration::ZERO),
            write_fault: Mutex::new(None),
            records: Mutex::new(vec![
                json!({"id": 1, "name": "Azure Interior", "is_company": true}),
                json!({"id": 2, "name": "Deco Addict", "is_company": true}),
            ]),
            uid: AtomicUsize::new(2),
            stale_uid: AtomicUsize::new(0),
        })
    }

    /// Every recorded call
    pub fn recorded(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls to a model method
    pub fn object_calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.target.as_ref().is_some_and(|(_, m)| m == method))
            .count()
    }

    /// Number of calls to a common endpoint method
    pub fn common_calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.endpoint == Endpoint::Common && c.method == method)
            .count()
    }

    /// Number of `authenticate` calls
    pub fn logins(&self) -> usize {
        self.common_calls("authenticate")
    }

    fn fields() -> RpcValue {
        let mut fields = RpcStruct::new();
        for (name, kind, required, relation) in [
            ("name", "char", true, None),
            ("email", "char", false, None),
            ("is_company", "boolean", false, None),
            ("country_id", "many2one", false, Some("res.country")),
        ] {
            let mut attrs = RpcStruct::new();
            attrs.insert("type".into(), kind.into());
            attrs.insert("string".into(), name.replace('_', " ").into());
            attrs.insert("required".into(), required.into());
            attrs.insert("readonly".into(), false.into());
            if let Some(relation) = relation {
                attrs.insert("relation".into(), relation.into());
            }
            fields.insert(name.into(), RpcValue::Struct(attrs));
        }
        RpcValue::Struct(fields)
    }

    fn models() -> RpcValue {
        RpcValue::from(json!([
            {"model": "res.partner", "name": "Contact", "transient": false},
            {"model": "sale.order", "name": "Sales Order", "transient": false},
            {"model": "base.language.install", "name": "Install Language", "transient": true},
        ]))
    }

    async fn object(&self, uid: Option<i64>, model: &str, method: &str) -> Result<RpcValue, Fault> {
        let stale = i64::try_from(self.stale_uid.load(Ordering::SeqCst)).unwrap();
        let uid_rejected = stale != 0 && uid == Some(stale);
        if uid_rejected
            || self
                .expire_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Fault::Backend {
                code: 1,
                message: "Traceback (most recent call last):\n  ...\nodoo.http.SessionExpiredException: Session expired".into(),
            });
        }

        match (model, method) {
            ("ir.model", "search_read") => Ok(Self::models()),
            (_, "fields_get") => {
                let delay = *self.fields_delay.lock();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Self::fields())
            }
            (_, "search_read" | "read") => Ok(RpcValue::from(Value::Array(self.records.lock().clone()))),
            (_, "search_count") => Ok(RpcValue::Int(i64::try_from(self.records.lock().len()).unwrap())),
            (_, "search") => Ok(RpcValue::Array(vec![RpcValue::Int(1)])),
            (_, "create") => Ok(RpcValue::Int(42)),
            (_, "write") => match self.write_fault.lock().clone() {
                Some(message) => Err(Fault::Backend { code: 2, message }),
                None => Ok(RpcValue::Bool(true)),
            },
            (_, "unlink") => Ok(RpcValue::Bool(true)),
            _ => Ok(RpcValue::from(json!({"called": method}))),
        }
    }
}

#[async_trait]
impl Transport for MockOdoo {
    async fn invoke(
        &self,
        endpoint: Endpoint,
        method: &str,
        args: Vec<RpcValue>,
        _kwargs: Option<RpcStruct>,
    ) -> Result<RpcValue, Fault> {
        let target = (endpoint == Endpoint::Object).then(|| {
            (
                args.get(3).and_then(RpcValue::as_str).unwrap_or_default().to_string(),
                args.get(4).and_then(RpcValue::as_str).unwrap_or_default().to_string(),
            )
        });
        self.calls.lock().push(Call {
            endpoint,
            method: method.to_string(),
            target: target.clone(),
        });

        match endpoint {
            Endpoint::Common => match method {
                "version" => {
                    let mut info = BTreeMap::new();
                    info.insert("server_version".to_string(), RpcValue::from(self.version.lock().clone()));
                    Ok(RpcValue::Struct(info))
                }
                "authenticate" => {
                    if self.reject_login.load(Ordering::SeqCst) {
                        Ok(RpcValue::Bool(false))
                    } else {
                        Ok(RpcValue::Int(i64::try_from(self.uid.load(Ordering::SeqCst)).unwrap()))
                    }
                }
                "about" => Ok(RpcValue::from("See http://openerp.com")),
                _ => Ok(RpcValue::Nil),
            },
            Endpoint::Object => {
                let uid = match args.get(1) {
                    Some(RpcValue::Int(uid)) => Some(*uid),
                    _ => None,
                };
                let (model, model_method) = target.unwrap_or_default();
                self.object(uid, &model, &model_method).await
            }
            Endpoint::Database => Ok(RpcValue::from(json!(["prod", "staging"]))),
            Endpoint::Report => Ok(RpcValue::from(json!({"result": "JVBERi0=", "format": "pdf"}))),
        }
    }
}

/// A valid configuration pointing nowhere
pub fn config() -> Config {
    let mut config = Config::default();
    config.odoo.url = "http://odoo.test".to_string();
    config.odoo.database = "test".to_string();
    config.odoo.username = "admin".to_string();
    config.odoo.password = Some("admin".to_string());
    config
}

/// Gateway over the mock with `config`
pub fn gateway(odoo: &Arc<MockOdoo>, config: Config) -> Gateway {
    Gateway::with_transport(config, Arc::clone(odoo) as Arc<dyn Transport>, LogLevelHandle::detached())
        .unwrap()
}
