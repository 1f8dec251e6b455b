//! Request dispatcher
//!
//! One `dispatch` call handles one `tools/call`: look up the tool, check its
//! gate, validate the arguments, optionally pre-flight the referenced model
//! and fields against cached metadata, then run the curated operation or the
//! passthrough. No backend call happens before validation succeeds.

mod operations;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheStatus;
use crate::fault::{Fault, TransportFault};
use crate::metadata::MetadataCache;
use crate::schema::domain::referenced_fields;
use crate::schema::{ValidationFault, ValidationViolation};
use crate::session::SessionManager;
use crate::tools::{ToolRegistry, ToolTarget};
use crate::xmlrpc::{RpcStruct, RpcValue};

/// Fields every model answers to even when `fields_get` omits them
const MAGIC_FIELDS: &[&str] = &[
    "id",
    "display_name",
    "create_uid",
    "create_date",
    "write_uid",
    "write_date",
    "__last_update",
];

/// Per-request values that travel with every backend call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Id logged with every line of this request and returned in `meta`
    pub correlation_id: String,
    /// Language override (`lang` context key)
    pub lang: Option<String>,
    /// Timezone override (`tz` context key)
    pub tz: Option<String>,
    /// Additional context keys
    pub context: Map<String, Value>,
}

impl RequestContext {
    /// Context for a request; a missing or blank id is replaced by a fresh UUID
    #[must_use]
    pub fn new(correlation_id: Option<&str>) -> Self {
        let correlation_id = correlation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        Self {
            correlation_id,
            ..Self::default()
        }
    }
}

/// Dispatcher behavior switches
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Overall deadline of one tool call
    pub request_timeout: Duration,
    /// Check model and field names against cached metadata first
    pub preflight: bool,
    /// Passthrough methods refused outright (exact names or `prefix*`)
    pub denied_methods: Vec<String>,
    /// Default `lang` context key
    pub lang: Option<String>,
    /// Default `tz` context key
    pub tz: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            preflight: false,
            denied_methods: Vec::new(),
            lang: None,
            tz: None,
        }
    }
}

/// Result of a successful tool call
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Tool-specific payload
    pub payload: Value,
    /// How metadata was obtained, for tools that consult the cache
    pub cache: Option<CacheStatus>,
    /// Server version of the session that served the call
    pub backend_version: Option<String>,
}

/// Routes tool calls to the backend
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    session: Arc<SessionManager>,
    metadata: Arc<MetadataCache>,
    settings: DispatchSettings,
    started_at: Instant,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        session: Arc<SessionManager>,
        metadata: Arc<MetadataCache>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            session,
            metadata,
            settings,
            started_at: Instant::now(),
        }
    }

    /// Tool registry
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Session manager
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Handle one tool call under the request deadline
    pub async fn dispatch(
        &self,
        tool: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> Result<DispatchOutcome, Fault> {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.settings.request_timeout,
            self.dispatch_inner(tool, arguments, ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportFault::Timeout.into()),
        };

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                tool = %tool,
                correlation_id = %ctx.correlation_id,
                cache = outcome.cache.map_or("none", CacheStatus::as_str),
                elapsed_ms,
                "Tool call succeeded"
            ),
            Err(fault) => warn!(
                tool = %tool,
                correlation_id = %ctx.correlation_id,
                fault = %fault,
                elapsed_ms,
                "Tool call failed"
            ),
        }
        result
    }

    async fn dispatch_inner(
        &self,
        name: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> Result<DispatchOutcome, Fault> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| Fault::UnknownTool(name.to_string()))?;

        if !self.registry.is_enabled(tool) {
            return Err(Fault::ToolDisabled {
                tool: name.to_string(),
                setting: tool.gate.setting(),
            });
        }

        let args = tool.validate(&arguments)?;
        debug!(tool = %name, correlation_id = %ctx.correlation_id, "Arguments validated");

        if self.settings.preflight {
            self.preflight(tool.target, &args).await?;
        }

        let (payload, cache) = match tool.target {
            ToolTarget::Curated(operation) => self.run(operation, &args, ctx).await?,
            ToolTarget::Passthrough => (self.passthrough(&args, ctx).await?, None),
        };

        Ok(DispatchOutcome {
            payload,
            cache,
            backend_version: self.session.current().map(|s| s.server_version.clone()),
        })
    }

    /// Check the model and every referenced field against cached metadata
    async fn preflight(&self, target: ToolTarget, args: &Map<String, Value>) -> Result<(), Fault> {
        let Some(model) = args.get("model").and_then(Value::as_str) else {
            return Ok(());
        };

        if !self.metadata.has_model(model).await? {
            return Err(Fault::UnknownModel(model.to_string()));
        }
        if target == ToolTarget::Passthrough {
            return Ok(());
        }

        let referenced = referenced_field_names(args);
        if referenced.is_empty() {
            return Ok(());
        }
        let (fields, _) = self.metadata.model_fields(model).await?;
        for field in referenced {
            if !fields.contains_key(field) && !MAGIC_FIELDS.contains(&field) {
                return Err(Fault::UnknownField {
                    model: model.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Backend context for one call: configured defaults, then the request
    /// context, then the caller's `context` argument.
    fn backend_context(&self, ctx: &RequestContext, caller: Option<&Value>) -> RpcStruct {
        let mut merged = RpcStruct::new();
        let lang = ctx.lang.as_ref().or(self.settings.lang.as_ref());
        let tz = ctx.tz.as_ref().or(self.settings.tz.as_ref());
        if let Some(lang) = lang {
            merged.insert("lang".to_string(), lang.as_str().into());
        }
        if let Some(tz) = tz {
            merged.insert("tz".to_string(), tz.as_str().into());
        }
        for (key, value) in &ctx.context {
            merged.insert(key.clone(), RpcValue::from(value.clone()));
        }
        if let Some(Value::Object(caller)) = caller {
            for (key, value) in caller {
                merged.insert(key.clone(), RpcValue::from(value.clone()));
            }
        }
        merged
    }

    fn context_kwargs(&self, ctx: &RequestContext, args: &Map<String, Value>) -> RpcStruct {
        let context = self.backend_context(ctx, args.get("context"));
        let mut kwargs = RpcStruct::new();
        if !context.is_empty() {
            kwargs.insert("context".to_string(), RpcValue::Struct(context));
        }
        kwargs
    }

    /// Generic model method call
    async fn passthrough(&self, args: &Map<String, Value>, ctx: &RequestContext) -> Result<Value, Fault> {
        let model = operations::required_str(args, "model")?;
        let method = operations::required_str(args, "method")?;

        if method.starts_with('_') {
            return Err(Fault::MethodDenied {
                method: method.to_string(),
                reason: "private methods cannot be called remotely".to_string(),
            });
        }
        if let Some(pattern) = self
            .settings
            .denied_methods
            .iter()
            .find(|p| method_matches(p, method))
        {
            return Err(Fault::MethodDenied {
                method: method.to_string(),
                reason: format!("denied by tools.passthrough.denied_methods ('{pattern}')"),
            });
        }

        let positional = match args.get("args") {
            Some(Value::Array(items)) => items.iter().cloned().map(RpcValue::from).collect(),
            _ => Vec::new(),
        };
        let mut kwargs: RpcStruct = match args.get("kwargs") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), RpcValue::from(v.clone())))
                .collect(),
            _ => RpcStruct::new(),
        };

        // Context given inside kwargs is the most specific one.
        let mut context = self.backend_context(ctx, args.get("context"));
        match kwargs.remove("context") {
            Some(RpcValue::Struct(inner)) => context.extend(inner),
            Some(RpcValue::Nil) | None => {}
            Some(_) => {
                return Err(ValidationFault::shape(vec![ValidationViolation::new(
                    "kwargs.context",
                    "must be an object",
                )])
                .into());
            }
        }
        if !context.is_empty() {
            kwargs.insert("context".to_string(), RpcValue::Struct(context));
        }

        debug!(model = %model, method = %method, correlation_id = %ctx.correlation_id, "Passthrough call");
        let result = self.session.execute(model, method, positional, kwargs).await?;
        Ok(serde_json::json!({ "result": result.into_json() }))
    }
}

/// `action_*` matches every method starting with `action_`; anything else
/// must match exactly.
fn method_matches(pattern: &str, method: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => method.starts_with(prefix),
        None => pattern == method,
    }
}

/// Field names a call refers to: `fields`, keys of `values` and the first
/// path segment of every domain condition.
fn referenced_field_names(args: &Map<String, Value>) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    if let Some(Value::Array(fields)) = args.get("fields") {
        names.extend(fields.iter().filter_map(Value::as_str));
    }
    match args.get("values") {
        Some(Value::Object(values)) => names.extend(values.keys().map(String::as_str)),
        Some(Value::Array(rows)) => {
            for row in rows.iter().filter_map(Value::as_object) {
                names.extend(row.keys().map(String::as_str));
            }
        }
        _ => {}
    }
    if let Some(domain) = args.get("domain") {
        names.extend(referenced_fields(domain));
    }
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn denied_method_patterns() {
        assert!(method_matches("unlink", "unlink"));
        assert!(!method_matches("unlink", "unlink_all"));
        assert!(method_matches("action_*", "action_confirm"));
        assert!(!method_matches("action_*", "button_confirm"));
    }

    #[test]
    fn referenced_fields_cover_fields_values_and_domain() {
        let args = json!({
            "model": "res.partner",
            "fields": ["name", "email"],
            "values": {"phone": "1"},
            "domain": [["country_id.code", "=", "FI"], ["name", "!=", false]]
        });
        let args = args.as_object().unwrap();
        assert_eq!(
            referenced_field_names(args),
            vec!["country_id", "email", "name", "phone"]
        );
    }

    #[test]
    fn blank_correlation_id_is_replaced() {
        let ctx = RequestContext::new(Some("  "));
        assert_eq!(ctx.correlation_id.len(), 36);
        assert_eq!(RequestContext::new(Some("req-1")).correlation_id, "req-1");
    }
}
