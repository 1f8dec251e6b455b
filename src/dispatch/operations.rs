//! Curated operations

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{Dispatcher, RequestContext};
use crate::cache::CacheStatus;
use crate::fault::Fault;
use crate::metadata::ModelFilter;
use crate::normalize::normalize;
use crate::schema::{ValidationFault, ValidationViolation};
use crate::tools::Operation;
use crate::xmlrpc::{RpcStruct, RpcValue};

/// Page size of `search_records` when the caller gives none
const DEFAULT_LIMIT: i64 = 100;

type OperationResult = Result<(Value, Option<CacheStatus>), Fault>;

pub(super) fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, Fault> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        ValidationFault::shape(vec![ValidationViolation::new(key, "required parameter is missing")]).into()
    })
}

fn optional_i64(args: &Map<String, Value>, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

/// `ids` after validation is an integer or a list of integers. Returns the
/// list and whether a single id was given.
fn ids_arg(args: &Map<String, Value>, key: &str) -> Result<(Vec<RpcValue>, bool), Fault> {
    match args.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|id| (vec![RpcValue::Int(id)], true))
            .ok_or_else(|| Fault::unexpected(format!("'{key}' is not an integer"))),
        Some(Value::Array(items)) => {
            let ids = items
                .iter()
                .map(|v| v.as_i64().map(RpcValue::Int))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Fault::unexpected(format!("'{key}' holds a non-integer id")))?;
            Ok((ids, false))
        }
        _ => Err(ValidationFault::shape(vec![ValidationViolation::new(
            key,
            "required parameter is missing",
        )])
        .into()),
    }
}

fn ids_json(ids: &[RpcValue]) -> Value {
    Value::Array(ids.iter().filter_map(RpcValue::as_i64).map(Value::from).collect())
}

fn json_arg(args: &Map<String, Value>, key: &str, default: Value) -> RpcValue {
    RpcValue::from(args.get(key).cloned().unwrap_or(default))
}

/// Hit only when every lookup hit; bypass wins over everything.
fn combine(statuses: &[CacheStatus]) -> CacheStatus {
    if statuses.contains(&CacheStatus::Bypass) {
        CacheStatus::Bypass
    } else if statuses.contains(&CacheStatus::Miss) {
        CacheStatus::Miss
    } else {
        CacheStatus::Hit
    }
}

impl Dispatcher {
    pub(super) async fn run(
        &self,
        operation: Operation,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> OperationResult {
        match operation {
            Operation::SearchRecords => self.search_records(args, ctx).await,
            Operation::SearchCount => self.search_count(args, ctx).await,
            Operation::GetRecord => self.get_record(args, ctx).await,
            Operation::CreateRecord => self.create_record(args, ctx).await,
            Operation::UpdateRecord => self.update_record(args, ctx).await,
            Operation::DeleteRecord => self.delete_record(args, ctx).await,
            Operation::ListModels => self.list_models(args).await,
            Operation::GetModelFields => self.get_model_fields(args).await,
            Operation::ModelInfo => self.model_info(args, ctx).await,
            Operation::RenderReport => self.render_report(args, ctx).await,
            Operation::GetServerInfo => self.get_server_info().await,
            Operation::ServerStatus => Ok((self.server_status().await, None)),
            Operation::CacheStats => Ok((self.cache_stats(args), None)),
            Operation::ListDatabases => self.list_databases().await,
        }
    }

    // Record operations pass every argument positionally so the same call
    // works with both calling conventions; only `context` is a keyword.

    async fn search_records(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let limit = optional_i64(args, "limit").unwrap_or(DEFAULT_LIMIT);
        let offset = optional_i64(args, "offset").unwrap_or(0);
        let order = args
            .get("order")
            .and_then(Value::as_str)
            .filter(|o| !o.trim().is_empty())
            .map_or(RpcValue::Bool(false), RpcValue::from);

        let records = self
            .session
            .execute(
                model,
                "search_read",
                vec![
                    json_arg(args, "domain", json!([])),
                    json_arg(args, "fields", json!([])),
                    RpcValue::Int(offset),
                    RpcValue::Int(limit),
                    order,
                ],
                self.context_kwargs(ctx, args),
            )
            .await?
            .into_json();

        let count = records.as_array().map_or(0, Vec::len);
        Ok((
            json!({
                "model": model,
                "records": records,
                "count": count,
                "offset": offset,
                "limit": limit,
            }),
            None,
        ))
    }

    async fn search_count(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let count = self
            .session
            .execute(
                model,
                "search_count",
                vec![json_arg(args, "domain", json!([]))],
                self.context_kwargs(ctx, args),
            )
            .await?;
        let count = count
            .as_i64()
            .ok_or_else(|| Fault::unexpected("search_count did not return an integer"))?;
        Ok((json!({ "model": model, "count": count }), None))
    }

    async fn get_record(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let (ids, single) = ids_arg(args, "ids")?;
        let rows = self
            .session
            .execute(
                model,
                "read",
                vec![RpcValue::Array(ids), json_arg(args, "fields", json!([]))],
                self.context_kwargs(ctx, args),
            )
            .await?
            .into_json();

        let payload = match (single, rows) {
            (true, Value::Array(mut rows)) => {
                if rows.is_empty() {
                    json!({ "model": model, "record": null })
                } else {
                    json!({ "model": model, "record": rows.swap_remove(0) })
                }
            }
            (_, rows) => json!({ "model": model, "records": rows }),
        };
        Ok((payload, None))
    }

    async fn create_record(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let values = args.get("values").cloned().unwrap_or(Value::Null);
        let single = values.is_object();
        let rows = values.as_array().map_or(1, Vec::len);

        info!(model = %model, records = rows, correlation_id = %ctx.correlation_id, "Creating records");
        let created = self
            .session
            .execute(model, "create", vec![RpcValue::from(values)], self.context_kwargs(ctx, args))
            .await?
            .into_json();

        // A single-record create may still come back as a one-element list.
        let payload = match (single, created) {
            (true, Value::Array(mut ids)) if ids.len() == 1 => json!({ "model": model, "id": ids.swap_remove(0) }),
            (true, id) => json!({ "model": model, "id": id }),
            (false, ids) => json!({ "model": model, "ids": ids }),
        };
        Ok((payload, None))
    }

    async fn update_record(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let (ids, _) = ids_arg(args, "ids")?;
        let ids_shown = ids_json(&ids);

        info!(model = %model, ids = %ids_shown, correlation_id = %ctx.correlation_id, "Updating records");
        let done = self
            .session
            .execute(
                model,
                "write",
                vec![RpcValue::Array(ids), json_arg(args, "values", json!({}))],
                self.context_kwargs(ctx, args),
            )
            .await?;
        Ok((json!({ "model": model, "ids": ids_shown, "success": done.is_truthy() }), None))
    }

    async fn delete_record(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let (ids, _) = ids_arg(args, "ids")?;
        let ids_shown = ids_json(&ids);

        info!(model = %model, ids = %ids_shown, correlation_id = %ctx.correlation_id, "Deleting records");
        let done = self
            .session
            .execute(model, "unlink", vec![RpcValue::Array(ids)], self.context_kwargs(ctx, args))
            .await?;
        Ok((json!({ "model": model, "ids": ids_shown, "success": done.is_truthy() }), None))
    }

    async fn list_models(&self, args: &Map<String, Value>) -> OperationResult {
        let filter = ModelFilter {
            include_transient: args.get("transient").and_then(Value::as_bool).unwrap_or(false),
            search: args.get("search").and_then(Value::as_str).map(str::to_string),
        };
        let (models, status) = self.metadata.model_list(&filter).await?;
        Ok((json!({ "count": models.len(), "models": models }), Some(status)))
    }

    async fn get_model_fields(&self, args: &Map<String, Value>) -> OperationResult {
        let model = required_str(args, "model")?;
        let (fields, status) = self.metadata.model_fields(model).await?;

        let selected = match args.get("fields").and_then(Value::as_array) {
            Some(wanted) if !wanted.is_empty() => {
                let mut subset = BTreeMap::new();
                for name in wanted.iter().filter_map(Value::as_str) {
                    let info = fields.get(name).ok_or_else(|| Fault::UnknownField {
                        model: model.to_string(),
                        field: name.to_string(),
                    })?;
                    subset.insert(name.to_string(), info.clone());
                }
                subset
            }
            _ => fields.as_ref().clone(),
        };

        Ok((
            json!({ "model": model, "count": selected.len(), "fields": selected }),
            Some(status),
        ))
    }

    async fn model_info(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let model = required_str(args, "model")?;
        let everything = ModelFilter {
            include_transient: true,
            search: None,
        };
        let (models, list_status) = self.metadata.model_list(&everything).await?;
        let info = models
            .into_iter()
            .find(|m| m.model == model)
            .ok_or_else(|| Fault::UnknownModel(model.to_string()))?;
        let (fields, fields_status) = self.metadata.model_fields(model).await?;

        let sample = self
            .session
            .execute(
                model,
                "search",
                vec![RpcValue::Array(vec![]), RpcValue::Int(0), RpcValue::Int(1)],
                self.context_kwargs(ctx, args),
            )
            .await?;
        let has_records = sample.as_array().is_some_and(|ids| !ids.is_empty());

        let required: Vec<&str> = fields
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(name, _)| name.as_str())
            .collect();
        let relations: BTreeMap<&str, &str> = fields
            .iter()
            .filter_map(|(name, f)| Some((name.as_str(), f.relation.as_deref()?)))
            .collect();

        Ok((
            json!({
                "model": info.model,
                "name": info.name,
                "transient": info.transient,
                "field_count": fields.len(),
                "required_fields": required,
                "relations": relations,
                "has_records": has_records,
            }),
            Some(combine(&[list_status, fields_status])),
        ))
    }

    async fn render_report(&self, args: &Map<String, Value>, ctx: &RequestContext) -> OperationResult {
        let report_name = required_str(args, "report_name")?;
        let (docids, _) = ids_arg(args, "docids")?;

        let mut kwargs = self.context_kwargs(ctx, args);
        if let Some(data) = args.get("data") {
            kwargs.insert("data".to_string(), RpcValue::from(data.clone()));
        }
        let report = self.session.render_report(report_name, docids, kwargs).await?;
        Ok((json!({ "report_name": report_name, "report": report.into_json() }), None))
    }

    async fn get_server_info(&self) -> OperationResult {
        let version = self.session.call_common("version", vec![]).await?.into_json();
        let session = self.session.ensure_session().await?;
        let about = if session.profile.about {
            match self.session.call_common("about", vec![]).await {
                Ok(about) => about.into_json(),
                Err(fault) => {
                    debug!(fault = %fault, "common.about() failed");
                    Value::Null
                }
            }
        } else {
            Value::Null
        };
        Ok((
            json!({
                "version": version,
                "about": about,
                "negotiated": session.profile,
            }),
            None,
        ))
    }

    async fn server_status(&self) -> Value {
        let backend = match self.session.ensure_session().await {
            Ok(session) => json!({ "reachable": true, "series": session.profile.series }),
            Err(fault) => json!({ "reachable": false, "error": normalize(&fault) }),
        };
        let gates = self.registry.gates();

        json!({
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "backend": backend,
            "session": self.session.status(),
            "gates": {
                "passthrough": gates.passthrough,
                "database_admin": gates.database_admin,
                "preflight": self.settings.preflight,
            },
            "tools": self.registry.list().len(),
            "cache": self.metadata.stats(),
        })
    }

    fn cache_stats(&self, args: &Map<String, Value>) -> Value {
        if args.get("action").and_then(Value::as_str) == Some("clear") {
            self.metadata.flush();
            info!("Metadata cache cleared");
            json!({ "cleared": true, "stats": self.metadata.stats() })
        } else {
            json!({ "cleared": false, "stats": self.metadata.stats() })
        }
    }

    async fn list_databases(&self) -> OperationResult {
        let databases = self.session.call_db("list", vec![]).await?.into_json();
        Ok((json!({ "databases": databases }), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn combined_cache_status() {
        assert_eq!(combine(&[CacheStatus::Hit, CacheStatus::Hit]), CacheStatus::Hit);
        assert_eq!(combine(&[CacheStatus::Hit, CacheStatus::Miss]), CacheStatus::Miss);
        assert_eq!(combine(&[CacheStatus::Miss, CacheStatus::Bypass]), CacheStatus::Bypass);
    }

    #[test]
    fn ids_accept_single_and_list() {
        let single = serde_json::json!({"ids": 7});
        let (ids, is_single) = ids_arg(single.as_object().unwrap(), "ids").unwrap();
        assert_eq!(ids, vec![RpcValue::Int(7)]);
        assert!(is_single);

        let many = serde_json::json!({"ids": [1, 2]});
        let (ids, is_single) = ids_arg(many.as_object().unwrap(), "ids").unwrap();
        assert_eq!(ids.len(), 2);
        assert!(!is_single);
    }
}
