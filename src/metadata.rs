//! Cached model metadata
//!
//! Field definitions and the model list change only on module upgrades, so
//! they are cached per server version. Record data is never cached here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::{CacheStatsSnapshot, CacheStatus, Clock, SystemClock, TtlCache};
use crate::fault::Fault;
use crate::session::SessionManager;
use crate::xmlrpc::{RpcStruct, RpcValue};

/// Attributes requested from `fields_get`
pub const FIELD_ATTRIBUTES: &[&str] = &[
    "string", "help", "type", "required", "readonly", "relation", "selection",
];

/// One field definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    /// Field type (`char`, `many2one`, ...)
    #[serde(rename = "type")]
    pub field_type: String,
    /// Display label
    pub string: String,
    /// Whether a value is mandatory
    pub required: bool,
    /// Whether the field can be written
    pub readonly: bool,
    /// Target model of relational fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Tooltip text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// `[value, label]` pairs of selection fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<serde_json::Value>,
}

impl FieldInfo {
    fn from_rpc(attributes: &RpcStruct) -> Self {
        let text = |key: &str| {
            attributes
                .get(key)
                .and_then(RpcValue::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let flag = |key: &str| attributes.get(key).is_some_and(RpcValue::is_truthy);

        Self {
            field_type: text("type").unwrap_or_else(|| "unknown".to_string()),
            string: text("string").unwrap_or_default(),
            required: flag("required"),
            readonly: flag("readonly"),
            relation: text("relation"),
            help: text("help"),
            selection: attributes
                .get("selection")
                .filter(|s| matches!(s, RpcValue::Array(items) if !items.is_empty()))
                .cloned()
                .map(RpcValue::into_json),
        }
    }
}

/// Field name to definition
pub type FieldMap = BTreeMap<String, FieldInfo>;

/// One installed model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    /// Technical name (`res.partner`)
    pub model: String,
    /// Display name
    pub name: String,
    /// Whether records are temporary wizard data
    pub transient: bool,
}

/// Filter applied to the cached model list
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    /// Keep transient models
    pub include_transient: bool,
    /// Case-insensitive substring of the technical or display name
    pub search: Option<String>,
}

impl ModelFilter {
    fn matches(&self, info: &ModelInfo) -> bool {
        if info.transient && !self.include_transient {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                info.model.to_lowercase().contains(&needle) || info.name.to_lowercase().contains(&needle)
            }
        }
    }
}

/// Statistics of both metadata caches
#[derive(Debug, Clone, Serialize)]
pub struct MetadataStats {
    /// `fields_get` cache
    pub fields: CacheStatsSnapshot,
    /// Model list cache
    pub models: CacheStatsSnapshot,
}

/// Read-through cache of model metadata
pub struct MetadataCache {
    session: Arc<SessionManager>,
    fields: TtlCache<(String, String), Arc<FieldMap>>,
    models: TtlCache<String, Arc<Vec<ModelInfo>>>,
}

impl MetadataCache {
    /// Create a cache on the wall clock
    #[must_use]
    pub fn new(session: Arc<SessionManager>, enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(session, enabled, ttl, max_entries, Arc::new(SystemClock))
    }

    /// Create a cache on a custom clock
    #[must_use]
    pub fn with_clock(
        session: Arc<SessionManager>,
        enabled: bool,
        ttl: Duration,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            fields: TtlCache::with_clock(enabled, ttl, max_entries, Arc::clone(&clock)),
            models: TtlCache::with_clock(enabled, ttl, max_entries, clock),
        }
    }

    /// Field definitions of `model`
    pub async fn model_fields(&self, model: &str) -> Result<(Arc<FieldMap>, CacheStatus), Fault> {
        let session = self.session.ensure_session().await?;
        let key = (model.to_string(), session.server_version.clone());
        let legacy = !session.profile.keyword_arguments;

        self.fields
            .get_or_fetch(key, || async {
                debug!(model = %model, "Fetching field metadata");
                // The positional-only form has no attributes slot.
                let args = if legacy {
                    vec![]
                } else {
                    let attributes = FIELD_ATTRIBUTES.iter().map(|a| RpcValue::from(*a)).collect();
                    vec![RpcValue::Array(vec![]), RpcValue::Array(attributes)]
                };
                let raw = self
                    .session
                    .execute(model, "fields_get", args, RpcStruct::new())
                    .await?;
                let RpcValue::Struct(fields) = raw else {
                    return Err(Fault::unexpected(format!("fields_get on '{model}' did not return a struct")));
                };
                let map: FieldMap = fields
                    .iter()
                    .filter_map(|(name, attrs)| Some((name.clone(), FieldInfo::from_rpc(attrs.as_struct()?))))
                    .collect();
                Ok(Arc::new(map))
            })
            .await
    }

    /// Installed models matching `filter`
    pub async fn model_list(&self, filter: &ModelFilter) -> Result<(Vec<ModelInfo>, CacheStatus), Fault> {
        let session = self.session.ensure_session().await?;
        let legacy = !session.profile.keyword_arguments;

        let (all, status) = self
            .models
            .get_or_fetch(session.server_version.clone(), || async {
                debug!("Fetching model list");
                let mut columns = vec![RpcValue::from("model"), RpcValue::from("name")];
                if !legacy {
                    columns.push(RpcValue::from("transient"));
                }
                let raw = self
                    .session
                    .execute(
                        "ir.model",
                        "search_read",
                        vec![RpcValue::Array(vec![]), RpcValue::Array(columns)],
                        RpcStruct::new(),
                    )
                    .await?;
                let rows = raw
                    .as_array()
                    .ok_or_else(|| Fault::unexpected("ir.model search_read did not return a list"))?;
                let mut models: Vec<ModelInfo> = rows
                    .iter()
                    .filter_map(RpcValue::as_struct)
                    .filter_map(|row| {
                        Some(ModelInfo {
                            model: row.get("model")?.as_str()?.to_string(),
                            name: row.get("name").and_then(RpcValue::as_str).unwrap_or_default().to_string(),
                            transient: row.get("transient").is_some_and(RpcValue::is_truthy),
                        })
                    })
                    .collect();
                models.sort_by(|a, b| a.model.cmp(&b.model));
                Ok::<_, Fault>(Arc::new(models))
            })
            .await?;

        Ok((all.iter().filter(|m| filter.matches(m)).cloned().collect(), status))
    }

    /// Whether `model` is installed, using the cached model list
    pub async fn has_model(&self, model: &str) -> Result<bool, Fault> {
        let everything = ModelFilter {
            include_transient: true,
            search: None,
        };
        let (models, _) = self.model_list(&everything).await?;
        Ok(models.iter().any(|m| m.model == model))
    }

    /// Drop every cached entry
    pub fn flush(&self) {
        self.fields.invalidate_all();
        self.models.invalidate_all();
    }

    /// Statistics of both caches
    #[must_use]
    pub fn stats(&self) -> MetadataStats {
        MetadataStats {
            fields: self.fields.stats(),
            models: self.models.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn attrs(pairs: &[(&str, RpcValue)]) -> RpcStruct {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn field_info_reads_relational_fields() {
        let info = FieldInfo::from_rpc(&attrs(&[
            ("type", "many2one".into()),
            ("string", "Customer".into()),
            ("required", RpcValue::Bool(true)),
            ("relation", "res.partner".into()),
            ("help", RpcValue::Bool(false)),
        ]));
        assert_eq!(info.field_type, "many2one");
        assert!(info.required);
        assert!(!info.readonly);
        assert_eq!(info.relation.as_deref(), Some("res.partner"));
        assert_eq!(info.help, None);
    }

    #[test]
    fn model_filter_hides_transient_and_searches_both_names() {
        let partner = ModelInfo {
            model: "res.partner".into(),
            name: "Contact".into(),
            transient: false,
        };
        let wizard = ModelInfo {
            model: "base.language.install".into(),
            name: "Language Install".into(),
            transient: true,
        };

        let default = ModelFilter::default();
        assert!(default.matches(&partner));
        assert!(!default.matches(&wizard));

        let search = ModelFilter {
            include_transient: true,
            search: Some("CONTACT".into()),
        };
        assert!(search.matches(&partner));
        assert!(!search.matches(&wizard));
    }
}
