//! Built-in tool descriptors

use serde_json::{Value, json};

use super::{Gate, Operation, ToolDescriptor, ToolTarget};
use crate::protocol::ToolAnnotations;

/// Largest page `search_records` returns
pub const MAX_LIMIT: u64 = 1000;

fn model_param() -> Value {
    json!({
        "type": "string",
        "minLength": 1,
        "description": "Technical model name, e.g. 'res.partner' or 'sale.order'"
    })
}

fn domain_param() -> Value {
    json!({
        "type": "array",
        "items": {},
        "x-domain": true,
        "description": "Odoo domain: a list of [field, operator, value] conditions, optionally \
                        combined with '&', '|' and '!' in prefix notation. Empty list matches all records."
    })
}

fn fields_param() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": "Field names to return; omit for the model's default fields"
    })
}

fn ids_param() -> Value {
    json!({
        "type": ["integer", "array"],
        "items": {"type": "integer"},
        "description": "A record id or a list of record ids"
    })
}

fn context_param() -> Value {
    json!({
        "type": "object",
        "description": "Extra Odoo context keys, e.g. {\"lang\": \"fr_FR\"}"
    })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn read_only() -> ToolAnnotations {
    ToolAnnotations {
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(false),
        ..ToolAnnotations::default()
    }
}

fn writing(destructive: bool, idempotent: bool) -> ToolAnnotations {
    ToolAnnotations {
        read_only_hint: Some(false),
        destructive_hint: Some(destructive),
        idempotent_hint: Some(idempotent),
        open_world_hint: Some(false),
        ..ToolAnnotations::default()
    }
}

fn curated(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    input_schema: Value,
    operation: Operation,
    annotations: ToolAnnotations,
) -> ToolDescriptor {
    ToolDescriptor {
        name,
        title,
        description,
        input_schema,
        target: ToolTarget::Curated(operation),
        gate: Gate::Always,
        annotations,
    }
}

#[allow(clippy::too_many_lines)]
pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    let mut tools = vec![
        curated(
            "search_records",
            "Search records",
            "Search records of a model with a domain filter and return the requested fields. \
             Use get_model_fields first if you are unsure of the field names.",
            object_schema(
                json!({
                    "model": model_param(),
                    "domain": domain_param(),
                    "fields": fields_param(),
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_LIMIT,
                        "description": "Maximum number of records (default 100)"
                    },
                    "offset": {"type": "integer", "minimum": 0, "description": "Records to skip"},
                    "order": {"type": "string", "description": "Sort order, e.g. 'name asc, id desc'"},
                    "context": context_param()
                }),
                &["model"],
            ),
            Operation::SearchRecords,
            read_only(),
        ),
        curated(
            "search_count",
            "Count records",
            "Count the records of a model matching a domain filter.",
            object_schema(
                json!({
                    "model": model_param(),
                    "domain": domain_param(),
                    "context": context_param()
                }),
                &["model"],
            ),
            Operation::SearchCount,
            read_only(),
        ),
        curated(
            "get_record",
            "Read records",
            "Read records by id. A single id returns one record, a list returns a list.",
            object_schema(
                json!({
                    "model": model_param(),
                    "ids": ids_param(),
                    "fields": fields_param(),
                    "context": context_param()
                }),
                &["model", "ids"],
            ),
            Operation::GetRecord,
            read_only(),
        ),
        curated(
            "create_record",
            "Create records",
            "Create one record from a field/value object, or several from a list of objects. \
             Returns the new id (or ids).",
            object_schema(
                json!({
                    "model": model_param(),
                    "values": {
                        "type": ["object", "array"],
                        "items": {"type": "object"},
                        "description": "Field values of the new record, or a list of them"
                    },
                    "context": context_param()
                }),
                &["model", "values"],
            ),
            Operation::CreateRecord,
            writing(false, false),
        ),
        curated(
            "update_record",
            "Update records",
            "Write the same field values to one or more records.",
            object_schema(
                json!({
                    "model": model_param(),
                    "ids": ids_param(),
                    "values": {"type": "object", "description": "Field values to write"},
                    "context": context_param()
                }),
                &["model", "ids", "values"],
            ),
            Operation::UpdateRecord,
            writing(false, true),
        ),
        curated(
            "delete_record",
            "Delete records",
            "Permanently delete one or more records.",
            object_schema(
                json!({
                    "model": model_param(),
                    "ids": ids_param(),
                    "context": context_param()
                }),
                &["model", "ids"],
            ),
            Operation::DeleteRecord,
            writing(true, true),
        ),
        curated(
            "list_models",
            "List models",
            "List installed models by technical and display name.",
            object_schema(
                json!({
                    "transient": {
                        "type": "boolean",
                        "description": "Include transient (wizard) models, default false"
                    },
                    "search": {
                        "type": "string",
                        "description": "Case-insensitive filter on technical or display name"
                    }
                }),
                &[],
            ),
            Operation::ListModels,
            read_only(),
        ),
        curated(
            "get_model_fields",
            "Model fields",
            "Describe the fields of a model: type, label, required, readonly and relation.",
            object_schema(
                json!({
                    "model": model_param(),
                    "fields": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Only describe these fields"
                    }
                }),
                &["model"],
            ),
            Operation::GetModelFields,
            read_only(),
        ),
        curated(
            "model_info",
            "Model summary",
            "Summarize a model: display name, field count, required and relational fields, \
             and whether it has any records.",
            object_schema(json!({"model": model_param()}), &["model"]),
            Operation::ModelInfo,
            read_only(),
        ),
        curated(
            "render_report",
            "Render report",
            "Render a report (e.g. 'sale.report_saleorder') for the given records. \
             Returns the base64 document and its format. Requires Odoo 10 or older.",
            object_schema(
                json!({
                    "report_name": {"type": "string", "minLength": 1, "description": "Technical report name"},
                    "docids": ids_param(),
                    "data": {"type": "object", "description": "Report data options"},
                    "context": context_param()
                }),
                &["report_name", "docids"],
            ),
            Operation::RenderReport,
            read_only(),
        ),
        curated(
            "get_server_info",
            "Server info",
            "Report the Odoo server version and the version profile the gateway negotiated.",
            object_schema(json!({}), &[]),
            Operation::GetServerInfo,
            read_only(),
        ),
        curated(
            "server_status",
            "Gateway status",
            "Report gateway uptime, session state, enabled tool gates and cache statistics.",
            object_schema(json!({}), &[]),
            Operation::ServerStatus,
            read_only(),
        ),
        curated(
            "cache_stats",
            "Metadata cache",
            "Show metadata cache statistics, or clear the cache after a module upgrade.",
            object_schema(
                json!({
                    "action": {
                        "type": "string",
                        "enum": ["stats", "clear"],
                        "description": "'stats' (default) or 'clear'"
                    }
                }),
                &[],
            ),
            Operation::CacheStats,
            writing(false, true),
        ),
    ];

    let mut list_databases = curated(
        "list_databases",
        "List databases",
        "List the databases on the Odoo server.",
        object_schema(json!({}), &[]),
        Operation::ListDatabases,
        read_only(),
    );
    list_databases.gate = Gate::DatabaseAdmin;
    tools.push(list_databases);

    tools.push(ToolDescriptor {
        name: "execute_kw",
        title: "Call model method",
        description: "Call any public model method with positional and keyword arguments. \
                      Prefer the curated tools; this one is for methods they do not cover.",
        input_schema: object_schema(
            json!({
                "model": model_param(),
                "method": {"type": "string", "minLength": 1, "description": "Public method name, e.g. 'action_confirm'"},
                "args": {"type": "array", "items": {}, "description": "Positional arguments"},
                "kwargs": {"type": "object", "description": "Keyword arguments"},
                "context": context_param()
            }),
            &["model", "method"],
        ),
        target: ToolTarget::Passthrough,
        gate: Gate::Passthrough,
        annotations: writing(true, false),
    });

    tools
}
