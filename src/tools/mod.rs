//! Tool registry
//!
//! Descriptors are built once at startup, checked against the schema
//! invariant and then shared read-only. Gates decide which tools are listed
//! and callable; a gated-off tool is still known, so calling it yields a
//! specific "disabled" fault instead of "unknown tool".

mod builtin;

use serde_json::{Map, Value};

use crate::protocol::{Tool, ToolAnnotations};
use crate::schema::{ValidationFault, check_schema, domain::validate_domain, validate_arguments};
use crate::{Error, Result};

/// Schema keyword marking a property as an Odoo domain filter
pub const DOMAIN_KEYWORD: &str = "x-domain";

/// Curated backend operation behind a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `search_read` with paging
    SearchRecords,
    /// `search_count`
    SearchCount,
    /// `read` by ids
    GetRecord,
    /// `create`
    CreateRecord,
    /// `write`
    UpdateRecord,
    /// `unlink`
    DeleteRecord,
    /// Cached `ir.model` list
    ListModels,
    /// Cached `fields_get`
    GetModelFields,
    /// Model summary from cached metadata
    ModelInfo,
    /// Report service rendering
    RenderReport,
    /// `common.version`
    GetServerInfo,
    /// Gateway status, no backend call
    ServerStatus,
    /// Metadata cache statistics and flush
    CacheStats,
    /// `db.list`
    ListDatabases,
}

/// What a tool call executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolTarget {
    /// A curated operation
    Curated(Operation),
    /// Caller-specified model method
    Passthrough,
}

/// Configuration switch a tool depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Always available
    Always,
    /// `tools.passthrough.enabled`
    Passthrough,
    /// `tools.database_admin`
    DatabaseAdmin,
}

impl Gate {
    /// Configuration key that opens the gate
    #[must_use]
    pub const fn setting(self) -> &'static str {
        match self {
            Self::Always => "",
            Self::Passthrough => "tools.passthrough.enabled",
            Self::DatabaseAdmin => "tools.database_admin",
        }
    }
}

/// Which gates are open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateSettings {
    /// Expose `execute_kw`
    pub passthrough: bool,
    /// Expose database administration tools
    pub database_admin: bool,
}

impl GateSettings {
    /// Whether `gate` is open
    #[must_use]
    pub const fn allows(self, gate: Gate) -> bool {
        match gate {
            Gate::Always => true,
            Gate::Passthrough => self.passthrough,
            Gate::DatabaseAdmin => self.database_admin,
        }
    }
}

/// A registered tool
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: &'static str,
    /// Human-readable title
    pub title: &'static str,
    /// Description shown to the calling model
    pub description: &'static str,
    /// JSON Schema of the arguments
    pub input_schema: Value,
    /// What the call executes
    pub target: ToolTarget,
    /// Configuration gate
    pub gate: Gate,
    /// Behavior hints
    pub annotations: ToolAnnotations,
}

impl ToolDescriptor {
    /// Properties flagged as domain filters
    pub fn domain_params(&self) -> impl Iterator<Item = &str> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|props| props.iter())
            .filter(|(_, schema)| schema.get(DOMAIN_KEYWORD).and_then(Value::as_bool) == Some(true))
            .map(|(name, _)| name.as_str())
    }

    /// Validate arguments against the schema, then every domain parameter.
    /// Returns the coerced arguments.
    pub fn validate(&self, arguments: &Value) -> std::result::Result<Map<String, Value>, ValidationFault> {
        let coerced = validate_arguments(arguments, &self.input_schema)?;

        let violations: Vec<_> = self
            .domain_params()
            .filter_map(|param| coerced.get(param).map(|value| validate_domain(param, value)))
            .flatten()
            .collect();

        if violations.is_empty() {
            Ok(coerced)
        } else {
            Err(ValidationFault::domain(violations))
        }
    }

    /// MCP `tools/list` entry
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.to_string(),
            title: Some(self.title.to_string()),
            description: Some(self.description.to_string()),
            input_schema: self.input_schema.clone(),
            annotations: Some(self.annotations.clone()),
        }
    }
}

/// The set of tools this gateway serves
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    gates: GateSettings,
}

impl ToolRegistry {
    /// The built-in tool set
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] if a tool schema breaks the array/items
    /// invariant or a name is registered twice.
    pub fn builtin(gates: GateSettings) -> Result<Self> {
        Self::from_descriptors(builtin::descriptors(), gates)
    }

    /// Build a registry from arbitrary descriptors
    ///
    /// # Errors
    ///
    /// Same as [`ToolRegistry::builtin`].
    pub fn from_descriptors(tools: Vec<ToolDescriptor>, gates: GateSettings) -> Result<Self> {
        let mut problems = Vec::new();
        for (i, tool) in tools.iter().enumerate() {
            for pointer in check_schema(&tool.input_schema) {
                problems.push(format!(
                    "{}: {pointer} is array-typed but has no 'items' schema",
                    tool.name
                ));
            }
            if tools[..i].iter().any(|other| other.name == tool.name) {
                problems.push(format!("{}: registered more than once", tool.name));
            }
        }

        if problems.is_empty() {
            Ok(Self { tools, gates })
        } else {
            Err(Error::Registry(problems.join("; ")))
        }
    }

    /// Look up a tool by name, regardless of its gate
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Whether the tool's gate is open
    #[must_use]
    pub fn is_enabled(&self, tool: &ToolDescriptor) -> bool {
        self.gates.allows(tool.gate)
    }

    /// Gate settings in effect
    #[must_use]
    pub fn gates(&self) -> GateSettings {
        self.gates
    }

    /// Every registered tool, including gated-off ones
    #[must_use]
    pub fn all(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// `tools/list` payload: enabled tools only
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|t| self.is_enabled(t))
            .map(ToolDescriptor::to_tool)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry(gates: GateSettings) -> ToolRegistry {
        ToolRegistry::builtin(gates).unwrap()
    }

    #[test]
    fn every_builtin_schema_satisfies_the_items_invariant() {
        let registry = registry(GateSettings::default());
        for tool in registry.all() {
            assert_eq!(check_schema(&tool.input_schema), Vec::<String>::new(), "{}", tool.name);
        }
    }

    #[test]
    fn array_without_items_fails_registry_build() {
        let mut tools = builtin::descriptors();
        tools[0].input_schema = json!({
            "type": "object",
            "properties": {"fields": {"type": "array"}}
        });
        let err = ToolRegistry::from_descriptors(tools, GateSettings::default()).unwrap_err();
        assert!(err.to_string().contains("#/properties/fields"));
    }

    #[test]
    fn duplicate_names_fail_registry_build() {
        let mut tools = builtin::descriptors();
        let copy = tools[0].clone();
        tools.push(copy);
        assert!(ToolRegistry::from_descriptors(tools, GateSettings::default()).is_err());
    }

    #[test]
    fn gated_tools_are_hidden_until_enabled() {
        let closed = registry(GateSettings::default());
        let names: Vec<String> = closed.list().into_iter().map(|t| t.name).collect();
        assert!(!names.contains(&"execute_kw".to_string()));
        assert!(!names.contains(&"list_databases".to_string()));
        assert!(closed.get("execute_kw").is_some());

        let open = registry(GateSettings {
            passthrough: true,
            database_admin: true,
        });
        assert_eq!(open.list().len(), open.all().len());
    }

    #[test]
    fn search_records_flags_domain_parameter() {
        let registry = registry(GateSettings::default());
        let tool = registry.get("search_records").unwrap();
        assert_eq!(tool.domain_params().collect::<Vec<_>>(), vec!["domain"]);
    }

    #[test]
    fn malformed_domain_is_a_domain_violation() {
        let registry = registry(GateSettings::default());
        let tool = registry.get("search_records").unwrap();
        let fault = tool
            .validate(&json!({"model": "res.partner", "domain": [["name", "=", "x", "extra"]]}))
            .unwrap_err();
        assert_eq!(fault.kind, ValidationKind::Domain);
        assert_eq!(fault.violations[0].param, "domain[0]");
    }

    #[test]
    fn json_encoded_domain_is_parsed_before_checking() {
        let registry = registry(GateSettings::default());
        let tool = registry.get("search_count").unwrap();
        let args = tool
            .validate(&json!({"model": "res.partner", "domain": "[[\"is_company\", \"=\", true]]"}))
            .unwrap();
        assert_eq!(args["domain"], json!([["is_company", "=", true]]));
    }

    #[test]
    fn unknown_parameter_is_a_shape_violation() {
        let registry = registry(GateSettings::default());
        let tool = registry.get("get_record").unwrap();
        let fault = tool
            .validate(&json!({"model": "res.partner", "ids": 1, "colour": "red"}))
            .unwrap_err();
        assert_eq!(fault.kind, ValidationKind::Shape);
    }
}
