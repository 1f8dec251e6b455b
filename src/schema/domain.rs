//! Odoo domain filter validation
//!
//! A domain is a list in prefix (Polish) notation whose elements are either
//! logical operators (`&`, `|`, `!`) or conditions `[field, operator, value]`.
//! Consecutive terms are implicitly joined with `&`, as the backend does.

use serde_json::Value;

use super::{ValidationViolation, json_type_name};

/// Operators accepted inside a condition
pub const CONDITION_OPERATORS: &[&str] = &[
    "=", "!=", "<>", ">", ">=", "<", "<=", "=?", "=like", "like", "not like", "ilike",
    "not ilike", "=ilike", "in", "not in", "child_of", "parent_of", "any", "not any",
];

/// Operators whose value must be a list
const LIST_OPERATORS: &[&str] = &["in", "not in", "any", "not any"];

/// Validate the structure of `domain`, reporting violations under `param`.
#[must_use]
pub fn validate_domain(param: &str, domain: &Value) -> Vec<ValidationViolation> {
    let Some(elements) = domain.as_array() else {
        return vec![ValidationViolation::new(
            param,
            format!(
                "a domain must be a list of conditions, got {}",
                json_type_name(domain)
            ),
        )];
    };

    let mut violations = Vec::new();
    for (index, element) in elements.iter().enumerate() {
        if let Err(message) = check_element(element) {
            violations.push(ValidationViolation::new(
                format!("{param}[{index}]"),
                message,
            ));
        }
    }

    // Arity only means something once every element is well-formed.
    if violations.is_empty() {
        if let Err((index, message)) = check_arity(elements) {
            violations.push(ValidationViolation::new(format!("{param}[{index}]"), message));
        }
    }

    violations
}

/// Top-level field names referenced by the domain's conditions.
///
/// For a path such as `partner_id.country_id` only `partner_id` is returned,
/// since that is the field that lives on the queried model.
#[must_use]
pub fn referenced_fields(domain: &Value) -> Vec<&str> {
    domain
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|element| element.as_array()?.first()?.as_str())
                .filter_map(|path| path.split('.').next())
                .collect()
        })
        .unwrap_or_default()
}

fn check_element(element: &Value) -> Result<(), String> {
    match element {
        Value::String(op) if is_logical(op) => Ok(()),
        Value::String(other) => Err(format!(
            "'{other}' is not a logical operator, use '&', '|' or '!', or a [field, operator, value] condition"
        )),
        Value::Array(parts) => check_condition(parts),
        other => Err(format!(
            "expected a [field, operator, value] condition or a logical operator, got {}",
            json_type_name(other)
        )),
    }
}

fn check_condition(parts: &[Value]) -> Result<(), String> {
    if parts.len() != 3 {
        return Err(format!(
            "a condition must have exactly 3 elements [field, operator, value], got {}",
            parts.len()
        ));
    }

    match &parts[0] {
        Value::String(field) if !field.trim().is_empty() => {}
        // Constant leaves: [1, '=', 1] is always true, [0, '=', 1] always false.
        Value::Number(n) if matches!(n.as_i64(), Some(0 | 1)) => {}
        Value::String(_) => return Err("the field name must not be empty".to_string()),
        other => {
            return Err(format!(
                "the field name must be a string, got {}",
                json_type_name(other)
            ));
        }
    }

    let Some(operator) = parts[1].as_str() else {
        return Err(format!(
            "the operator must be a string, got {}",
            json_type_name(&parts[1])
        ));
    };
    let operator = operator.to_lowercase();
    if !CONDITION_OPERATORS.contains(&operator.as_str()) {
        return Err(format!(
            "unknown operator '{operator}', valid operators are: {}",
            CONDITION_OPERATORS.join(", ")
        ));
    }

    if LIST_OPERATORS.contains(&operator.as_str()) && !parts[2].is_array() {
        return Err(format!(
            "operator '{operator}' needs a list value, got {}",
            json_type_name(&parts[2])
        ));
    }

    Ok(())
}

fn is_logical(op: &str) -> bool {
    matches!(op, "&" | "|" | "!")
}

/// Walk the domain right to left, counting complete sub-expressions.
/// Returns the index of the first operator without enough operands.
fn check_arity(elements: &[Value]) -> Result<(), (usize, String)> {
    let mut available = 0usize;
    for (index, element) in elements.iter().enumerate().rev() {
        match element.as_str() {
            Some("!") => {
                if available < 1 {
                    return Err((index, "operator '!' needs one operand after it".to_string()));
                }
            }
            Some(op @ ("&" | "|")) => {
                if available < 2 {
                    return Err((index, format!("operator '{op}' needs two operands after it")));
                }
                available -= 1;
            }
            _ => available += 1,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params_of(domain: &Value) -> Vec<String> {
        validate_domain("domain", domain)
            .into_iter()
            .map(|v| v.param)
            .collect()
    }

    #[test]
    fn accepts_plain_and_prefix_domains() {
        assert!(validate_domain("domain", &json!([])).is_empty());
        assert!(validate_domain("domain", &json!([["is_company", "=", true]])).is_empty());
        assert!(
            validate_domain(
                "domain",
                &json!(["|", ["name", "ilike", "acme"], "!", ["id", "in", [1, 2]], ["active", "=", true]])
            )
            .is_empty()
        );
        assert!(validate_domain("domain", &json!([[1, "=", 1]])).is_empty());
        assert!(validate_domain("domain", &json!([["partner_id.name", "NOT ILIKE", "x"]])).is_empty());
    }

    #[test]
    fn four_element_condition_is_rejected_with_index() {
        let violations = validate_domain("domain", &json!([["field", "=", "x", "extra"]]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].param, "domain[0]");
        assert!(violations[0].message.contains("exactly 3 elements"));
    }

    #[test]
    fn flat_condition_is_rejected() {
        // A single condition not wrapped in a list
        assert_eq!(params_of(&json!(["name", "=", "x"])), vec!["domain[0]", "domain[1]", "domain[2]"]);
    }

    #[test]
    fn bad_fields_and_operators() {
        assert_eq!(params_of(&json!([["", "=", 1]])), vec!["domain[0]"]);
        assert_eq!(params_of(&json!([[5, "=", 1]])), vec!["domain[0]"]);
        assert_eq!(params_of(&json!([["name", "==", 1]])), vec!["domain[0]"]);
        assert_eq!(params_of(&json!([["id", "in", 3]])), vec!["domain[0]"]);
        assert_eq!(params_of(&json!([["name", 1, "x"]])), vec!["domain[0]"]);
    }

    #[test]
    fn dangling_operators_fail_arity() {
        let violations = validate_domain("domain", &json!(["|", ["name", "=", "a"]]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].param, "domain[0]");
        assert!(violations[0].message.contains("two operands"));

        assert_eq!(params_of(&json!([["a", "=", 1], "!"])), vec!["domain[1]"]);
    }

    #[test]
    fn non_list_domain_is_rejected() {
        assert_eq!(params_of(&json!({"name": "x"})), vec!["domain"]);
    }

    #[test]
    fn referenced_fields_uses_first_path_segment() {
        let domain = json!(["|", ["partner_id.country_id", "=", 1], ["name", "ilike", "x"], [1, "=", 1]]);
        assert_eq!(referenced_fields(&domain), vec!["partner_id", "name"]);
    }
}
