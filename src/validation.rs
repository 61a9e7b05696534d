//! Schema validation helpers.
//!
//! Validates a configuration `serde_json::Value` against a [`Schema`] before
//! anything is sent to the control plane. Besides presence and type checks it
//! runs the string validators declared on each attribute and warns about
//! deprecated attributes that are set.
//!
//! Values the host does not know yet (see [`crate::types::UNKNOWN_VALUE`])
//! pass validation; they are checked again once they are known.
//!
//! # Example
//!
//! ```
//! use pipecd_provider::schema::{Attribute, Schema};
//! use pipecd_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("kind", Attribute::required_string().with_one_of(["ECS", "LAMBDA"]));
//!
//! let diagnostics = validate(&schema, &json!({"name": "web", "kind": "ECS"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "web", "kind": "VM"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("kind"));
//! ```

use crate::schema::{has_errors, Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use crate::types::is_unknown;
use serde_json::Value;
use std::collections::BTreeMap;

/// Validate a JSON value against a schema.
///
/// Returns every diagnostic found, warnings included. A value is accepted
/// when none of them is an error.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, failing when any error was found.
///
/// On success the warnings (possibly none) are returned so callers can pass
/// them on to the host.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<Vec<Diagnostic>, Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if has_errors(&diagnostics) {
        Err(diagnostics)
    } else {
        Ok(diagnostics)
    }
}

/// Check if a JSON value is accepted by a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    !has_errors(&validate(schema, value))
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diag = Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diag
            } else {
                diag.with_attribute(path)
            });
            return;
        }
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Computed-only attributes are set by the provider.
    if attr.flags.is_computed_only() {
        return;
    }

    let value = match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
            return;
        }
        Some(v) => v,
    };

    if let Some(message) = &attr.deprecation_message {
        diagnostics.push(
            Diagnostic::warning(format!("Attribute '{}' is deprecated", path))
                .with_detail(message.clone())
                .with_attribute(path),
        );
    }

    if is_unknown(value) {
        return;
    }

    validate_attribute_type(&attr.attr_type, value, path, diagnostics);

    if let Some(s) = value.as_str() {
        for validator in &attr.validators {
            if let Err(detail) = validator.check(s) {
                diagnostics.push(
                    Diagnostic::error("Invalid Attribute Value Match")
                        .with_detail(detail)
                        .with_attribute(path),
                );
            }
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if is_unknown(value) {
        return;
    }

    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        }
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        }
        AttributeType::Object(attrs) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(attrs, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        }
    }
}

fn validate_object_type(
    attrs: &BTreeMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Object members carry no flags, so presence isn't enforced.
    for (name, attr_type) in attrs {
        if let Some(value) = obj.get(name) {
            validate_attribute_type(attr_type, value, &join_path(path, name), diagnostics);
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => validate_block(&nested.block, v, path, diagnostics),
    }
}

/// Join an attribute name onto a dotted path.
pub(crate) fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        ))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeFlags, DiagnosticSeverity};
    use crate::types::UNKNOWN_VALUE;
    use serde_json::json;

    fn git_schema() -> Schema {
        Schema::v0().with_block(
            "git",
            NestedBlock::required_single(
                Block::new()
                    .with_attribute("repository_id", Attribute::required_string())
                    .with_attribute("path", Attribute::required_string())
                    .with_attribute("filename", Attribute::optional_computed_string()),
            ),
        )
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "test"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("host", Attribute::optional_string());

        assert!(validate(&schema, &json!({"host": "pipecd.example.com:443"})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"host": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"host": 443})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"id": 123})).is_empty());
    }

    #[test]
    fn test_validate_one_of() {
        let schema = Schema::v0().with_attribute(
            "kind",
            Attribute::required_string().with_one_of(["KUBERNETES", "CLOUDRUN"]),
        );

        assert!(validate(&schema, &json!({"kind": "CLOUDRUN"})).is_empty());

        let diagnostics = validate(&schema, &json!({"kind": "cloudrun"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Invalid Attribute Value Match");
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("kind"));
    }

    #[test]
    fn test_unknown_values_are_deferred() {
        let schema = Schema::v0()
            .with_attribute(
                "kind",
                Attribute::required_string().with_one_of(["KUBERNETES"]),
            )
            .with_attribute(
                "plugins",
                Attribute::new(
                    AttributeType::map(AttributeType::list(AttributeType::String)),
                    AttributeFlags::optional(),
                ),
            );

        let diagnostics = validate(
            &schema,
            &json!({"kind": UNKNOWN_VALUE, "plugins": UNKNOWN_VALUE}),
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_deprecated_attribute_warns() {
        let schema = Schema::v0().with_attribute(
            "platform_provider",
            Attribute::optional_string().with_deprecation_message("Use `plugins` instead."),
        );

        assert!(validate(&schema, &json!({})).is_empty());

        let diagnostics = validate(&schema, &json!({"platform_provider": "kube-default"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(diagnostics[0].detail.as_deref(), Some("Use `plugins` instead."));
        assert!(is_valid(&schema, &json!({"platform_provider": "kube-default"})));

        let warnings = validate_result(&schema, &json!({"platform_provider": "x"})).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_validate_map_of_lists() {
        let schema = Schema::v0().with_attribute(
            "plugins",
            Attribute::new(
                AttributeType::map(AttributeType::list(AttributeType::String)),
                AttributeFlags::optional(),
            ),
        );

        assert!(validate(&schema, &json!({"plugins": {"kubernetes": ["cluster-1"]}})).is_empty());

        let diagnostics = validate(&schema, &json!({"plugins": {"kubernetes": ["a", 1]}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("plugins.kubernetes.1".to_string())
        );

        let diagnostics = validate(&schema, &json!({"plugins": ["kubernetes"]}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_validate_nested_block() {
        let schema = git_schema();

        let diagnostics = validate(
            &schema,
            &json!({"git": {"repository_id": "repo", "path": "apps/web"}}),
        );
        assert!(diagnostics.is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Missing required block"));

        let diagnostics = validate(&schema, &json!({"git": {"repository_id": "repo"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("git.path".to_string()));

        let diagnostics = validate(&schema, &json!({"git": "repo/apps/web"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("git".to_string()));
    }

    #[test]
    fn test_validate_object_type() {
        let schema = Schema::v0().with_attribute(
            "git",
            Attribute::new(
                AttributeType::object([
                    ("remote", AttributeType::String),
                    ("branch", AttributeType::String),
                ]),
                AttributeFlags::optional(),
            ),
        );

        assert!(validate(
            &schema,
            &json!({"git": {"remote": "git@github.com:org/repo.git"}})
        )
        .is_empty());

        let diagnostics = validate(&schema, &json!({"git": {"branch": 1}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("git.branch".to_string()));
    }

    #[test]
    fn test_validate_multiple_errors() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("piped_id", Attribute::required_string());

        let diagnostics = validate(&schema, &json!({"name": 1}));
        assert_eq!(diagnostics.len(), 2);
        assert!(validate_result(&schema, &json!({"name": 1})).is_err());
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
        assert!(diagnostics[0].attribute.is_none());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "git"), "git");
        assert_eq!(join_path("git", "path"), "git.path");
    }
}
