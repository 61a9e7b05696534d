//! Schema-driven planning for managed resources.
//!
//! The host asks the provider what a resource will look like after apply.
//! [`plan`] answers from the resource schema alone: configured values win,
//! unset attributes take their static default, computed attributes keep the
//! prior value or become unknown, and any change to an attribute marked
//! requires-replace turns the update into a replacement.

use crate::schema::{Attribute, Block, Schema};
use crate::types::{unknown, AttributeChange, PlanResult};
use crate::validation::join_path;
use serde_json::{Map, Value};

/// Compute the planned state of a resource.
///
/// `prior_state` is `None` (or JSON null) when the resource is being
/// created. A null `proposed_state` plans a destroy. `config` is the
/// configuration as written; when the host sends none the proposed state is
/// planned from instead.
pub fn plan(
    schema: &Schema,
    prior_state: Option<&Value>,
    proposed_state: &Value,
    config: &Value,
) -> PlanResult {
    let prior = prior_state.filter(|v| !v.is_null());
    if proposed_state.is_null() {
        return plan_destroy(prior);
    }

    let source = if config.is_null() {
        proposed_state
    } else {
        config
    };

    let mut planner = Planner {
        creating: prior.is_none(),
        changes: Vec::new(),
        requires_replace: false,
    };
    let planned = planner.block(&schema.block, source, prior, "");

    if planner.changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, planner.changes, planner.requires_replace)
    }
}

fn plan_destroy(prior: Option<&Value>) -> PlanResult {
    let changes = prior
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    PlanResult::with_changes(Value::Null, changes, false)
}

struct Planner {
    creating: bool,
    changes: Vec<AttributeChange>,
    requires_replace: bool,
}

impl Planner {
    fn block(&mut self, block: &Block, config: &Value, prior: Option<&Value>, path: &str) -> Value {
        let mut planned = Map::new();

        for (name, attr) in &block.attributes {
            let attr_path = join_path(path, name);
            let config_value = non_null(config.get(name));
            let prior_value = non_null(prior.and_then(|p| p.get(name)));

            let value = plan_attribute(attr, config_value, prior_value);
            self.record(&attr_path, prior_value, &value, attr.requires_replace());
            planned.insert(name.clone(), value);
        }

        for (name, nested) in &block.blocks {
            let block_path = join_path(path, name);
            let prior_value = non_null(prior.and_then(|p| p.get(name)));

            let value = match non_null(config.get(name)) {
                Some(c) => self.block(&nested.block, c, prior_value, &block_path),
                None => {
                    if let Some(before) = prior_value {
                        self.changes
                            .push(AttributeChange::removed(block_path, before.clone()));
                    }
                    Value::Null
                }
            };
            planned.insert(name.clone(), value);
        }

        Value::Object(planned)
    }

    fn record(
        &mut self,
        path: &str,
        before: Option<&Value>,
        after: &Value,
        requires_replace: bool,
    ) {
        let changed = match (before, after) {
            (None, Value::Null) => false,
            (None, after) => {
                self.changes.push(AttributeChange::added(path, after.clone()));
                true
            }
            (Some(before), Value::Null) => {
                self.changes
                    .push(AttributeChange::removed(path, before.clone()));
                true
            }
            (Some(before), after) if before != after => {
                self.changes.push(AttributeChange::modified(
                    path,
                    before.clone(),
                    after.clone(),
                ));
                true
            }
            _ => false,
        };

        if changed && requires_replace && !self.creating {
            self.requires_replace = true;
        }
    }
}

fn plan_attribute(attr: &Attribute, config: Option<&Value>, prior: Option<&Value>) -> Value {
    if let Some(value) = config {
        if !attr.flags.is_computed_only() {
            return value.clone();
        }
    }
    if let Some(default) = &attr.default {
        return default.clone();
    }
    if attr.flags.computed {
        return match prior {
            Some(value) if attr.uses_state_for_unknown() || attr.flags.optional => value.clone(),
            _ => unknown(),
        };
    }
    Value::Null
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NestedBlock;
    use crate::types::is_unknown;
    use serde_json::json;

    fn app_schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "id",
                Attribute::computed_string().with_use_state_for_unknown(),
            )
            .with_attribute("name", Attribute::required_string().with_requires_replace())
            .with_attribute("piped_id", Attribute::required_string())
            .with_attribute(
                "description",
                Attribute::optional_computed_string().with_requires_replace(),
            )
            .with_block(
                "git",
                NestedBlock::required_single(
                    Block::new()
                        .with_attribute(
                            "path",
                            Attribute::required_string().with_requires_replace(),
                        )
                        .with_attribute(
                            "filename",
                            Attribute::optional_computed_string()
                                .with_default(json!("app.pipecd.yaml")),
                        ),
                ),
            )
    }

    fn prior() -> Value {
        json!({
            "id": "app-1",
            "name": "web",
            "piped_id": "piped-1",
            "description": "frontend",
            "git": {"path": "apps/web", "filename": "app.pipecd.yaml"}
        })
    }

    #[test]
    fn test_plan_create() {
        let config = json!({"name": "web", "piped_id": "piped-1", "git": {"path": "apps/web"}});
        let result = plan(&app_schema(), None, &config, &config);

        assert!(!result.requires_replace);
        assert!(is_unknown(&result.planned_state["id"]));
        assert!(is_unknown(&result.planned_state["description"]));
        assert_eq!(result.planned_state["git"]["filename"], "app.pipecd.yaml");
        assert!(result
            .changes
            .iter()
            .any(|c| c.path == "git.path" && c.after == Some(json!("apps/web"))));
    }

    #[test]
    fn test_plan_no_change_keeps_computed_values() {
        let config = json!({"name": "web", "piped_id": "piped-1", "git": {"path": "apps/web"}});
        let result = plan(&app_schema(), Some(&prior()), &config, &config);

        assert!(result.changes.is_empty());
        assert!(!result.requires_replace);
        assert_eq!(result.planned_state, prior());
    }

    #[test]
    fn test_plan_in_place_update() {
        let config = json!({"name": "web", "piped_id": "piped-2", "git": {"path": "apps/web"}});
        let result = plan(&app_schema(), Some(&prior()), &config, &config);

        assert!(!result.requires_replace);
        assert_eq!(
            result.changes,
            vec![AttributeChange::modified("piped_id", json!("piped-1"), json!("piped-2"))]
        );
        assert_eq!(result.planned_state["id"], "app-1");
    }

    #[test]
    fn test_plan_replacement_on_nested_change() {
        let config = json!({"name": "web", "piped_id": "piped-1", "git": {"path": "apps/api"}});
        let result = plan(&app_schema(), Some(&prior()), &config, &config);

        assert!(result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "git.path");
    }

    #[test]
    fn test_plan_destroy() {
        let result = plan(&app_schema(), Some(&prior()), &Value::Null, &Value::Null);

        assert!(result.planned_state.is_null());
        assert!(!result.requires_replace);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
        assert!(result.changes.iter().any(|c| c.path == "name"));
    }

    #[test]
    fn test_plan_falls_back_to_proposed_state() {
        let proposed = json!({"name": "web", "piped_id": "piped-1", "git": {"path": "apps/web"}});
        let result = plan(&app_schema(), Some(&prior()), &proposed, &Value::Null);
        assert!(result.changes.is_empty());
    }

    #[test]
    fn test_computed_only_ignores_config() {
        let schema = Schema::v0().with_attribute("api_key", Attribute::computed_string());
        let config = json!({"api_key": "user-supplied"});
        let result = plan(&schema, None, &config, &config);
        assert!(is_unknown(&result.planned_state["api_key"]));
    }
}
