//! The `pipecd_piped` resource.
//!
//! A piped cannot be deleted from the control plane. Destroying the resource
//! disables the piped and drops it from state, with a warning saying so.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::known;
use crate::api::apiservice::{
    DisablePipedRequest, GetPipedRequest, RegisterPipedRequest, UpdatePipedRequest,
};
use crate::api::ApiClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::types::UNKNOWN_VALUE;

/// Type name of the resource.
pub const TYPE_NAME: &str = "pipecd_piped";

/// Schema of the resource.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("PipeCD piped resource.")
        .with_attribute(
            "id",
            Attribute::computed_string()
                .with_description("The ID of the piped.")
                .with_use_state_for_unknown(),
        )
        .with_attribute(
            "name",
            Attribute::required_string().with_description("The piped name."),
        )
        .with_attribute(
            "description",
            Attribute::optional_computed_string().with_description("The description of the piped."),
        )
        .with_attribute(
            "api_key",
            Attribute::computed_string()
                .sensitive()
                .with_description("The API key of the piped.")
                .with_use_state_for_unknown(),
        )
}

/// State of a `pipecd_piped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipedModel {
    /// Server-assigned id.
    #[serde(default)]
    pub id: Option<String>,
    /// Piped name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Key issued at registration. The control plane never returns it again.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Synchronizes `pipecd_piped` resources with the control plane.
pub struct PipedResource {
    client: Arc<dyn ApiClient>,
}

impl PipedResource {
    /// Create a synchronizer using `client`.
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    /// Register the piped and capture its one-time key.
    pub async fn create(&self, planned_state: Value) -> Result<Value, ProviderError> {
        let plan: PipedModel = serde_json::from_value(planned_state)?;
        let desc = known(&plan.description).to_string();

        info!(name = %plan.name, "Registering piped");
        let registered = self
            .client
            .register_piped(RegisterPipedRequest {
                name: plan.name.clone(),
                desc: desc.clone(),
            })
            .await
            .map_err(|e| {
                ProviderError::remote("Error creating piped", "Could not create piped", e)
            })?;

        let state = PipedModel {
            id: Some(registered.id),
            name: plan.name,
            description: Some(desc),
            api_key: Some(registered.key),
        };
        Ok(serde_json::to_value(state)?)
    }

    /// Stored state is returned unchanged; drift is not refreshed.
    pub async fn read(&self, current_state: Value) -> Result<Value, ProviderError> {
        let state: PipedModel = serde_json::from_value(current_state)?;
        Ok(serde_json::to_value(state)?)
    }

    /// Update name and description. The id and key never change.
    pub async fn update(
        &self,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let prior: PipedModel = serde_json::from_value(prior_state)?;
        let plan: PipedModel = serde_json::from_value(planned_state)?;
        let id = prior
            .id
            .clone()
            .ok_or_else(|| ProviderError::Validation("piped has no id".to_string()))?;
        let desc = match plan.description.as_deref() {
            Some(d) if d != UNKNOWN_VALUE => d.to_string(),
            _ => prior.description.clone().unwrap_or_default(),
        };

        info!(piped_id = %id, "Updating piped");
        self.client
            .update_piped(UpdatePipedRequest {
                piped_id: id.clone(),
                name: plan.name.clone(),
                desc: desc.clone(),
            })
            .await
            .map_err(|e| {
                ProviderError::remote("Error updating piped", "Could not update piped", e)
            })?;

        let state = PipedModel {
            id: Some(id),
            name: plan.name,
            description: Some(desc),
            api_key: prior.api_key,
        };
        Ok(serde_json::to_value(state)?)
    }

    /// Disable the piped. On success it leaves state but stays on the
    /// control plane, which the returned warning reports.
    pub async fn delete(&self, current_state: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let state: PipedModel = serde_json::from_value(current_state)?;
        let id = state.id.unwrap_or_default();

        warn!(
            piped_id = %id,
            "PipeCD piped resources cannot be deleted; the piped will be disabled and removed from state but will still be present on the PipeCD control plane"
        );
        self.client
            .disable_piped(DisablePipedRequest {
                piped_id: id.clone(),
            })
            .await
            .map_err(|e| {
                ProviderError::remote(
                    "Error Disabling PipeCD piped",
                    "Could not disable piped",
                    e,
                )
            })?;

        Ok(vec![Diagnostic::warning("PipeCD piped disabled, not deleted")
            .with_detail(format!(
                "PipeCD piped resources cannot be deleted. The piped {} has been disabled and removed from state, but is still present on the PipeCD control plane.",
                id
            ))])
    }

    /// Build state for an existing piped. Its key cannot be recovered, so
    /// `api_key` is left unknown.
    pub async fn import(&self, id: &str) -> Result<Value, ProviderError> {
        info!(piped_id = %id, "Importing piped");
        let resp = self
            .client
            .get_piped(GetPipedRequest {
                piped_id: id.to_string(),
            })
            .await
            .map_err(|e| ProviderError::remote("Error reading piped", "Could not read piped", e))?;
        let piped = resp.piped.ok_or_else(|| {
            ProviderError::remote(
                "Error reading piped",
                "Could not read piped",
                tonic::Status::not_found(format!("piped {} not found", id)),
            )
        })?;

        let state = PipedModel {
            id: Some(id.to_string()),
            name: piped.name,
            description: Some(piped.desc),
            api_key: Some(UNKNOWN_VALUE.to_string()),
        };
        Ok(serde_json::to_value(state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::apiservice::Piped;
    use crate::schema::DiagnosticSeverity;
    use crate::testing::{ApiCall, MockApiClient};
    use crate::types::is_unknown;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_captures_key() {
        let mock = Arc::new(MockApiClient::new());
        let resource = PipedResource::new(mock.clone());

        let state = resource
            .create(json!({
                "id": UNKNOWN_VALUE,
                "name": "dev",
                "description": UNKNOWN_VALUE,
                "api_key": UNKNOWN_VALUE
            }))
            .await
            .unwrap();

        assert_eq!(state["id"], "piped-1");
        assert_eq!(state["api_key"], "piped-key-1");
        assert_eq!(state["description"], "");
        assert_eq!(mock.piped("piped-1").unwrap().name, "dev");
    }

    #[tokio::test]
    async fn test_update_keeps_id_and_key() {
        let mock = Arc::new(MockApiClient::new());
        let resource = PipedResource::new(mock.clone());
        let prior = resource
            .create(json!({"name": "dev", "description": "first"}))
            .await
            .unwrap();

        let state = resource
            .update(
                prior.clone(),
                json!({
                    "id": "piped-1",
                    "name": "staging",
                    "description": "first",
                    "api_key": prior["api_key"]
                }),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], prior["id"]);
        assert_eq!(state["api_key"], prior["api_key"]);
        assert_eq!(state["name"], "staging");
        assert_eq!(mock.piped("piped-1").unwrap().name, "staging");
        assert!(mock
            .calls()
            .contains(&ApiCall::UpdatePiped("piped-1".to_string())));
    }

    #[tokio::test]
    async fn test_delete_disables_with_warning() {
        let mock = Arc::new(MockApiClient::new().with_piped(Piped {
            id: "piped-7".to_string(),
            name: "prod".to_string(),
            ..Default::default()
        }));
        let resource = PipedResource::new(mock.clone());

        let diagnostics = resource
            .delete(json!({"id": "piped-7", "name": "prod"}))
            .await
            .unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert!(mock.piped("piped-7").unwrap().disabled);
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_resource() {
        let mock = Arc::new(
            MockApiClient::new().fail_on("DisablePiped", tonic::Status::permission_denied("no")),
        );
        let resource = PipedResource::new(mock);

        let err = resource
            .delete(json!({"id": "piped-7", "name": "prod"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_diagnostic().summary, "Error Disabling PipeCD piped");
    }

    #[tokio::test]
    async fn test_import_leaves_key_unknown() {
        let mock = Arc::new(MockApiClient::new().with_piped(Piped {
            id: "piped-3".to_string(),
            name: "imported".to_string(),
            desc: "from elsewhere".to_string(),
            ..Default::default()
        }));
        let resource = PipedResource::new(mock);

        let state = resource.import("piped-3").await.unwrap();
        assert_eq!(state["name"], "imported");
        assert_eq!(state["description"], "from elsewhere");
        assert!(is_unknown(&state["api_key"]));
    }
}
