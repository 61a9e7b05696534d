//! The `pipecd_application` resource.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{deploy_targets_from_wire, deploy_targets_to_wire, known};
use crate::api::apiservice::{
    AddApplicationRequest, Application, ApplicationGitPath, ApplicationGitRepository,
    ApplicationKind, DeleteApplicationRequest, GetApplicationRequest,
    UpdateApplicationDeployTargetsRequest, UpdateApplicationRequest,
};
use crate::api::ApiClient;
use crate::error::ProviderError;
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema,
};
use crate::types::UNKNOWN_VALUE;

/// Type name of the resource.
pub const TYPE_NAME: &str = "pipecd_application";

/// Configuration file name used when `git.filename` is not set.
pub const DEFAULT_CONFIG_FILENAME: &str = "app.pipecd.yaml";

/// Application kinds accepted by the control plane.
pub const APPLICATION_KINDS: [&str; 5] = ["KUBERNETES", "TERRAFORM", "LAMBDA", "CLOUDRUN", "ECS"];

/// Schema of the resource.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("PipeCD application resource.")
        .with_attribute(
            "id",
            Attribute::computed_string()
                .with_description("The ID of this Application.")
                .with_use_state_for_unknown(),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_description("The application name.")
                .with_requires_replace(),
        )
        .with_attribute(
            "piped_id",
            Attribute::required_string()
                .with_description("The ID of piped that should handle this application."),
        )
        .with_attribute(
            "kind",
            Attribute::required_string()
                .with_description("The kind of application.")
                .with_requires_replace()
                .with_one_of(APPLICATION_KINDS),
        )
        .with_attribute(
            "platform_provider",
            Attribute::required_string()
                .with_description(
                    "The platform provider name. One of the registered providers in the piped configuration. The previous name of this field is cloud-provider.",
                )
                .with_deprecation_message(
                    "Use `plugins` instead. This field will be removed in the next major version.",
                ),
        )
        .with_attribute(
            "description",
            Attribute::optional_computed_string()
                .with_description("The description of the application.")
                .with_requires_replace(),
        )
        .with_attribute(
            "plugins",
            Attribute::new(
                AttributeType::map(AttributeType::list(AttributeType::String)),
                AttributeFlags::optional(),
            )
            .with_description(
                "Deploy targets of each plugin this application uses, keyed by plugin name.",
            ),
        )
        .with_block(
            "git",
            NestedBlock::required_single(
                Block::new()
                    .with_description("Git path for the application.")
                    .with_attribute(
                        "repository_id",
                        Attribute::required_string()
                            .with_description(
                                "The repository ID. One the registered repositories in the piped configuration.",
                            )
                            .with_requires_replace(),
                    )
                    .with_attribute(
                        "path",
                        Attribute::required_string()
                            .with_description(
                                "The relative path from the root of repository to the application directory.",
                            )
                            .with_requires_replace(),
                    )
                    .with_attribute(
                        "filename",
                        Attribute::optional_computed_string()
                            .with_description(
                                "The configuration file name. (default \"app.pipecd.yaml\")",
                            )
                            .with_default(json!(DEFAULT_CONFIG_FILENAME)),
                    ),
            ),
        )
}

/// State of a `pipecd_application`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationModel {
    /// Server-assigned id.
    #[serde(default)]
    pub id: Option<String>,
    /// Application name.
    pub name: String,
    /// Piped handling the application.
    pub piped_id: String,
    /// One of [`APPLICATION_KINDS`].
    pub kind: String,
    /// Deprecated platform provider name.
    #[serde(default)]
    pub platform_provider: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Deploy targets keyed by plugin name.
    #[serde(default)]
    pub plugins: Option<BTreeMap<String, Vec<String>>>,
    /// Location of the application configuration.
    pub git: GitModel,
}

/// The `git` block of a `pipecd_application`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitModel {
    /// Repository id registered in the piped configuration.
    pub repository_id: String,
    /// Path of the application directory inside the repository.
    pub path: String,
    /// Name of the application configuration file.
    #[serde(default)]
    pub filename: Option<String>,
}

impl ApplicationModel {
    fn git_path(&self) -> ApplicationGitPath {
        let filename = match known(&self.git.filename) {
            "" => DEFAULT_CONFIG_FILENAME,
            name => name,
        };
        ApplicationGitPath {
            repo: Some(ApplicationGitRepository {
                id: self.git.repository_id.clone(),
                ..Default::default()
            }),
            path: self.git.path.clone(),
            config_filename: filename.to_string(),
            ..Default::default()
        }
    }

    fn from_application(id: &str, app: &Application) -> Self {
        let git = app.git_path.clone().unwrap_or_default();
        let repo = git.repo.unwrap_or_default();
        Self {
            id: Some(id.to_string()),
            name: app.name.clone(),
            piped_id: app.piped_id.clone(),
            kind: kind_name(app.kind),
            platform_provider: Some(app.platform_provider.clone()),
            description: Some(app.description.clone()),
            plugins: deploy_targets_from_wire(&app.deploy_targets_by_plugin),
            git: GitModel {
                repository_id: repo.id,
                path: git.path,
                filename: Some(git.config_filename),
            },
        }
    }
}

/// Name of a wire application kind. Kinds this build does not know are
/// rendered as their number.
pub(crate) fn kind_name(kind: i32) -> String {
    ApplicationKind::try_from(kind)
        .map(|k| k.as_str_name().to_string())
        .unwrap_or_else(|_| kind.to_string())
}

fn kind_value(name: &str) -> Result<i32, ProviderError> {
    ApplicationKind::from_str_name(name)
        .map(|k| k as i32)
        .ok_or_else(|| {
            ProviderError::Validation(format!(
                "kind must be one of {}, got {:?}",
                APPLICATION_KINDS.join(", "),
                name
            ))
        })
}

/// Synchronizes `pipecd_application` resources with the control plane.
pub struct ApplicationResource {
    client: Arc<dyn ApiClient>,
}

impl ApplicationResource {
    /// Create a synchronizer using `client`.
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    /// Register the application, then read it back for the canonical state.
    pub async fn create(&self, planned_state: Value) -> Result<Value, ProviderError> {
        let plan: ApplicationModel = serde_json::from_value(planned_state)?;

        let req = AddApplicationRequest {
            name: plan.name.clone(),
            piped_id: plan.piped_id.clone(),
            git_path: Some(plan.git_path()),
            kind: kind_value(&plan.kind)?,
            platform_provider: known(&plan.platform_provider).to_string(),
            description: known(&plan.description).to_string(),
            deploy_targets_by_plugin: plan
                .plugins
                .as_ref()
                .map(deploy_targets_to_wire)
                .unwrap_or_default(),
        };

        info!(name = %plan.name, kind = %plan.kind, "Adding application");
        let added = self.client.add_application(req).await.map_err(|e| {
            ProviderError::remote(
                "Error creating application",
                "Could not create application",
                e,
            )
        })?;

        let application = self.get(&added.application_id).await.map_err(|e| {
            ProviderError::remote(
                "Error getting application",
                "Could not get application",
                e,
            )
        })?;
        debug!(?application, "AddApplication response");

        let state = ApplicationModel::from_application(&added.application_id, &application);
        Ok(serde_json::to_value(state)?)
    }

    /// Stored state is returned unchanged; drift is not refreshed.
    pub async fn read(&self, current_state: Value) -> Result<Value, ProviderError> {
        let state: ApplicationModel = serde_json::from_value(current_state)?;
        Ok(serde_json::to_value(state)?)
    }

    /// Apply the in-place updatable fields.
    pub async fn update(
        &self,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let prior: ApplicationModel = serde_json::from_value(prior_state)?;
        let mut plan: ApplicationModel = serde_json::from_value(planned_state)?;

        let id = prior
            .id
            .clone()
            .or_else(|| plan.id.clone())
            .ok_or_else(|| ProviderError::Validation("application has no id".to_string()))?;

        let req = UpdateApplicationRequest {
            application_id: id.clone(),
            piped_id: plan.piped_id.clone(),
            git_path: Some(plan.git_path()),
            platform_provider: known(&plan.platform_provider).to_string(),
        };

        info!(application_id = %id, "Updating application");
        self.client.update_application(req).await.map_err(|e| {
            ProviderError::remote(
                "Error updating application",
                "Could not update application",
                e,
            )
        })?;

        if let Some(plugins) = plan.plugins.as_ref().filter(|p| !p.is_empty()) {
            debug!(
                application_id = %id,
                plugins = plugins.len(),
                "Replacing plugin deploy targets"
            );
            let req = UpdateApplicationDeployTargetsRequest {
                application_id: id.clone(),
                deploy_targets_by_plugin: deploy_targets_to_wire(plugins),
            };
            self.client
                .update_application_deploy_targets(req)
                .await
                .map_err(|e| {
                    ProviderError::remote(
                        "Error updating application",
                        "Could not update application deploy targets",
                        e,
                    )
                })?;
        }

        plan.id = Some(id);
        if matches!(plan.description.as_deref(), None | Some(UNKNOWN_VALUE)) {
            plan.description = prior.description.or(Some(String::new()));
        }
        if known(&plan.git.filename).is_empty() {
            plan.git.filename = Some(DEFAULT_CONFIG_FILENAME.to_string());
        }
        Ok(serde_json::to_value(plan)?)
    }

    /// Delete the application from the control plane.
    pub async fn delete(&self, current_state: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let state: ApplicationModel = serde_json::from_value(current_state)?;
        let id = state.id.unwrap_or_default();

        info!(application_id = %id, "Deleting application");
        self.client
            .delete_application(DeleteApplicationRequest { application_id: id })
            .await
            .map_err(|e| {
                ProviderError::remote(
                    "Error Deleting PipeCD application",
                    "Could not delete application",
                    e,
                )
            })?;
        Ok(Vec::new())
    }

    /// Build state for an existing application.
    pub async fn import(&self, id: &str) -> Result<Value, ProviderError> {
        info!(application_id = %id, "Importing application");
        let application = self.get(id).await.map_err(|e| {
            ProviderError::remote(
                "Error reading application",
                "Could not read application",
                e,
            )
        })?;
        let state = ApplicationModel::from_application(id, &application);
        Ok(serde_json::to_value(state)?)
    }

    async fn get(&self, id: &str) -> Result<Application, tonic::Status> {
        let resp = self
            .client
            .get_application(GetApplicationRequest {
                application_id: id.to_string(),
            })
            .await?;
        resp.application
            .ok_or_else(|| tonic::Status::not_found(format!("application {} not found", id)))
    }
}
