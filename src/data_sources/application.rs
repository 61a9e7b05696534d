//! The `pipecd_application` data source.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{plugins_attribute, sorted_plugins, LookupModel, PluginModel};
use crate::api::apiservice::{Application, GetApplicationRequest};
use crate::api::ApiClient;
use crate::error::ProviderError;
use crate::resources::application::kind_name;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

/// Type name of the data source.
pub const TYPE_NAME: &str = "pipecd_application";

/// Schema of the data source.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("PipeCD application data source.")
        .with_attribute(
            "id",
            Attribute::required_string().with_description("The ID of this Application."),
        )
        .with_attribute(
            "name",
            Attribute::computed_string().with_description("The application name."),
        )
        .with_attribute(
            "piped_id",
            Attribute::computed_string()
                .with_description("The ID of piped that should handle this application."),
        )
        .with_attribute(
            "project_id",
            Attribute::computed_string()
                .with_description("The ID of the project this application belongs to."),
        )
        .with_attribute(
            "kind",
            Attribute::computed_string().with_description("The kind of application."),
        )
        .with_attribute(
            "platform_provider",
            Attribute::computed_string()
                .with_description(
                    "The platform provider name. One of the registered providers in the piped configuration. The previous name of this field is cloud-provider.",
                )
                .with_deprecation_message(
                    "Use `plugins` instead. This field will be removed in the next major version.",
                ),
        )
        .with_attribute(
            "plugins",
            plugins_attribute("The list of plugins that this application uses."),
        )
        .with_attribute(
            "description",
            Attribute::computed_string().with_description("The description of the application."),
        )
        .with_attribute(
            "git",
            Attribute::new(
                AttributeType::object([
                    ("repository_id", AttributeType::String),
                    ("remote", AttributeType::String),
                    ("branch", AttributeType::String),
                    ("path", AttributeType::String),
                    ("filename", AttributeType::String),
                    ("url", AttributeType::String),
                ]),
                AttributeFlags::computed(),
            )
            .with_description("Git path for the application."),
        )
}

/// State of the `pipecd_application` data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDataSourceModel {
    /// Application id.
    pub id: String,
    /// Application name.
    pub name: String,
    /// Piped handling the application.
    pub piped_id: String,
    /// Project owning the application.
    pub project_id: String,
    /// Application kind.
    pub kind: String,
    /// Deprecated platform provider name; absent when unset remotely.
    pub platform_provider: Option<String>,
    /// Plugins sorted by name; absent when the application has none.
    pub plugins: Option<Vec<PluginModel>>,
    /// Free-form description.
    pub description: String,
    /// Location of the application configuration.
    pub git: GitDataSourceModel,
}

/// The `git` attribute of the `pipecd_application` data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitDataSourceModel {
    /// Repository id registered in the piped configuration.
    pub repository_id: String,
    /// Remote address of the repository.
    pub remote: String,
    /// Tracked branch.
    pub branch: String,
    /// Path of the application directory inside the repository.
    pub path: String,
    /// Name of the application configuration file.
    pub filename: String,
    /// Web URL of the application directory.
    pub url: String,
}

impl From<Application> for ApplicationDataSourceModel {
    fn from(app: Application) -> Self {
        let git = app.git_path.unwrap_or_default();
        let repo = git.repo.unwrap_or_default();
        let plugins = app
            .deploy_targets_by_plugin
            .into_iter()
            .map(|(name, targets)| PluginModel {
                name,
                deploy_targets: targets.deploy_targets,
            })
            .collect();

        Self {
            id: app.id,
            name: app.name,
            piped_id: app.piped_id,
            project_id: app.project_id,
            kind: kind_name(app.kind),
            platform_provider: Some(app.platform_provider).filter(|p| !p.is_empty()),
            plugins: sorted_plugins(plugins),
            description: app.description,
            git: GitDataSourceModel {
                repository_id: repo.id,
                remote: repo.remote,
                branch: repo.branch,
                path: git.path,
                filename: git.config_filename,
                url: git.url,
            },
        }
    }
}

/// Reads applications from the control plane.
pub struct ApplicationDataSource {
    client: Arc<dyn ApiClient>,
}

impl ApplicationDataSource {
    /// Create a reader using `client`.
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    /// Look the application up by the configured `id`.
    pub async fn read(&self, config: Value) -> Result<Value, ProviderError> {
        let lookup: LookupModel = serde_json::from_value(config)?;
        debug!(application_id = %lookup.id, "Reading application");

        let resp = self
            .client
            .get_application(GetApplicationRequest {
                application_id: lookup.id.clone(),
            })
            .await
            .map_err(|e| ProviderError::remote_read("Unable to Read PipeCD application", e))?;
        let application = resp.application.ok_or_else(|| {
            ProviderError::remote_read(
                "Unable to Read PipeCD application",
                tonic::Status::not_found(format!("application {} not found", lookup.id)),
            )
        })?;

        Ok(serde_json::to_value(ApplicationDataSourceModel::from(application))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::apiservice::{
        ApplicationGitPath, ApplicationGitRepository, ApplicationKind, DeployTargets,
    };
    use crate::testing::MockApiClient;
    use serde_json::json;

    fn application() -> Application {
        Application {
            id: "app-1".to_string(),
            name: "web".to_string(),
            piped_id: "piped-1".to_string(),
            project_id: "project-1".to_string(),
            kind: ApplicationKind::Kubernetes as i32,
            description: "frontend".to_string(),
            git_path: Some(ApplicationGitPath {
                repo: Some(ApplicationGitRepository {
                    id: "repo".to_string(),
                    remote: "git@github.com:org/repo.git".to_string(),
                    branch: "main".to_string(),
                }),
                path: "apps/web".to_string(),
                config_filename: "app.pipecd.yaml".to_string(),
                url: "https://github.com/org/repo/tree/main/apps/web".to_string(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_read_maps_every_field() {
        let mock = Arc::new(MockApiClient::new().with_application(application()));
        let data_source = ApplicationDataSource::new(mock);

        let state = data_source.read(json!({"id": "app-1"})).await.unwrap();

        assert_eq!(state["kind"], "KUBERNETES");
        assert_eq!(state["project_id"], "project-1");
        assert_eq!(state["git"]["remote"], "git@github.com:org/repo.git");
        assert_eq!(state["git"]["branch"], "main");
        assert_eq!(state["git"]["url"], "https://github.com/org/repo/tree/main/apps/web");
        assert!(state["platform_provider"].is_null());
        assert!(state["plugins"].is_null());
    }

    #[tokio::test]
    async fn test_plugins_sorted_by_name() {
        let mut app = application();
        app.platform_provider = "kubernetes-default".to_string();
        for name in ["b", "a"] {
            app.deploy_targets_by_plugin.insert(
                name.to_string(),
                DeployTargets {
                    deploy_targets: vec![format!("{}-cluster", name)],
                },
            );
        }
        let data_source = ApplicationDataSource::new(Arc::new(
            MockApiClient::new().with_application(app),
        ));

        let state = data_source.read(json!({"id": "app-1"})).await.unwrap();

        assert_eq!(state["platform_provider"], "kubernetes-default");
        assert_eq!(
            state["plugins"],
            json!([
                {"name": "a", "deploy_targets": ["a-cluster"]},
                {"name": "b", "deploy_targets": ["b-cluster"]}
            ])
        );
    }

    #[tokio::test]
    async fn test_read_failure_reports_remote_message() {
        let data_source = ApplicationDataSource::new(Arc::new(MockApiClient::new()));

        let err = data_source.read(json!({"id": "app-404"})).await.unwrap_err();
        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Unable to Read PipeCD application");
        assert_eq!(diag.detail.as_deref(), Some("application app-404 not found"));
    }
}
