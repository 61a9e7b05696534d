//! The `pipecd_piped` data source.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{plugins_attribute, sorted_plugins, LookupModel, PluginModel};
use crate::api::apiservice::{GetPipedRequest, Piped};
use crate::api::ApiClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

/// Type name of the data source.
pub const TYPE_NAME: &str = "pipecd_piped";

/// Schema of the data source.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("PipeCD piped data source.")
        .with_attribute(
            "id",
            Attribute::required_string().with_description("The ID of the piped."),
        )
        .with_attribute(
            "name",
            Attribute::computed_string().with_description("The piped name."),
        )
        .with_attribute(
            "description",
            Attribute::computed_string().with_description("The description of the piped."),
        )
        .with_attribute(
            "project_id",
            Attribute::computed_string()
                .with_description("The ID of the project this piped belongs to."),
        )
        .with_attribute(
            "repositories",
            Attribute::new(
                AttributeType::list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("remote", AttributeType::String),
                    ("branch", AttributeType::String),
                ])),
                AttributeFlags::computed(),
            )
            .with_description("The list of git repositories this piped watches."),
        )
        .with_attribute(
            "platform_providers",
            Attribute::new(
                AttributeType::list(AttributeType::object([
                    ("name", AttributeType::String),
                    ("type", AttributeType::String),
                ])),
                AttributeFlags::computed(),
            )
            .with_description("The list of platform providers this piped uses.")
            .with_deprecation_message(
                "Use `plugins` instead. This field will be removed in the next major version.",
            ),
        )
        .with_attribute(
            "plugins",
            plugins_attribute("The list of plugins that this piped uses."),
        )
}

/// State of the `pipecd_piped` data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipedDataSourceModel {
    /// Piped id.
    pub id: String,
    /// Piped name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Project owning the piped.
    pub project_id: String,
    /// Watched repositories; absent when there are none.
    pub repositories: Option<Vec<RepositoryModel>>,
    /// Deprecated platform providers; absent when there are none.
    pub platform_providers: Option<Vec<PlatformProviderModel>>,
    /// Plugins sorted by name; absent when there are none.
    pub plugins: Option<Vec<PluginModel>>,
}

/// A git repository watched by a piped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryModel {
    /// Repository id.
    pub id: String,
    /// Remote address.
    pub remote: String,
    /// Tracked branch.
    pub branch: String,
}

/// A platform provider configured on a piped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProviderModel {
    /// Provider name.
    pub name: String,
    /// Provider type, e.g. `KUBERNETES`.
    #[serde(rename = "type")]
    pub provider_type: String,
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

impl From<Piped> for PipedDataSourceModel {
    fn from(piped: Piped) -> Self {
        let repositories = piped
            .repositories
            .into_iter()
            .map(|r| RepositoryModel {
                id: r.id,
                remote: r.remote,
                branch: r.branch,
            })
            .collect();
        let platform_providers = piped
            .platform_providers
            .into_iter()
            .map(|p| PlatformProviderModel {
                name: p.name,
                provider_type: p.r#type,
            })
            .collect();
        let plugins = piped
            .plugins
            .into_iter()
            .map(|p| PluginModel {
                name: p.name,
                deploy_targets: p.deploy_targets,
            })
            .collect();

        Self {
            id: piped.id,
            name: piped.name,
            description: piped.desc,
            project_id: piped.project_id,
            repositories: non_empty(repositories),
            platform_providers: non_empty(platform_providers),
            plugins: sorted_plugins(plugins),
        }
    }
}

/// Reads pipeds from the control plane.
pub struct PipedDataSource {
    client: Arc<dyn ApiClient>,
}

impl PipedDataSource {
    /// Create a reader using `client`.
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    /// Look the piped up by the configured `id`.
    pub async fn read(&self, config: Value) -> Result<Value, ProviderError> {
        let lookup: LookupModel = serde_json::from_value(config)?;
        debug!(piped_id = %lookup.id, "Reading piped");

        let resp = self
            .client
            .get_piped(GetPipedRequest {
                piped_id: lookup.id.clone(),
            })
            .await
            .map_err(|e| ProviderError::remote_read("Unable to Read PipeCD piped", e))?;
        let piped = resp.piped.ok_or_else(|| {
            ProviderError::remote_read(
                "Unable to Read PipeCD piped",
                tonic::Status::not_found(format!("piped {} not found", lookup.id)),
            )
        })?;

        Ok(serde_json::to_value(PipedDataSourceModel::from(piped))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::apiservice::piped::{GitRepository, PlatformProvider, Plugin};
    use crate::testing::MockApiClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_empty_collections_are_null() {
        let mock = Arc::new(MockApiClient::new().with_piped(Piped {
            id: "piped-1".to_string(),
            name: "dev".to_string(),
            ..Default::default()
        }));
        let state = PipedDataSource::new(mock)
            .read(json!({"id": "piped-1"}))
            .await
            .unwrap();

        assert_eq!(state["name"], "dev");
        assert!(state["repositories"].is_null());
        assert!(state["platform_providers"].is_null());
        assert!(state["plugins"].is_null());
    }

    #[tokio::test]
    async fn test_read_maps_collections() {
        let mock = Arc::new(MockApiClient::new().with_piped(Piped {
            id: "piped-1".to_string(),
            name: "dev".to_string(),
            desc: "development".to_string(),
            project_id: "project-1".to_string(),
            repositories: vec![GitRepository {
                id: "repo".to_string(),
                remote: "git@github.com:org/repo.git".to_string(),
                branch: "main".to_string(),
            }],
            platform_providers: vec![PlatformProvider {
                name: "kubernetes-default".to_string(),
                r#type: "KUBERNETES".to_string(),
            }],
            plugins: vec![
                Plugin {
                    name: "terraform".to_string(),
                    deploy_targets: vec!["aws".to_string()],
                },
                Plugin {
                    name: "kubernetes".to_string(),
                    deploy_targets: vec!["cluster-1".to_string(), "cluster-2".to_string()],
                },
            ],
            ..Default::default()
        }));
        let state = PipedDataSource::new(mock)
            .read(json!({"id": "piped-1"}))
            .await
            .unwrap();

        assert_eq!(state["description"], "development");
        assert_eq!(state["repositories"][0]["branch"], "main");
        assert_eq!(state["platform_providers"][0]["type"], "KUBERNETES");
        assert_eq!(state["plugins"][0]["name"], "kubernetes");
        assert_eq!(state["plugins"][1]["name"], "terraform");
    }

    #[tokio::test]
    async fn test_read_failure() {
        let mock = Arc::new(
            MockApiClient::new().fail_on("GetPiped", tonic::Status::unauthenticated("bad key")),
        );
        let err = PipedDataSource::new(mock)
            .read(json!({"id": "piped-1"}))
            .await
            .unwrap_err();

        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Unable to Read PipeCD piped");
        assert_eq!(diag.detail.as_deref(), Some("bad key"));
    }
}
