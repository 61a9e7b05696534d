//! The PipeCD provider: schema, configuration and dispatch to the resource
//! and data source handlers.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::api::{self, ApiClient};
use crate::config::{self, ConnectionConfig, ProviderConfigModel};
use crate::data_sources::{ApplicationDataSource, DataSourceKind, PipedDataSource};
use crate::error::ProviderError;
use crate::plan;
use crate::resources::{ApplicationResource, PipedResource, ResourceKind};
use crate::schema::{has_errors, Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities};
use crate::validation;

/// Manages PipeCD applications and pipeds.
///
/// The control-plane client is created once by `configure` and shared by
/// every later operation.
#[derive(Default)]
pub struct PipecdProvider {
    client: OnceCell<Arc<dyn ApiClient>>,
}

impl PipecdProvider {
    /// Create an unconfigured provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that uses `client` instead of dialing the control
    /// plane. `configure` still validates its configuration.
    pub fn with_client(client: Arc<dyn ApiClient>) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
        }
    }

    fn client(&self) -> Result<Arc<dyn ApiClient>, ProviderError> {
        self.client
            .get()
            .cloned()
            .ok_or_else(|| ProviderError::Configuration("provider is not configured".to_string()))
    }

    fn resource_kind(resource_type: &str) -> Result<ResourceKind, ProviderError> {
        ResourceKind::from_type_name(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source_kind(data_source_type: &str) -> Result<DataSourceKind, ProviderError> {
        DataSourceKind::from_type_name(data_source_type)
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    fn resource_schema(resource_type: &str) -> Result<Schema, ProviderError> {
        Ok(Self::resource_kind(resource_type)?.schema())
    }
}

#[async_trait::async_trait]
impl ProviderService for PipecdProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(config::provider_schema());
        for kind in ResourceKind::ALL {
            schema = schema.with_resource(kind.type_name(), kind.schema());
        }
        for kind in DataSourceKind::ALL {
            schema = schema.with_data_source(kind.type_name(), kind.schema());
        }
        schema
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: ResourceKind::ALL
                .iter()
                .map(|k| k.type_name().to_string())
                .collect(),
            data_sources: DataSourceKind::ALL
                .iter()
                .map(|k| k.type_name().to_string())
                .collect(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&config::provider_schema(), &config))
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&config::provider_schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let model: ProviderConfigModel = if config.is_null() {
            ProviderConfigModel::default()
        } else {
            serde_json::from_value(config)?
        };
        let connection = match ConnectionConfig::resolve(&model) {
            Ok(connection) => connection,
            Err(errors) => {
                warn!(errors = errors.len(), "Provider configuration is incomplete");
                diagnostics.extend(errors);
                return Ok(diagnostics);
            }
        };

        if self.client.initialized() {
            debug!(host = %connection.host, "PipeCD API client already present");
            return Ok(diagnostics);
        }

        info!(host = %connection.host, "Creating PipeCD API client");
        match api::connect(&connection).await {
            Ok(client) => {
                let client: Arc<dyn ApiClient> = Arc::new(client);
                if self.client.set(client).is_err() {
                    debug!("PipeCD API client was created concurrently");
                }
            }
            Err(e) => {
                warn!(error = %e, "Unable to create PipeCD API client");
                diagnostics.push(
                    Diagnostic::error("Unable to Create PipeCD API Client").with_detail(format!(
                        "An unexpected error occurred when creating the PipeCD API client. If the error is not clear, please contact the provider developers.\n\nPipeCD Client Error: {}",
                        e
                    )),
                );
            }
        }
        Ok(diagnostics)
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = Self::resource_schema(resource_type)?;
        Ok(validation::validate(&schema, &config))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = Self::resource_schema(resource_type)?;
        Ok(plan::plan(
            &schema,
            prior_state.as_ref(),
            &proposed_state,
            &config,
        ))
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let client = self.client()?;
        match Self::resource_kind(resource_type)? {
            ResourceKind::Application => {
                ApplicationResource::new(client)
                    .create(planned_state)
                    .await
            }
            ResourceKind::Piped => PipedResource::new(client).create(planned_state).await,
        }
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        let client = self.client()?;
        match Self::resource_kind(resource_type)? {
            ResourceKind::Application => {
                ApplicationResource::new(client)
                    .read(current_state)
                    .await
            }
            ResourceKind::Piped => PipedResource::new(client).read(current_state).await,
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let client = self.client()?;
        match Self::resource_kind(resource_type)? {
            ResourceKind::Application => {
                ApplicationResource::new(client)
                    .update(prior_state, planned_state)
                    .await
            }
            ResourceKind::Piped => {
                PipedResource::new(client)
                    .update(prior_state, planned_state)
                    .await
            }
        }
    }

    async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let client = self.client()?;
        match Self::resource_kind(resource_type)? {
            ResourceKind::Application => {
                ApplicationResource::new(client)
                    .delete(current_state)
                    .await
            }
            ResourceKind::Piped => PipedResource::new(client).delete(current_state).await,
        }
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let client = self.client()?;
        let state = match Self::resource_kind(resource_type)? {
            ResourceKind::Application => ApplicationResource::new(client).import(id).await?,
            ResourceKind::Piped => PipedResource::new(client).import(id).await?,
        };
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = Self::data_source_kind(data_source_type)?.schema();
        Ok(validation::validate(&schema, &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let client = self.client()?;
        match Self::data_source_kind(data_source_type)? {
            DataSourceKind::Application => ApplicationDataSource::new(client).read(config).await,
            DataSourceKind::Piped => PipedDataSource::new(client).read(config).await,
        }
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stopping PipeCD provider");
        Ok(())
    }
}
