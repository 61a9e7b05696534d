//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way the host would,
//! without a gRPC server. [`MockApiClient`] is an in-memory PipeCD control
//! plane that records every call it receives.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use pipecd_provider::testing::{ApiCall, MockApiClient, ProviderTester};
//! use pipecd_provider::PipecdProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mock = Arc::new(MockApiClient::new());
//! let tester = ProviderTester::new(PipecdProvider::with_client(mock.clone()));
//!
//! let state = tester
//!     .lifecycle_create("pipecd_piped", json!({"name": "dev"}))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(state["id"], "piped-1");
//! assert_eq!(mock.calls(), vec![ApiCall::RegisterPiped("dev".to_string())]);
//! # });
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tonic::{Code, Status};

use crate::api::apiservice::*;
use crate::api::ApiClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness wrapping a [`ProviderService`].
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate provider configuration, failing on error diagnostics.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration, failing on error diagnostics.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a create where the configuration is also the proposed state.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan an update where the configuration is also the proposed state.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan a destroy.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Full plan operation with explicit config.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, prior_state, proposed_state, config)
            .await
    }

    /// Create a resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource, returning any warnings.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Validate a data source configuration, failing on error diagnostics.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back. Returns the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read back. Returns the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Plan a destroy, then delete. Returns the warnings from delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone())
            .await?;
        Ok(updated)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  {}", diag.summary)?;
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

impl TestError {
    /// The error diagnostics, if the operation failed with diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            TestError::Diagnostics(diags) => diags,
            TestError::Provider(_) => &[],
        }
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a plan creates without replacement.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan has no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan updates in place.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if no change has the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error whose summary contains
/// `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain a warning whose summary contains
/// `substring`.
///
/// # Panics
///
/// Panics if no warning diagnostic matches.
pub fn assert_warning_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics.iter().any(|d| {
            d.severity == DiagnosticSeverity::Warning && d.summary.contains(substring)
        }),
        "Expected a warning containing '{}'. Diagnostics: {:?}",
        substring,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// A control-plane call received by [`MockApiClient`], with the name or id
/// it was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `AddApplication(name)`
    AddApplication(String),
    /// `GetApplication(id)`
    GetApplication(String),
    /// `UpdateApplication(id)`
    UpdateApplication(String),
    /// `UpdateApplicationDeployTargets(id)`
    UpdateApplicationDeployTargets(String),
    /// `DeleteApplication(id)`
    DeleteApplication(String),
    /// `RegisterPiped(name)`
    RegisterPiped(String),
    /// `UpdatePiped(id)`
    UpdatePiped(String),
    /// `GetPiped(id)`
    GetPiped(String),
    /// `DisablePiped(id)`
    DisablePiped(String),
}

impl ApiCall {
    /// The RPC method name, as accepted by [`MockApiClient::fail_on`].
    pub fn method(&self) -> &'static str {
        match self {
            Self::AddApplication(_) => "AddApplication",
            Self::GetApplication(_) => "GetApplication",
            Self::UpdateApplication(_) => "UpdateApplication",
            Self::UpdateApplicationDeployTargets(_) => "UpdateApplicationDeployTargets",
            Self::DeleteApplication(_) => "DeleteApplication",
            Self::RegisterPiped(_) => "RegisterPiped",
            Self::UpdatePiped(_) => "UpdatePiped",
            Self::GetPiped(_) => "GetPiped",
            Self::DisablePiped(_) => "DisablePiped",
        }
    }
}

#[derive(Default)]
struct MockState {
    applications: BTreeMap<String, Application>,
    pipeds: BTreeMap<String, Piped>,
    calls: Vec<ApiCall>,
    next_application: u32,
    next_piped: u32,
}

/// In-memory PipeCD control plane.
///
/// Ids are allocated as `app-<n>` and `piped-<n>`; piped keys as
/// `piped-key-<n>`. Every call is recorded, including failed ones.
#[derive(Default)]
pub struct MockApiClient {
    state: Mutex<MockState>,
    failures: HashMap<&'static str, (Code, String)>,
}

impl MockApiClient {
    /// Create an empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `method` fail with `status`.
    pub fn fail_on(mut self, method: &'static str, status: Status) -> Self {
        self.failures
            .insert(method, (status.code(), status.message().to_string()));
        self
    }

    /// Seed an existing application.
    pub fn with_application(self, application: Application) -> Self {
        self.lock()
            .applications
            .insert(application.id.clone(), application);
        self
    }

    /// Seed an existing piped.
    pub fn with_piped(self, piped: Piped) -> Self {
        self.lock().pipeds.insert(piped.id.clone(), piped);
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// The stored application with `id`.
    pub fn application(&self, id: &str) -> Option<Application> {
        self.lock().applications.get(id).cloned()
    }

    /// The stored piped with `id`.
    pub fn piped(&self, id: &str) -> Option<Piped> {
        self.lock().pipeds.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call` and return the locked state, or the configured failure.
    fn begin(&self, call: ApiCall) -> Result<MutexGuard<'_, MockState>, Status> {
        let method = call.method();
        let mut state = self.lock();
        state.calls.push(call);
        match self.failures.get(method) {
            Some((code, message)) => Err(Status::new(*code, message.clone())),
            None => Ok(state),
        }
    }
}

fn application_not_found(id: &str) -> Status {
    Status::not_found(format!("application {} not found", id))
}

fn piped_not_found(id: &str) -> Status {
    Status::not_found(format!("piped {} not found", id))
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn add_application(
        &self,
        req: AddApplicationRequest,
    ) -> Result<AddApplicationResponse, Status> {
        let mut state = self.begin(ApiCall::AddApplication(req.name.clone()))?;
        state.next_application += 1;
        let id = format!("app-{}", state.next_application);
        let application = Application {
            id: id.clone(),
            name: req.name,
            piped_id: req.piped_id,
            kind: req.kind,
            git_path: req.git_path,
            description: req.description,
            platform_provider: req.platform_provider,
            deploy_targets_by_plugin: req.deploy_targets_by_plugin,
            ..Default::default()
        };
        state.applications.insert(id.clone(), application);
        Ok(AddApplicationResponse { application_id: id })
    }

    async fn get_application(
        &self,
        req: GetApplicationRequest,
    ) -> Result<GetApplicationResponse, Status> {
        let state = self.begin(ApiCall::GetApplication(req.application_id.clone()))?;
        let application = state
            .applications
            .get(&req.application_id)
            .cloned()
            .ok_or_else(|| application_not_found(&req.application_id))?;
        Ok(GetApplicationResponse {
            application: Some(application),
        })
    }

    async fn update_application(
        &self,
        req: UpdateApplicationRequest,
    ) -> Result<UpdateApplicationResponse, Status> {
        let mut state = self.begin(ApiCall::UpdateApplication(req.application_id.clone()))?;
        let application = state
            .applications
            .get_mut(&req.application_id)
            .ok_or_else(|| application_not_found(&req.application_id))?;
        application.piped_id = req.piped_id;
        application.git_path = req.git_path;
        application.platform_provider = req.platform_provider;
        Ok(UpdateApplicationResponse {
            application_id: req.application_id,
        })
    }

    async fn update_application_deploy_targets(
        &self,
        req: UpdateApplicationDeployTargetsRequest,
    ) -> Result<UpdateApplicationDeployTargetsResponse, Status> {
        let mut state = self.begin(ApiCall::UpdateApplicationDeployTargets(
            req.application_id.clone(),
        ))?;
        let application = state
            .applications
            .get_mut(&req.application_id)
            .ok_or_else(|| application_not_found(&req.application_id))?;
        application.deploy_targets_by_plugin = req.deploy_targets_by_plugin;
        Ok(UpdateApplicationDeployTargetsResponse {})
    }

    async fn delete_application(
        &self,
        req: DeleteApplicationRequest,
    ) -> Result<DeleteApplicationResponse, Status> {
        let mut state = self.begin(ApiCall::DeleteApplication(req.application_id.clone()))?;
        state
            .applications
            .remove(&req.application_id)
            .ok_or_else(|| application_not_found(&req.application_id))?;
        Ok(DeleteApplicationResponse {
            application_id: req.application_id,
        })
    }

    async fn register_piped(
        &self,
        req: RegisterPipedRequest,
    ) -> Result<RegisterPipedResponse, Status> {
        let mut state = self.begin(ApiCall::RegisterPiped(req.name.clone()))?;
        state.next_piped += 1;
        let n = state.next_piped;
        let id = format!("piped-{}", n);
        state.pipeds.insert(
            id.clone(),
            Piped {
                id: id.clone(),
                name: req.name,
                desc: req.desc,
                ..Default::default()
            },
        );
        Ok(RegisterPipedResponse {
            id,
            key: format!("piped-key-{}", n),
        })
    }

    async fn update_piped(&self, req: UpdatePipedRequest) -> Result<UpdatePipedResponse, Status> {
        let mut state = self.begin(ApiCall::UpdatePiped(req.piped_id.clone()))?;
        let piped = state
            .pipeds
            .get_mut(&req.piped_id)
            .ok_or_else(|| piped_not_found(&req.piped_id))?;
        piped.name = req.name;
        piped.desc = req.desc;
        Ok(UpdatePipedResponse {})
    }

    async fn get_piped(&self, req: GetPipedRequest) -> Result<GetPipedResponse, Status> {
        let state = self.begin(ApiCall::GetPiped(req.piped_id.clone()))?;
        let piped = state
            .pipeds
            .get(&req.piped_id)
            .cloned()
            .ok_or_else(|| piped_not_found(&req.piped_id))?;
        Ok(GetPipedResponse { piped: Some(piped) })
    }

    async fn disable_piped(
        &self,
        req: DisablePipedRequest,
    ) -> Result<DisablePipedResponse, Status> {
        let mut state = self.begin(ApiCall::DisablePiped(req.piped_id.clone()))?;
        let piped = state
            .pipeds
            .get_mut(&req.piped_id)
            .ok_or_else(|| piped_not_found(&req.piped_id))?;
        piped.disabled = true;
        Ok(DisablePipedResponse {})
    }
}
