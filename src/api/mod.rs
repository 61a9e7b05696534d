//! Client for the PipeCD control-plane API.
//!
//! Resources and data sources talk to the control plane through the
//! [`ApiClient`] trait. [`GrpcApiClient`] is the production implementation;
//! tests use [`crate::testing::MockApiClient`].

mod grpc;

pub use grpc::{connect, ApiKeyInterceptor, GrpcApiClient};

use async_trait::async_trait;
use tonic::Status;

/// Messages and the generated client of `grpc.service.apiservice`.
#[allow(missing_docs, clippy::all)]
pub mod apiservice {
    tonic::include_proto!("grpc.service.apiservice");
}

use apiservice::{
    AddApplicationRequest, AddApplicationResponse, DeleteApplicationRequest,
    DeleteApplicationResponse, DisablePipedRequest, DisablePipedResponse, GetApplicationRequest,
    GetApplicationResponse, GetPipedRequest, GetPipedResponse, RegisterPipedRequest,
    RegisterPipedResponse, UpdateApplicationDeployTargetsRequest,
    UpdateApplicationDeployTargetsResponse, UpdateApplicationRequest, UpdateApplicationResponse,
    UpdatePipedRequest, UpdatePipedResponse,
};

/// The control-plane operations the provider needs.
///
/// Implementations must be shareable across concurrent handler invocations.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Register a new application.
    async fn add_application(
        &self,
        req: AddApplicationRequest,
    ) -> Result<AddApplicationResponse, Status>;

    /// Fetch an application by id.
    async fn get_application(
        &self,
        req: GetApplicationRequest,
    ) -> Result<GetApplicationResponse, Status>;

    /// Update the piped, platform provider and git path of an application.
    async fn update_application(
        &self,
        req: UpdateApplicationRequest,
    ) -> Result<UpdateApplicationResponse, Status>;

    /// Replace the plugin deploy targets of an application.
    async fn update_application_deploy_targets(
        &self,
        req: UpdateApplicationDeployTargetsRequest,
    ) -> Result<UpdateApplicationDeployTargetsResponse, Status>;

    /// Delete an application.
    async fn delete_application(
        &self,
        req: DeleteApplicationRequest,
    ) -> Result<DeleteApplicationResponse, Status>;

    /// Register a new piped. The response carries its one-time key.
    async fn register_piped(
        &self,
        req: RegisterPipedRequest,
    ) -> Result<RegisterPipedResponse, Status>;

    /// Update the name and description of a piped.
    async fn update_piped(&self, req: UpdatePipedRequest) -> Result<UpdatePipedResponse, Status>;

    /// Fetch a piped by id.
    async fn get_piped(&self, req: GetPipedRequest) -> Result<GetPipedResponse, Status>;

    /// Disable a piped. Pipeds cannot be deleted.
    async fn disable_piped(
        &self,
        req: DisablePipedRequest,
    ) -> Result<DisablePipedResponse, Status>;
}
