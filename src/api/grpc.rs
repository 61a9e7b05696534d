use async_trait::async_trait;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, info};

use super::apiservice::api_service_client::ApiServiceClient;
use super::apiservice::*;
use super::ApiClient;
use crate::config::ConnectionConfig;
use crate::error::ProviderError;

/// Attaches `authorization: API-KEY <key>` to every outgoing call.
#[derive(Clone)]
pub struct ApiKeyInterceptor {
    value: MetadataValue<Ascii>,
}

impl ApiKeyInterceptor {
    /// Create an interceptor for `api_key`.
    pub fn new(api_key: &str) -> Result<Self, ProviderError> {
        let value = format!("API-KEY {}", api_key)
            .parse::<MetadataValue<Ascii>>()
            .map_err(|_| {
                ProviderError::Configuration(
                    "api_key contains characters not allowed in request metadata".to_string(),
                )
            })?;
        Ok(Self { value })
    }
}

impl Interceptor for ApiKeyInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("authorization", self.value.clone());
        Ok(request)
    }
}

/// [`ApiClient`] backed by a TLS gRPC channel.
#[derive(Clone)]
pub struct GrpcApiClient {
    inner: ApiServiceClient<InterceptedService<Channel, ApiKeyInterceptor>>,
}

impl GrpcApiClient {
    /// Wrap an established channel.
    pub fn new(channel: Channel, interceptor: ApiKeyInterceptor) -> Self {
        Self {
            inner: ApiServiceClient::with_interceptor(channel, interceptor),
        }
    }

    fn client(&self) -> ApiServiceClient<InterceptedService<Channel, ApiKeyInterceptor>> {
        self.inner.clone()
    }
}

fn endpoint_uri(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Dial the control plane described by `config`.
///
/// The connection is TLS-secured using the platform's native root
/// certificates. Failures are returned as-is and never retried.
pub async fn connect(config: &ConnectionConfig) -> Result<GrpcApiClient, ProviderError> {
    let interceptor = ApiKeyInterceptor::new(&config.api_key)?;
    let uri = endpoint_uri(&config.host);

    info!(host = %config.host, "Dialing PipeCD control plane");

    let endpoint = Endpoint::from_shared(uri.clone())
        .map_err(|e| ProviderError::Configuration(format!("invalid host {:?}: {}", uri, e)))?
        .tls_config(ClientTlsConfig::new().with_native_roots())?;
    let channel = endpoint.connect().await?;

    debug!(uri = %uri, "Connected to PipeCD control plane");
    Ok(GrpcApiClient::new(channel, interceptor))
}

#[async_trait]
impl ApiClient for GrpcApiClient {
    async fn add_application(
        &self,
        req: AddApplicationRequest,
    ) -> Result<AddApplicationResponse, Status> {
        Ok(self.client().add_application(req).await?.into_inner())
    }

    async fn get_application(
        &self,
        req: GetApplicationRequest,
    ) -> Result<GetApplicationResponse, Status> {
        Ok(self.client().get_application(req).await?.into_inner())
    }

    async fn update_application(
        &self,
        req: UpdateApplicationRequest,
    ) -> Result<UpdateApplicationResponse, Status> {
        Ok(self.client().update_application(req).await?.into_inner())
    }

    async fn update_application_deploy_targets(
        &self,
        req: UpdateApplicationDeployTargetsRequest,
    ) -> Result<UpdateApplicationDeployTargetsResponse, Status> {
        Ok(self
            .client()
            .update_application_deploy_targets(req)
            .await?
            .into_inner())
    }

    async fn delete_application(
        &self,
        req: DeleteApplicationRequest,
    ) -> Result<DeleteApplicationResponse, Status> {
        Ok(self.client().delete_application(req).await?.into_inner())
    }

    async fn register_piped(
        &self,
        req: RegisterPipedRequest,
    ) -> Result<RegisterPipedResponse, Status> {
        Ok(self.client().register_piped(req).await?.into_inner())
    }

    async fn update_piped(&self, req: UpdatePipedRequest) -> Result<UpdatePipedResponse, Status> {
        Ok(self.client().update_piped(req).await?.into_inner())
    }

    async fn get_piped(&self, req: GetPipedRequest) -> Result<GetPipedResponse, Status> {
        Ok(self.client().get_piped(req).await?.into_inner())
    }

    async fn disable_piped(
        &self,
        req: DisablePipedRequest,
    ) -> Result<DisablePipedResponse, Status> {
        Ok(self.client().disable_piped(req).await?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uri_adds_https() {
        assert_eq!(
            endpoint_uri("pipecd.example.com:443"),
            "https://pipecd.example.com:443"
        );
        assert_eq!(
            endpoint_uri("https://pipecd.example.com"),
            "https://pipecd.example.com"
        );
    }

    #[test]
    fn test_interceptor_sets_authorization() {
        let mut interceptor = ApiKeyInterceptor::new("abc.def").unwrap();
        let request = interceptor.call(Request::new(())).unwrap();
        assert_eq!(
            request.metadata().get("authorization").unwrap(),
            "API-KEY abc.def"
        );
    }

    #[test]
    fn test_interceptor_rejects_invalid_key() {
        let err = ApiKeyInterceptor::new("line\nbreak").err().unwrap();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}
