//! PipeCD provider plugin.
//!
//! Lets an infrastructure-as-code host manage [PipeCD](https://pipecd.dev)
//! applications and pipeds declaratively. The host spawns the provider
//! binary, reads a handshake line from its stdout and drives it over gRPC;
//! the provider in turn calls the PipeCD control-plane API over TLS,
//! authenticating with an API key.
//!
//! # Types served
//!
//! | Type                 | Resource | Data source |
//! |----------------------|----------|-------------|
//! | `pipecd_application` | yes      | yes         |
//! | `pipecd_piped`       | yes      | yes         |
//!
//! # Configuration
//!
//! ```hcl
//! provider "pipecd" {
//!   host    = "pipecd.example.com:443" # or PIPECD_HOST
//!   api_key = var.pipecd_api_key       # or PIPECD_API_KEY
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it writes one line to stdout:
//!
//! ```text
//! PIPECD_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `PIPECD_PROVIDER|<protocol_version>|<address>`. Logs go to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

/// Messages and the generated server of the host-facing protocol.
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated {
    tonic::include_proto!("provider.v1");
}

pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::PipecdProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_listener, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
