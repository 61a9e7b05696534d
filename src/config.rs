//! Provider configuration.
//!
//! The provider block accepts `host` and `api_key`. Both fall back to the
//! `PIPECD_HOST` and `PIPECD_API_KEY` environment variables; a value set in
//! configuration always overrides the environment.

use crate::schema::{Attribute, Diagnostic, Schema};
use crate::types::UNKNOWN_VALUE;
use serde::Deserialize;
use std::fmt;

/// Environment variable holding the control-plane address.
pub const HOST_ENV: &str = "PIPECD_HOST";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "PIPECD_API_KEY";

/// The provider block as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfigModel {
    /// Address of the control plane, e.g. `pipecd.example.com:443`.
    #[serde(default)]
    pub host: Option<String>,
    /// API key used to authenticate every call.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Schema of the provider block.
pub fn provider_schema() -> Schema {
    Schema::v0()
        .with_description("Interact with a PipeCD control plane.")
        .with_attribute(
            "host",
            Attribute::optional_string().with_description(format!(
                "Address of the PipeCD control plane. May also be provided via {} environment variable.",
                HOST_ENV
            )),
        )
        .with_attribute(
            "api_key",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!(
                    "API key for the PipeCD control plane. May also be provided via {} environment variable.",
                    API_KEY_ENV
                )),
        )
}

/// Resolved settings used to dial the control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Address of the control plane.
    pub host: String,
    /// API key sent as `authorization: API-KEY <key>`.
    pub api_key: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ConnectionConfig {
    /// Resolve settings from the provider block and the process environment.
    pub fn resolve(config: &ProviderConfigModel) -> Result<Self, Vec<Diagnostic>> {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    /// Resolve settings using `env` to look up environment variables.
    pub fn resolve_with<F>(config: &ProviderConfigModel, env: F) -> Result<Self, Vec<Diagnostic>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut diagnostics = Vec::new();

        if config.host.as_deref() == Some(UNKNOWN_VALUE) {
            diagnostics.push(
                Diagnostic::error("Unknown PipeCD API Host")
                    .with_detail(format!(
                        "The provider cannot create the PipeCD API client as there is an unknown configuration value for the PipeCD API host. Either target apply the source of the value first, set the value statically in the configuration, or use the {} environment variable.",
                        HOST_ENV
                    ))
                    .with_attribute("host"),
            );
        }
        if config.api_key.as_deref() == Some(UNKNOWN_VALUE) {
            diagnostics.push(
                Diagnostic::error("Unknown PipeCD API Key")
                    .with_detail(format!(
                        "The provider cannot create the PipeCD API client as there is an unknown configuration value for the PipeCD API key. Either target apply the source of the value first, set the value statically in the configuration, or use the {} environment variable.",
                        API_KEY_ENV
                    ))
                    .with_attribute("api_key"),
            );
        }
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        let host = config
            .host
            .clone()
            .or_else(|| env(HOST_ENV))
            .unwrap_or_default();
        let api_key = config
            .api_key
            .clone()
            .or_else(|| env(API_KEY_ENV))
            .unwrap_or_default();

        if host.is_empty() {
            diagnostics.push(
                Diagnostic::error("Missing PipeCD API Host")
                    .with_detail(format!(
                        "The provider cannot create the PipeCD API client as there is a missing or empty value for the PipeCD API host. Set the host value in the configuration or use the {} environment variable. If either is already set, ensure the value is not empty.",
                        HOST_ENV
                    ))
                    .with_attribute("host"),
            );
        }
        if api_key.is_empty() {
            diagnostics.push(
                Diagnostic::error("Missing PipeCD API Key")
                    .with_detail(format!(
                        "The provider cannot create the PipeCD API client as there is a missing or empty value for the PipeCD API key. Set the api_key value in the configuration or use the {} environment variable. If either is already set, ensure the value is not empty.",
                        API_KEY_ENV
                    ))
                    .with_attribute("api_key"),
            );
        }

        if diagnostics.is_empty() {
            Ok(Self { host, api_key })
        } else {
            Err(diagnostics)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_overrides_environment() {
        let config = ProviderConfigModel {
            host: Some("pipecd.example.com:443".to_string()),
            api_key: None,
        };
        let resolved = ConnectionConfig::resolve_with(
            &config,
            env_of(&[(HOST_ENV, "env-host:443"), (API_KEY_ENV, "env-key")]),
        )
        .unwrap();

        assert_eq!(resolved.host, "pipecd.example.com:443");
        assert_eq!(resolved.api_key, "env-key");
    }

    #[test]
    fn test_missing_values() {
        let diagnostics =
            ConnectionConfig::resolve_with(&ProviderConfigModel::default(), env_of(&[]))
                .unwrap_err();

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].summary, "Missing PipeCD API Host");
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("host"));
        assert_eq!(diagnostics[1].summary, "Missing PipeCD API Key");
        assert_eq!(diagnostics[1].attribute.as_deref(), Some("api_key"));
    }

    #[test]
    fn test_empty_config_value_is_missing() {
        let config = ProviderConfigModel {
            host: Some(String::new()),
            api_key: Some("key".to_string()),
        };
        let diagnostics =
            ConnectionConfig::resolve_with(&config, env_of(&[(HOST_ENV, "env-host:443")]))
                .unwrap_err();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Missing PipeCD API Host");
    }

    #[test]
    fn test_unknown_values_reported_first() {
        let config = ProviderConfigModel {
            host: Some(UNKNOWN_VALUE.to_string()),
            api_key: None,
        };
        let diagnostics = ConnectionConfig::resolve_with(&config, env_of(&[])).unwrap_err();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Unknown PipeCD API Host");
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = ConnectionConfig {
            host: "pipecd.example.com:443".to_string(),
            api_key: "super-secret".to_string(),
        };
        let printed = format!("{:?}", config);
        assert!(printed.contains("pipecd.example.com:443"));
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_model_deserializes_partial_config() {
        let model: ProviderConfigModel =
            serde_json::from_value(serde_json::json!({"host": "h:443"})).unwrap();
        assert_eq!(model.host.as_deref(), Some("h:443"));
        assert!(model.api_key.is_none());
    }
}
