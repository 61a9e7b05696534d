//! Read-only data sources.
//!
//! Each data source looks an object up by id with a single control-plane call
//! and maps the full response into state.

pub mod application;
pub mod piped;

use serde::{Deserialize, Serialize};

use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

pub use application::ApplicationDataSource;
pub use piped::PipedDataSource;

/// The data source types served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceKind {
    /// `pipecd_application`
    Application,
    /// `pipecd_piped`
    Piped,
}

impl DataSourceKind {
    /// Every data source type, in registration order.
    pub const ALL: [DataSourceKind; 2] = [DataSourceKind::Application, DataSourceKind::Piped];

    /// The type name used in configuration.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Application => application::TYPE_NAME,
            Self::Piped => piped::TYPE_NAME,
        }
    }

    /// Look up a data source type by name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }

    /// The schema of this data source type.
    pub fn schema(&self) -> Schema {
        match self {
            Self::Application => application::schema(),
            Self::Piped => piped::schema(),
        }
    }
}

/// Deploy targets of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginModel {
    /// Plugin name.
    pub name: String,
    /// Targets the plugin may deploy to.
    pub deploy_targets: Vec<String>,
}

/// Sort plugins by name, leaving an empty collection absent.
pub(crate) fn sorted_plugins(mut plugins: Vec<PluginModel>) -> Option<Vec<PluginModel>> {
    if plugins.is_empty() {
        return None;
    }
    plugins.sort_by(|a, b| a.name.cmp(&b.name));
    Some(plugins)
}

/// The `id` lookup key shared by every data source.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LookupModel {
    pub id: String,
}

/// Computed `plugins` attribute: a list of `{name, deploy_targets}`.
pub(crate) fn plugins_attribute(description: &str) -> Attribute {
    Attribute::new(
        AttributeType::list(AttributeType::object([
            ("name", AttributeType::String),
            ("deploy_targets", AttributeType::list(AttributeType::String)),
        ])),
        AttributeFlags::computed(),
    )
    .with_description(description)
}
