//! Managed resources.
//!
//! The provider manages a fixed set of resource types, listed in
//! [`ResourceKind::ALL`]. Each type has its own module with a schema, a typed
//! state model and a synchronizer that performs the control-plane calls.

pub mod application;
pub mod piped;

use std::collections::{BTreeMap, HashMap};

use crate::api::apiservice::DeployTargets;
use crate::schema::Schema;
use crate::types::UNKNOWN_VALUE;

pub use application::ApplicationResource;
pub use piped::PipedResource;

/// The resource types served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `pipecd_application`
    Application,
    /// `pipecd_piped`
    Piped,
}

impl ResourceKind {
    /// Every resource type, in registration order.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Application, ResourceKind::Piped];

    /// The type name used in configuration.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Application => application::TYPE_NAME,
            Self::Piped => piped::TYPE_NAME,
        }
    }

    /// Look up a resource type by name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }

    /// The schema of this resource type.
    pub fn schema(&self) -> Schema {
        match self {
            Self::Application => application::schema(),
            Self::Piped => piped::schema(),
        }
    }
}

/// A string from planned state, with unknown values read as empty.
pub(crate) fn known(value: &Option<String>) -> &str {
    match value.as_deref() {
        Some(s) if s != UNKNOWN_VALUE => s,
        _ => "",
    }
}

/// Convert a plugin mapping into the wire representation.
pub(crate) fn deploy_targets_to_wire(
    plugins: &BTreeMap<String, Vec<String>>,
) -> HashMap<String, DeployTargets> {
    plugins
        .iter()
        .map(|(name, targets)| {
            (
                name.clone(),
                DeployTargets {
                    deploy_targets: targets.clone(),
                },
            )
        })
        .collect()
}

/// Convert a wire plugin mapping, leaving an empty mapping absent.
pub(crate) fn deploy_targets_from_wire(
    plugins: &HashMap<String, DeployTargets>,
) -> Option<BTreeMap<String, Vec<String>>> {
    if plugins.is_empty() {
        return None;
    }
    Some(
        plugins
            .iter()
            .map(|(name, targets)| (name.clone(), targets.deploy_targets.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_lookup() {
        assert_eq!(
            ResourceKind::from_type_name("pipecd_application"),
            Some(ResourceKind::Application)
        );
        assert_eq!(
            ResourceKind::from_type_name("pipecd_piped"),
            Some(ResourceKind::Piped)
        );
        assert_eq!(ResourceKind::from_type_name("pipecd_project"), None);
    }

    #[test]
    fn test_known() {
        assert_eq!(known(&Some("web".to_string())), "web");
        assert_eq!(known(&Some(UNKNOWN_VALUE.to_string())), "");
        assert_eq!(known(&None), "");
    }

    #[test]
    fn test_deploy_targets_conversion() {
        assert!(deploy_targets_from_wire(&HashMap::new()).is_none());

        let mut plugins = BTreeMap::new();
        plugins.insert("kubernetes".to_string(), vec!["cluster-1".to_string()]);
        let wire = deploy_targets_to_wire(&plugins);
        assert_eq!(wire["kubernetes"].deploy_targets, vec!["cluster-1"]);
        assert_eq!(deploy_targets_from_wire(&wire), Some(plugins));
    }
}
