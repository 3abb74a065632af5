//! Translation profiles.
//!
//! A [`TranslationProfile`] bundles every deployment-specific decision made
//! while translating a snapshot: component paths, metric names, properties,
//! the node birth condition and the Sparkplug identifiers. Every capability
//! has a default, so a profile only overrides what it changes.

use serde::{Deserialize, Serialize};

use crate::liveness::{self, BirthStatus, NodeIdentity};
use crate::model::{Component, Container, DataItem, Device};
use crate::naming::{self, MetricProperties};

/// Per-deployment translation strategy.
pub trait TranslationProfile: Send + Sync {
    /// Profile name, used in logs.
    fn name(&self) -> &str;

    fn component_path(&self, parent: &str, component: &Component) -> String {
        naming::component_path(parent, component)
    }

    fn resolve_name(&self, path: &str, owner: &dyn Container, item: &DataItem) -> String {
        naming::resolve_name(path, owner, item)
    }

    fn resolve_properties(&self, item: &DataItem) -> MetricProperties {
        naming::resolve_properties(item)
    }

    fn node_birth_status(&self, agent: &Device) -> BirthStatus {
        liveness::node_birth_status(agent)
    }

    fn node_birth_condition(&self, agent: &Device) -> bool {
        self.node_birth_status(agent).is_available()
    }

    fn group_and_node(&self, version: &str, agent: &Device) -> NodeIdentity {
        liveness::resolve_group_and_node(version, agent)
    }

    fn device_id(&self, device: &Device) -> String {
        liveness::resolve_device_id(device)
    }
}

/// Names metrics from composition, sub-type, type and name.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionProfile;

impl TranslationProfile for CompositionProfile {
    fn name(&self) -> &str {
        "composition"
    }
}

/// Names metrics by their raw data item id under the component path.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierProfile;

impl TranslationProfile for IdentifierProfile {
    fn name(&self) -> &str {
        "identifier"
    }

    fn resolve_name(&self, path: &str, _owner: &dyn Container, item: &DataItem) -> String {
        let leaf = if item.id.is_empty() {
            item.name.as_deref().unwrap_or_default()
        } else {
            item.id.as_str()
        };
        naming::join_path(path, leaf)
    }
}

/// Profile selection in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    #[default]
    Composition,
    Identifier,
}

impl ProfileKind {
    /// Build the selected profile.
    pub fn build(self) -> Box<dyn TranslationProfile> {
        match self {
            ProfileKind::Composition => Box::new(CompositionProfile),
            ProfileKind::Identifier => Box::new(IdentifierProfile),
        }
    }
}
