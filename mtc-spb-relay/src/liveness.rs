//! Birth conditions and Sparkplug identity resolution.

use std::fmt;

use crate::model::{Device, LookupError};

/// Event type the birth condition is read from.
pub const AVAILABILITY: &str = "AVAILABILITY";

/// Whether a node may be born, and why not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BirthStatus {
    /// The agent reports `AVAILABLE`.
    Available,
    /// The agent reports another value, or nothing yet.
    NotAvailable(Option<String>),
    /// The availability event could not be resolved.
    Undefined(LookupError),
}

impl BirthStatus {
    /// Whether this status allows a birth.
    pub fn is_available(&self) -> bool {
        matches!(self, BirthStatus::Available)
    }
}

impl fmt::Display for BirthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BirthStatus::Available => write!(f, "available"),
            BirthStatus::NotAvailable(Some(value)) => write!(f, "not available ({})", value),
            BirthStatus::NotAvailable(None) => write!(f, "not available (no sample)"),
            BirthStatus::Undefined(e) => write!(f, "undefined ({})", e),
        }
    }
}

/// Evaluate the agent's `AVAILABILITY` event.
pub fn node_birth_status(agent: &Device) -> BirthStatus {
    match agent.get_event_value(AVAILABILITY) {
        Ok("AVAILABLE") => BirthStatus::Available,
        Ok(other) => BirthStatus::NotAvailable(Some(other.to_string())),
        Err(LookupError::NoSampleYet { .. }) => BirthStatus::NotAvailable(None),
        Err(e) => BirthStatus::Undefined(e),
    }
}

/// Whether the node may be born this cycle.
pub fn resolve_node_birth_condition(agent: &Device) -> bool {
    node_birth_status(agent).is_available()
}

/// Sparkplug group and edge node identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub group: String,
    pub node: String,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.node)
    }
}

/// Replace every non-alphanumeric character with `_` (`1.7.0.3` → `1_7_0_3`).
///
/// Sparkplug consumers such as Ignition reject periods in paths.
pub fn normalize_version(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Group is the normalized probe version, node is the agent id.
pub fn resolve_group_and_node(version: &str, agent: &Device) -> NodeIdentity {
    NodeIdentity {
        group: normalize_version(version),
        node: agent.id.clone(),
    }
}

/// Sparkplug device id of an MTConnect device: its uuid.
pub fn resolve_device_id(device: &Device) -> String {
    device.uuid.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Sample, Snapshot};
    use crate::model::tests::PROBE;
    use chrono::Utc;

    fn agent_with(value: Option<&str>) -> Device {
        let mut agent = Snapshot::parse_probe(PROBE).unwrap().agent().unwrap().clone();
        if let Some(value) = value {
            agent
                .find_data_item_mut("agent_avail")
                .unwrap()
                .push_sample(Sample::new(Utc::now(), value));
        }
        agent
    }

    #[test]
    fn test_birth_status() {
        assert_eq!(node_birth_status(&agent_with(Some("AVAILABLE"))), BirthStatus::Available);
        assert!(resolve_node_birth_condition(&agent_with(Some("AVAILABLE"))));

        assert_eq!(
            node_birth_status(&agent_with(Some("UNAVAILABLE"))),
            BirthStatus::NotAvailable(Some("UNAVAILABLE".to_string()))
        );
        assert_eq!(node_birth_status(&agent_with(None)), BirthStatus::NotAvailable(None));
        assert!(!resolve_node_birth_condition(&agent_with(None)));
    }

    #[test]
    fn test_birth_status_undefined_without_event() {
        let agent = Device::parse(r#"<Agent id="a"/>"#).unwrap();
        let status = node_birth_status(&agent);
        assert!(matches!(status, BirthStatus::Undefined(LookupError::NotFound { .. })));
        assert!(!status.is_available());
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("1.7.0.3"), "1_7_0_3");
        assert_eq!(normalize_version("2.0 beta"), "2_0_beta");
        assert_eq!(normalize_version("0.0.0.0"), "0_0_0_0");
    }

    #[test]
    fn test_identity() {
        let snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let identity = resolve_group_and_node(&snapshot.version, snapshot.agent().unwrap());
        assert_eq!(
            identity,
            NodeIdentity {
                group: "1_7_0_3".to_string(),
                node: "agent1".to_string(),
            }
        );
        assert_eq!(identity.to_string(), "1_7_0_3/agent1");

        let device = snapshot.devices().next().unwrap();
        assert_eq!(resolve_device_id(device), "dev-123");
    }
}
