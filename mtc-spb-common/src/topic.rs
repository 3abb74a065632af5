use crate::error::{Error, Result};

/// Sparkplug B topic namespace.
pub const NAMESPACE: &str = "spBv1.0";

/// Sparkplug message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    NodeBirth,
    NodeDeath,
    DeviceBirth,
    DeviceDeath,
    NodeData,
    DeviceData,
    NodeCommand,
    DeviceCommand,
}

impl MessageType {
    /// Get the string representation used in topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::NodeBirth => "NBIRTH",
            MessageType::NodeDeath => "NDEATH",
            MessageType::DeviceBirth => "DBIRTH",
            MessageType::DeviceDeath => "DDEATH",
            MessageType::NodeData => "NDATA",
            MessageType::DeviceData => "DDATA",
            MessageType::NodeCommand => "NCMD",
            MessageType::DeviceCommand => "DCMD",
        }
    }

    /// Whether messages of this type are addressed to a device.
    pub fn is_device_scoped(&self) -> bool {
        matches!(
            self,
            MessageType::DeviceBirth
                | MessageType::DeviceDeath
                | MessageType::DeviceData
                | MessageType::DeviceCommand
        )
    }

    fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "NBIRTH" => MessageType::NodeBirth,
            "NDEATH" => MessageType::NodeDeath,
            "DBIRTH" => MessageType::DeviceBirth,
            "DDEATH" => MessageType::DeviceDeath,
            "NDATA" => MessageType::NodeData,
            "DDATA" => MessageType::DeviceData,
            "NCMD" => MessageType::NodeCommand,
            "DCMD" => MessageType::DeviceCommand,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for Sparkplug topics of one edge node.
///
/// Topics follow the pattern:
/// `spBv1.0/<group>/<message_type>/<node>[/<device>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    group: String,
    node: String,
}

impl TopicBuilder {
    /// Create a topic builder for a group and edge node.
    ///
    /// Fails if either identifier is empty or contains a topic separator
    /// or wildcard character.
    pub fn new(group: impl Into<String>, node: impl Into<String>) -> Result<Self> {
        let group = group.into();
        let node = node.into();
        validate_id("group", &group)?;
        validate_id("node", &node)?;
        Ok(Self { group, node })
    }

    /// Group identifier.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Edge node identifier.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Build a node-level topic.
    ///
    /// # Example
    /// ```
    /// use mtc_spb_common::topic::{MessageType, TopicBuilder};
    ///
    /// let builder = TopicBuilder::new("1_7_0_3", "agent1").unwrap();
    /// assert_eq!(
    ///     builder.node_topic(MessageType::NodeBirth),
    ///     "spBv1.0/1_7_0_3/NBIRTH/agent1"
    /// );
    /// ```
    pub fn node_topic(&self, kind: MessageType) -> String {
        format!("{}/{}/{}/{}", NAMESPACE, self.group, kind.as_str(), self.node)
    }

    /// Build a device-level topic.
    ///
    /// # Example
    /// ```
    /// use mtc_spb_common::topic::{MessageType, TopicBuilder};
    ///
    /// let builder = TopicBuilder::new("1_7_0_3", "agent1").unwrap();
    /// assert_eq!(
    ///     builder.device_topic(MessageType::DeviceData, "dev-123").unwrap(),
    ///     "spBv1.0/1_7_0_3/DDATA/agent1/dev-123"
    /// );
    /// ```
    pub fn device_topic(&self, kind: MessageType, device: &str) -> Result<String> {
        validate_id("device", device)?;
        Ok(format!(
            "{}/{}/{}/{}/{}",
            NAMESPACE,
            self.group,
            kind.as_str(),
            self.node,
            device
        ))
    }

    /// Topic filter matching every device command addressed to this node.
    pub fn device_command_filter(&self) -> String {
        format!(
            "{}/{}/{}/{}/+",
            NAMESPACE,
            self.group,
            MessageType::DeviceCommand.as_str(),
            self.node
        )
    }
}

fn validate_id(what: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Topic(format!("{} id cannot be empty", what)));
    }
    if id.contains(['/', '+', '#']) {
        return Err(Error::Topic(format!(
            "{} id '{}' contains a reserved character",
            what, id
        )));
    }
    Ok(())
}

/// Parse a Sparkplug topic into its components.
///
/// Returns `None` if the topic doesn't match the expected pattern.
pub fn parse_topic(topic: &str) -> Option<ParsedTopic<'_>> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() < 4 || parts[0] != NAMESPACE {
        return None;
    }

    let kind = MessageType::parse(parts[2])?;
    let device = match (kind.is_device_scoped(), parts.len()) {
        (true, 5) => Some(parts[4]),
        (false, 4) => None,
        _ => return None,
    };

    Some(ParsedTopic {
        group: parts[1],
        kind,
        node: parts[3],
        device,
    })
}

/// Parsed components of a Sparkplug topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    pub group: &'a str,
    pub kind: MessageType,
    pub node: &'a str,
    pub device: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builder() {
        let builder = TopicBuilder::new("1_7_0_3", "agent1").unwrap();

        assert_eq!(
            builder.node_topic(MessageType::NodeDeath),
            "spBv1.0/1_7_0_3/NDEATH/agent1"
        );
        assert_eq!(
            builder
                .device_topic(MessageType::DeviceBirth, "dev-123")
                .unwrap(),
            "spBv1.0/1_7_0_3/DBIRTH/agent1/dev-123"
        );
        assert_eq!(
            builder.device_command_filter(),
            "spBv1.0/1_7_0_3/DCMD/agent1/+"
        );
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(TopicBuilder::new("", "agent1").is_err());
        assert!(TopicBuilder::new("1.7", "agent/1").is_err());

        let builder = TopicBuilder::new("g", "n").unwrap();
        assert!(builder.device_topic(MessageType::DeviceData, "").is_err());
        assert!(builder.device_topic(MessageType::DeviceData, "a#b").is_err());
    }

    #[test]
    fn test_parse_topic() {
        let parsed = parse_topic("spBv1.0/1_7_0_3/DCMD/agent1/dev-123").unwrap();
        assert_eq!(parsed.group, "1_7_0_3");
        assert_eq!(parsed.kind, MessageType::DeviceCommand);
        assert_eq!(parsed.node, "agent1");
        assert_eq!(parsed.device, Some("dev-123"));

        let parsed = parse_topic("spBv1.0/g/NCMD/agent1").unwrap();
        assert_eq!(parsed.kind, MessageType::NodeCommand);
        assert_eq!(parsed.device, None);
    }

    #[test]
    fn test_parse_invalid_topic() {
        assert!(parse_topic("invalid/topic").is_none());
        assert!(parse_topic("spBv1.0/g/UNKNOWN/n").is_none());
        assert!(parse_topic("spBv1.0/g/NCMD/n/extra").is_none());
        assert!(parse_topic("spBv1.0/g/DCMD/n").is_none());
        assert!(parse_topic("other/g/NCMD/n").is_none());
    }
}
