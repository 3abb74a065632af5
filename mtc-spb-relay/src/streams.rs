//! Applying `MTConnectStreams` (current) documents to a snapshot.

use chrono::{DateTime, Utc};
use roxmltree::Node;

use crate::model::{ParseError, Sample, Snapshot};

/// A sample read from a streams document, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub data_item_id: String,
    pub sample: Sample,
}

/// Parse every observation of a streams document, ordered by sequence.
///
/// Observations without a sequence number keep their document order and
/// sort before sequenced ones.
pub fn parse_current(document: &str) -> Result<Vec<Observation>, ParseError> {
    let doc = roxmltree::Document::parse(document)
        .map_err(|e| ParseError::malformed(e.to_string()))?;
    let root = doc.root_element();

    if root.tag_name().name() != "MTConnectStreams" {
        return Err(ParseError::malformed(format!(
            "expected MTConnectStreams, found {}",
            root.tag_name().name()
        )));
    }

    let mut observations = root
        .descendants()
        .filter(|n| n.is_element())
        .filter_map(|n| n.attribute("dataItemId").map(|id| (n, id)))
        .map(|(n, id)| observation(n, id))
        .collect::<Result<Vec<_>, _>>()?;

    observations.sort_by_key(|o| o.sample.sequence);
    Ok(observations)
}

fn observation(node: Node<'_, '_>, id: &str) -> Result<Observation, ParseError> {
    let raw_ts = node.attribute("timestamp").ok_or_else(|| {
        ParseError::malformed(format!("observation of '{}' has no timestamp", id))
    })?;
    let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
        ParseError::malformed(format!("observation of '{}' has a bad timestamp '{}'", id, raw_ts))
    })?;

    let in_condition = node
        .parent_element()
        .is_some_and(|p| p.tag_name().name() == "Condition");

    let value = if in_condition {
        node.tag_name().name().to_ascii_uppercase()
    } else {
        node.text().unwrap_or_default().trim().to_string()
    };

    let mut sample = Sample::new(timestamp, value);
    if let Some(seq) = node.attribute("sequence").and_then(|s| s.parse().ok()) {
        sample = sample.with_sequence(seq);
    }

    Ok(Observation {
        data_item_id: id.to_string(),
        sample,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Some agents omit the zone designator; MTConnect timestamps are UTC.
    raw.parse::<chrono::NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc())
}

impl Snapshot {
    /// Apply a current document to this snapshot.
    ///
    /// Returns the number of samples applied. Observations of unknown data
    /// items and samples older than the item's current sample are skipped.
    pub fn apply_current(&mut self, document: &str) -> Result<usize, ParseError> {
        let mut applied = 0;

        for obs in parse_current(document)? {
            match self.find_data_item_mut(&obs.data_item_id) {
                Some(item) => {
                    if item.push_sample(obs.sample) {
                        applied += 1;
                    } else {
                        tracing::debug!(data_item = %obs.data_item_id, "Out-of-order sample skipped");
                    }
                }
                None => {
                    tracing::trace!(data_item = %obs.data_item_id, "Observation for unknown data item");
                }
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::tests::PROBE;
    use crate::model::{Category, Scope};

    pub(crate) const CURRENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectStreams xmlns="urn:mtconnect.org:MTConnectStreams:1.7">
  <Header creationTime="2024-01-01T00:00:01Z" sender="agent" instanceId="1" version="1.7.0.3" nextSequence="20" firstSequence="1" lastSequence="19"/>
  <Streams>
    <DeviceStream name="Agent" uuid="agent-uuid">
      <ComponentStream component="Agent" componentId="agent1">
        <Events>
          <Availability dataItemId="agent_avail" timestamp="2024-01-01T00:00:00.5Z" sequence="2">AVAILABLE</Availability>
        </Events>
      </ComponentStream>
    </DeviceStream>
    <DeviceStream name="Mill" uuid="dev-123">
      <ComponentStream component="Linear" name="X" componentId="X">
        <Samples>
          <Position dataItemId="Xpos" timestamp="2024-01-01T00:00:00.9Z" sequence="9" subType="ACTUAL">12.5</Position>
          <Position dataItemId="Xpos" timestamp="2024-01-01T00:00:00.8Z" sequence="8" subType="ACTUAL">12.0</Position>
          <Temperature dataItemId="Xtemp" timestamp="2024-01-01T00:00:00.1Z" sequence="3">UNAVAILABLE</Temperature>
        </Samples>
        <Condition>
          <Normal dataItemId="Xtravel" timestamp="2024-01-01T00:00:00.2Z" sequence="4" type="POSITION"/>
        </Condition>
      </ComponentStream>
      <ComponentStream component="Device" componentId="d1">
        <Events>
          <Availability dataItemId="d1_avail" timestamp="2024-01-01T00:00:00.3Z" sequence="5">AVAILABLE</Availability>
          <Execution dataItemId="gone" timestamp="2024-01-01T00:00:00.3Z" sequence="6">ACTIVE</Execution>
        </Events>
      </ComponentStream>
    </DeviceStream>
  </Streams>
</MTConnectStreams>"#;

    #[test]
    fn test_parse_current_orders_by_sequence() {
        let observations = parse_current(CURRENT).unwrap();
        let seqs: Vec<_> = observations
            .iter()
            .map(|o| o.sample.sequence.unwrap())
            .collect();
        assert_eq!(seqs, vec![2, 3, 4, 5, 6, 8, 9]);
    }

    #[test]
    fn test_apply_current() {
        let mut snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let applied = snapshot.apply_current(CURRENT).unwrap();
        // "gone" is not in the probe.
        assert_eq!(applied, 6);

        let agent = snapshot.agent().unwrap();
        assert_eq!(agent.is_event_available("AVAILABILITY"), Ok(true));

        let device = snapshot.devices().next().unwrap();
        let pos = device
            .get_data_item(Category::Sample, "POSITION", Scope::Recursive)
            .unwrap();
        assert_eq!(pos.current_sample().unwrap().value, "12.5");
        assert_eq!(pos.previous_sample().unwrap().value, "12.0");

        let travel = device
            .get_data_item(Category::Condition, "POSITION", Scope::Recursive)
            .unwrap();
        assert_eq!(travel.current_sample().unwrap().value, "NORMAL");
    }

    #[test]
    fn test_rejects_non_streams_document() {
        let mut snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let error = r#"<MTConnectError><Errors><Error errorCode="INTERNAL_ERROR">boom</Error></Errors></MTConnectError>"#;
        assert!(matches!(
            snapshot.apply_current(error),
            Err(ParseError::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        let doc = r#"<MTConnectStreams><Streams><DeviceStream><ComponentStream><Events>
            <Availability dataItemId="a" timestamp="yesterday">AVAILABLE</Availability>
        </Events></ComponentStream></DeviceStream></Streams></MTConnectStreams>"#;
        assert!(parse_current(doc).is_err());
    }

    #[test]
    fn test_timestamp_without_zone_is_utc() {
        let ts = parse_timestamp("2024-01-01T00:00:00.250").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_704_067_200_250);
    }
}
