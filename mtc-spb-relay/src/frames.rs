//! Frames exchanged between relay workers, and the channels carrying them.
//!
//! ```text
//!             source-outbound               destination-inbound
//!   poller  ------------------>  translator  ------------------>  publisher
//!           <------------------              <------------------  (sink)
//!             source-inbound                destination-outbound
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mtc_spb_bridge_framework::{Closable, FrameChannel};
use mtc_spb_common::{Metric, MetricValue};

use crate::liveness::{BirthStatus, NodeIdentity};
use crate::model::Snapshot;
use crate::naming::MetricProperties;

pub const SOURCE_OUTBOUND: &str = "source-outbound";
pub const SOURCE_INBOUND: &str = "source-inbound";
pub const DESTINATION_OUTBOUND: &str = "destination-outbound";
pub const DESTINATION_INBOUND: &str = "destination-inbound";

/// One data item, translated.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFrame {
    pub name: String,
    /// Current value; `None` before the first sample.
    pub value: Option<String>,
    pub properties: MetricProperties,
}

impl MetricFrame {
    /// Build the Sparkplug metric for this frame.
    pub fn to_metric(&self, timestamp: i64) -> Metric {
        Metric::string(self.name.clone(), self.value.clone())
            .with_timestamp(timestamp)
            .with_properties(self.properties.to_property_set())
    }
}

/// Metrics of one non-agent device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBatch {
    pub device_id: String,
    pub metrics: Vec<MetricFrame>,
}

/// Everything translated from one snapshot. Published as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleBatch {
    pub cycle: u64,
    pub taken_at: DateTime<Utc>,
    pub identity: NodeIdentity,
    pub birth: BirthStatus,
    /// Metrics of the agent device.
    pub node_metrics: Vec<MetricFrame>,
    pub devices: Vec<DeviceBatch>,
}

/// A command received from the Sparkplug side.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `Node Control/Rebirth` was set.
    Rebirth,
    /// Any other metric write (`NCMD` when `device` is `None`, else `DCMD`).
    Write {
        device: Option<String>,
        metric: String,
        value: MetricValue,
    },
}

/// Frames from the poller.
#[derive(Debug, Clone)]
pub enum SourceOutbound {
    Snapshot {
        cycle: u64,
        taken_at: DateTime<Utc>,
        snapshot: Snapshot,
    },
}

/// Frames to the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceInbound {
    Write {
        device: Option<String>,
        metric: String,
        value: MetricValue,
    },
}

/// Frames from the Sparkplug sink.
#[derive(Debug, Clone, PartialEq)]
pub enum DestinationOutbound {
    Command(Command),
}

/// Frames to the publisher.
#[derive(Debug, Clone, PartialEq)]
pub enum DestinationInbound {
    Cycle(CycleBatch),
    Rebirth,
}

/// The four bounded channels of a relay session.
#[derive(Debug, Clone)]
pub struct RelayChannels {
    pub source_outbound: FrameChannel<SourceOutbound>,
    pub source_inbound: FrameChannel<SourceInbound>,
    pub destination_outbound: FrameChannel<DestinationOutbound>,
    pub destination_inbound: FrameChannel<DestinationInbound>,
}

impl RelayChannels {
    /// Create all four channels with the same capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            source_outbound: FrameChannel::bounded(SOURCE_OUTBOUND, capacity),
            source_inbound: FrameChannel::bounded(SOURCE_INBOUND, capacity),
            destination_outbound: FrameChannel::bounded(DESTINATION_OUTBOUND, capacity),
            destination_inbound: FrameChannel::bounded(DESTINATION_INBOUND, capacity),
        }
    }

    /// The channels in termination order.
    pub fn closables(&self) -> Vec<Arc<dyn Closable>> {
        vec![
            Arc::new(self.source_outbound.clone()),
            Arc::new(self.source_inbound.clone()),
            Arc::new(self.destination_outbound.clone()),
            Arc::new(self.destination_inbound.clone()),
        ]
    }

    /// Whether every channel is closed.
    pub fn all_closed(&self) -> bool {
        self.closables().iter().all(|c| c.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtc_spb_bridge_framework::TerminatorService;
    use mtc_spb_common::DataType;

    #[test]
    fn test_closables_in_termination_order() {
        let channels = RelayChannels::new(4);
        let names: Vec<_> = channels
            .closables()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                SOURCE_OUTBOUND,
                SOURCE_INBOUND,
                DESTINATION_OUTBOUND,
                DESTINATION_INBOUND
            ]
        );
    }

    #[test]
    fn test_termination_sequence_twice() {
        let channels = RelayChannels::new(4);
        let closables = channels.closables();

        assert_eq!(TerminatorService::close_channels(&closables), 4);
        assert_eq!(TerminatorService::close_channels(&closables), 0);
        assert!(channels.all_closed());
    }

    #[test]
    fn test_metric_frame_to_metric() {
        let frame = MetricFrame {
            name: "Linear-X/Availability".to_string(),
            value: None,
            properties: MetricProperties {
                read_only: true,
                can_write: false,
                id: String::new(),
                name: None,
                type_name: "AVAILABILITY".to_string(),
                sub_type: None,
                native_units: None,
                units: None,
                composition_id: None,
            },
        };

        let metric = frame.to_metric(42);
        assert_eq!(metric.name, "Linear-X/Availability");
        assert_eq!(metric.timestamp, 42);
        assert_eq!(metric.datatype, DataType::String);
        assert_eq!(metric.value, MetricValue::Null);
        assert_eq!(metric.properties.len(), 8);
    }
}
