//! Snapshot translation and command routing.
//!
//! The translator sits between the two sides of the relay: it turns each
//! polled [`Snapshot`] into one [`CycleBatch`] for the publisher, and routes
//! commands received from the Sparkplug side back to the publisher (rebirth)
//! or the poller (writes).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use mtc_spb_bridge_framework::{FrameReceiver, FrameSender};

use crate::frames::{
    Command, CycleBatch, DestinationInbound, DestinationOutbound, DeviceBatch, MetricFrame,
    SourceInbound, SourceOutbound,
};
use crate::liveness::BirthStatus;
use crate::model::{Container, DataItem, Device, Snapshot};
use crate::phase::{PhaseTracker, SessionPhase};
use crate::profile::TranslationProfile;

/// Translate every data item of `device`, in document order.
///
/// Direct data items come first, then each component depth-first.
pub fn translate_device(profile: &dyn TranslationProfile, device: &Device) -> Vec<MetricFrame> {
    let mut frames = Vec::new();
    collect(profile, "", device, &mut frames);
    frames
}

fn collect(
    profile: &dyn TranslationProfile,
    path: &str,
    owner: &dyn Container,
    frames: &mut Vec<MetricFrame>,
) {
    for item in owner.data_items() {
        frames.push(translate_item(profile, path, owner, item));
    }
    for component in owner.components() {
        let path = profile.component_path(path, component);
        collect(profile, &path, component, frames);
    }
}

fn translate_item(
    profile: &dyn TranslationProfile,
    path: &str,
    owner: &dyn Container,
    item: &DataItem,
) -> MetricFrame {
    MetricFrame {
        name: profile.resolve_name(path, owner, item),
        value: item.current_sample().map(|s| s.value.clone()),
        properties: profile.resolve_properties(item),
    }
}

/// Translate a snapshot into a cycle batch.
///
/// Returns `None` when the snapshot has no agent device: without it there
/// is neither a node identity nor a birth condition.
pub fn translate_snapshot(
    profile: &dyn TranslationProfile,
    cycle: u64,
    taken_at: DateTime<Utc>,
    snapshot: &Snapshot,
) -> Option<CycleBatch> {
    let agent = snapshot.agent()?;

    let identity = profile.group_and_node(&snapshot.version, agent);
    let birth = profile.node_birth_status(agent);

    let node_metrics = translate_device(profile, agent);
    warn_collisions(&identity.node, &node_metrics);

    let devices = snapshot
        .devices()
        .map(|device| {
            let device_id = profile.device_id(device);
            let metrics = translate_device(profile, device);
            warn_collisions(&device_id, &metrics);
            DeviceBatch { device_id, metrics }
        })
        .collect();

    Some(CycleBatch {
        cycle,
        taken_at,
        identity,
        birth,
        node_metrics,
        devices,
    })
}

/// Log each metric name that appears more than once. Both metrics are kept.
fn warn_collisions(scope: &str, frames: &[MetricFrame]) -> usize {
    let mut seen = HashSet::with_capacity(frames.len());
    let mut collisions = 0;
    for frame in frames {
        if !seen.insert(frame.name.as_str()) {
            collisions += 1;
            warn!(scope = %scope, metric = %frame.name, "Metric name collision");
        }
    }
    collisions
}

/// Moves frames between the source and destination sides.
pub struct Translator {
    profile: Box<dyn TranslationProfile>,
    snapshots: FrameReceiver<SourceOutbound>,
    commands: FrameReceiver<DestinationOutbound>,
    batches: FrameSender<DestinationInbound>,
    writes: FrameSender<SourceInbound>,
    phase: PhaseTracker,
}

impl Translator {
    pub fn new(
        profile: Box<dyn TranslationProfile>,
        snapshots: FrameReceiver<SourceOutbound>,
        commands: FrameReceiver<DestinationOutbound>,
        batches: FrameSender<DestinationInbound>,
        writes: FrameSender<SourceInbound>,
    ) -> Self {
        Self {
            profile,
            snapshots,
            commands,
            batches,
            writes,
            phase: PhaseTracker::new(),
        }
    }

    /// Report phases on a shared tracker.
    pub fn with_phase(mut self, phase: PhaseTracker) -> Self {
        self.phase = phase;
        self
    }

    /// Run until both inputs are closed and drained.
    pub async fn run(self) {
        info!(profile = self.profile.name(), "Starting translator");

        let mut snapshots_open = true;
        let mut commands_open = true;

        while snapshots_open || commands_open {
            tokio::select! {
                frame = self.snapshots.recv(), if snapshots_open => match frame {
                    Some(frame) => self.handle_snapshot(frame).await,
                    None => {
                        debug!("Source-outbound closed");
                        snapshots_open = false;
                    }
                },
                frame = self.commands.recv(), if commands_open => match frame {
                    Some(frame) => self.handle_command(frame).await,
                    None => {
                        debug!("Destination-outbound closed");
                        commands_open = false;
                    }
                },
            }
        }

        info!("Translator stopped");
    }

    async fn handle_snapshot(&self, frame: SourceOutbound) {
        let SourceOutbound::Snapshot {
            cycle,
            taken_at,
            snapshot,
        } = frame;

        self.phase.enter(SessionPhase::Translating);
        let Some(batch) = translate_snapshot(self.profile.as_ref(), cycle, taken_at, &snapshot)
        else {
            warn!(
                cycle,
                taken_at = %taken_at.to_rfc3339(),
                "Snapshot has no agent device, skipping"
            );
            return;
        };

        if let BirthStatus::Undefined(e) = &batch.birth {
            warn!(cycle, node = %batch.identity, error = %e, "Node birth condition is undefined");
        }

        debug!(
            cycle,
            node = %batch.identity,
            birth = %batch.birth,
            devices = batch.devices.len(),
            "Snapshot translated"
        );

        if self
            .batches
            .send(DestinationInbound::Cycle(batch))
            .await
            .is_err()
        {
            debug!(cycle, "Destination-inbound closed, batch discarded");
        }
    }

    async fn handle_command(&self, frame: DestinationOutbound) {
        let DestinationOutbound::Command(command) = frame;

        let result = match command {
            Command::Rebirth => {
                info!("Rebirth requested");
                self.batches.send(DestinationInbound::Rebirth).await
            }
            Command::Write {
                device,
                metric,
                value,
            } => {
                self.writes
                    .send(SourceInbound::Write {
                        device,
                        metric,
                        value,
                    })
                    .await
            }
        };

        if let Err(e) = result {
            debug!(error = %e, "Command discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::PROBE;
    use crate::profile::ProfileKind;
    use crate::streams::tests::CURRENT;
    use mtc_spb_bridge_framework::{Closable, FrameChannel};
    use mtc_spb_common::MetricValue;

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::parse_probe(PROBE).unwrap();
        snapshot.apply_current(CURRENT).unwrap();
        snapshot
    }

    #[test]
    fn test_translate_snapshot() {
        let profile = ProfileKind::Composition.build();
        let batch = translate_snapshot(profile.as_ref(), 7, Utc::now(), &snapshot()).unwrap();

        assert_eq!(batch.cycle, 7);
        assert_eq!(batch.identity.to_string(), "1_7_0_3/agent1");
        assert_eq!(batch.birth, BirthStatus::Available);

        assert_eq!(batch.node_metrics.len(), 1);
        assert_eq!(batch.node_metrics[0].name, "AvailabilityAgent_avail");
        assert_eq!(batch.node_metrics[0].value.as_deref(), Some("AVAILABLE"));

        assert_eq!(batch.devices.len(), 1);
        let device = &batch.devices[0];
        assert_eq!(device.device_id, "dev-123");

        let names: Vec<_> = device.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "AvailabilityD1_avail",
                "Axes-1/Linear-X/ActualPositionXpos",
                "Axes-1/Linear-X/MotorTemperatureXtemp",
                "Axes-1/Linear-X/PositionXtravel",
            ]
        );
        assert_eq!(device.metrics[1].value.as_deref(), Some("12.5"));
        assert_eq!(device.metrics[3].value.as_deref(), Some("NORMAL"));
    }

    #[test]
    fn test_snapshot_without_agent_is_skipped() {
        let mut snapshot = snapshot();
        snapshot.devices.retain(|d| !d.is_agent);

        let profile = ProfileKind::Composition.build();
        assert!(translate_snapshot(profile.as_ref(), 1, Utc::now(), &snapshot).is_none());
    }

    #[test]
    fn test_collisions_are_counted_and_kept() {
        let profile = ProfileKind::Composition.build();
        let mut device = snapshot().devices().next().unwrap().clone();
        let duplicate = device.data_items[0].clone();
        device.data_items.push(duplicate);

        let frames = translate_device(profile.as_ref(), &device);
        assert_eq!(frames[0].name, frames[1].name);
        assert_eq!(warn_collisions("dev-123", &frames), 1);
    }

    #[tokio::test]
    async fn test_run_routes_frames_and_stops_when_inputs_close() {
        let source_outbound = FrameChannel::bounded("source-outbound", 4);
        let source_inbound = FrameChannel::bounded("source-inbound", 4);
        let destination_outbound = FrameChannel::bounded("destination-outbound", 4);
        let destination_inbound = FrameChannel::bounded("destination-inbound", 4);

        let translator = Translator::new(
            ProfileKind::Composition.build(),
            source_outbound.receiver(),
            destination_outbound.receiver(),
            destination_inbound.sender(),
            source_inbound.sender(),
        );

        source_outbound
            .sender()
            .send(SourceOutbound::Snapshot {
                cycle: 1,
                taken_at: Utc::now(),
                snapshot: snapshot(),
            })
            .await
            .unwrap();
        destination_outbound
            .sender()
            .send(DestinationOutbound::Command(Command::Write {
                device: Some("dev-123".to_string()),
                metric: "Axes-1/Linear-X/ActualPositionXpos".to_string(),
                value: MetricValue::from("0"),
            }))
            .await
            .unwrap();

        // Buffered frames are still delivered after close.
        source_outbound.close();
        destination_outbound.close();

        translator.run().await;

        let batch = destination_inbound.receiver().recv().await;
        assert!(matches!(batch, Some(DestinationInbound::Cycle(b)) if b.cycle == 1));

        let write = source_inbound.receiver().recv().await;
        assert!(matches!(
            write,
            Some(SourceInbound::Write { device: Some(d), .. }) if d == "dev-123"
        ));
    }

    #[tokio::test]
    async fn test_rebirth_command_goes_to_publisher() {
        let snapshots = FrameChannel::<SourceOutbound>::bounded("source-outbound", 1);
        let writes = FrameChannel::bounded("source-inbound", 1);
        let commands = FrameChannel::bounded("destination-outbound", 1);
        let batches = FrameChannel::bounded("destination-inbound", 1);

        let translator = Translator::new(
            ProfileKind::Composition.build(),
            snapshots.receiver(),
            commands.receiver(),
            batches.sender(),
            writes.sender(),
        );

        commands
            .sender()
            .send(DestinationOutbound::Command(Command::Rebirth))
            .await
            .unwrap();
        snapshots.close();
        commands.close();

        translator.run().await;

        assert_eq!(batches.receiver().recv().await, Some(DestinationInbound::Rebirth));
        assert!(writes.is_empty());
    }
}
