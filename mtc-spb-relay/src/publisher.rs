//! Sparkplug session planning and publishing (destination side).
//!
//! [`SessionState`] records what the Sparkplug side currently believes is
//! alive and plans the messages that bring it in line with a new
//! [`CycleBatch`]. [`SparkplugPublisher`] executes the plan on a sink.

use tracing::{debug, error, info, warn};

use mtc_spb_bridge_framework::FrameReceiver;
use mtc_spb_common::{Metric, REBIRTH_METRIC};

use crate::frames::{CycleBatch, DestinationInbound, MetricFrame};
use crate::liveness::NodeIdentity;
use crate::phase::{PhaseTracker, SessionPhase};
use crate::sink::{PublishError, SparkplugSink};

/// One Sparkplug message to publish.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    NodeBirth {
        node: NodeIdentity,
        metrics: Vec<Metric>,
    },
    DeviceBirth {
        node: NodeIdentity,
        device: String,
        metrics: Vec<Metric>,
    },
    NodeData {
        node: NodeIdentity,
        metrics: Vec<Metric>,
    },
    DeviceData {
        node: NodeIdentity,
        device: String,
        metrics: Vec<Metric>,
    },
    DeviceDeath {
        node: NodeIdentity,
        device: String,
    },
    NodeDeath {
        node: NodeIdentity,
    },
}

impl Step {
    /// Sparkplug message type name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::NodeBirth { .. } => "NBIRTH",
            Step::DeviceBirth { .. } => "DBIRTH",
            Step::NodeData { .. } => "NDATA",
            Step::DeviceData { .. } => "DDATA",
            Step::DeviceDeath { .. } => "DDEATH",
            Step::NodeDeath { .. } => "NDEATH",
        }
    }

    /// Publish this step on `sink`.
    pub async fn execute(self, sink: &mut dyn SparkplugSink) -> Result<(), PublishError> {
        match self {
            Step::NodeBirth { node, metrics } => sink.publish_node_birth(&node, metrics).await,
            Step::DeviceBirth {
                node,
                device,
                metrics,
            } => sink.publish_device_birth(&node, &device, metrics).await,
            Step::NodeData { node, metrics } => sink.publish_data(&node, None, metrics).await,
            Step::DeviceData {
                node,
                device,
                metrics,
            } => sink.publish_data(&node, Some(&device), metrics).await,
            Step::DeviceDeath { node, device } => sink.publish_device_death(&node, &device).await,
            Step::NodeDeath { node } => sink.publish_node_death(&node).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BornNode {
    identity: NodeIdentity,
    /// Born devices, in birth order.
    devices: Vec<String>,
}

/// What the Sparkplug side has been told is alive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    born: Option<BornNode>,
}

impl SessionState {
    pub fn is_born(&self) -> bool {
        self.born.is_some()
    }

    /// Identity of the born node.
    pub fn node(&self) -> Option<&NodeIdentity> {
        self.born.as_ref().map(|b| &b.identity)
    }

    /// Born devices, in birth order.
    pub fn devices(&self) -> &[String] {
        self.born
            .as_ref()
            .map(|b| b.devices.as_slice())
            .unwrap_or_default()
    }

    /// Forget everything; the next cycle births from scratch.
    pub fn reset(&mut self) {
        self.born = None;
    }

    /// Deaths for every born device, then the node.
    pub fn death_steps(&self) -> Vec<Step> {
        self.born.as_ref().map(deaths).unwrap_or_default()
    }

    /// Plan the messages for `batch` and the state they lead to.
    pub fn plan(&self, batch: &CycleBatch) -> (Vec<Step>, SessionState) {
        let mut steps = Vec::new();
        let mut born = self.born.clone();

        if let Some(previous) = born.as_ref().filter(|b| b.identity != batch.identity) {
            info!(from = %previous.identity, to = %batch.identity, "Node identity changed");
            steps.extend(deaths(previous));
            born = None;
        }

        if !batch.birth.is_available() {
            if let Some(previous) = &born {
                info!(node = %previous.identity, birth = %batch.birth, "Node no longer available");
                steps.extend(deaths(previous));
            } else {
                debug!(node = %batch.identity, birth = %batch.birth, "Birth withheld");
            }
            return (steps, SessionState::default());
        }

        let node = batch.identity.clone();
        let timestamp = batch.taken_at.timestamp_millis();
        let devices: Vec<_> = batch
            .devices
            .iter()
            .filter(|device| {
                if device.device_id.is_empty() {
                    warn!(node = %node, "Skipping device without uuid");
                    false
                } else {
                    true
                }
            })
            .collect();

        let known = match born {
            None => {
                let mut metrics = birth_metrics(&batch.node_metrics, timestamp);
                metrics.push(Metric::boolean(REBIRTH_METRIC, false).with_timestamp(timestamp));
                steps.push(Step::NodeBirth {
                    node: node.clone(),
                    metrics,
                });
                Vec::new()
            }
            Some(previous) => {
                steps.push(Step::NodeData {
                    node: node.clone(),
                    metrics: data_metrics(&batch.node_metrics, timestamp),
                });
                previous.devices
            }
        };

        let mut next_devices: Vec<String> = Vec::with_capacity(devices.len());
        for device in &devices {
            if next_devices.contains(&device.device_id) {
                warn!(node = %node, device = %device.device_id, "Duplicate device id, skipping");
                continue;
            }
            if known.contains(&device.device_id) {
                steps.push(Step::DeviceData {
                    node: node.clone(),
                    device: device.device_id.clone(),
                    metrics: data_metrics(&device.metrics, timestamp),
                });
            } else {
                steps.push(Step::DeviceBirth {
                    node: node.clone(),
                    device: device.device_id.clone(),
                    metrics: birth_metrics(&device.metrics, timestamp),
                });
            }
            next_devices.push(device.device_id.clone());
        }

        for device in known.iter().filter(|d| !next_devices.contains(*d)) {
            steps.push(Step::DeviceDeath {
                node: node.clone(),
                device: device.clone(),
            });
        }

        let next = SessionState {
            born: Some(BornNode {
                identity: node,
                devices: next_devices,
            }),
        };
        (steps, next)
    }
}

fn deaths(born: &BornNode) -> Vec<Step> {
    born.devices
        .iter()
        .map(|device| Step::DeviceDeath {
            node: born.identity.clone(),
            device: device.clone(),
        })
        .chain(std::iter::once(Step::NodeDeath {
            node: born.identity.clone(),
        }))
        .collect()
}

/// BIRTH metrics carry their properties.
fn birth_metrics(frames: &[MetricFrame], timestamp: i64) -> Vec<Metric> {
    frames.iter().map(|f| f.to_metric(timestamp)).collect()
}

fn data_metrics(frames: &[MetricFrame], timestamp: i64) -> Vec<Metric> {
    frames
        .iter()
        .map(|f| Metric::string(f.name.clone(), f.value.clone()).with_timestamp(timestamp))
        .collect()
}

/// Drains cycle batches and republishes them through a Sparkplug sink.
pub struct SparkplugPublisher {
    sink: Box<dyn SparkplugSink>,
    batches: FrameReceiver<DestinationInbound>,
    state: SessionState,
    phase: PhaseTracker,
}

impl SparkplugPublisher {
    pub fn new(sink: Box<dyn SparkplugSink>, batches: FrameReceiver<DestinationInbound>) -> Self {
        Self {
            sink,
            batches,
            state: SessionState::default(),
            phase: PhaseTracker::new(),
        }
    }

    /// Report phases on a shared tracker.
    pub fn with_phase(mut self, phase: PhaseTracker) -> Self {
        self.phase = phase;
        self
    }

    /// Run until destination-inbound is closed and drained, then publish
    /// deaths for anything still born.
    pub async fn run(mut self) {
        info!("Starting Sparkplug publisher");

        while let Some(frame) = self.batches.recv().await {
            match frame {
                DestinationInbound::Cycle(batch) => self.publish_cycle(&batch).await,
                DestinationInbound::Rebirth => {
                    info!("Rebirth: session reset");
                    self.state.reset();
                }
            }
        }

        self.phase.enter(SessionPhase::Terminating);
        for step in self.state.death_steps() {
            let kind = step.kind();
            if let Err(e) = step.execute(self.sink.as_mut()).await {
                warn!(kind, error = %e, "Failed to publish death on shutdown");
            }
        }
        self.state.reset();
        self.phase.enter(SessionPhase::Terminated);

        info!("Sparkplug publisher stopped");
    }

    async fn publish_cycle(&mut self, batch: &CycleBatch) {
        self.phase.enter(SessionPhase::Publishing);
        let (steps, next) = self.state.plan(batch);

        for step in steps {
            let kind = step.kind();
            if let Err(e) = step.execute(self.sink.as_mut()).await {
                error!(
                    cycle = batch.cycle,
                    taken_at = %batch.taken_at.to_rfc3339(),
                    kind,
                    error = %e,
                    "Publish failed, session reset"
                );
                self.state.reset();
                return;
            }
            debug!(cycle = batch.cycle, kind, "Published");
        }

        self.state = next;
    }
}
