//! MTConnect agent polling (source side of the pipeline).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use mtc_spb_bridge_framework::{FrameReceiver, FrameSender};

use crate::agent::{AgentClient, FetchError};
use crate::frames::{SourceInbound, SourceOutbound};
use crate::model::{ParseError, Snapshot};
use crate::phase::{PhaseTracker, SessionPhase};

/// Error type for one poll cycle.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Polls the agent and emits one snapshot per cycle.
pub struct Poller {
    client: Arc<dyn AgentClient>,
    interval: Duration,
    sample_buffer: usize,
    outbound: FrameSender<SourceOutbound>,
    inbound: FrameReceiver<SourceInbound>,
    phase: PhaseTracker,
}

impl Poller {
    pub fn new(
        client: Arc<dyn AgentClient>,
        interval: Duration,
        sample_buffer: usize,
        outbound: FrameSender<SourceOutbound>,
        inbound: FrameReceiver<SourceInbound>,
    ) -> Self {
        Self {
            client,
            interval,
            sample_buffer,
            outbound,
            inbound,
            phase: PhaseTracker::new(),
        }
    }

    /// Report phases on a shared tracker.
    pub fn with_phase(mut self, phase: PhaseTracker) -> Self {
        self.phase = phase;
        self
    }

    /// Run until the source-outbound channel is closed.
    ///
    /// Write requests on source-inbound are acknowledged between cycles and
    /// while a snapshot waits for room on source-outbound, so a full
    /// source-outbound never holds up the translator's write forwarding.
    pub async fn run(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting agent poller");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycle: u64 = 0;
        let mut inbound_open = true;

        loop {
            tokio::select! {
                _ = self.outbound.closed() => break,
                _ = ticker.tick() => {
                    if self.outbound.is_closed() {
                        break;
                    }

                    cycle += 1;
                    let taken_at = Utc::now();
                    self.phase.enter(SessionPhase::Polling);

                    match self.poll_once().await {
                        Ok(snapshot) => {
                            debug!(cycle, devices = snapshot.devices.len(), "Snapshot taken");
                            let frame = SourceOutbound::Snapshot { cycle, taken_at, snapshot };
                            if !self.deliver(frame, &mut inbound_open).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(cycle, taken_at = %taken_at.to_rfc3339(), error = %e, "Poll cycle failed");
                        }
                    }
                }
                frame = self.inbound.recv(), if inbound_open => {
                    on_inbound(frame, &mut inbound_open);
                }
            }
        }

        self.phase.enter(SessionPhase::Terminating);
        info!(cycles = cycle, "Agent poller stopped");
    }

    /// Send a snapshot, acknowledging writes until it is accepted.
    ///
    /// Returns `false` once source-outbound is closed.
    async fn deliver(&self, frame: SourceOutbound, inbound_open: &mut bool) -> bool {
        let send = self.outbound.send(frame);
        tokio::pin!(send);

        loop {
            tokio::select! {
                result = &mut send => return result.is_ok(),
                frame = self.inbound.recv(), if *inbound_open => {
                    on_inbound(frame, inbound_open);
                }
            }
        }
    }

    /// Fetch probe and current and build the snapshot.
    pub async fn poll_once(&self) -> Result<Snapshot, PollerError> {
        let probe = self.client.fetch_probe().await?;
        let mut snapshot = Snapshot::parse_probe_with_buffer(&probe, self.sample_buffer)?;

        let current = self.client.fetch_current().await?;
        let applied = snapshot.apply_current(&current)?;
        debug!(applied, "Applied current values");

        Ok(snapshot)
    }
}

fn on_inbound(frame: Option<SourceInbound>, inbound_open: &mut bool) {
    match frame {
        Some(frame) => acknowledge(frame),
        None => {
            debug!("Source-inbound closed");
            *inbound_open = false;
        }
    }
}

fn acknowledge(frame: SourceInbound) {
    match frame {
        SourceInbound::Write {
            device,
            metric,
            value,
        } => {
            info!(
                device = device.as_deref().unwrap_or("<node>"),
                metric = %metric,
                value = ?value,
                "Write request acknowledged; MTConnect agents are read-only"
            );
        }
    }
}
