//! Time-bounded session termination.
//!
//! The [`TerminatorService`] ends an otherwise indefinite relay session after
//! a fixed delay: once the application has started it waits for the
//! configured time, closes every registered channel in registration order
//! and then requests application shutdown. Shutdown is requested even when
//! closing a channel fails.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::channels::Closable;
use crate::error::{BridgeError, Result};
use crate::lifetime::{AppLifetime, HostedService};

/// Termination options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatorOptions {
    /// Delay after startup before the session is terminated.
    ///
    /// Absent disables auto-termination. Zero is rejected by [`validate`](Self::validate).
    #[serde(default)]
    pub terminate_after_ms: Option<u64>,
}

impl TerminatorOptions {
    /// Options that terminate after the given delay.
    pub fn after(delay: Duration) -> Self {
        Self {
            terminate_after_ms: Some(delay.as_millis() as u64),
        }
    }

    /// The configured delay, if auto-termination is enabled.
    pub fn delay(&self) -> Option<Duration> {
        self.terminate_after_ms.map(Duration::from_millis)
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.terminate_after_ms == Some(0) {
            return Err(BridgeError::validation(
                "terminate_after_ms must be greater than 0 (omit it to disable auto-termination)",
            ));
        }
        Ok(())
    }
}

/// Requests shutdown when dropped, including during unwinding.
struct ShutdownGuard(AppLifetime);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        tracing::info!("Terminator requesting application shutdown");
        self.0.request_shutdown();
    }
}

/// Closes all channels after a delay and requests application shutdown.
pub struct TerminatorService {
    options: TerminatorOptions,
    channels: Arc<[Arc<dyn Closable>]>,
    task: Option<JoinHandle<()>>,
}

impl TerminatorService {
    /// Create a terminator for the given channels.
    ///
    /// Channels are closed in the order given.
    pub fn new(options: TerminatorOptions, channels: Vec<Arc<dyn Closable>>) -> Self {
        Self {
            options,
            channels: channels.into(),
            task: None,
        }
    }

    /// Close every channel, each independently.
    ///
    /// Returns the number of channels closed by this call. Channels that were
    /// already closed are skipped; a failure closing one channel is logged and
    /// does not prevent closing the rest.
    pub fn close_channels(channels: &[Arc<dyn Closable>]) -> usize {
        let mut closed = 0;

        for channel in channels {
            match catch_unwind(AssertUnwindSafe(|| channel.close())) {
                Ok(true) => {
                    closed += 1;
                    tracing::debug!(channel = %channel.name(), "Channel closed");
                }
                Ok(false) => {
                    tracing::debug!(channel = %channel.name(), "Channel already closed");
                }
                Err(_) => {
                    tracing::error!(channel = %channel.name(), "Failed to close channel");
                }
            }
        }

        closed
    }

    /// Whether a termination timer is armed.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[async_trait]
impl HostedService for TerminatorService {
    fn name(&self) -> &str {
        "terminator"
    }

    async fn start(&mut self, lifetime: &AppLifetime) -> Result<()> {
        self.options.validate()?;

        let Some(delay) = self.options.delay() else {
            tracing::debug!("Auto-termination disabled");
            return Ok(());
        };

        let lifetime = lifetime.clone();
        let channels = self.channels.clone();

        self.task = Some(tokio::spawn(async move {
            lifetime.started().await;
            tracing::info!(delay_ms = delay.as_millis() as u64, "Terminator armed");

            tokio::time::sleep(delay).await;

            let _guard = ShutdownGuard(lifetime);
            let closed = TerminatorService::close_channels(&channels);
            tracing::info!(closed = closed, "Terminator closed channels");
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let closed = Self::close_channels(&self.channels);
        tracing::info!(closed = closed, "Terminator stopped");
        Ok(())
    }
}
