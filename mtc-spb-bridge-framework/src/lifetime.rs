//! Application lifetime events and the hosted-service contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

/// Shared application lifetime.
///
/// Carries two one-shot events: "started", raised by the runner once every
/// hosted service has started, and "shutdown requested", which anybody may
/// raise to end the session. Both are sticky: waiting after the event has
/// fired returns immediately.
#[derive(Clone, Debug)]
pub struct AppLifetime {
    inner: Arc<Events>,
}

#[derive(Debug)]
struct Events {
    started: watch::Sender<bool>,
    stopping: watch::Sender<bool>,
}

impl AppLifetime {
    /// Create a fresh lifetime with no events raised.
    pub fn new() -> Self {
        let (started, _) = watch::channel(false);
        let (stopping, _) = watch::channel(false);
        Self {
            inner: Arc::new(Events { started, stopping }),
        }
    }

    /// Raise the "started" event.
    pub fn notify_started(&self) {
        self.inner.started.send_replace(true);
    }

    /// Whether the application has started.
    pub fn is_started(&self) -> bool {
        *self.inner.started.borrow()
    }

    /// Wait until the application has started.
    pub async fn started(&self) {
        let mut rx = self.inner.started.subscribe();
        let _ = rx.wait_for(|started| *started).await;
    }

    /// Request application shutdown.
    ///
    /// Returns `true` for the first request, `false` if shutdown was already requested.
    pub fn request_shutdown(&self) -> bool {
        !self.inner.stopping.send_replace(true)
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        *self.inner.stopping.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.inner.stopping.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

impl Default for AppLifetime {
    fn default() -> Self {
        Self::new()
    }
}

/// A service hosted by the [`BridgeRunner`](crate::BridgeRunner).
///
/// `start` is called before the "started" event is raised and must not block
/// for the lifetime of the service; long-running work belongs in spawned
/// tasks. `stop` is called once shutdown begins, in reverse start order.
#[async_trait]
pub trait HostedService: Send {
    /// Service name, used in logs.
    fn name(&self) -> &str;

    /// Start the service.
    async fn start(&mut self, lifetime: &AppLifetime) -> Result<()>;

    /// Stop the service.
    async fn stop(&mut self) -> Result<()>;
}
