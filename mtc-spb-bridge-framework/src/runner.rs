//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;

use mtc_spb_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::lifetime::{AppLifetime, HostedService};

/// Default time workers get to drain after shutdown begins.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of a relay.
///
/// Handles:
/// - Logging initialization
/// - Hosted service start and stop
/// - Worker spawning and failure tracking
/// - Graceful shutdown on Ctrl+C or on request
///
/// # Example
///
/// ```ignore
/// use mtc_spb_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("relay.json5");
///     let config = MyConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("relay", config, Some(&args))?;
///     let lifetime = runner.lifetime();
///     runner.spawn("worker", async move {
///         lifetime.shutdown_requested().await;
///     });
///
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    name: String,
    version: String,
    config: C,
    lifetime: AppLifetime,
    services: Vec<Box<dyn HostedService>>,
    tasks: Vec<(String, JoinHandle<()>)>,
    shutdown_grace: Duration,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner, initializing logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let mut log_config = config.logging().clone();
        if let Some(level) = args.and_then(|a| a.log_level.as_ref()) {
            log_config = LoggingConfig {
                level: level.clone(),
                ..log_config
            };
        }

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        let runner = Self::without_logging(name, config);
        tracing::info!(bridge = %runner.name, version = %runner.version, "Starting bridge");
        Ok(runner)
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            lifetime: AppLifetime::new(),
            services: Vec::new(),
            tasks: Vec::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set how long workers may take to drain once shutdown begins.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a handle to the application lifetime.
    pub fn lifetime(&self) -> AppLifetime {
        self.lifetime.clone()
    }

    /// Register a hosted service. Services start in registration order.
    pub fn add_service(&mut self, service: impl HostedService + 'static) {
        self.services.push(Box::new(service));
    }

    /// Spawn a worker task.
    ///
    /// Workers are expected to finish on their own once their input channels
    /// close; stragglers are aborted after the shutdown grace period.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push((name.into(), handle));
    }

    /// Run the bridge until Ctrl+C is received or shutdown is requested.
    ///
    /// This will:
    /// 1. Start hosted services in registration order
    /// 2. Raise the "started" event
    /// 3. Wait for Ctrl+C or a shutdown request
    /// 4. Stop hosted services in reverse order
    /// 5. Wait for workers to finish, aborting those that exceed the grace period
    ///
    /// Returns an error if any worker panicked.
    pub async fn run(mut self) -> Result<()> {
        for service in self.services.iter_mut() {
            tracing::debug!(service = %service.name(), "Starting service");
            service.start(&self.lifetime).await?;
        }

        self.lifetime.notify_started();

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            services = self.services.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
                tracing::info!(bridge = %self.name, "Received shutdown signal");
            }
            _ = self.lifetime.shutdown_requested() => {
                tracing::info!(bridge = %self.name, "Shutdown requested");
            }
        }

        self.lifetime.request_shutdown();

        for service in self.services.iter_mut().rev() {
            if let Err(e) = service.stop().await {
                tracing::warn!(service = %service.name(), error = %e, "Error stopping service");
            }
        }

        let mut failed = false;
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        for (name, mut task) in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => tracing::debug!(worker = %name, "Worker finished"),
                Ok(Err(e)) => {
                    if e.is_panic() {
                        tracing::error!(worker = %name, "Worker panicked");
                        failed = true;
                    }
                }
                Err(_) => {
                    tracing::warn!(worker = %name, "Worker did not finish in time, aborting");
                    task.abort();
                }
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        if failed {
            return Err(BridgeError::worker("one or more workers failed"));
        }

        Ok(())
    }
}
