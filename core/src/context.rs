//! Orchestration context shared by every component
//!
//! Holds the configuration, backend handles and the shutdown signal. It is
//! constructed once per run and passed by reference into the controllers,
//! the dispatcher and the sequencer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};
use crate::poll::{PollBudget, PollTimer};
use crate::telemetry::{TelemetryQueries, TelemetrySampler};
use crate::traits::{ClusterApi, MonitoringBackend};

/// Configuration, backends and shutdown signal for one run
pub struct OrchestrationContext {
    config: Arc<BenchConfig>,
    cluster: Arc<dyn ClusterApi>,
    sampler: TelemetrySampler,
    shutdown_tx: watch::Sender<bool>,
}

impl OrchestrationContext {
    /// Start building a context
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Run configuration
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Orchestrator API
    pub fn cluster(&self) -> &dyn ClusterApi {
        self.cluster.as_ref()
    }

    /// Telemetry sampler
    pub fn sampler(&self) -> &TelemetrySampler {
        &self.sampler
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Clone of the shutdown sender, for signal handlers
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Request shutdown of in-flight waits
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Poll timer at the configured interval, observing shutdown
    pub fn poll_timer(&self, deadline: Option<Duration>) -> PollTimer {
        PollTimer::new(PollBudget::new(self.config.timing.poll_interval, deadline))
            .with_shutdown(self.shutdown_receiver())
    }
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("namespace", &self.cluster.namespace())
            .field("config", &self.config)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Builder for [`OrchestrationContext`]
///
/// # Example
///
/// ```ignore
/// let ctx = OrchestrationContext::builder()
///     .config(config)
///     .cluster(Arc::new(kube_cluster))
///     .monitoring(Arc::new(prometheus))
///     .build()?;
/// ```
pub struct ContextBuilder {
    config: BenchConfig,
    cluster: Option<Arc<dyn ClusterApi>>,
    monitoring: Option<Arc<dyn MonitoringBackend>>,
}

impl ContextBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: BenchConfig::default(),
            cluster: None,
            monitoring: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: BenchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the orchestrator API
    pub fn cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the monitoring backend
    pub fn monitoring(mut self, monitoring: Arc<dyn MonitoringBackend>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if a backend is missing or the configuration is invalid.
    pub fn build(self) -> BenchResult<OrchestrationContext> {
        let cluster = self
            .cluster
            .ok_or_else(|| BenchError::missing_config("cluster"))?;
        let monitoring = self
            .monitoring
            .ok_or_else(|| BenchError::missing_config("monitoring"))?;

        self.config.validate()?;

        let queries = TelemetryQueries::from_config(&self.config.telemetry);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(OrchestrationContext {
            config: Arc::new(self.config),
            cluster,
            sampler: TelemetrySampler::new(monitoring, queries),
            shutdown_tx,
        })
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
