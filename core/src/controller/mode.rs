//! Exposure mode switching

use std::collections::BTreeMap;

use crate::config::ClusterConfig;
use crate::context::OrchestrationContext;
use crate::error::{BenchError, BenchResult};
use crate::experiment::ServiceMode;
use crate::poll::sleep_or_shutdown;

/// Network topology of the exposure object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureTopology {
    /// Cluster-internal, no virtual IP
    Headless,
    /// Externally load-balanced
    LoadBalancer,
}

impl From<ServiceMode> for ExposureTopology {
    fn from(mode: ServiceMode) -> Self {
        match mode {
            ServiceMode::Direct => ExposureTopology::Headless,
            ServiceMode::Gateway => ExposureTopology::LoadBalancer,
        }
    }
}

/// One exposed port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposurePort {
    /// Port name
    pub name: String,
    /// Service port, equal to the target port
    pub port: u16,
}

/// Desired exposure object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureSpec {
    /// Object name
    pub name: String,
    /// Topology
    pub topology: ExposureTopology,
    /// Object labels
    pub labels: BTreeMap<String, String>,
    /// Worker selector
    pub selector: BTreeMap<String, String>,
    /// Exposed ports
    pub ports: Vec<ExposurePort>,
}

impl ExposureSpec {
    /// Exposure object for a mode
    pub fn for_mode(mode: ServiceMode, cluster: &ClusterConfig) -> Self {
        let mut labels = cluster.worker_labels.clone();
        labels.insert("scrape_metrics".into(), "true".into());

        let ports = [
            ("http", cluster.ports.http),
            ("grpc", cluster.ports.grpc),
            ("metrics", cluster.ports.metrics),
        ]
        .into_iter()
        .map(|(name, port)| ExposurePort {
            name: name.to_string(),
            port,
        })
        .collect();

        Self {
            name: cluster.exposure_service.clone(),
            topology: mode.into(),
            labels,
            selector: cluster.worker_labels.clone(),
            ports,
        }
    }
}

/// Switches the worker pool between exposure topologies
pub struct ModeController<'a> {
    ctx: &'a OrchestrationContext,
}

impl<'a> ModeController<'a> {
    /// Create a controller
    pub fn new(ctx: &'a OrchestrationContext) -> Self {
        Self { ctx }
    }

    /// Delete then recreate the exposure object in `mode`'s topology
    ///
    /// A missing object is not an error. Each mutation is followed by a
    /// settle pause so the control plane converges before the caller proceeds.
    /// A shutdown signal during a pause returns [`BenchError::Cancelled`].
    pub async fn set_mode(&self, mode: ServiceMode) -> BenchResult<ExposureSpec> {
        let config = self.ctx.config();
        let cluster = self.ctx.cluster();
        let spec = ExposureSpec::for_mode(mode, &config.cluster);

        match cluster.delete_service(&spec.name).await {
            Ok(()) => {
                tracing::debug!(service = %spec.name, "Deleted exposure object");
                self.settle(config.timing.exposure_delete_settle).await?;
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(service = %spec.name, "Exposure object absent, nothing to delete");
            }
            Err(e) => return Err(e.into()),
        }

        cluster.create_service(&spec).await?;
        self.settle(config.timing.exposure_create_settle).await?;

        tracing::info!(
            mode = %mode,
            service = %spec.name,
            topology = ?spec.topology,
            "Exposure mode set"
        );
        Ok(spec)
    }

    async fn settle(&self, duration: std::time::Duration) -> BenchResult<()> {
        if duration.is_zero() {
            return Ok(());
        }
        let mut rx = self.ctx.shutdown_receiver();
        if sleep_or_shutdown(&mut rx, duration).await {
            tracing::warn!("Shutdown requested during exposure settle");
            return Err(BenchError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{test_context, test_context_with, FakeCluster};
    use crate::traits::ClusterError;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_spec_for_modes() {
        let cluster = ClusterConfig::default();
        let direct = ExposureSpec::for_mode(ServiceMode::Direct, &cluster);
        let gateway = ExposureSpec::for_mode(ServiceMode::Gateway, &cluster);

        assert_eq!(direct.topology, ExposureTopology::Headless);
        assert_eq!(gateway.topology, ExposureTopology::LoadBalancer);
        assert_eq!(direct.name, "sonic-server-triton");
        assert_eq!(direct.ports, gateway.ports);
        assert_eq!(
            direct.ports.iter().map(|p| p.port).collect::<Vec<_>>(),
            vec![8000, 8001, 8002]
        );
        assert_eq!(direct.labels.get("scrape_metrics").map(String::as_str), Some("true"));
        assert!(!direct.selector.contains_key("scrape_metrics"));
        assert_eq!(direct.selector.len(), 3);
    }

    #[tokio::test]
    async fn test_set_mode_absent_service() {
        let cluster = Arc::new(FakeCluster::new());
        let ctx = test_context(cluster.clone());

        let spec = ModeController::new(&ctx)
            .set_mode(ServiceMode::Gateway)
            .await
            .unwrap();

        assert_eq!(spec.topology, ExposureTopology::LoadBalancer);
        assert_eq!(
            cluster.calls(),
            vec![
                "delete_service sonic-server-triton".to_string(),
                "create_service sonic-server-triton LoadBalancer".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_set_mode_is_repeatable() {
        let cluster = Arc::new(FakeCluster::new());
        let ctx = test_context(cluster.clone());
        let controller = ModeController::new(&ctx);

        controller.set_mode(ServiceMode::Direct).await.unwrap();
        let first = cluster.service("sonic-server-triton");
        controller.set_mode(ServiceMode::Direct).await.unwrap();
        let second = cluster.service("sonic-server-triton");

        assert_eq!(first, second);
        assert_eq!(second.map(|s| s.topology), Some(ExposureTopology::Headless));
        assert_eq!(cluster.count_calls("create_service"), 2);
    }

    #[tokio::test]
    async fn test_set_mode_delete_failure_propagates() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_service_delete(ClusterError::Api {
            code: 403,
            reason: "Forbidden".into(),
            message: "services is forbidden".into(),
        });
        let ctx = test_context(cluster.clone());

        let err = ModeController::new(&ctx)
            .set_mode(ServiceMode::Direct)
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Cluster(ClusterError::Api { code: 403, .. })));
        assert_eq!(cluster.count_calls("create_service"), 0);
    }

    #[tokio::test]
    async fn test_settle_observes_shutdown() {
        let cluster = Arc::new(FakeCluster::new());
        let ctx = test_context_with(cluster.clone(), |config| {
            config.timing.exposure_create_settle = Duration::from_secs(60);
        });
        let shutdown = ctx.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.send_replace(true);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ModeController::new(&ctx).set_mode(ServiceMode::Direct),
        )
        .await
        .expect("settle should end on shutdown");

        assert!(matches!(result, Err(BenchError::Cancelled)));
        assert_eq!(cluster.count_calls("create_service"), 1);
    }
}
