//! Telemetry sampling against the monitoring backend
//!
//! Each signal is one instant query whose result vector is filtered
//! (NaN, exact zero and infinities dropped) and reduced to a single scalar.
//! An empty filtered vector means "no data", never zero.

use std::sync::Arc;

use chrono::Utc;

use crate::config::TelemetryConfig;
use crate::metrics::{TelemetryKind, TelemetrySample};
use crate::traits::{MonitoringBackend, MonitoringError, VectorSample};

/// Query expressions for the three signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryQueries {
    /// Proxy overhead: downstream request time minus upstream request time
    pub overhead_latency: String,
    /// Per-device utilization averaged over the window
    pub gpu_utilization: String,
    /// Downstream request time at the proxy
    pub total_latency: String,
}

impl TelemetryQueries {
    /// Build the expressions from configuration
    pub fn from_config(config: &TelemetryConfig) -> Self {
        let release = &config.release;
        let prefix = &config.conn_manager_prefix;
        let window = &config.window;

        let ingress = format!("release=\"{release}\",envoy_http_conn_manager_prefix=\"{prefix}\"");
        let downstream = format!(
            "sum by (pod)(increase(envoy_http_downstream_rq_time_sum{{{ingress}}}[{window}]) / \
             increase(envoy_http_downstream_rq_time_count{{{ingress}}}[{window}]))"
        );
        let upstream = format!(
            "sum by (pod)(increase(envoy_cluster_upstream_rq_time_sum{{release=\"{release}\"}}[{window}]) / \
             increase(envoy_cluster_upstream_rq_time_count{{release=\"{release}\"}}[{window}]))"
        );

        Self {
            overhead_latency: format!("{downstream} - {upstream}"),
            gpu_utilization: format!(
                "avg by(gpu)(avg_over_time({}[{window}]))",
                config.gpu_metric
            ),
            total_latency: downstream,
        }
    }

    /// Expression for one signal
    pub fn expr(&self, kind: TelemetryKind) -> &str {
        match kind {
            TelemetryKind::OverheadLatency => &self.overhead_latency,
            TelemetryKind::GpuUtilization => &self.gpu_utilization,
            TelemetryKind::TotalLatency => &self.total_latency,
        }
    }
}

/// Reduce a result vector to one scalar, `None` when nothing usable remains
///
/// NaN and zero entries are "no data". Infinite entries (a rate over a zero
/// interval) are dropped as well, so one bad series cannot turn the sum or the
/// mean infinite.
///
/// Latency signals are per-instance increases and are summed; utilization is a
/// per-device fraction and is averaged.
pub fn reduce(kind: TelemetryKind, samples: &[VectorSample]) -> Option<f64> {
    let values: Vec<f64> = samples
        .iter()
        .map(|s| s.value)
        .filter(|v| v.is_finite() && *v != 0.0)
        .collect();
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    match kind {
        TelemetryKind::OverheadLatency | TelemetryKind::TotalLatency => Some(sum),
        TelemetryKind::GpuUtilization => Some(sum / values.len() as f64),
    }
}

/// Issues telemetry queries, one fresh round-trip per call
#[derive(Clone)]
pub struct TelemetrySampler {
    backend: Arc<dyn MonitoringBackend>,
    queries: TelemetryQueries,
}

impl TelemetrySampler {
    /// Create a sampler
    pub fn new(backend: Arc<dyn MonitoringBackend>, queries: TelemetryQueries) -> Self {
        Self { backend, queries }
    }

    /// Expressions in use
    pub fn queries(&self) -> &TelemetryQueries {
        &self.queries
    }

    /// Query and reduce one signal
    pub async fn sample(
        &self,
        kind: TelemetryKind,
    ) -> Result<Option<TelemetrySample>, MonitoringError> {
        let vector = self.backend.instant_query(self.queries.expr(kind)).await?;
        let value = reduce(kind, &vector);
        tracing::debug!(
            backend = self.backend.name(),
            signal = kind.as_str(),
            series = vector.len(),
            value = ?value,
            "Telemetry sample"
        );
        Ok(value.map(|value| TelemetrySample {
            kind,
            value,
            timestamp: Utc::now(),
        }))
    }

    /// Proxy overhead latency, summed across instances
    pub async fn overhead_latency(&self) -> Result<Option<f64>, MonitoringError> {
        Ok(self
            .sample(TelemetryKind::OverheadLatency)
            .await?
            .map(|s| s.value))
    }

    /// GPU utilization, averaged across devices
    pub async fn gpu_utilization(&self) -> Result<Option<f64>, MonitoringError> {
        Ok(self
            .sample(TelemetryKind::GpuUtilization)
            .await?
            .map(|s| s.value))
    }

    /// Total latency at the proxy, summed across instances
    pub async fn total_latency(&self) -> Result<Option<f64>, MonitoringError> {
        Ok(self.sample(TelemetryKind::TotalLatency).await?.map(|s| s.value))
    }
}
