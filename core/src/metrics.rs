//! Metric records produced by a batch and the rows written to output streams

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::ServiceMode;

/// Telemetry signal sampled on each poll tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    /// Proxy overhead latency, summed across instances
    OverheadLatency,
    /// Device utilization, averaged across devices
    GpuUtilization,
    /// End-to-end latency at the proxy, summed across instances
    TotalLatency,
}

impl TelemetryKind {
    /// All signals, in sampling order
    pub const ALL: [TelemetryKind; 3] = [
        TelemetryKind::OverheadLatency,
        TelemetryKind::GpuUtilization,
        TelemetryKind::TotalLatency,
    ];

    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::OverheadLatency => "overhead_latency",
            TelemetryKind::GpuUtilization => "gpu_utilization",
            TelemetryKind::TotalLatency => "total_latency",
        }
    }
}

/// One reduced telemetry value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// Signal
    pub kind: TelemetryKind,
    /// Reduced value, never zero or NaN
    pub value: f64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

/// Population mean and standard deviation of a sample list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation (no Bessel correction)
    pub std: f64,
    /// Number of samples
    pub count: usize,
}

impl SampleStats {
    /// Compute statistics, `None` for an empty list
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std: variance.sqrt(),
            count: samples.len(),
        })
    }
}

/// Fields extracted from one load-generator task log
///
/// A field whose pattern did not match stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetrics {
    /// Inference batch size
    pub batch_size: Option<u64>,
    /// Inferences per second
    pub throughput_ips: Option<f64>,
    /// Mean client latency (usec)
    pub avg_latency_us: Option<u64>,
    /// p50 client latency (usec)
    pub p50_latency_us: Option<u64>,
    /// p90 client latency (usec)
    pub p90_latency_us: Option<u64>,
    /// p95 client latency (usec)
    pub p95_latency_us: Option<u64>,
    /// p99 client latency (usec)
    pub p99_latency_us: Option<u64>,
    /// Mean server-side request latency (usec)
    pub avg_request_latency_us: Option<u64>,
    /// Server overhead (usec)
    pub overhead_us: Option<u64>,
    /// Queue time (usec)
    pub queue_us: Option<u64>,
    /// Input compute time (usec)
    pub compute_input_us: Option<u64>,
    /// Inference compute time (usec)
    pub compute_infer_us: Option<u64>,
    /// Output compute time (usec)
    pub compute_output_us: Option<u64>,
}

impl LogMetrics {
    /// True when no field matched
    pub fn is_empty(&self) -> bool {
        *self == LogMetrics::default()
    }
}

/// One record per task of a completed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Batch parallelism
    pub client_count: u32,
    /// Task (pod) name
    pub task_id: String,
    /// Values parsed from the task log
    pub log: LogMetrics,
    /// Batch-level proxy overhead statistics
    pub overhead: Option<SampleStats>,
    /// Batch-level GPU utilization statistics
    pub gpu_util: Option<SampleStats>,
}

impl MetricRecord {
    /// Record with nothing extracted
    pub fn empty(client_count: u32, task_id: impl Into<String>) -> Self {
        Self {
            client_count,
            task_id: task_id.into(),
            log: LogMetrics::default(),
            overhead: None,
            gpu_util: None,
        }
    }

    /// Attach the batch-level telemetry statistics
    pub fn with_batch_stats(
        mut self,
        overhead: Option<SampleStats>,
        gpu_util: Option<SampleStats>,
    ) -> Self {
        self.overhead = overhead;
        self.gpu_util = gpu_util;
        self
    }
}

/// A metric record tagged with the step that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Per-task record
    pub record: MetricRecord,
    /// Exposure mode of the step
    pub mode: ServiceMode,
    /// Target worker count of the step
    pub worker_count: u32,
    /// Repetition index, present only inside a repetition loop
    pub repetition: Option<u32>,
}

/// One live telemetry row per poll tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetricRow {
    /// Tick time
    pub timestamp: DateTime<Utc>,
    /// Tasks of this batch in `Running` phase
    pub running_clients: Option<u32>,
    /// Worker instances in `Running` phase
    pub running_workers: Option<u32>,
    /// Proxy overhead sample
    pub overhead: Option<f64>,
    /// GPU utilization sample
    pub gpu_util: Option<f64>,
    /// Total latency sample
    pub total_latency: Option<f64>,
}

impl LiveMetricRow {
    /// True when every signal is present
    pub fn is_complete(&self) -> bool {
        self.running_clients.is_some()
            && self.running_workers.is_some()
            && self.overhead.is_some()
            && self.gpu_util.is_some()
            && self.total_latency.is_some()
    }
}
