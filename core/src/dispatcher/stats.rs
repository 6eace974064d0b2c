//! Per-batch telemetry accumulation

use crate::metrics::SampleStats;

/// Samples collected across the poll ticks of one batch
#[derive(Debug, Default, Clone)]
pub struct TelemetryAccumulator {
    overhead: Vec<f64>,
    gpu_util: Vec<f64>,
    ticks: u32,
    failed_queries: u32,
}

impl TelemetryAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one tick; absent values are skipped, not counted as zero
    pub fn record(&mut self, overhead: Option<f64>, gpu_util: Option<f64>) {
        self.ticks += 1;
        if let Some(v) = overhead {
            self.overhead.push(v);
        }
        if let Some(v) = gpu_util {
            self.gpu_util.push(v);
        }
    }

    /// Count a monitoring query that errored this tick
    pub fn record_failure(&mut self) {
        self.failed_queries += 1;
    }

    /// Poll ticks recorded
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Monitoring queries that errored
    pub fn failed_queries(&self) -> u32 {
        self.failed_queries
    }

    /// Overhead mean and population std, `None` without samples
    pub fn overhead_stats(&self) -> Option<SampleStats> {
        SampleStats::from_samples(&self.overhead)
    }

    /// GPU utilization mean and population std, `None` without samples
    pub fn gpu_stats(&self) -> Option<SampleStats> {
        SampleStats::from_samples(&self.gpu_util)
    }
}
