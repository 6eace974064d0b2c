//! Metric extraction from load-generator task logs
//!
//! Each field has one pattern of the form "label: value unit". The first match
//! wins; a missing label (or an unparseable value) leaves the field `None`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::metrics::LogMetrics;

/// Field populated by one extraction pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogField {
    BatchSize,
    Throughput,
    AvgLatency,
    P50Latency,
    P90Latency,
    P95Latency,
    P99Latency,
    AvgRequestLatency,
    Overhead,
    Queue,
    ComputeInput,
    ComputeInfer,
    ComputeOutput,
}

static PATTERNS: Lazy<Vec<(LogField, Regex)>> = Lazy::new(|| {
    [
        (LogField::BatchSize, r"Batch size:\s+(\d+)"),
        (LogField::Throughput, r"Throughput:\s+([\d.]+)\s+infer/sec"),
        (LogField::AvgLatency, r"Avg latency:\s+(\d+)\s+usec"),
        (LogField::P50Latency, r"p50 latency:\s+(\d+)\s+usec"),
        (LogField::P90Latency, r"p90 latency:\s+(\d+)\s+usec"),
        (LogField::P95Latency, r"p95 latency:\s+(\d+)\s+usec"),
        (LogField::P99Latency, r"p99 latency:\s+(\d+)\s+usec"),
        (LogField::AvgRequestLatency, r"Avg request latency:\s+(\d+)\s+usec"),
        (LogField::Overhead, r"overhead\s+(\d+)\s+usec"),
        (LogField::Queue, r"queue\s+(\d+)\s+usec"),
        (LogField::ComputeInput, r"compute input\s+(\d+)\s+usec"),
        (LogField::ComputeInfer, r"compute infer\s+(\d+)\s+usec"),
        (LogField::ComputeOutput, r"compute output\s+(\d+)\s+usec"),
    ]
    .into_iter()
    .map(|(field, pattern)| {
        let re = Regex::new(pattern).expect("Invalid task log pattern");
        (field, re)
    })
    .collect()
});

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract every known metric from a task log
pub fn parse_task_log(text: &str) -> LogMetrics {
    let mut metrics = LogMetrics::default();
    for (field, re) in PATTERNS.iter() {
        let Some(raw) = capture(re, text) else {
            continue;
        };
        let int = || raw.parse::<u64>().ok();
        match field {
            LogField::BatchSize => metrics.batch_size = int(),
            LogField::Throughput => metrics.throughput_ips = raw.parse::<f64>().ok(),
            LogField::AvgLatency => metrics.avg_latency_us = int(),
            LogField::P50Latency => metrics.p50_latency_us = int(),
            LogField::P90Latency => metrics.p90_latency_us = int(),
            LogField::P95Latency => metrics.p95_latency_us = int(),
            LogField::P99Latency => metrics.p99_latency_us = int(),
            LogField::AvgRequestLatency => metrics.avg_request_latency_us = int(),
            LogField::Overhead => metrics.overhead_us = int(),
            LogField::Queue => metrics.queue_us = int(),
            LogField::ComputeInput => metrics.compute_input_us = int(),
            LogField::ComputeInfer => metrics.compute_infer_us = int(),
            LogField::ComputeOutput => metrics.compute_output_us = int(),
        }
    }
    metrics
}
