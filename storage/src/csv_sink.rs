//! Append-mode CSV streams
//!
//! Files are opened for append, the header is written only when the file is
//! empty, and every append is flushed before returning so rows written before
//! a crash survive it. Absent values are written as empty cells.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use csv::{Writer, WriterBuilder};
use sonic_bench_core::{
    BenchError, BenchResult, LiveMetricRow, LiveMetricsSink, ResultRow, ResultSink, SampleStats,
};

/// Result columns, without the optional trailing `repetition`
pub const RESULT_COLUMNS: [&str; 21] = [
    "client_count",
    "task_id",
    "batch_size",
    "throughput_ips",
    "avg_latency_us",
    "p50_latency_us",
    "p90_latency_us",
    "p95_latency_us",
    "p99_latency_us",
    "avg_request_latency_us",
    "overhead_us",
    "queue_us",
    "compute_input_us",
    "compute_infer_us",
    "compute_output_us",
    "overhead_avg",
    "overhead_std",
    "gpu_util_avg",
    "gpu_util_std",
    "mode",
    "worker_count",
];

/// Live telemetry columns
pub const LIVE_COLUMNS: [&str; 6] = [
    "timestamp",
    "running_clients",
    "running_workers",
    "overhead",
    "gpu_util",
    "total_latency",
];

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Open `path` for append; the flag reports whether it was empty
fn open_append(path: &Path) -> BenchResult<(Writer<File>, bool)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    let writer = WriterBuilder::new().has_headers(false).from_writer(file);
    Ok((writer, empty))
}

fn result_record(row: &ResultRow, with_repetition: bool) -> Vec<String> {
    let record = &row.record;
    let log = &record.log;
    let mean = |s: Option<SampleStats>| cell(s.map(|s| s.mean));
    let std = |s: Option<SampleStats>| cell(s.map(|s| s.std));

    let mut fields = vec![
        record.client_count.to_string(),
        record.task_id.clone(),
        cell(log.batch_size),
        cell(log.throughput_ips),
        cell(log.avg_latency_us),
        cell(log.p50_latency_us),
        cell(log.p90_latency_us),
        cell(log.p95_latency_us),
        cell(log.p99_latency_us),
        cell(log.avg_request_latency_us),
        cell(log.overhead_us),
        cell(log.queue_us),
        cell(log.compute_input_us),
        cell(log.compute_infer_us),
        cell(log.compute_output_us),
        mean(record.overhead),
        std(record.overhead),
        mean(record.gpu_util),
        std(record.gpu_util),
        row.mode.to_string(),
        row.worker_count.to_string(),
    ];
    if with_repetition {
        fields.push(cell(row.repetition));
    }
    fields
}

fn live_record(row: &LiveMetricRow) -> [String; 6] {
    [
        row.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        cell(row.running_clients),
        cell(row.running_workers),
        cell(row.overhead),
        cell(row.gpu_util),
        cell(row.total_latency),
    ]
}

/// Bulk per-task results file
pub struct CsvResultSink {
    path: PathBuf,
    writer: Writer<File>,
    with_repetition: bool,
}

impl CsvResultSink {
    /// Open (or create) a results file
    ///
    /// `with_repetition` adds a trailing `repetition` column.
    pub fn open(path: impl Into<PathBuf>, with_repetition: bool) -> BenchResult<Self> {
        let path = path.into();
        let (mut writer, empty) = open_append(&path)?;
        if empty {
            let mut header: Vec<&str> = RESULT_COLUMNS.to_vec();
            if with_repetition {
                header.push("repetition");
            }
            writer.write_record(&header).map_err(BenchError::storage)?;
            writer.flush()?;
        }
        tracing::debug!(path = %path.display(), fresh = empty, "Opened results stream");
        Ok(Self {
            path,
            writer,
            with_repetition,
        })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvResultSink {
    fn append(&mut self, rows: &[ResultRow]) -> BenchResult<()> {
        for row in rows {
            self.writer
                .write_record(result_record(row, self.with_repetition))
                .map_err(BenchError::storage)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for CsvResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvResultSink")
            .field("path", &self.path)
            .field("with_repetition", &self.with_repetition)
            .finish()
    }
}

/// Per-tick live telemetry file
pub struct CsvLiveSink {
    path: PathBuf,
    writer: Writer<File>,
}

impl CsvLiveSink {
    /// Open (or create) a live telemetry file
    pub fn open(path: impl Into<PathBuf>) -> BenchResult<Self> {
        let path = path.into();
        let (mut writer, empty) = open_append(&path)?;
        if empty {
            writer
                .write_record(LIVE_COLUMNS)
                .map_err(BenchError::storage)?;
            writer.flush()?;
        }
        tracing::debug!(path = %path.display(), fresh = empty, "Opened live metrics stream");
        Ok(Self { path, writer })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LiveMetricsSink for CsvLiveSink {
    fn append(&mut self, row: &LiveMetricRow) -> BenchResult<()> {
        self.writer
            .write_record(live_record(row))
            .map_err(BenchError::storage)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for CsvLiveSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvLiveSink")
            .field("path", &self.path)
            .finish()
    }
}
