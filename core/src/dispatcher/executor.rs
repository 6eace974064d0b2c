//! Batch lifecycle execution

use std::time::Duration;

use chrono::Utc;

use crate::context::OrchestrationContext;
use crate::error::{BenchError, BenchResult};
use crate::experiment::ServiceMode;
use crate::metrics::{LiveMetricRow, MetricRecord, SampleStats, TelemetryKind};
use crate::parse::parse_task_log;
use crate::poll::Wait;
use crate::traits::{BatchStatus, LiveMetricsSink};

use super::batch::{load_generator_selector, BatchId, BatchRequest, BatchSpec};
use super::stats::TelemetryAccumulator;

/// Lifecycle phase of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Submitted, no task running yet
    Pending,
    /// At least one task active
    Running,
    /// Every task succeeded
    Completed,
    /// Failures reached the task count
    Failed,
    /// Removed from the cluster
    Deleted,
}

impl BatchPhase {
    /// Phase implied by observed status counters
    pub fn observe(status: &BatchStatus, client_count: u32) -> Self {
        if status.succeeded == client_count {
            BatchPhase::Completed
        } else if status.failed >= client_count {
            BatchPhase::Failed
        } else if status.active > 0 || status.succeeded > 0 || status.failed > 0 {
            BatchPhase::Running
        } else {
            BatchPhase::Pending
        }
    }

    /// Whether the poll loop should exit
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchPhase::Completed | BatchPhase::Failed | BatchPhase::Deleted
        )
    }
}

/// Why the poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// `succeeded == client_count`
    Completed,
    /// `failed >= client_count`
    Failed,
    /// `timing.batch_timeout` elapsed first
    TimedOut,
    /// Shutdown was requested
    Cancelled,
}

/// Everything a finished batch produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Batch name
    pub batch_id: BatchId,
    /// How the poll loop ended
    pub outcome: BatchOutcome,
    /// Last observed status counters
    pub status: BatchStatus,
    /// One record per task
    pub records: Vec<MetricRecord>,
    /// Batch-level overhead statistics
    pub overhead: Option<SampleStats>,
    /// Batch-level GPU utilization statistics
    pub gpu_util: Option<SampleStats>,
    /// Telemetry ticks
    pub ticks: u32,
    /// Live rows emitted
    pub live_rows: u32,
    /// Time from submission to deletion
    pub elapsed: Duration,
}

/// Signals observed on one tick
#[derive(Debug, Clone, Copy, Default)]
struct TickObservation {
    overhead: Option<f64>,
    gpu_util: Option<f64>,
    total_latency: Option<f64>,
    running_clients: Option<u32>,
    running_workers: Option<u32>,
}

/// Live row for a tick, or `None` when the mode's policy suppresses it
///
/// The autoscaled mode only reports ticks where every signal is present, so
/// sparse rows from a converging pool are skipped. The pinned mode reports
/// every tick, nulls included.
fn live_row(mode: ServiceMode, obs: &TickObservation) -> Option<LiveMetricRow> {
    let row = LiveMetricRow {
        timestamp: Utc::now(),
        running_clients: obs.running_clients,
        running_workers: obs.running_workers,
        overhead: obs.overhead,
        gpu_util: obs.gpu_util,
        total_latency: obs.total_latency,
    };
    match mode {
        ServiceMode::Direct if !row.is_complete() => None,
        _ => Some(row),
    }
}

/// Runs load-generator batches to completion
pub struct JobDispatcher<'a> {
    ctx: &'a OrchestrationContext,
}

impl<'a> JobDispatcher<'a> {
    /// Create a dispatcher
    pub fn new(ctx: &'a OrchestrationContext) -> Self {
        Self { ctx }
    }

    /// Launch a batch, poll it to a terminal state, extract records, delete it
    ///
    /// Extraction and deletion run whatever the poll loop's outcome; the batch
    /// is deleted exactly once. Errors from the loop or extraction are
    /// returned only after deletion has been attempted.
    pub async fn run(
        &self,
        request: &BatchRequest,
        mut live: Option<&mut dyn LiveMetricsSink>,
    ) -> BenchResult<BatchReport> {
        if request.client_count == 0 {
            return Err(BenchError::invalid_step("client_count must be at least 1"));
        }
        if request.request_count == 0 {
            return Err(BenchError::invalid_step("request_count must be at least 1"));
        }

        let config = self.ctx.config();
        let cluster = self.ctx.cluster();
        let started = std::time::Instant::now();

        let id = BatchId::generate(&config.load_generator.job_base_name);
        let spec = BatchSpec::new(id.clone(), request, config);
        cluster.create_batch(&spec).await?;
        tracing::info!(
            batch_id = %id,
            clients = request.client_count,
            requests = request.request_count,
            mode = %request.mode,
            "Batch submitted"
        );

        let mut acc = TelemetryAccumulator::new();
        let mut live_rows = 0u32;
        let polled = self
            .poll(&id, request, &mut acc, &mut live, &mut live_rows)
            .await;

        let overhead = acc.overhead_stats();
        let gpu_util = acc.gpu_stats();
        tracing::info!(
            batch_id = %id,
            mode = %request.mode,
            clients = request.client_count,
            overhead_avg = ?overhead.map(|s| s.mean),
            overhead_std = ?overhead.map(|s| s.std),
            gpu_util_avg = ?gpu_util.map(|s| s.mean),
            gpu_util_std = ?gpu_util.map(|s| s.std),
            ticks = acc.ticks(),
            failed_queries = acc.failed_queries(),
            "Batch telemetry"
        );

        let extracted = self
            .extract(&id, request.client_count, overhead, gpu_util)
            .await;
        let deleted = self.delete(&id).await;

        let (outcome, status) = polled?;
        let records = extracted?;
        deleted?;

        Ok(BatchReport {
            batch_id: id,
            outcome,
            status,
            records,
            overhead,
            gpu_util,
            ticks: acc.ticks(),
            live_rows,
            elapsed: started.elapsed(),
        })
    }

    async fn poll(
        &self,
        id: &BatchId,
        request: &BatchRequest,
        acc: &mut TelemetryAccumulator,
        live: &mut Option<&mut dyn LiveMetricsSink>,
        live_rows: &mut u32,
    ) -> BenchResult<(BatchOutcome, BatchStatus)> {
        let cluster = self.ctx.cluster();
        let mut timer = self.ctx.poll_timer(self.ctx.config().timing.batch_timeout);
        let mut phase = BatchPhase::Pending;

        loop {
            let status = cluster.batch_status(id.as_str()).await?;
            let observed = BatchPhase::observe(&status, request.client_count);
            if observed != phase {
                tracing::debug!(
                    batch_id = %id,
                    from = ?phase,
                    to = ?observed,
                    succeeded = status.succeeded,
                    failed = status.failed,
                    active = status.active,
                    "Batch phase changed"
                );
                phase = observed;
            }

            match phase {
                BatchPhase::Completed => return Ok((BatchOutcome::Completed, status)),
                BatchPhase::Failed => {
                    tracing::warn!(
                        batch_id = %id,
                        failed = status.failed,
                        "Batch failed"
                    );
                    return Ok((BatchOutcome::Failed, status));
                }
                _ => {}
            }

            let obs = self.tick(id, acc, live.is_some()).await;
            if let Some(sink) = live.as_deref_mut() {
                if let Some(row) = live_row(request.mode, &obs) {
                    sink.append(&row)?;
                    *live_rows += 1;
                }
            }

            match timer.wait().await {
                Wait::Continue => {}
                Wait::Expired => {
                    tracing::warn!(
                        batch_id = %id,
                        elapsed_secs = timer.elapsed().as_secs_f64(),
                        "Batch did not finish within its budget"
                    );
                    return Ok((BatchOutcome::TimedOut, status));
                }
                Wait::Cancelled => {
                    tracing::warn!(batch_id = %id, "Batch interrupted by shutdown");
                    return Ok((BatchOutcome::Cancelled, status));
                }
            }
        }
    }

    /// Sample telemetry for one tick; query failures count as "no sample"
    async fn tick(
        &self,
        id: &BatchId,
        acc: &mut TelemetryAccumulator,
        count_pods: bool,
    ) -> TickObservation {
        let mut obs = TickObservation::default();
        for kind in TelemetryKind::ALL {
            let value = match self.ctx.sampler().sample(kind).await {
                Ok(sample) => sample.map(|s| s.value),
                Err(e) => {
                    tracing::warn!(
                        batch_id = %id,
                        signal = kind.as_str(),
                        error = %e,
                        "Telemetry query failed, skipping sample"
                    );
                    acc.record_failure();
                    None
                }
            };
            match kind {
                TelemetryKind::OverheadLatency => obs.overhead = value,
                TelemetryKind::GpuUtilization => obs.gpu_util = value,
                TelemetryKind::TotalLatency => obs.total_latency = value,
            }
        }
        acc.record(obs.overhead, obs.gpu_util);

        if count_pods {
            obs.running_clients = self.count(id, &id.selector()).await;
            obs.running_workers = self
                .count(id, &self.ctx.config().cluster.worker_selector)
                .await;
        }
        obs
    }

    async fn count(&self, id: &BatchId, selector: &str) -> Option<u32> {
        match self.ctx.cluster().count_running(selector).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(batch_id = %id, selector, error = %e, "Failed to count running pods");
                None
            }
        }
    }

    /// One record per task; a task whose log cannot be read gets an empty record
    async fn extract(
        &self,
        id: &BatchId,
        client_count: u32,
        overhead: Option<SampleStats>,
        gpu_util: Option<SampleStats>,
    ) -> BenchResult<Vec<MetricRecord>> {
        let cluster = self.ctx.cluster();
        let pods = cluster.list_pods(&id.selector()).await?;

        let mut records = Vec::with_capacity(pods.len());
        for pod in pods {
            let record = match cluster.pod_logs(&pod.name).await {
                Ok(text) => MetricRecord {
                    log: parse_task_log(&text),
                    ..MetricRecord::empty(client_count, pod.name)
                },
                Err(e) => {
                    tracing::warn!(
                        batch_id = %id,
                        pod = %pod.name,
                        error = %e,
                        "Failed to read task log, recording empty metrics"
                    );
                    MetricRecord::empty(client_count, pod.name)
                }
            };
            records.push(record.with_batch_stats(overhead, gpu_util));
        }

        tracing::info!(batch_id = %id, records = records.len(), "Extracted task metrics");
        Ok(records)
    }

    async fn delete(&self, id: &BatchId) -> BenchResult<()> {
        match self.ctx.cluster().delete_batch(id.as_str()).await {
            Ok(()) => {
                tracing::debug!(batch_id = %id, phase = ?BatchPhase::Deleted, "Batch deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(batch_id = %id, "Batch already gone");
                Ok(())
            }
            Err(e) => {
                tracing::error!(batch_id = %id, error = %e, "Failed to delete batch");
                Err(e.into())
            }
        }
    }

    /// Delete every leftover load-generator batch and stray task
    ///
    /// Only objects carrying both the `app` and the load-generator role label
    /// are touched. Individual delete failures are logged and skipped.
    pub async fn cleanup_stale(&self) -> BenchResult<CleanupReport> {
        let cluster = self.ctx.cluster();
        let selector = load_generator_selector(&self.ctx.config().load_generator.job_base_name);
        let mut report = CleanupReport::default();

        for name in cluster.list_batches(&selector).await? {
            match cluster.delete_batch(&name).await {
                Ok(()) => {
                    tracing::info!(batch = %name, "Deleted stale batch");
                    report.batches += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(batch = %name, error = %e, "Failed to delete stale batch"),
            }
        }

        for pod in cluster.list_pods(&selector).await? {
            match cluster.delete_pod(&pod.name).await {
                Ok(()) => {
                    tracing::info!(pod = %pod.name, "Deleted stale task");
                    report.pods += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(pod = %pod.name, error = %e, "Failed to delete stale task"),
            }
        }

        Ok(report)
    }
}

/// Objects removed by [`JobDispatcher::cleanup_stale`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Batches deleted
    pub batches: usize,
    /// Stray tasks deleted
    pub pods: usize,
}
