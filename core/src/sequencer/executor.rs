//! Sequence execution logic

use std::sync::Arc;
use std::time::Instant;

use crate::context::OrchestrationContext;
use crate::controller::{CapacityController, ModeController, ScalerPatch};
use crate::dispatcher::{BatchOutcome, BatchRequest, JobDispatcher};
use crate::error::{BenchError, BenchResult};
use crate::experiment::{ExperimentPlan, ExperimentStep, SequenceDefinition};
use crate::metrics::ResultRow;
use crate::poll::sleep_or_shutdown;
use crate::traits::{LiveMetricsSink, ResultSink, SinkFactory};

use super::summary::{RunSummary, SequenceSummary, StepSummary};

/// Reborrow the live sink for one step
fn live_slot<'s>(
    live: &'s mut Option<&mut dyn LiveMetricsSink>,
) -> Option<&'s mut dyn LiveMetricsSink> {
    match live {
        Some(sink) => Some(&mut **sink),
        None => None,
    }
}

/// Drives experiment steps one at a time
///
/// Holds no state across steps besides the shared context; the worker pool
/// is re-read from the cluster before every decision.
pub struct ExperimentSequencer {
    ctx: Arc<OrchestrationContext>,
}

impl ExperimentSequencer {
    /// Create a sequencer over a built context
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self { ctx }
    }

    /// Shared context
    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    /// Request shutdown; the in-flight batch is still extracted and deleted
    pub fn shutdown(&self) {
        self.ctx.shutdown();
    }

    /// Run every step of one sequence, appending rows as each step finishes
    ///
    /// # Errors
    ///
    /// The first failing step halts the sequence. A batch that times out or
    /// is cancelled has its rows appended before the error is returned; a
    /// batch that ends in `Failed` is logged and the sequence continues.
    pub async fn run_sequence(
        &self,
        sequence: &SequenceDefinition,
        results: &mut dyn ResultSink,
        mut live: Option<&mut dyn LiveMetricsSink>,
    ) -> BenchResult<SequenceSummary> {
        let started = Instant::now();
        let steps = sequence.expand();
        let tag_repetition = sequence.is_repeated();

        tracing::info!(
            label = %sequence.label,
            steps = steps.len(),
            repetitions = ?sequence.repetitions,
            "Starting sequence"
        );

        let mut summaries = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            if self.ctx.is_shutdown() {
                tracing::warn!(label = %sequence.label, step = index, "Shutdown requested, stopping sequence");
                return Err(BenchError::Cancelled);
            }

            let summary = self
                .run_step(index, step, tag_repetition, results, live_slot(&mut live))
                .await
                .map_err(|e| {
                    tracing::error!(
                        label = %sequence.label,
                        step = index,
                        mode = %step.mode,
                        error = %e,
                        "Step failed, halting sequence"
                    );
                    e
                })?;
            summaries.push(summary);
        }

        let summary = SequenceSummary {
            label: sequence.label.clone(),
            steps: summaries,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            label = %summary.label,
            steps = summary.steps.len(),
            rows = summary.total_rows(),
            failed_batches = summary.failed_batches(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Sequence completed"
        );
        Ok(summary)
    }

    async fn run_step(
        &self,
        index: usize,
        step: &ExperimentStep,
        tag_repetition: bool,
        results: &mut dyn ResultSink,
        live: Option<&mut dyn LiveMetricsSink>,
    ) -> BenchResult<StepSummary> {
        let started = Instant::now();
        step.validate()?;

        tracing::info!(
            step = index,
            mode = %step.mode,
            clients = step.client_count,
            workers = step.worker_count,
            requests = step.request_count,
            restart = step.restart_workers,
            repetition = step.repetition_index,
            "Starting step"
        );

        ModeController::new(&self.ctx).set_mode(step.mode).await?;

        let capacity = CapacityController::new(&self.ctx)
            .set_capacity(step.worker_count, step.mode, step.restart_workers)
            .await?;
        if let ScalerPatch::Degraded { reason } = &capacity.scaler {
            if self.ctx.config().cluster.strict_autoscaler {
                return Err(BenchError::AutoscalerDegraded(reason.clone()));
            }
        }

        let settle = self.ctx.config().timing.restart_settle;
        if step.restart_workers && !settle.is_zero() {
            tracing::debug!(settle_secs = settle.as_secs_f64(), "Waiting after worker restart");
            let mut rx = self.ctx.shutdown_receiver();
            if sleep_or_shutdown(&mut rx, settle).await {
                return Err(BenchError::Cancelled);
            }
        }

        let report = JobDispatcher::new(&self.ctx)
            .run(&BatchRequest::from(step), live)
            .await?;

        let repetition = tag_repetition.then_some(step.repetition_index);
        let rows: Vec<ResultRow> = report
            .records
            .into_iter()
            .map(|record| ResultRow {
                record,
                mode: step.mode,
                worker_count: step.worker_count,
                repetition,
            })
            .collect();
        results.append(&rows)?;

        match report.outcome {
            BatchOutcome::Completed => {}
            BatchOutcome::Failed => {
                tracing::warn!(
                    batch_id = %report.batch_id,
                    failed = report.status.failed,
                    "Batch failed, continuing with next step"
                );
            }
            BatchOutcome::TimedOut => {
                return Err(BenchError::timeout(
                    format!("batch {}", report.batch_id),
                    report.elapsed,
                ));
            }
            BatchOutcome::Cancelled => return Err(BenchError::Cancelled),
        }

        Ok(StepSummary {
            index,
            step: *step,
            batch_id: report.batch_id,
            outcome: report.outcome,
            rows: rows.len(),
            live_rows: report.live_rows,
            available_workers: capacity.state.available_replicas,
            scaler: capacity.scaler,
            elapsed: started.elapsed(),
        })
    }

    /// Run every sequence of a plan in order
    ///
    /// Stale batches are removed first when `cleanup_stale_batches` is set.
    /// Each sequence gets its own output streams from `outputs`.
    pub async fn run_plan<F: SinkFactory>(
        &self,
        plan: &ExperimentPlan,
        outputs: &mut F,
    ) -> BenchResult<RunSummary> {
        let started = Instant::now();
        plan.validate()?;

        let mut summary = RunSummary::default();
        if self.ctx.config().cleanup_stale_batches {
            let report = JobDispatcher::new(&self.ctx).cleanup_stale().await?;
            tracing::info!(
                batches = report.batches,
                pods = report.pods,
                "Removed stale batches"
            );
            summary.stale_cleanup = Some(report);
        }

        tracing::info!(
            sequences = plan.sequences.len(),
            steps = plan.total_steps(),
            "Starting experiment plan"
        );

        for sequence in &plan.sequences {
            let (mut results, mut live) = outputs.open(sequence)?;
            let seq_summary = self
                .run_sequence(
                    sequence,
                    &mut results,
                    live.as_mut().map(|l| l as &mut dyn LiveMetricsSink),
                )
                .await?;
            summary.sequences.push(seq_summary);
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            sequences = summary.sequences.len(),
            steps = summary.total_steps(),
            rows = summary.total_rows(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Experiment plan completed"
        );
        Ok(summary)
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C triggers the shared shutdown signal; the in-flight batch is
    /// cleaned up and the run ends with [`BenchError::Cancelled`].
    pub async fn run_with_signal_handling<F: SinkFactory>(
        &self,
        plan: &ExperimentPlan,
        outputs: &mut F,
    ) -> BenchResult<RunSummary> {
        let shutdown_tx = self.ctx.shutdown_handle();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, cleaning up the in-flight batch...");
                    shutdown_tx.send_replace(true);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run_plan(plan, outputs).await;

        signal_handle.abort();

        result
    }
}

impl std::fmt::Debug for ExperimentSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentSequencer")
            .field("ctx", &self.ctx)
            .finish()
    }
}
