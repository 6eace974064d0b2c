//! Per-step, per-sequence and per-run summaries

use std::time::Duration;

use crate::controller::ScalerPatch;
use crate::dispatcher::{BatchId, BatchOutcome, CleanupReport};
use crate::experiment::ExperimentStep;

/// What one step did
#[derive(Debug, Clone)]
pub struct StepSummary {
    /// Position in the expanded step list
    pub index: usize,
    /// The step
    pub step: ExperimentStep,
    /// Batch launched for the step
    pub batch_id: BatchId,
    /// How the batch ended
    pub outcome: BatchOutcome,
    /// Result rows appended
    pub rows: usize,
    /// Live rows appended
    pub live_rows: u32,
    /// Available workers once capacity converged
    pub available_workers: u32,
    /// Autoscaler patch result
    pub scaler: ScalerPatch,
    /// Wall time of the step
    pub elapsed: Duration,
}

/// What one labelled sequence did
#[derive(Debug, Clone)]
pub struct SequenceSummary {
    /// Sequence label
    pub label: String,
    /// Completed steps, in order
    pub steps: Vec<StepSummary>,
    /// Wall time of the sequence
    pub elapsed: Duration,
}

impl SequenceSummary {
    /// Result rows appended across all steps
    pub fn total_rows(&self) -> usize {
        self.steps.iter().map(|s| s.rows).sum()
    }

    /// Steps whose batch ended in `Failed`
    pub fn failed_batches(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == BatchOutcome::Failed)
            .count()
    }

    /// Steps that ran with a degraded autoscaler policy
    pub fn degraded_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.scaler.is_degraded()).count()
    }
}

/// What a whole plan did
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Stale objects removed before the first step
    pub stale_cleanup: Option<CleanupReport>,
    /// Sequences, in execution order
    pub sequences: Vec<SequenceSummary>,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Steps executed across all sequences
    pub fn total_steps(&self) -> usize {
        self.sequences.iter().map(|s| s.steps.len()).sum()
    }

    /// Result rows appended across all sequences
    pub fn total_rows(&self) -> usize {
        self.sequences.iter().map(SequenceSummary::total_rows).sum()
    }
}
