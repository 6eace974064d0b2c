//! sonic-bench-core: experiment orchestration for autoscaled inference backends
//!
//! This crate drives load-testing experiments against a worker pool running on
//! a container orchestrator, including:
//!
//! - Experiment plans, steps and configuration
//! - Backend traits (ClusterApi, MonitoringBackend, result sinks)
//! - Mode and Capacity controllers
//! - The Job Dispatcher batch lifecycle and telemetry sampling
//! - The Experiment Sequencer
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod experiment;
pub mod metrics;
pub mod parse;
pub mod poll;
pub mod sequencer;
pub mod telemetry;
pub mod traits;

#[cfg(test)]
mod fakes;

pub use config::*;
pub use context::{ContextBuilder, OrchestrationContext};
pub use controller::{
    CapacityController, CapacityOutcome, ExposurePort, ExposureSpec, ExposureTopology,
    ModeController, ScalerPatch, WorkerPoolState,
};
pub use dispatcher::{
    BatchId, BatchOutcome, BatchPhase, BatchReport, BatchRequest, BatchSpec, CleanupReport,
    JobDispatcher, TaskContainer, LOAD_GENERATOR_ROLE, ROLE_LABEL,
};
pub use error::*;
pub use experiment::*;
pub use metrics::*;
pub use parse::parse_task_log;
pub use poll::{PollBudget, PollOutcome, PollTimer};
pub use sequencer::{ExperimentSequencer, RunSummary, SequenceSummary, StepSummary};
pub use telemetry::{TelemetryQueries, TelemetrySampler};
pub use traits::*;
