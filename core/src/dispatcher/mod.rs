//! Job Dispatcher: load-generator batch lifecycle
//!
//! A batch moves through `Pending -> Running -> {Completed, Failed} -> Deleted`:
//! - submit `client_count` identical tasks behind a startup barrier
//! - poll status at a fixed interval, sampling telemetry on every tick
//! - parse every task log into a [`MetricRecord`](crate::metrics::MetricRecord)
//! - delete the batch, whatever the outcome

mod batch;
mod executor;
mod stats;

pub use batch::{
    endpoint, load_generator_selector, task_script, BatchId, BatchRequest, BatchSpec,
    TaskContainer, LOAD_GENERATOR_ROLE, ROLE_LABEL,
};
pub use executor::{BatchOutcome, BatchPhase, BatchReport, CleanupReport, JobDispatcher};
pub use stats::TelemetryAccumulator;
