//! Experiment Sequencer: the top-level driver
//!
//! For each step of a sequence, in order:
//! - Mode Controller sets the exposure topology
//! - Capacity Controller drives the worker pool to the step's target
//! - Job Dispatcher runs one batch
//! - the batch's records are tagged and appended to the results stream
//!
//! A step failure halts the sequence. Rows produced before the failure are
//! already on disk.
//!
//! # Example
//!
//! ```ignore
//! use sonic_bench_core::{ExperimentSequencer, OrchestrationContext};
//!
//! let ctx = Arc::new(OrchestrationContext::builder()
//!     .config(config)
//!     .cluster(cluster)
//!     .monitoring(prometheus)
//!     .build()?);
//!
//! let summary = ExperimentSequencer::new(ctx)
//!     .run_with_signal_handling(&plan, &mut run_dir)
//!     .await?;
//! ```

mod executor;
mod summary;

pub use executor::ExperimentSequencer;
pub use summary::{RunSummary, SequenceSummary, StepSummary};
