//! Result persistence for experiment runs
//!
//! This crate provides:
//!
//! - The run-directory layout (one directory per run, one subdirectory per
//!   sequence label)
//! - Append-mode CSV implementations of the `ResultSink` and
//!   `LiveMetricsSink` traits

#![warn(missing_docs)]
#![warn(clippy::all)]

mod csv_sink;
mod run_dir;

pub use csv_sink::{CsvLiveSink, CsvResultSink, LIVE_COLUMNS, RESULT_COLUMNS};
pub use run_dir::{RunDirectory, LIVE_FILE, PLAN_FILE, RESULTS_FILE};
