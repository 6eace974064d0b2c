//! Run directory layout
//!
//! ```text
//! <base>/multiseq_<YYYYmmdd_HHMMSS>/
//!     sequence.yaml
//!     <label>/results.csv
//!     <label>/live_metrics.csv
//! ```

use std::path::{Path, PathBuf};

use chrono::Local;
use sonic_bench_core::{BenchResult, ExperimentPlan, SequenceDefinition, SinkFactory};

use crate::csv_sink::{CsvLiveSink, CsvResultSink};

/// Bulk results file name
pub const RESULTS_FILE: &str = "results.csv";
/// Live telemetry file name
pub const LIVE_FILE: &str = "live_metrics.csv";
/// Copy of the executed plan
pub const PLAN_FILE: &str = "sequence.yaml";

/// One directory per run, one subdirectory per sequence label
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Create `<base>/multiseq_<timestamp>`, creating `base` as needed
    pub fn create(base: impl AsRef<Path>) -> BenchResult<Self> {
        let name = format!("multiseq_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let root = base.as_ref().join(name);
        std::fs::create_dir_all(&root)?;
        tracing::info!(path = %root.display(), "Created run directory");
        Ok(Self { root })
    }

    /// Use an existing directory as the run root
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Run root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a sequence label
    pub fn label_dir(&self, label: &str) -> PathBuf {
        self.root.join(label)
    }

    /// Open both streams of a label, creating its directory
    pub fn label_outputs(
        &self,
        label: &str,
        with_repetition: bool,
    ) -> BenchResult<(CsvResultSink, CsvLiveSink)> {
        let dir = self.label_dir(label);
        std::fs::create_dir_all(&dir)?;
        let results = CsvResultSink::open(dir.join(RESULTS_FILE), with_repetition)?;
        let live = CsvLiveSink::open(dir.join(LIVE_FILE))?;
        Ok((results, live))
    }

    /// Write the executed plan next to the results
    pub fn write_plan(&self, plan: &ExperimentPlan) -> BenchResult<PathBuf> {
        let path = self.root.join(PLAN_FILE);
        std::fs::write(&path, plan.to_yaml()?)?;
        Ok(path)
    }
}

impl SinkFactory for RunDirectory {
    type Results = CsvResultSink;
    type Live = CsvLiveSink;

    fn open(
        &mut self,
        sequence: &SequenceDefinition,
    ) -> BenchResult<(Self::Results, Option<Self::Live>)> {
        let (results, live) = self.label_outputs(&sequence.label, sequence.is_repeated())?;
        tracing::info!(
            label = %sequence.label,
            results = %results.path().display(),
            live = %live.path().display(),
            "Opened sequence outputs"
        );
        Ok((results, Some(live)))
    }
}
