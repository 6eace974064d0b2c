//! Experiment steps and sequence definitions
//!
//! A sequence file holds one or more labelled sequences. Each sequence is a
//! fixed, ordered list of steps, optionally repeated. Expansion turns the
//! definition into the flat list of [`ExperimentStep`]s the sequencer consumes.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// Network-exposure topology of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Cluster-internal headless endpoint; the autoscaler owns the replica count
    #[serde(alias = "supersonic")]
    Direct,
    /// Externally load-balanced endpoint; replica count is pinned
    #[serde(alias = "bare_triton")]
    Gateway,
}

impl ServiceMode {
    /// Mode name as written to result streams
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Direct => "direct",
            ServiceMode::Gateway => "gateway",
        }
    }

    /// Whether the autoscaler is allowed to move the replica count in this mode
    pub fn is_autoscaled(&self) -> bool {
        matches!(self, ServiceMode::Direct)
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "supersonic" => Ok(ServiceMode::Direct),
            "gateway" | "bare_triton" => Ok(ServiceMode::Gateway),
            other => Err(BenchError::InvalidMode(other.to_string())),
        }
    }
}

fn default_restart() -> bool {
    true
}

/// One step as written in a sequence file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Exposure mode for this step
    pub mode: ServiceMode,
    /// Number of parallel load-generator tasks
    pub client_count: u32,
    /// Target worker-pool size
    pub worker_count: u32,
    /// Request budget per load-generator task
    pub request_count: u32,
    /// Zero the worker pool before scaling to the target
    #[serde(default = "default_restart")]
    pub restart_workers: bool,
}

/// A single experiment step, immutable once expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExperimentStep {
    /// Exposure mode
    pub mode: ServiceMode,
    /// Number of parallel load-generator tasks (> 0)
    pub client_count: u32,
    /// Target worker-pool size (>= 0)
    pub worker_count: u32,
    /// Request budget per task (> 0)
    pub request_count: u32,
    /// Force a zero-then-raise restart of the pool
    pub restart_workers: bool,
    /// Index within the repetition loop
    pub repetition_index: u32,
}

impl ExperimentStep {
    /// Create a step with the default restart policy and repetition 0
    pub fn new(mode: ServiceMode, client_count: u32, worker_count: u32, request_count: u32) -> Self {
        Self {
            mode,
            client_count,
            worker_count,
            request_count,
            restart_workers: true,
            repetition_index: 0,
        }
    }

    /// Set the restart flag
    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart_workers = restart;
        self
    }

    /// Set the repetition index
    pub fn with_repetition(mut self, index: u32) -> Self {
        self.repetition_index = index;
        self
    }

    /// Validate the step
    pub fn validate(&self) -> BenchResult<()> {
        if self.client_count == 0 {
            return Err(BenchError::invalid_step("client_count must be at least 1"));
        }
        if self.request_count == 0 {
            return Err(BenchError::invalid_step("request_count must be at least 1"));
        }
        Ok(())
    }
}

impl From<&StepDefinition> for ExperimentStep {
    fn from(def: &StepDefinition) -> Self {
        ExperimentStep::new(def.mode, def.client_count, def.worker_count, def.request_count)
            .with_restart(def.restart_workers)
    }
}

/// A labelled sequence of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceDefinition {
    /// Label, used as the output subdirectory name
    pub label: String,
    /// Number of times to repeat the step list; rows carry a repetition index when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
    /// Ordered steps
    pub steps: Vec<StepDefinition>,
}

impl SequenceDefinition {
    /// Whether result rows for this sequence carry a repetition column
    pub fn is_repeated(&self) -> bool {
        self.repetitions.is_some()
    }

    /// Expand into the flat, ordered step list (repetition-major)
    pub fn expand(&self) -> Vec<ExperimentStep> {
        let reps = self.repetitions.unwrap_or(1);
        (0..reps)
            .flat_map(|rep| {
                self.steps
                    .iter()
                    .map(move |def| ExperimentStep::from(def).with_repetition(rep))
            })
            .collect()
    }

    fn validate(&self) -> BenchResult<()> {
        if self.label.is_empty()
            || !self
                .label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BenchError::config(format!(
                "sequence label '{}' must be non-empty and contain only [A-Za-z0-9_-]",
                self.label
            )));
        }
        if self.steps.is_empty() {
            return Err(BenchError::config(format!(
                "sequence '{}' has no steps",
                self.label
            )));
        }
        if self.repetitions == Some(0) {
            return Err(BenchError::config(format!(
                "sequence '{}' has zero repetitions",
                self.label
            )));
        }
        for (idx, def) in self.steps.iter().enumerate() {
            ExperimentStep::from(def).validate().map_err(|e| {
                BenchError::invalid_step(format!("{} step {}: {}", self.label, idx, e))
            })?;
        }
        Ok(())
    }
}

/// Top-level sequence file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentPlan {
    /// Labelled sequences, executed in order
    pub sequences: Vec<SequenceDefinition>,
}

impl ExperimentPlan {
    /// Parse and validate a plan from YAML text
    pub fn from_yaml(text: &str) -> BenchResult<Self> {
        let plan: ExperimentPlan = serde_yaml::from_str(text)
            .map_err(|e| BenchError::config(format!("invalid sequence file: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read, parse and validate a plan file
    pub fn from_file(path: &Path) -> BenchResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> BenchResult<String> {
        serde_yaml::to_string(self).map_err(|e| BenchError::config(e.to_string()))
    }

    /// Validate every sequence and label uniqueness
    pub fn validate(&self) -> BenchResult<()> {
        if self.sequences.is_empty() {
            return Err(BenchError::config("sequence file defines no sequences"));
        }
        let mut seen = HashSet::new();
        for seq in &self.sequences {
            seq.validate()?;
            if !seen.insert(seq.label.as_str()) {
                return Err(BenchError::config(format!(
                    "duplicate sequence label '{}'",
                    seq.label
                )));
            }
        }
        Ok(())
    }

    /// Total number of expanded steps
    pub fn total_steps(&self) -> usize {
        self.sequences.iter().map(|s| s.expand().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
sequences:
  - label: supersonic
    repetitions: 2
    steps:
      - { mode: direct, client_count: 20, worker_count: 1, request_count: 5000 }
      - { mode: supersonic, client_count: 30, worker_count: 1, request_count: 5000, restart_workers: false }
  - label: triton_2servers
    steps:
      - { mode: bare_triton, client_count: 20, worker_count: 2, request_count: 5000, restart_workers: false }
"#;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("direct".parse::<ServiceMode>().unwrap(), ServiceMode::Direct);
        assert_eq!("Gateway".parse::<ServiceMode>().unwrap(), ServiceMode::Gateway);
        assert_eq!("supersonic".parse::<ServiceMode>().unwrap(), ServiceMode::Direct);
        assert!(matches!(
            "mesh".parse::<ServiceMode>(),
            Err(BenchError::InvalidMode(m)) if m == "mesh"
        ));
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&ServiceMode::Gateway).unwrap(), "\"gateway\"");
        let mode: ServiceMode = serde_json::from_str("\"bare_triton\"").unwrap();
        assert_eq!(mode, ServiceMode::Gateway);
    }

    #[test]
    fn test_plan_parse_and_expand() {
        let plan = ExperimentPlan::from_yaml(PLAN).unwrap();
        assert_eq!(plan.sequences.len(), 2);
        assert_eq!(plan.total_steps(), 5);

        let steps = plan.sequences[0].expand();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].repetition_index, 0);
        assert!(steps[0].restart_workers);
        assert!(!steps[1].restart_workers);
        assert_eq!(steps[2].repetition_index, 1);
        assert_eq!(steps[2].client_count, 20);
        assert!(plan.sequences[0].is_repeated());
        assert!(!plan.sequences[1].is_repeated());
        assert_eq!(plan.sequences[1].expand()[0].mode, ServiceMode::Gateway);
    }

    #[test]
    fn test_plan_rejects_invalid_mode() {
        let text = r#"
sequences:
  - label: x
    steps:
      - { mode: mesh, client_count: 1, worker_count: 1, request_count: 1 }
"#;
        assert!(ExperimentPlan::from_yaml(text).is_err());
    }

    #[test]
    fn test_plan_rejects_zero_clients() {
        let text = r#"
sequences:
  - label: x
    steps:
      - { mode: direct, client_count: 0, worker_count: 1, request_count: 1 }
"#;
        let err = ExperimentPlan::from_yaml(text).unwrap_err();
        assert!(matches!(err, BenchError::InvalidStep(_)));
    }

    #[test]
    fn test_plan_rejects_duplicate_labels() {
        let text = r#"
sequences:
  - label: a
    steps: [{ mode: direct, client_count: 1, worker_count: 1, request_count: 1 }]
  - label: a
    steps: [{ mode: direct, client_count: 1, worker_count: 1, request_count: 1 }]
"#;
        assert!(ExperimentPlan::from_yaml(text).is_err());
    }

    #[test]
    fn test_plan_rejects_unsafe_label() {
        let text = r#"
sequences:
  - label: ../escape
    steps: [{ mode: direct, client_count: 1, worker_count: 1, request_count: 1 }]
"#;
        assert!(ExperimentPlan::from_yaml(text).is_err());
    }

    #[test]
    fn test_zero_workers_allowed() {
        let step = ExperimentStep::new(ServiceMode::Gateway, 1, 0, 10);
        assert!(step.validate().is_ok());
    }

    #[test]
    fn test_plan_yaml_roundtrip_keeps_labels() {
        let plan = ExperimentPlan::from_yaml(PLAN).unwrap();
        let again = ExperimentPlan::from_yaml(&plan.to_yaml().unwrap()).unwrap();
        assert_eq!(plan, again);
    }
}
