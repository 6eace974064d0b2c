//! Error types for sonic-bench-core

use std::time::Duration;

use thiserror::Error;

use crate::traits::{ClusterError, MonitoringError};

/// Core orchestration error
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required builder field was never set
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Exposure mode outside of {direct, gateway}
    #[error("invalid mode '{0}', must be 'direct' or 'gateway'")]
    InvalidMode(String),

    /// Experiment step failed validation
    #[error("invalid experiment step: {0}")]
    InvalidStep(String),

    /// Orchestrator API failure
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Monitoring backend failure
    #[error("monitoring error: {0}")]
    Monitoring(#[from] MonitoringError),

    /// A convergence wait exhausted its budget
    #[error("{target} did not converge within {elapsed:?}")]
    ConvergenceTimeout {
        /// What was being waited on
        target: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Autoscaler policy could not be patched and strict mode is on
    #[error("autoscaler policy patch failed: {0}")]
    AutoscalerDegraded(String),

    /// Shutdown was requested while work was in flight
    #[error("run cancelled by shutdown signal")]
    Cancelled,

    /// Output stream failure
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing-configuration error for a builder field
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig(field)
    }

    /// Create an invalid-step error
    pub fn invalid_step(msg: impl Into<String>) -> Self {
        Self::InvalidStep(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Create a convergence timeout error
    pub fn timeout(target: impl Into<String>, elapsed: Duration) -> Self {
        Self::ConvergenceTimeout {
            target: target.into(),
            elapsed,
        }
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            BenchError::InvalidMode("bogus".into()).to_string(),
            "invalid mode 'bogus', must be 'direct' or 'gateway'"
        );
        assert_eq!(
            BenchError::missing_config("cluster").to_string(),
            "missing configuration: cluster"
        );
    }

    #[test]
    fn test_cluster_error_conversion() {
        let err: BenchError = ClusterError::not_found("Job", "sonic-benchmark-1").into();
        assert!(matches!(err, BenchError::Cluster(ref e) if e.is_not_found()));
    }
}
