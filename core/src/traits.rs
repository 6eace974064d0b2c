//! Backend traits for the cluster, the monitoring system and output sinks
//!
//! These traits are defined in core so the orchestration logic can be driven
//! by fakes in tests. Implementations live in their respective crates
//! (cluster/, samplers/, storage/).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::controller::ExposureSpec;
use crate::dispatcher::BatchSpec;
use crate::experiment::SequenceDefinition;
use crate::error::BenchResult;
use crate::metrics::{LiveMetricRow, ResultRow};

// ============================================================================
// Cluster API
// ============================================================================

/// Autoscaler bounds written to the policy object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalerBounds {
    /// minReplicaCount
    pub min: u32,
    /// maxReplicaCount
    pub max: u32,
}

impl ScalerBounds {
    /// Pin the pool to exactly `replicas`
    pub fn pinned(replicas: u32) -> Self {
        Self {
            min: replicas,
            max: replicas,
        }
    }
}

/// Observed state of the worker pool resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// spec.replicas
    pub desired: u32,
    /// status.availableReplicas, zero when absent
    pub available: u32,
}

/// Observed status counters of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStatus {
    /// Tasks that completed successfully
    pub succeeded: u32,
    /// Tasks that failed
    pub failed: u32,
    /// Tasks currently running
    pub active: u32,
}

/// Task phase as reported by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted, not all containers started
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers exited successfully
    Succeeded,
    /// At least one container failed
    Failed,
    /// Anything else, including a missing phase
    Unknown,
}

impl PodPhase {
    /// Parse the phase string reported by the API
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Name and phase of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    /// Pod name
    pub name: String,
    /// Current phase
    pub phase: PodPhase,
}

/// Orchestrator API used by the controllers and the dispatcher
///
/// All operations are scoped to a single namespace chosen at construction.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Namespace every call operates in
    fn namespace(&self) -> &str;

    /// Delete a network-exposure object
    async fn delete_service(&self, name: &str) -> Result<(), ClusterError>;

    /// Create a network-exposure object
    async fn create_service(&self, spec: &ExposureSpec) -> Result<(), ClusterError>;

    /// Merge-patch the autoscaler policy object's replica bounds
    async fn patch_scaler_bounds(&self, name: &str, bounds: ScalerBounds)
        -> Result<(), ClusterError>;

    /// Set the worker pool's desired replica count
    async fn scale_pool(&self, name: &str, replicas: u32) -> Result<(), ClusterError>;

    /// Read the worker pool's desired and available replica counts
    async fn pool_status(&self, name: &str) -> Result<PoolStatus, ClusterError>;

    /// Submit a batch
    async fn create_batch(&self, spec: &BatchSpec) -> Result<(), ClusterError>;

    /// Read a batch's status counters
    async fn batch_status(&self, name: &str) -> Result<BatchStatus, ClusterError>;

    /// Delete a batch, cascading to its tasks in the background
    async fn delete_batch(&self, name: &str) -> Result<(), ClusterError>;

    /// Names of batches matching a label selector
    async fn list_batches(&self, selector: &str) -> Result<Vec<String>, ClusterError>;

    /// Tasks matching a label selector
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodSummary>, ClusterError>;

    /// Full output log of a task
    async fn pod_logs(&self, name: &str) -> Result<String, ClusterError>;

    /// Delete a single task
    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError>;

    /// Count tasks in the `Running` phase matching a label selector
    async fn count_running(&self, selector: &str) -> Result<u32, ClusterError> {
        let pods = self.list_pods(selector).await?;
        Ok(pods.iter().filter(|p| p.phase == PodPhase::Running).count() as u32)
    }
}

/// Orchestrator API errors
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The named object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind
        kind: String,
        /// Object name
        name: String,
    },

    /// The API server rejected the request
    #[error("API error {code} ({reason}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Machine-readable reason
        reason: String,
        /// Human-readable message
        message: String,
    },

    /// Connection or client setup failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response could not be interpreted
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClusterError {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        ClusterError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Whether the error means the object is already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Api { code, .. } => *code == 404,
            _ => false,
        }
    }
}

// ============================================================================
// Monitoring backend
// ============================================================================

/// One element of an instant-query result vector
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    /// Series labels
    pub labels: BTreeMap<String, String>,
    /// Evaluation timestamp (unix seconds)
    pub timestamp: f64,
    /// Sample value, NaN preserved
    pub value: f64,
}

impl VectorSample {
    /// Sample with no labels
    pub fn unlabelled(timestamp: f64, value: f64) -> Self {
        Self {
            labels: BTreeMap::new(),
            timestamp,
            value,
        }
    }
}

/// Time-series monitoring backend
#[async_trait]
pub trait MonitoringBackend: Send + Sync {
    /// Backend identifier used in logs
    fn name(&self) -> &str;

    /// Evaluate an expression at the current time
    async fn instant_query(&self, expr: &str) -> Result<Vec<VectorSample>, MonitoringError>;
}

/// Monitoring backend errors
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    /// HTTP/network error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("monitoring backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The backend evaluated the query and reported an error
    #[error("query failed ({error_type}): {error}")]
    Backend {
        /// Error class reported by the backend
        error_type: String,
        /// Error message
        error: String,
    },

    /// Response body was not a valid instant vector
    #[error("malformed response: {0}")]
    Decode(String),
}

// ============================================================================
// Output sinks
// ============================================================================

/// Append-only stream of per-task result rows
pub trait ResultSink: Send {
    /// Append rows and make them durable before returning
    fn append(&mut self, rows: &[ResultRow]) -> BenchResult<()>;
}

/// Append-only stream of per-tick live telemetry rows
pub trait LiveMetricsSink: Send {
    /// Append one row and make it durable before returning
    fn append(&mut self, row: &LiveMetricRow) -> BenchResult<()>;
}

/// Opens the output streams for each labelled sequence of a run
pub trait SinkFactory {
    /// Bulk results stream
    type Results: ResultSink;
    /// Live telemetry stream
    type Live: LiveMetricsSink;

    /// Open (or reopen for append) the streams of `sequence`
    fn open(
        &mut self,
        sequence: &SequenceDefinition,
    ) -> BenchResult<(Self::Results, Option<Self::Live>)>;
}

impl fmt::Display for ScalerBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.min, self.max)
    }
}
