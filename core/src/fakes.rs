//! In-memory cluster and monitoring backends for unit tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::BenchConfig;
use crate::context::OrchestrationContext;
use crate::controller::ExposureSpec;
use crate::dispatcher::{BatchSpec, LOAD_GENERATOR_ROLE, ROLE_LABEL};
use crate::error::BenchResult;
use crate::metrics::{LiveMetricRow, ResultRow};
use crate::traits::{
    BatchStatus, ClusterApi, ClusterError, LiveMetricsSink, MonitoringBackend, MonitoringError,
    PodPhase, PodSummary, PoolStatus, ResultSink, ScalerBounds, VectorSample,
};

/// Context with zero settle times and a millisecond poll interval
pub(crate) fn test_context(cluster: Arc<FakeCluster>) -> OrchestrationContext {
    test_context_full(cluster, Arc::new(FakeMonitoring::new()), |_| {})
}

pub(crate) fn test_context_with(
    cluster: Arc<FakeCluster>,
    tweak: impl FnOnce(&mut BenchConfig),
) -> OrchestrationContext {
    test_context_full(cluster, Arc::new(FakeMonitoring::new()), tweak)
}

pub(crate) fn test_context_full(
    cluster: Arc<FakeCluster>,
    monitoring: Arc<FakeMonitoring>,
    tweak: impl FnOnce(&mut BenchConfig),
) -> OrchestrationContext {
    let mut config = BenchConfig::default();
    config.timing.poll_interval = Duration::from_millis(2);
    config.timing.exposure_delete_settle = Duration::ZERO;
    config.timing.exposure_create_settle = Duration::ZERO;
    config.timing.restart_settle = Duration::ZERO;
    config.timing.capacity_timeout = Some(Duration::from_secs(5));
    config.timing.batch_timeout = Some(Duration::from_secs(5));
    tweak(&mut config);

    OrchestrationContext::builder()
        .config(config)
        .cluster(cluster)
        .monitoring(monitoring)
        .build()
        .expect("test context")
}

// ============================================================================
// Fake cluster
// ============================================================================

#[derive(Default)]
struct ClusterState {
    calls: Vec<String>,
    services: BTreeMap<String, ExposureSpec>,
    service_delete_error: Option<ClusterError>,
    scaler_error: Option<ClusterError>,
    scaler_bounds: Option<ScalerBounds>,
    desired: u32,
    available: u32,
    stuck: bool,
    scale_history: Vec<u32>,
    min_available: Option<u32>,
    batches: BTreeMap<String, BatchSpec>,
    created_batches: Vec<BatchSpec>,
    deleted_batches: Vec<String>,
    stale_batches: Vec<(String, Labels)>,
    stale_pods: Vec<(String, Labels)>,
    deleted_pods: Vec<String>,
    progress: Vec<BatchStatus>,
    status_reads: usize,
    status_error_at: Option<usize>,
    pod_phase: Option<PodPhase>,
    running_workers: u32,
    logs: BTreeMap<String, String>,
    default_log: String,
    failing_logs: Vec<String>,
    list_pods_error: bool,
}

type Labels = BTreeMap<String, String>;

fn load_generator_labels() -> Labels {
    BTreeMap::from([
        ("app".to_string(), "sonic-benchmark".to_string()),
        (ROLE_LABEL.to_string(), LOAD_GENERATOR_ROLE.to_string()),
    ])
}

/// Equality-based label selector (`k=v,k2=v2`)
fn selector_matches(selector: &str, labels: &Labels) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => false,
    })
}

/// Scriptable in-memory [`ClusterApi`]
pub(crate) struct FakeCluster {
    namespace: String,
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self {
            namespace: "cms".into(),
            state: Mutex::new(ClusterState {
                running_workers: 1,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    fn log_call(&self, call: String) {
        self.state().calls.push(call);
    }

    pub(crate) fn with_pool(self, desired: u32, available: u32) -> Self {
        {
            let mut s = self.state();
            s.desired = desired;
            s.available = available;
        }
        self
    }

    /// Available replicas never move
    pub(crate) fn with_stuck_pool(self) -> Self {
        self.state().stuck = true;
        self
    }

    /// Successive batch status observations; the last one repeats
    pub(crate) fn with_progress(self, progress: Vec<BatchStatus>) -> Self {
        self.state().progress = progress;
        self
    }

    pub(crate) fn with_log(self, log: &str) -> Self {
        self.state().default_log = log.to_string();
        self
    }

    pub(crate) fn with_pod_phase(self, phase: PodPhase) -> Self {
        self.state().pod_phase = Some(phase);
        self
    }

    /// Leftover load-generator batches and tasks from an earlier run
    pub(crate) fn with_stale(self, batches: &[&str], pods: &[&str]) -> Self {
        {
            let mut s = self.state();
            let labels = load_generator_labels();
            s.stale_batches
                .extend(batches.iter().map(|b| (b.to_string(), labels.clone())));
            s.stale_pods
                .extend(pods.iter().map(|p| (p.to_string(), labels.clone())));
        }
        self
    }

    /// A job and its pod carrying only `labels`, outside the dispatcher's control
    pub(crate) fn with_foreign_job(self, job: &str, pod: &str, labels: &[(&str, &str)]) -> Self {
        {
            let mut s = self.state();
            let labels: Labels = labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            s.stale_batches.push((job.to_string(), labels.clone()));
            s.stale_pods.push((pod.to_string(), labels));
        }
        self
    }

    /// Names of leftover jobs still present
    pub(crate) fn remaining_stale_batches(&self) -> Vec<String> {
        self.state()
            .stale_batches
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn fail_service_delete(&self, err: ClusterError) {
        self.state().service_delete_error = Some(err);
    }

    pub(crate) fn fail_scaler_patch(&self, err: ClusterError) {
        self.state().scaler_error = Some(err);
    }

    /// Fail the n-th batch status read (0-based)
    pub(crate) fn fail_status_read(&self, n: usize) {
        self.state().status_error_at = Some(n);
    }

    /// Fail log reads for every pod whose name ends with `suffix`
    pub(crate) fn fail_logs_for(&self, suffix: &str) {
        self.state().failing_logs.push(suffix.to_string());
    }

    pub(crate) fn fail_list_pods(&self) {
        self.state().list_pods_error = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub(crate) fn service(&self, name: &str) -> Option<ExposureSpec> {
        self.state().services.get(name).cloned()
    }

    pub(crate) fn scaler_bounds(&self) -> Option<ScalerBounds> {
        self.state().scaler_bounds
    }

    pub(crate) fn scale_history(&self) -> Vec<u32> {
        self.state().scale_history.clone()
    }

    pub(crate) fn min_observed_available(&self) -> u32 {
        self.state().min_available.unwrap_or(u32::MAX)
    }

    pub(crate) fn created_batches(&self) -> Vec<BatchSpec> {
        self.state().created_batches.clone()
    }

    pub(crate) fn deleted_batches(&self) -> Vec<String> {
        self.state().deleted_batches.clone()
    }

    pub(crate) fn deleted_pods(&self) -> Vec<String> {
        self.state().deleted_pods.clone()
    }

    pub(crate) fn live_batches(&self) -> usize {
        self.state().batches.len()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        self.log_call(format!("delete_service {name}"));
        let mut s = self.state();
        if let Some(err) = s.service_delete_error.take() {
            return Err(err);
        }
        match s.services.remove(name) {
            Some(_) => Ok(()),
            None => Err(ClusterError::not_found("Service", name)),
        }
    }

    async fn create_service(&self, spec: &ExposureSpec) -> Result<(), ClusterError> {
        self.log_call(format!("create_service {} {:?}", spec.name, spec.topology));
        self.state().services.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn patch_scaler_bounds(
        &self,
        name: &str,
        bounds: ScalerBounds,
    ) -> Result<(), ClusterError> {
        self.log_call(format!("patch_scaler_bounds {name} {bounds}"));
        let mut s = self.state();
        if let Some(err) = s.scaler_error.take() {
            return Err(err);
        }
        s.scaler_bounds = Some(bounds);
        Ok(())
    }

    async fn scale_pool(&self, name: &str, replicas: u32) -> Result<(), ClusterError> {
        self.log_call(format!("scale_pool {name} {replicas}"));
        let mut s = self.state();
        s.desired = replicas;
        s.scale_history.push(replicas);
        Ok(())
    }

    async fn pool_status(&self, _name: &str) -> Result<PoolStatus, ClusterError> {
        let mut s = self.state();
        if !s.stuck {
            // Converge one replica per observation
            if s.available < s.desired {
                s.available += 1;
            } else if s.available > s.desired {
                s.available -= 1;
            }
        }
        let available = s.available;
        s.min_available = Some(s.min_available.map_or(available, |m| m.min(available)));
        Ok(PoolStatus {
            desired: s.desired,
            available,
        })
    }

    async fn create_batch(&self, spec: &BatchSpec) -> Result<(), ClusterError> {
        self.log_call(format!("create_batch {}", spec.id));
        let mut s = self.state();
        s.batches.insert(spec.id.to_string(), spec.clone());
        s.created_batches.push(spec.clone());
        Ok(())
    }

    async fn batch_status(&self, name: &str) -> Result<BatchStatus, ClusterError> {
        let mut s = self.state();
        let read = s.status_reads;
        s.status_reads += 1;
        if s.status_error_at == Some(read) {
            return Err(ClusterError::Transport("connection reset".into()));
        }
        let Some(spec) = s.batches.get(name) else {
            return Err(ClusterError::not_found("Job", name));
        };
        let completions = spec.completions;
        if s.progress.is_empty() {
            return Ok(BatchStatus {
                succeeded: completions,
                failed: 0,
                active: 0,
            });
        }
        let idx = read.min(s.progress.len() - 1);
        Ok(s.progress[idx])
    }

    async fn delete_batch(&self, name: &str) -> Result<(), ClusterError> {
        self.log_call(format!("delete_batch {name}"));
        let mut s = self.state();
        s.deleted_batches.push(name.to_string());
        if s.batches.remove(name).is_some() {
            return Ok(());
        }
        if let Some(pos) = s.stale_batches.iter().position(|(b, _)| b == name) {
            s.stale_batches.remove(pos);
            return Ok(());
        }
        Err(ClusterError::not_found("Job", name))
    }

    async fn list_batches(&self, selector: &str) -> Result<Vec<String>, ClusterError> {
        self.log_call(format!("list_batches {selector}"));
        let s = self.state();
        let mut names: Vec<String> = s
            .batches
            .iter()
            .filter(|(_, spec)| selector_matches(selector, &spec.labels))
            .map(|(name, _)| name.clone())
            .collect();
        names.extend(
            s.stale_batches
                .iter()
                .filter(|(_, labels)| selector_matches(selector, labels))
                .map(|(name, _)| name.clone()),
        );
        Ok(names)
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodSummary>, ClusterError> {
        let s = self.state();
        if s.list_pods_error {
            return Err(ClusterError::Transport("list pods failed".into()));
        }
        if let Some(batch) = selector.strip_prefix("job-name=") {
            let Some(spec) = s.batches.get(batch) else {
                return Ok(Vec::new());
            };
            let phase = s.pod_phase.unwrap_or(PodPhase::Running);
            return Ok((0..spec.completions)
                .map(|i| PodSummary {
                    name: format!("{batch}-{i}"),
                    phase,
                })
                .collect());
        }
        if selector.starts_with("app=") {
            return Ok(s
                .stale_pods
                .iter()
                .filter(|(_, labels)| selector_matches(selector, labels))
                .map(|(name, _)| PodSummary {
                    name: name.clone(),
                    phase: PodPhase::Failed,
                })
                .collect());
        }
        Ok((0..s.running_workers)
            .map(|i| PodSummary {
                name: format!("sonic-server-triton-{i}"),
                phase: PodPhase::Running,
            })
            .collect())
    }

    async fn pod_logs(&self, name: &str) -> Result<String, ClusterError> {
        let s = self.state();
        if s.failing_logs.iter().any(|p| name.ends_with(p.as_str())) {
            return Err(ClusterError::Api {
                code: 400,
                reason: "BadRequest".into(),
                message: "container is waiting to start".into(),
            });
        }
        Ok(s.logs.get(name).cloned().unwrap_or_else(|| s.default_log.clone()))
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.log_call(format!("delete_pod {name}"));
        self.state().deleted_pods.push(name.to_string());
        Ok(())
    }
}

// ============================================================================
// Fake monitoring
// ============================================================================

/// Reply to one instant query
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Values(Vec<f64>),
    Fail,
}

#[derive(Default)]
struct MonitoringState {
    overhead: VecDeque<Reply>,
    gpu: VecDeque<Reply>,
    total: VecDeque<Reply>,
    default: Vec<f64>,
    queries: usize,
}

/// Scriptable [`MonitoringBackend`] keyed on the query expression
pub(crate) struct FakeMonitoring {
    state: Mutex<MonitoringState>,
}

impl FakeMonitoring {
    /// Every query answers `[1.0]` unless scripted
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MonitoringState {
                default: vec![1.0],
                ..Default::default()
            }),
        }
    }

    /// Every unscripted query answers this vector
    pub(crate) fn with_default(self, values: Vec<f64>) -> Self {
        self.state.lock().unwrap().default = values;
        self
    }

    pub(crate) fn script_overhead(self, replies: Vec<Reply>) -> Self {
        self.state.lock().unwrap().overhead = replies.into();
        self
    }

    pub(crate) fn script_gpu(self, replies: Vec<Reply>) -> Self {
        self.state.lock().unwrap().gpu = replies.into();
        self
    }

    pub(crate) fn script_total(self, replies: Vec<Reply>) -> Self {
        self.state.lock().unwrap().total = replies.into();
        self
    }

    pub(crate) fn queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }
}

#[async_trait]
impl MonitoringBackend for FakeMonitoring {
    fn name(&self) -> &str {
        "fake"
    }

    async fn instant_query(&self, expr: &str) -> Result<Vec<VectorSample>, MonitoringError> {
        let mut s = self.state.lock().unwrap();
        s.queries += 1;
        let queue = if expr.contains("nv_gpu_utilization") {
            &mut s.gpu
        } else if expr.contains("upstream") {
            &mut s.overhead
        } else {
            &mut s.total
        };
        let reply = queue.pop_front();
        match reply {
            Some(Reply::Fail) => Err(MonitoringError::Status {
                status: 502,
                body: "bad gateway".into(),
            }),
            Some(Reply::Values(values)) => Ok(to_vector(&values)),
            None => Ok(to_vector(&s.default)),
        }
    }
}

fn to_vector(values: &[f64]) -> Vec<VectorSample> {
    values
        .iter()
        .map(|v| VectorSample::unlabelled(1_700_000_000.0, *v))
        .collect()
}

// ============================================================================
// Sinks
// ============================================================================

/// Result sink recording every append
#[derive(Clone, Default)]
pub(crate) struct MemoryResults {
    pub(crate) appends: Arc<Mutex<Vec<Vec<ResultRow>>>>,
}

impl MemoryResults {
    pub(crate) fn rows(&self) -> Vec<ResultRow> {
        self.appends.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub(crate) fn append_count(&self) -> usize {
        self.appends.lock().unwrap().len()
    }
}

impl ResultSink for MemoryResults {
    fn append(&mut self, rows: &[ResultRow]) -> BenchResult<()> {
        self.appends.lock().unwrap().push(rows.to_vec());
        Ok(())
    }
}

/// Live sink recording every row
#[derive(Clone, Default)]
pub(crate) struct MemoryLive {
    pub(crate) rows: Arc<Mutex<Vec<LiveMetricRow>>>,
}

impl MemoryLive {
    pub(crate) fn rows(&self) -> Vec<LiveMetricRow> {
        self.rows.lock().unwrap().clone()
    }
}

impl LiveMetricsSink for MemoryLive {
    fn append(&mut self, row: &LiveMetricRow) -> BenchResult<()> {
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}
