//! Batch identity and descriptor construction

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{BenchConfig, ClusterConfig};
use crate::experiment::{ExperimentStep, ServiceMode};

/// Label marking objects created by the dispatcher
pub const ROLE_LABEL: &str = "sonic-bench/role";
/// [`ROLE_LABEL`] value of load-generator batches and their tasks
pub const LOAD_GENERATOR_ROLE: &str = "load-generator";

/// Selector matching every load-generator batch of `base`
///
/// Requires the role label, so other workloads sharing the `app` label (such
/// as an in-cluster driver job) are never matched.
pub fn load_generator_selector(base: &str) -> String {
    format!("app={base},{ROLE_LABEL}={LOAD_GENERATOR_ROLE}")
}

/// Globally unique batch name, `<base>-<8 hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    /// Fresh identifier for a new batch
    pub fn generate(base: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{base}-{}", &suffix[..8]))
    }

    /// Name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label selector matching this batch's tasks
    pub fn selector(&self) -> String {
        format!("job-name={}", self.0)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What one batch should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    /// Parallel tasks
    pub client_count: u32,
    /// Request budget per task
    pub request_count: u32,
    /// Exposure mode the tasks target
    pub mode: ServiceMode,
}

impl From<&ExperimentStep> for BatchRequest {
    fn from(step: &ExperimentStep) -> Self {
        Self {
            client_count: step.client_count,
            request_count: step.request_count,
            mode: step.mode,
        }
    }
}

/// Container run by every task of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContainer {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Entrypoint
    pub command: Vec<String>,
    /// Entrypoint arguments
    pub args: Vec<String>,
    /// CPU request and limit
    pub cpu: String,
    /// Memory request and limit
    pub memory: String,
}

/// Batch descriptor submitted to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    /// Batch name
    pub id: BatchId,
    /// Tasks running at once
    pub parallelism: u32,
    /// Successful tasks required
    pub completions: u32,
    /// Task retry budget
    pub backoff_limit: u32,
    /// Labels on the batch and its tasks
    pub labels: BTreeMap<String, String>,
    /// Service account of the tasks
    pub service_account: String,
    /// Task container
    pub container: TaskContainer,
}

impl BatchSpec {
    /// Descriptor for `request` with `parallelism == completions == client_count`
    pub fn new(id: BatchId, request: &BatchRequest, config: &BenchConfig) -> Self {
        let lg = &config.load_generator;
        let endpoint = endpoint(request.mode, &config.cluster);
        let script = task_script(&id, request, &endpoint, config);

        let labels = BTreeMap::from([
            ("job-name".to_string(), id.to_string()),
            ("app".to_string(), lg.job_base_name.clone()),
            (ROLE_LABEL.to_string(), LOAD_GENERATOR_ROLE.to_string()),
        ]);

        Self {
            parallelism: request.client_count,
            completions: request.client_count,
            backoff_limit: lg.backoff_limit,
            labels,
            service_account: lg.service_account.clone(),
            container: TaskContainer {
                name: lg.container_name.clone(),
                image: lg.image.clone(),
                command: vec!["/bin/bash".into()],
                args: vec!["-c".into(), script],
                cpu: lg.cpu.clone(),
                memory: lg.memory.clone(),
            },
            id,
        }
    }
}

/// Inference endpoint the load generator targets in `mode`
pub fn endpoint(mode: ServiceMode, cluster: &ClusterConfig) -> String {
    match mode {
        ServiceMode::Direct => format!(
            "{}.{}.svc.cluster.local:{}",
            cluster.proxy_service, cluster.namespace, cluster.ports.grpc
        ),
        ServiceMode::Gateway => format!(
            "{}.{}.{}:{}",
            cluster.exposure_service, cluster.namespace, cluster.external_domain, cluster.ports.grpc
        ),
    }
}

fn shell_secs(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.3}", d.as_secs_f64())
    }
}

/// Shell script run by each task: startup barrier, then the load generator
///
/// The barrier polls the API server until `client_count` tasks of this batch
/// are running, so every task starts generating load at roughly the same time.
pub fn task_script(
    id: &BatchId,
    request: &BatchRequest,
    endpoint: &str,
    config: &BenchConfig,
) -> String {
    let lg = &config.load_generator;
    let timing = &config.timing;
    let n = request.client_count;
    let namespace = &config.cluster.namespace;

    let (deadline_init, deadline_check) = match timing.barrier_timeout {
        Some(timeout) => (
            format!("DEADLINE=$(( $(date +%s) + {} ))\n", timeout.as_secs().max(1)),
            format!(
                "  if [ \"$(date +%s)\" -ge \"$DEADLINE\" ]; then\n    \
                 echo \"Startup barrier timed out after {}s\" >&2\n    \
                 exit 1\n  \
                 fi\n",
                timeout.as_secs().max(1)
            ),
        ),
        None => (String::new(), String::new()),
    };

    let mut load_cmd = format!(
        "perf_analyzer -m {} -i {} -u {endpoint} --async -p 1 -b {} --concurrency-range 1",
        lg.model, lg.protocol, lg.batch_size
    );
    for arg in &lg.extra_args {
        load_cmd.push(' ');
        load_cmd.push_str(arg);
    }
    load_cmd.push_str(&format!(" --request-count={}", request.request_count));

    format!(
        "echo \"Waiting for {n} pods to reach Running...\"\n\
         TOKEN=$(cat /var/run/secrets/kubernetes.io/serviceaccount/token)\n\
         {deadline_init}\
         while true; do\n  \
         RESPONSE=$(curl -sSk -H \"Authorization: Bearer $TOKEN\" \
         \"https://kubernetes.default.svc/api/v1/namespaces/{namespace}/pods?labelSelector=job-name={id}\" \
         || echo '{{\"failure\":true}}')\n  \
         RUNNING_COUNT=$(echo \"$RESPONSE\" | grep -oE '\"phase\"\\s*:\\s*\"Running\"' | wc -l || echo 0)\n  \
         if [ \"$RUNNING_COUNT\" -ge \"{n}\" ]; then\n    \
         break\n  \
         fi\n\
         {deadline_check}  \
         sleep {interval}\n\
         done\n\
         {load_cmd}\n",
        interval = shell_secs(timing.barrier_interval),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: ServiceMode) -> BatchRequest {
        BatchRequest {
            client_count: 4,
            request_count: 20000,
            mode,
        }
    }

    #[test]
    fn test_batch_id_format() {
        let a = BatchId::generate("sonic-benchmark");
        let b = BatchId::generate("sonic-benchmark");
        assert_ne!(a, b);
        let suffix = a.as_str().strip_prefix("sonic-benchmark-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.selector(), format!("job-name={a}"));
    }

    #[test]
    fn test_endpoints() {
        let cluster = ClusterConfig::default();
        assert_eq!(
            endpoint(ServiceMode::Direct, &cluster),
            "sonic-server.cms.svc.cluster.local:8001"
        );
        assert_eq!(
            endpoint(ServiceMode::Gateway, &cluster),
            "sonic-server-triton.cms.geddes.rcac.purdue.edu:8001"
        );
    }

    #[test]
    fn test_spec_shape() {
        let config = BenchConfig::default();
        let id = BatchId::generate("sonic-benchmark");
        let spec = BatchSpec::new(id.clone(), &request(ServiceMode::Gateway), &config);

        assert_eq!(spec.parallelism, 4);
        assert_eq!(spec.completions, 4);
        assert_eq!(spec.backoff_limit, 1000);
        assert_eq!(spec.service_account, "hub");
        assert_eq!(spec.labels.get("job-name"), Some(&id.to_string()));
        assert_eq!(spec.labels.get("app").map(String::as_str), Some("sonic-benchmark"));
        assert_eq!(spec.labels.get(ROLE_LABEL).map(String::as_str), Some(LOAD_GENERATOR_ROLE));
        assert_eq!(spec.container.command, vec!["/bin/bash"]);
        assert_eq!(spec.container.args[0], "-c");
    }

    #[test]
    fn test_script_contents() {
        let config = BenchConfig::default();
        let id = BatchId::generate("sonic-benchmark");
        let req = request(ServiceMode::Direct);
        let script = task_script(&id, &req, &endpoint(req.mode, &config.cluster), &config);

        assert!(script.contains(&format!(
            "/api/v1/namespaces/cms/pods?labelSelector=job-name={id}"
        )));
        assert!(script.contains("if [ \"$RUNNING_COUNT\" -ge \"4\" ]; then"));
        assert!(script.contains("grep -oE '\"phase\"\\s*:\\s*\"Running\"'"));
        assert!(script.contains("sleep 2\n"));
        assert!(script.contains("DEADLINE=$(( $(date +%s) + 1800 ))"));
        assert!(script.contains(
            "perf_analyzer -m particlenet_AK4_PT -i grpc -u sonic-server.cms.svc.cluster.local:8001 --async -p 1 -b 100 --concurrency-range 1 --shape pf_points__0:2,100"
        ));
        assert!(script.trim_end().ends_with("--request-count=20000"));
    }

    #[test]
    fn test_script_without_barrier_timeout() {
        let mut config = BenchConfig::default();
        config.timing.barrier_timeout = None;
        config.timing.barrier_interval = Duration::from_millis(1500);
        let id = BatchId::generate("sonic-benchmark");
        let req = request(ServiceMode::Gateway);
        let script = task_script(&id, &req, "host:8001", &config);

        assert!(!script.contains("DEADLINE"));
        assert!(script.contains("sleep 1.500\n"));
    }
}
