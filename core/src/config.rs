//! Orchestrator configuration types
//!
//! Every field has a default matching the reference deployment, so an empty
//! (or absent) configuration file yields a usable [`BenchConfig`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Cluster object names and autoscaler policy
    pub cluster: ClusterConfig,
    /// Poll intervals, settle times and wait budgets
    pub timing: TimingConfig,
    /// Load-generator task template
    pub load_generator: LoadGeneratorConfig,
    /// Monitoring backend and query parameters
    pub telemetry: TelemetryConfig,
    /// Delete leftover batches before a run starts
    pub cleanup_stale_batches: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            timing: TimingConfig::default(),
            load_generator: LoadGeneratorConfig::default(),
            telemetry: TelemetryConfig::default(),
            cleanup_stale_batches: true,
        }
    }
}

impl BenchConfig {
    /// Parse and validate a configuration from YAML text
    pub fn from_yaml(text: &str) -> BenchResult<Self> {
        let config: BenchConfig = serde_yaml::from_str(text)
            .map_err(|e| BenchError::config(format!("invalid configuration file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file, or fall back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> BenchResult<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_yaml(&text)
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Override the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cluster.namespace = namespace.into();
        self
    }

    /// Override the monitoring backend URL
    pub fn with_prometheus_url(mut self, url: impl Into<String>) -> Self {
        self.telemetry.prometheus_url = url.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("cluster.namespace", &self.cluster.namespace),
            ("cluster.deployment", &self.cluster.deployment),
            ("cluster.exposure_service", &self.cluster.exposure_service),
            ("cluster.proxy_service", &self.cluster.proxy_service),
            ("cluster.worker_selector", &self.cluster.worker_selector),
            ("cluster.scaled_object.name", &self.cluster.scaled_object.name),
            ("load_generator.job_base_name", &self.load_generator.job_base_name),
            ("load_generator.image", &self.load_generator.image),
            ("load_generator.container_name", &self.load_generator.container_name),
            ("load_generator.model", &self.load_generator.model),
            ("telemetry.window", &self.telemetry.window),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }

        // Batch names are <base>-<8 hex chars> and must fit a DNS label
        if self.load_generator.job_base_name.len() > 54 {
            return Err(ConfigError::InvalidValue {
                field: "load_generator.job_base_name",
                reason: "must be at most 54 characters".into(),
            });
        }

        if self.cluster.autoscale_max == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cluster.autoscale_max",
                reason: "must be at least 1".into(),
            });
        }
        if self.cluster.autoscale_min > self.cluster.autoscale_max {
            return Err(ConfigError::InvalidBounds {
                min: self.cluster.autoscale_min,
                max: self.cluster.autoscale_max,
            });
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.poll_interval", Some(t.poll_interval)),
            ("timing.barrier_interval", Some(t.barrier_interval)),
            ("timing.capacity_timeout", t.capacity_timeout),
            ("timing.batch_timeout", t.batch_timeout),
            ("timing.barrier_timeout", t.barrier_timeout),
            ("telemetry.request_timeout", Some(self.telemetry.request_timeout)),
        ] {
            if value == Some(Duration::ZERO) {
                return Err(ConfigError::ZeroDuration(field));
            }
        }

        let url = &self.telemetry.prometheus_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "telemetry.prometheus_url",
                reason: format!("'{url}' is not an http(s) URL"),
            });
        }

        Ok(())
    }
}

/// Cluster object names and autoscaler policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Namespace holding every managed object
    pub namespace: String,
    /// Worker pool deployment
    pub deployment: String,
    /// Exposure object recreated on every mode switch
    pub exposure_service: String,
    /// Proxy service fronting the pool in direct mode
    pub proxy_service: String,
    /// DNS suffix appended to `<exposure_service>.<namespace>` in gateway mode
    pub external_domain: String,
    /// Labels stamped on, and selected by, the exposure object
    pub worker_labels: BTreeMap<String, String>,
    /// Selector counting running worker instances
    pub worker_selector: String,
    /// Exposed ports
    pub ports: PortConfig,
    /// Autoscaler policy object
    pub scaled_object: ScaledObjectConfig,
    /// Lower bound while autoscaling is enabled
    pub autoscale_min: u32,
    /// Upper bound while autoscaling is enabled
    pub autoscale_max: u32,
    /// Abort the step when the autoscaler policy cannot be patched
    pub strict_autoscaler: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let worker_labels = [
            ("app.kubernetes.io/component", "triton"),
            ("app.kubernetes.io/instance", "sonic-server"),
            ("app.kubernetes.io/name", "supersonic"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            namespace: "cms".into(),
            deployment: "sonic-server-triton".into(),
            exposure_service: "sonic-server-triton".into(),
            proxy_service: "sonic-server".into(),
            external_domain: "geddes.rcac.purdue.edu".into(),
            worker_labels,
            worker_selector: "app.kubernetes.io/component=triton".into(),
            ports: PortConfig::default(),
            scaled_object: ScaledObjectConfig::default(),
            autoscale_min: 1,
            autoscale_max: 10,
            strict_autoscaler: false,
        }
    }
}

/// Port set exposed in both topologies
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortConfig {
    /// Plain HTTP inference port
    pub http: u16,
    /// Binary RPC inference port
    pub grpc: u16,
    /// Metrics port
    pub metrics: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            http: 8000,
            grpc: 8001,
            metrics: 8002,
        }
    }
}

/// Coordinates of the autoscaler policy custom resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScaledObjectConfig {
    /// Object name
    pub name: String,
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
    /// Plural resource name
    pub plural: String,
}

impl Default for ScaledObjectConfig {
    fn default() -> Self {
        Self {
            name: "sonic-server-keda-so".into(),
            group: "keda.sh".into(),
            version: "v1alpha1".into(),
            kind: "ScaledObject".into(),
            plural: "scaledobjects".into(),
        }
    }
}

/// Poll intervals, settle times and wait budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Interval of the capacity and batch poll loops
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Pause after deleting the exposure object
    #[serde(with = "humantime_serde")]
    pub exposure_delete_settle: Duration,
    /// Pause after creating the exposure object
    #[serde(with = "humantime_serde")]
    pub exposure_create_settle: Duration,
    /// Pause after a forced pool restart, before dispatching
    #[serde(with = "humantime_serde")]
    pub restart_settle: Duration,
    /// Budget for each capacity convergence wait, unbounded when absent
    #[serde(with = "humantime_serde")]
    pub capacity_timeout: Option<Duration>,
    /// Budget for one batch poll loop, unbounded when absent
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Option<Duration>,
    /// Sleep between checks of the in-task startup barrier
    #[serde(with = "humantime_serde")]
    pub barrier_interval: Duration,
    /// Budget for the in-task startup barrier, unbounded when absent
    #[serde(with = "humantime_serde")]
    pub barrier_timeout: Option<Duration>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            exposure_delete_settle: Duration::from_secs(3),
            exposure_create_settle: Duration::from_secs(5),
            restart_settle: Duration::ZERO,
            capacity_timeout: Some(Duration::from_secs(30 * 60)),
            batch_timeout: Some(Duration::from_secs(6 * 60 * 60)),
            barrier_interval: Duration::from_secs(2),
            barrier_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Load-generator task template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadGeneratorConfig {
    /// Batch name prefix, also the `app` label used for stale cleanup
    pub job_base_name: String,
    /// Container image providing the load generator
    pub image: String,
    /// Container name
    pub container_name: String,
    /// Service account allowed to list pods (needed by the startup barrier)
    pub service_account: String,
    /// CPU request and limit
    pub cpu: String,
    /// Memory request and limit
    pub memory: String,
    /// Task retry budget
    pub backoff_limit: u32,
    /// Model under test
    pub model: String,
    /// Inference batch size
    pub batch_size: u32,
    /// Transport protocol passed to the load generator
    pub protocol: String,
    /// Extra load-generator arguments (input shapes etc.)
    pub extra_args: Vec<String>,
}

impl Default for LoadGeneratorConfig {
    fn default() -> Self {
        let extra_args = [
            "pf_points__0:2,100",
            "pf_features__1:20,100",
            "pf_mask__2:1,100",
            "sv_points__3:2,10",
            "sv_features__4:11,10",
            "sv_mask__5:1,10",
        ]
        .iter()
        .map(|shape| format!("--shape {shape}"))
        .collect();

        Self {
            job_base_name: "sonic-benchmark".into(),
            image: "nvcr.io/nvidia/tritonserver:24.11-py3-sdk".into(),
            container_name: "perf-analyzer".into(),
            service_account: "hub".into(),
            cpu: "1".into(),
            memory: "4G".into(),
            backoff_limit: 1000,
            model: "particlenet_AK4_PT".into(),
            batch_size: 100,
            protocol: "grpc".into(),
            extra_args,
        }
    }
}

/// Monitoring backend and query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Base URL of the Prometheus-compatible query API
    pub prometheus_url: String,
    /// `release` label selecting the proxy metrics
    pub release: String,
    /// Connection-manager prefix of the ingress listener
    pub conn_manager_prefix: String,
    /// GPU utilization metric name
    pub gpu_metric: String,
    /// Range window used by every query
    pub window: String,
    /// Per-query HTTP timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "https://prometheus-af.geddes.rcac.purdue.edu".into(),
            release: "sonic-server-triton".into(),
            conn_manager_prefix: "ingress_grpc".into(),
            gpu_metric: "nv_gpu_utilization".into(),
            window: "30s".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required string is empty
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// A duration is zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// Autoscaler bounds are inverted
    #[error("autoscale_min ({min}) exceeds autoscale_max ({max})")]
    InvalidBounds {
        /// Lower bound
        min: u32,
        /// Upper bound
        max: u32,
    },

    /// A field holds an unusable value
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl From<ConfigError> for BenchError {
    fn from(err: ConfigError) -> Self {
        BenchError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.cluster.namespace, "cms");
        assert_eq!(config.cluster.autoscale_min, 1);
        assert_eq!(config.cluster.autoscale_max, 10);
        assert_eq!(config.timing.poll_interval, Duration::from_secs(5));
        assert_eq!(config.load_generator.backoff_limit, 1000);
        assert_eq!(config.load_generator.extra_args.len(), 6);
        assert!(config.cleanup_stale_batches);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = BenchConfig::from_yaml(
            r#"
cluster:
  namespace: bench
  strict_autoscaler: true
timing:
  poll_interval: 2s
  batch_timeout: 1h 30m
telemetry:
  prometheus_url: http://prometheus:9090
"#,
        )
        .unwrap();

        assert_eq!(config.cluster.namespace, "bench");
        assert!(config.cluster.strict_autoscaler);
        assert_eq!(config.cluster.deployment, "sonic-server-triton");
        assert_eq!(config.timing.poll_interval, Duration::from_secs(2));
        assert_eq!(config.timing.batch_timeout, Some(Duration::from_secs(5400)));
        assert_eq!(config.timing.exposure_create_settle, Duration::from_secs(5));
        assert!(config.cleanup_stale_batches);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(BenchConfig::from_yaml("clusters: {}").is_err());
    }

    #[test]
    fn test_validation_inverted_bounds() {
        let mut config = BenchConfig::default();
        config.cluster.autoscale_min = 5;
        config.cluster.autoscale_max = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds { min: 5, max: 2 })
        ));
    }

    #[test]
    fn test_validation_zero_interval() {
        let mut config = BenchConfig::default();
        config.timing.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("timing.poll_interval"))
        ));
    }

    #[test]
    fn test_validation_empty_namespace() {
        let config = BenchConfig::default().with_namespace("");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyField("cluster.namespace"))
        ));
    }

    #[test]
    fn test_validation_bad_url() {
        let config = BenchConfig::default().with_prometheus_url("prometheus:9090");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_error_converts() {
        let err: BenchError = ConfigError::EmptyField("cluster.deployment").into();
        assert_eq!(
            err.to_string(),
            "configuration error: cluster.deployment must not be empty"
        );
    }
}
