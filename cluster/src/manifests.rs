//! Kubernetes object builders
//!
//! Pure functions from the core descriptors to API objects, so the shape of
//! what gets submitted can be checked without an API server.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};
use sonic_bench_core::{BatchSpec, ExposureSpec, ExposureTopology, ScalerBounds};

/// Service for an exposure descriptor
///
/// Headless: `ClusterIP` with `clusterIP: None`. Load-balanced: `LoadBalancer`.
pub fn service(spec: &ExposureSpec, namespace: &str) -> Service {
    let (service_type, cluster_ip) = match spec.topology {
        ExposureTopology::Headless => ("ClusterIP", Some("None".to_string())),
        ExposureTopology::LoadBalancer => ("LoadBalancer", None),
    };

    let ports = spec
        .ports
        .iter()
        .map(|p| ServicePort {
            name: Some(p.name.clone()),
            port: i32::from(p.port),
            target_port: Some(IntOrString::Int(i32::from(p.port))),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            cluster_ip,
            selector: Some(spec.selector.clone()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn count(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Job for a batch descriptor
///
/// Tasks restart in place on failure, up to `backoff_limit` retries.
pub fn job(spec: &BatchSpec, namespace: &str) -> Job {
    let container = &spec.container;
    let resources = BTreeMap::from([
        ("cpu".to_string(), Quantity(container.cpu.clone())),
        ("memory".to_string(), Quantity(container.memory.clone())),
    ]);

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(spec.labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            restart_policy: Some("OnFailure".to_string()),
            service_account_name: Some(spec.service_account.clone()),
            containers: vec![Container {
                name: container.name.clone(),
                image: Some(container.image.clone()),
                command: Some(container.command.clone()),
                args: Some(container.args.clone()),
                resources: Some(ResourceRequirements {
                    requests: Some(resources.clone()),
                    limits: Some(resources),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.id.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            parallelism: Some(count(spec.parallelism)),
            completions: Some(count(spec.completions)),
            backoff_limit: Some(count(spec.backoff_limit)),
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Merge patch for the autoscaler policy bounds
pub fn scaler_bounds_patch(bounds: ScalerBounds) -> Value {
    json!({
        "spec": {
            "minReplicaCount": bounds.min,
            "maxReplicaCount": bounds.max,
        }
    })
}

/// Merge patch for the worker pool replica count
pub fn replicas_patch(replicas: u32) -> Value {
    json!({ "spec": { "replicas": replicas } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_bench_core::{BatchId, BatchRequest, BenchConfig, ServiceMode};

    #[test]
    fn test_headless_service() {
        let config = BenchConfig::default();
        let spec = ExposureSpec::for_mode(ServiceMode::Direct, &config.cluster);
        let value = serde_json::to_value(service(&spec, "cms")).unwrap();

        assert_eq!(value["metadata"]["name"], "sonic-server-triton");
        assert_eq!(value["metadata"]["namespace"], "cms");
        assert_eq!(value["metadata"]["labels"]["scrape_metrics"], "true");
        assert_eq!(value["spec"]["type"], "ClusterIP");
        assert_eq!(value["spec"]["clusterIP"], "None");
        assert_eq!(value["spec"]["selector"]["app.kubernetes.io/component"], "triton");
        assert!(value["spec"]["selector"].get("scrape_metrics").is_none());
        assert_eq!(value["spec"]["ports"][1]["name"], "grpc");
        assert_eq!(value["spec"]["ports"][1]["port"], 8001);
        assert_eq!(value["spec"]["ports"][1]["targetPort"], 8001);
    }

    #[test]
    fn test_load_balancer_service() {
        let config = BenchConfig::default();
        let spec = ExposureSpec::for_mode(ServiceMode::Gateway, &config.cluster);
        let value = serde_json::to_value(service(&spec, "cms")).unwrap();

        assert_eq!(value["spec"]["type"], "LoadBalancer");
        assert!(value["spec"].get("clusterIP").is_none());
        assert_eq!(value["spec"]["ports"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_job() {
        let config = BenchConfig::default();
        let request = BatchRequest {
            client_count: 20,
            request_count: 5000,
            mode: ServiceMode::Direct,
        };
        let id = BatchId::generate("sonic-benchmark");
        let spec = BatchSpec::new(id.clone(), &request, &config);
        let value = serde_json::to_value(job(&spec, "cms")).unwrap();

        assert_eq!(value["metadata"]["name"], id.as_str());
        assert_eq!(value["metadata"]["labels"]["app"], "sonic-benchmark");
        assert_eq!(value["metadata"]["labels"]["sonic-bench/role"], "load-generator");
        assert_eq!(value["spec"]["parallelism"], 20);
        assert_eq!(value["spec"]["completions"], 20);
        assert_eq!(value["spec"]["backoffLimit"], 1000);

        let template = &value["spec"]["template"];
        assert_eq!(template["metadata"]["labels"]["job-name"], id.as_str());
        assert_eq!(template["spec"]["restartPolicy"], "OnFailure");
        assert_eq!(template["spec"]["serviceAccountName"], "hub");

        let container = &template["spec"]["containers"][0];
        assert_eq!(container["name"], "perf-analyzer");
        assert_eq!(container["command"][0], "/bin/bash");
        assert_eq!(container["args"][0], "-c");
        assert_eq!(container["resources"]["limits"]["cpu"], "1");
        assert_eq!(container["resources"]["requests"]["memory"], "4G");
    }

    #[test]
    fn test_patches() {
        assert_eq!(
            scaler_bounds_patch(ScalerBounds::pinned(3)),
            json!({"spec": {"minReplicaCount": 3, "maxReplicaCount": 3}})
        );
        assert_eq!(replicas_patch(0), json!({"spec": {"replicas": 0}}));
    }
}
