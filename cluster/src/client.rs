//! `ClusterApi` over the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams,
    PostParams,
};
use kube::core::GroupVersionKind;
use kube::Client;
use sonic_bench_core::{
    BatchSpec, BatchStatus, ClusterApi, ClusterError, ExposureSpec, PodPhase, PodSummary,
    PoolStatus, ScaledObjectConfig, ScalerBounds,
};

use crate::error::map_kube_error;
use crate::manifests;

/// Negative or absent counters read as zero
fn non_negative(value: Option<i32>) -> u32 {
    value.and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
}

fn pool_status_of(deployment: &Deployment) -> PoolStatus {
    PoolStatus {
        desired: non_negative(deployment.spec.as_ref().and_then(|s| s.replicas)),
        available: non_negative(
            deployment
                .status
                .as_ref()
                .and_then(|s| s.available_replicas),
        ),
    }
}

fn batch_status_of(job: &Job) -> BatchStatus {
    let status = job.status.as_ref();
    BatchStatus {
        succeeded: non_negative(status.and_then(|s| s.succeeded)),
        failed: non_negative(status.and_then(|s| s.failed)),
        active: non_negative(status.and_then(|s| s.active)),
    }
}

fn pod_summary(pod: Pod) -> Option<PodSummary> {
    let name = pod.metadata.name?;
    let phase = PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()));
    Some(PodSummary { name, phase })
}

/// Kubernetes-backed orchestrator API scoped to one namespace
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
    scaled_object: ApiResource,
}

impl KubeCluster {
    /// Connect using the local kubeconfig or the in-cluster service account
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Transport`] if no usable configuration is found.
    pub async fn connect(
        namespace: impl Into<String>,
        scaled_object: &ScaledObjectConfig,
    ) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Transport(format!("failed to build Kubernetes client: {e}")))?;
        let cluster = Self::new(client, namespace, scaled_object);
        tracing::info!(namespace = %cluster.namespace, "Connected to Kubernetes API");
        Ok(cluster)
    }

    /// Wrap an existing client
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        scaled_object: &ScaledObjectConfig,
    ) -> Self {
        let gvk = GroupVersionKind::gvk(
            &scaled_object.group,
            &scaled_object.version,
            &scaled_object.kind,
        );
        Self {
            client,
            namespace: namespace.into(),
            scaled_object: ApiResource::from_gvk_with_plural(&gvk, &scaled_object.plural),
        }
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn scaled_objects(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.scaled_object)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        self.services()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("Service", name, e))?;
        Ok(())
    }

    async fn create_service(&self, spec: &ExposureSpec) -> Result<(), ClusterError> {
        let service = manifests::service(spec, &self.namespace);
        self.services()
            .create(&PostParams::default(), &service)
            .await
            .map_err(|e| map_kube_error("Service", &spec.name, e))?;
        Ok(())
    }

    async fn patch_scaler_bounds(
        &self,
        name: &str,
        bounds: ScalerBounds,
    ) -> Result<(), ClusterError> {
        let patch = Patch::Merge(manifests::scaler_bounds_patch(bounds));
        self.scaled_objects()
            .patch(name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| map_kube_error(&self.scaled_object.kind, name, e))?;
        Ok(())
    }

    async fn scale_pool(&self, name: &str, replicas: u32) -> Result<(), ClusterError> {
        let patch = Patch::Merge(manifests::replicas_patch(replicas));
        self.deployments()
            .patch(name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| map_kube_error("Deployment", name, e))?;
        Ok(())
    }

    async fn pool_status(&self, name: &str) -> Result<PoolStatus, ClusterError> {
        let deployment = self
            .deployments()
            .get(name)
            .await
            .map_err(|e| map_kube_error("Deployment", name, e))?;
        Ok(pool_status_of(&deployment))
    }

    async fn create_batch(&self, spec: &BatchSpec) -> Result<(), ClusterError> {
        let job = manifests::job(spec, &self.namespace);
        self.jobs()
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| map_kube_error("Job", spec.id.as_str(), e))?;
        Ok(())
    }

    async fn batch_status(&self, name: &str) -> Result<BatchStatus, ClusterError> {
        let job = self
            .jobs()
            .get_status(name)
            .await
            .map_err(|e| map_kube_error("Job", name, e))?;
        Ok(batch_status_of(&job))
    }

    async fn delete_batch(&self, name: &str) -> Result<(), ClusterError> {
        self.jobs()
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_kube_error("Job", name, e))?;
        Ok(())
    }

    async fn list_batches(&self, selector: &str) -> Result<Vec<String>, ClusterError> {
        let jobs = self
            .jobs()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_kube_error("Job", selector, e))?;
        Ok(jobs.items.into_iter().filter_map(|j| j.metadata.name).collect())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodSummary>, ClusterError> {
        let pods = self
            .pods()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_kube_error("Pod", selector, e))?;
        Ok(pods.items.into_iter().filter_map(pod_summary).collect())
    }

    async fn pod_logs(&self, name: &str) -> Result<String, ClusterError> {
        self.pods()
            .logs(name, &LogParams::default())
            .await
            .map_err(|e| map_kube_error("Pod", name, e))
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.pods()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("Pod", name, e))?;
        Ok(())
    }
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("namespace", &self.namespace)
            .field("scaled_object", &self.scaled_object.plural)
            .finish()
    }
}
