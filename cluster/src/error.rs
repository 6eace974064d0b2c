//! Mapping of Kubernetes client errors onto `ClusterError`

use sonic_bench_core::ClusterError;

/// Translate a client error for the object `kind`/`name`
///
/// A 404 becomes [`ClusterError::NotFound`] so callers can absorb deletes of
/// objects that are already gone.
pub fn map_kube_error(kind: &str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::not_found(kind, name),
        kube::Error::Api(resp) => ClusterError::Api {
            code: resp.code,
            reason: resp.reason,
            message: resp.message,
        },
        kube::Error::SerdeError(e) => ClusterError::Decode(e.to_string()),
        other => ClusterError::Transport(other.to_string()),
    }
}
