//! Kubernetes backend for sonic-bench
//!
//! This crate implements the `ClusterApi` trait against a Kubernetes API
//! server:
//!
//! - Services as the network-exposure object
//! - A KEDA `ScaledObject` as the autoscaler policy object
//! - A Deployment as the worker pool
//! - Jobs as load-generator batches

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod error;
pub mod manifests;

pub use client::KubeCluster;
pub use error::map_kube_error;
