//! Monitoring backends for telemetry sampling
//!
//! This crate provides implementations of the `MonitoringBackend` trait for:
//!
//! - Prometheus (HTTP instant-query API)

#![warn(missing_docs)]
#![warn(clippy::all)]

mod prometheus;

pub use prometheus::{parse_query_response, PrometheusClient};
