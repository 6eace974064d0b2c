//! Prometheus instant-query client

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sonic_bench_core::{MonitoringBackend, MonitoringError, VectorSample};

/// Longest response body kept in a [`MonitoringError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Query API envelope
#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<RawSample>),
    Scalar((f64, String)),
    Matrix(serde_json::Value),
    String(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct RawSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Sample values travel as strings; `NaN` and `±Inf` are preserved
fn parse_value(raw: &str) -> Result<f64, MonitoringError> {
    match raw {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|e| MonitoringError::Decode(format!("invalid sample value '{other}': {e}"))),
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Decode an instant-query response body into samples
///
/// A `scalar` result becomes one unlabelled sample. An error envelope becomes
/// [`MonitoringError::Backend`] whatever the HTTP status; any other non-2xx
/// status becomes [`MonitoringError::Status`].
pub fn parse_query_response(status: u16, body: &str) -> Result<Vec<VectorSample>, MonitoringError> {
    let success = (200..300).contains(&status);
    let envelope: QueryEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !success => {
            return Err(MonitoringError::Status {
                status,
                body: truncate(body),
            })
        }
        Err(e) => return Err(MonitoringError::Decode(e.to_string())),
    };

    if envelope.status != "success" {
        return Err(MonitoringError::Backend {
            error_type: envelope.error_type.unwrap_or_else(|| "unknown".into()),
            error: envelope.error.unwrap_or_default(),
        });
    }
    if !success {
        return Err(MonitoringError::Status {
            status,
            body: truncate(body),
        });
    }

    match envelope.data {
        Some(QueryData::Vector(raw)) => raw
            .into_iter()
            .map(|sample| {
                Ok(VectorSample {
                    labels: sample.metric,
                    timestamp: sample.value.0,
                    value: parse_value(&sample.value.1)?,
                })
            })
            .collect(),
        Some(QueryData::Scalar((ts, value))) => {
            Ok(vec![VectorSample::unlabelled(ts, parse_value(&value)?)])
        }
        Some(QueryData::Matrix(_)) => Err(MonitoringError::Decode(
            "range vector returned for an instant query".into(),
        )),
        Some(QueryData::String(_)) => Err(MonitoringError::Decode(
            "string result is not a numeric sample".into(),
        )),
        None => Err(MonitoringError::Decode("response has no data".into())),
    }
}

/// Prometheus HTTP API client
///
/// Every query is a fresh round-trip; nothing is cached or retried.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: String,
}

impl PrometheusClient {
    /// Create a client for `base_url` (scheme and host, no API path)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MonitoringError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL queries are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn query_url(&self) -> String {
        format!("{}/api/v1/query", self.base_url)
    }
}

#[async_trait]
impl MonitoringBackend for PrometheusClient {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn instant_query(&self, expr: &str) -> Result<Vec<VectorSample>, MonitoringError> {
        let response = self
            .client
            .get(self.query_url())
            .query(&[("query", expr)])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let samples = parse_query_response(status, &body)?;

        tracing::debug!(
            backend = self.name(),
            query = expr,
            samples = samples.len(),
            "Instant query completed"
        );
        Ok(samples)
    }
}
