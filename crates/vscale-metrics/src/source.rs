//! Usage metrics source backed by the Prometheus HTTP API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use vscale_core::config::{PrometheusConfig, Secret};
use vscale_core::{Dimension, ScaleError, ScaleResult, ScaledObject};

/// Produces utilisation readings in `[0, 1]` for one object and dimension.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn usage(&self, object: &ScaledObject, dimension: Dimension) -> ScaleResult<f32>;
}

/// PromQL expression measuring `dimension` of `object`.
pub fn usage_query(object: &ScaledObject, dimension: Dimension) -> String {
    match (object, dimension) {
        (ScaledObject::Server(s), Dimension::Cpu) => format!(
            "avg without (mode,cpu) (1 - rate(node_cpu_seconds_total{{mode=\"idle\",instance=~\"{}\"}}[30s]))",
            s.name
        ),
        (ScaledObject::Server(s), Dimension::Memory) => format!(
            "1 - (node_memory_MemFree_bytes + node_memory_Cached_bytes + node_memory_Buffers_bytes) / node_memory_MemTotal_bytes{{instance=~\"{}\"}}",
            s.name
        ),
        (ScaledObject::Cluster(c), Dimension::Cpu) => format!(
            "ionos_dbaas_postgres_cpu_rate5m{{postgres_cluster=\"{}\", role=\"master\"}}",
            c.cluster_id
        ),
        (ScaledObject::Cluster(c), Dimension::Memory) => format!(
            "1 - ionos_dbaas_postgres_memory_available_bytes / ionos_dbaas_postgres_memory_total_bytes{{postgres_cluster=\"{}\", role=\"master\"}}",
            c.cluster_id
        ),
    }
}

/// Instant-query client for a Prometheus server.
pub struct PrometheusSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<Secret>,
}

impl PrometheusSource {
    pub fn new(config: &PrometheusConfig, timeout: Duration) -> ScaleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::Config(format!("cannot build prometheus client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn query(&self, object: &str, query: &str) -> Result<f32, String> {
        let url = format!("{}/api/v1/query", self.base_url);
        let mut request = self.client.get(&url).query(&[("query", query)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("cannot read response: {e}"))?;

        parse_query_response(object, &body).map_err(|e| {
            if status.is_success() {
                e
            } else {
                format!("HTTP {status}: {e}")
            }
        })
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn usage(&self, object: &ScaledObject, dimension: Dimension) -> ScaleResult<f32> {
        let query = usage_query(object, dimension);
        let value = self
            .query(object.name(), &query)
            .await
            .map_err(|message| ScaleError::Metrics {
                object: object.name().to_string(),
                dimension,
                message,
            })?;
        debug!(object = %object.name(), %dimension, usage = value, "usage measured");
        Ok(value)
    }
}

// ── Response parsing ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// `result` is only decoded once `result_type` is known to be a vector.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Sample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[unix_time, "value"]`
    value: (f64, String),
}

/// Extract a single utilisation value from an instant-query response body.
fn parse_query_response(object: &str, body: &str) -> Result<f32, String> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed response: {e}"))?;

    if response.status != "success" {
        return Err(format!(
            "query failed ({}): {}",
            response.error_type.as_deref().unwrap_or("unknown"),
            response.error.as_deref().unwrap_or("no error message")
        ));
    }
    for warning in &response.warnings {
        warn!(%object, %warning, "prometheus returned a warning");
    }

    let Some(data) = response.data else {
        return Err("response carries no data".into());
    };
    if data.result_type != "vector" {
        return Err(format!("expected vector result but got {}", data.result_type));
    }
    let samples: Vec<Sample> = serde_json::from_value(data.result)
        .map_err(|e| format!("malformed vector result: {e}"))?;

    let Some(first) = samples.first() else {
        return Err("no data".into());
    };
    if samples.len() > 1 {
        warn!(
            %object,
            series = samples.len(),
            labels = ?first.metric,
            "query matched more than one series, using the first"
        );
    }

    let raw = &first.value.1;
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("cannot parse sample value {raw:?}"))?;
    if !value.is_finite() {
        return Err(format!("sample value {raw} is not finite"));
    }
    if !(0.0..=1.0).contains(&value) {
        warn!(%object, value, "usage outside [0, 1], clamping");
    }
    Ok(value.clamp(0.0, 1.0) as f32)
}
