//! vscale.toml configuration parser.
//!
//! The whole file is loaded and validated once at startup. Any violation
//! is a fatal [`ScaleError::Config`].

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ScaleError, ScaleResult};
use crate::types::Resources;

#[derive(Debug, Clone, Deserialize)]
pub struct ScalerConfig {
    pub app: AppConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    pub service: ServiceConfig,
    pub resources: Resources,
    pub provider: ProviderConfig,
    pub metrics_source: MetricsSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub stage: Stage,
    pub cycle_time_seconds: u64,
    #[serde(default = "default_exporter_port")]
    pub metrics_exporter_port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_exporter_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    10
}

/// Deployment stage. `dev` never issues resize calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Dev,
    Prod,
}

// ── Scaling mode ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingModeKind {
    Direct,
    #[default]
    Heuristic,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalingConfig {
    #[serde(default)]
    pub mode: ScalingModeKind,
    pub direct: Option<DirectSteps>,
}

/// Fixed step sizes used in direct mode. All values are magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DirectSteps {
    pub cpu_increase: i32,
    pub cpu_decrease: i32,
    pub mem_increase: i32,
    pub mem_decrease: i32,
}

/// Resolved operating mode handed to the conflict resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
    /// Replace heuristic amounts with fixed steps.
    Direct(DirectSteps),
    /// Use rule-engine amounts as-is.
    Heuristic,
}

impl ScalingConfig {
    pub fn mode(&self) -> ScalingMode {
        match (self.mode, self.direct) {
            (ScalingModeKind::Direct, Some(steps)) => ScalingMode::Direct(steps),
            _ => ScalingMode::Heuristic,
        }
    }

    fn validate(&self) -> ScaleResult<()> {
        if self.mode != ScalingModeKind::Direct {
            return Ok(());
        }
        let steps = self.direct.ok_or_else(|| {
            ScaleError::Config("scaling.direct is required when scaling.mode is \"direct\"".into())
        })?;
        for (field, value) in [
            ("cpu_increase", steps.cpu_increase),
            ("cpu_decrease", steps.cpu_decrease),
            ("mem_increase", steps.mem_increase),
            ("mem_decrease", steps.mem_decrease),
        ] {
            if value < 0 {
                return Err(ScaleError::Config(format!(
                    "scaling.direct.{field} must not be negative but got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ── Service ───────────────────────────────────────────────────────

/// The workload being scaled. Selects the rule set and object kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceConfig {
    /// BigBlueButton conferencing servers, scaled on participant activity.
    Bbb { api_token: Secret },
    /// Managed Postgres clusters, scaled on usage thresholds.
    Postgres,
}

// ── Provider ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Ionos(IonosConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IonosConfig {
    pub username: Secret,
    pub password: Secret,
    pub contract_id: i64,
    #[serde(default = "default_ionos_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_dbaas_endpoint")]
    pub dbaas_endpoint: String,
    pub server_source: Option<ServerSource>,
    pub cluster_source: Option<ClusterSource>,
}

fn default_ionos_endpoint() -> String {
    "https://api.ionos.com/cloudapi/v6".to_string()
}

fn default_dbaas_endpoint() -> String {
    "https://api.ionos.com/databases/postgresql".to_string()
}

/// Where servers come from: an explicit list or a regex over datacenters.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSource {
    #[serde(rename = "static")]
    pub static_servers: Option<Vec<StaticServer>>,
    pub dynamic: Option<DynamicServerSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticServer {
    pub datacenter_id: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicServerSource {
    pub datacenter_ids: Vec<String>,
    pub server_name_regex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSource {
    pub cluster_filter_name: Option<String>,
    pub cluster_name_regex: String,
}

impl ServerSource {
    fn validate(&self) -> ScaleResult<()> {
        match (&self.static_servers, &self.dynamic) {
            (None, None) => Err(ScaleError::Config(
                "provider.server_source needs one of static or dynamic".into(),
            )),
            (Some(_), Some(_)) => Err(ScaleError::Config(
                "provider.server_source.static and dynamic are both set, only one must be set".into(),
            )),
            (Some(servers), None) => {
                if servers.is_empty() {
                    return Err(ScaleError::Config(
                        "provider.server_source.static is empty".into(),
                    ));
                }
                for (index, server) in servers.iter().enumerate() {
                    if server.datacenter_id.is_empty() {
                        return Err(ScaleError::Config(format!(
                            "provider.server_source.static[{index}].datacenter_id is empty"
                        )));
                    }
                    if server.server_id.is_empty() {
                        return Err(ScaleError::Config(format!(
                            "provider.server_source.static[{index}].server_id is empty"
                        )));
                    }
                }
                Ok(())
            }
            (None, Some(dynamic)) => {
                if dynamic.datacenter_ids.is_empty() {
                    return Err(ScaleError::Config(
                        "provider.server_source.dynamic.datacenter_ids is empty".into(),
                    ));
                }
                validate_regex(
                    "provider.server_source.dynamic.server_name_regex",
                    &dynamic.server_name_regex,
                )
            }
        }
    }
}

impl IonosConfig {
    fn validate(&self) -> ScaleResult<()> {
        if self.username.is_empty() {
            return Err(ScaleError::Config("provider.username is empty".into()));
        }
        if self.password.is_empty() {
            return Err(ScaleError::Config("provider.password is empty".into()));
        }
        validate_http_url("provider.endpoint", &self.endpoint)?;
        validate_http_url("provider.dbaas_endpoint", &self.dbaas_endpoint)?;
        match (&self.server_source, &self.cluster_source) {
            (None, None) => Err(ScaleError::Config(
                "provider needs one of server_source or cluster_source".into(),
            )),
            (Some(_), Some(_)) => Err(ScaleError::Config(
                "provider.server_source and cluster_source are both set, only one must be set"
                    .into(),
            )),
            (Some(servers), None) => servers.validate(),
            (None, Some(clusters)) => validate_regex(
                "provider.cluster_source.cluster_name_regex",
                &clusters.cluster_name_regex,
            ),
        }
    }
}

// ── Metrics source ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricsSourceConfig {
    Prometheus(PrometheusConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    pub url: String,
    pub token: Option<Secret>,
}

// ── Secrets ───────────────────────────────────────────────────────

/// A string that may be sourced from the environment.
///
/// A value of the form `"$NAME"` is replaced with the contents of the
/// environment variable `NAME` while deserializing.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn resolve(raw: String) -> Result<Self, String> {
        match env_reference(&raw) {
            Some(name) => std::env::var(name)
                .map(Secret)
                .map_err(|_| format!("environment variable ${name} not set")),
            None => Ok(Secret(raw)),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Secret::resolve(raw).map_err(serde::de::Error::custom)
    }
}

static ENV_REFERENCE: OnceLock<Option<Regex>> = OnceLock::new();

/// Returns the variable name when `value` is `$` followed by `[A-Z0-9_]+`.
fn env_reference(value: &str) -> Option<&str> {
    let pattern = ENV_REFERENCE
        .get_or_init(|| Regex::new(r"^\$([A-Z0-9_]+)$").ok())
        .as_ref()?;
    pattern
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|name| name.as_str())
}

// ── Loading ───────────────────────────────────────────────────────

impl ScalerConfig {
    pub fn from_file(path: &Path) -> ScaleResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScaleError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ScaleResult<Self> {
        let config: ScalerConfig =
            toml::from_str(content).map_err(|e| ScaleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScaleResult<()> {
        if self.app.name.is_empty() {
            return Err(ScaleError::Config("app.name is empty".into()));
        }
        if self.app.cycle_time_seconds == 0 {
            return Err(ScaleError::Config(
                "app.cycle_time_seconds must be greater than 0".into(),
            ));
        }
        if self.app.request_timeout_seconds == 0 {
            return Err(ScaleError::Config(
                "app.request_timeout_seconds must be greater than 0".into(),
            ));
        }
        self.scaling.validate()?;
        self.resources.validate()?;

        let ProviderConfig::Ionos(ionos) = &self.provider;
        ionos.validate()?;

        match &self.service {
            ServiceConfig::Bbb { api_token } => {
                if api_token.is_empty() {
                    return Err(ScaleError::Config("service.api_token is empty".into()));
                }
                if ionos.server_source.is_none() {
                    return Err(ScaleError::Config(
                        "service type bbb requires provider.server_source".into(),
                    ));
                }
            }
            ServiceConfig::Postgres => {
                if ionos.cluster_source.is_none() {
                    return Err(ScaleError::Config(
                        "service type postgres requires provider.cluster_source".into(),
                    ));
                }
            }
        }

        let MetricsSourceConfig::Prometheus(prometheus) = &self.metrics_source;
        validate_http_url("metrics_source.url", &prometheus.url)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.app.cycle_time_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.app.request_timeout_seconds)
    }
}

fn validate_regex(field: &str, pattern: &str) -> ScaleResult<()> {
    if pattern.is_empty() {
        return Err(ScaleError::Config(format!("{field} is empty")));
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ScaleError::Config(format!("{field} is invalid: {e}")))
}

fn validate_http_url(field: &str, url: &str) -> ScaleResult<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ScaleError::Config(format!("{field} must use http or https: {url}")))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(ScaleError::Config(format!("{field} host is empty: {url}")));
    }
    Ok(())
}
