//! Wires configured collaborators into an [`Autoscaler`].

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use vscale_autoscale::{Autoscaler, RuleSet};
use vscale_core::config::{MetricsSourceConfig, ProviderConfig, ServiceConfig, Stage};
use vscale_core::{ScaleResult, ScalerConfig};
use vscale_metrics::{BbbActivityProbe, PrometheusSource, ScalerMetrics};
use vscale_provider::{Discovery, IonosBackend, Provider};

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> ScaleResult<ScalerConfig> {
    let config = ScalerConfig::from_file(path)?;
    info!(
        path = %path.display(),
        name = %config.app.name,
        stage = ?config.app.stage,
        "configuration loaded"
    );
    Ok(config)
}

/// Build every collaborator and connect to the provider.
///
/// Fails when the contract cannot be loaded; nothing is scaled without it.
pub async fn build_autoscaler(
    config: &ScalerConfig,
    telemetry: Arc<ScalerMetrics>,
) -> ScaleResult<Autoscaler> {
    let timeout = config.request_timeout();

    let ProviderConfig::Ionos(ionos) = &config.provider;
    let backend = Arc::new(IonosBackend::new(ionos, timeout)?);
    let discovery = Discovery::from_config(ionos)?;
    let provider = Provider::connect(backend, discovery, config.app.stage == Stage::Dev).await?;

    let MetricsSourceConfig::Prometheus(prometheus) = &config.metrics_source;
    let source = Arc::new(PrometheusSource::new(prometheus, timeout)?);

    let mut scaler = Autoscaler::new(
        provider,
        source,
        RuleSet::for_service(&config.service),
        config.resources,
        config.scaling.mode(),
        telemetry,
    )
    .with_call_timeout(timeout);

    if let ServiceConfig::Bbb { api_token } = &config.service {
        let probe = BbbActivityProbe::new(api_token.clone(), timeout)?;
        scaler = scaler.with_activity_probe(Arc::new(probe));
    }

    Ok(scaler)
}
