//! Autoscaler: the control loop.
//!
//! Each cycle discovers the managed objects, measures each ready one,
//! runs the rule engine and resolver, and applies the result through the
//! provider gateway. A failure is scoped to its object; the cycle moves
//! on to the next one.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vscale_core::config::ScalingMode;
use vscale_core::{
    Dimension, ResourceScalingProposal, Resources, ScaleError, ScaleResult, ScaledObject,
};
use vscale_metrics::{ActivityProbe, CapacitySnapshot, MetricsSource, ScalerMetrics};
use vscale_provider::{ApplyOutcome, Provider};

use crate::resolve::resolve;
use crate::rules::RuleSet;

/// Default bound on a single collaborator call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tally of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub discovered: usize,
    pub skipped_not_ready: usize,
    /// Objects with a resize applied or, in dry-run, validated.
    pub scaled: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// A per-object failure with the proposal, if one was reached.
struct ObjectFailure {
    error: ScaleError,
    proposal: Option<ResourceScalingProposal>,
}

impl From<ScaleError> for ObjectFailure {
    fn from(error: ScaleError) -> Self {
        Self {
            error,
            proposal: None,
        }
    }
}

/// Drives discovery → measure → decide → resolve → apply.
pub struct Autoscaler {
    provider: Provider,
    metrics_source: Arc<dyn MetricsSource>,
    activity_probe: Option<Arc<dyn ActivityProbe>>,
    rules: RuleSet,
    bounds: Resources,
    mode: ScalingMode,
    call_timeout: Duration,
    telemetry: Arc<ScalerMetrics>,
}

impl Autoscaler {
    pub fn new(
        provider: Provider,
        metrics_source: Arc<dyn MetricsSource>,
        rules: RuleSet,
        bounds: Resources,
        mode: ScalingMode,
        telemetry: Arc<ScalerMetrics>,
    ) -> Self {
        Self {
            provider,
            metrics_source,
            activity_probe: None,
            rules,
            bounds,
            mode,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            telemetry,
        }
    }

    /// Set the probe consulted by activity-driven rule sets.
    pub fn with_activity_probe(mut self, probe: Arc<dyn ActivityProbe>) -> Self {
        self.activity_probe = Some(probe);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run one full cycle over every discovered object.
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle(None).await
    }

    async fn cycle(&self, shutdown: Option<&watch::Receiver<bool>>) -> CycleReport {
        let started = Instant::now();
        self.telemetry.inc_cycles();
        let mut report = CycleReport::default();

        let discovered = self
            .bounded(self.provider.list_scaled_objects(), || {
                ScaleError::Discovery("listing timed out".into())
            })
            .await;
        let mut objects = match discovered {
            Ok(objects) => objects,
            Err(e) => {
                self.telemetry.inc_error(e.component());
                error!(error = %e, "discovery failed, skipping cycle");
                self.telemetry.record_cycle_time(started.elapsed());
                return report;
            }
        };
        report.discovered = objects.len();

        // Detached: works on its own copy and is never awaited.
        let snapshot_objects = objects.clone();
        let bounds = self.bounds;
        let telemetry = self.telemetry.clone();
        tokio::spawn(async move {
            telemetry.record_capacity(CapacitySnapshot::compute(&snapshot_objects, &bounds));
        });

        for object in objects.iter_mut() {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!("shutdown requested, ending cycle early");
                break;
            }
            if !object.is_ready() {
                debug!(object = %object.name(), kind = %object.kind(), "not ready, skipping");
                report.skipped_not_ready += 1;
                continue;
            }

            match self.scale_object(object).await {
                Ok(ApplyOutcome::Unchanged) => report.unchanged += 1,
                Ok(ApplyOutcome::Resized(_) | ApplyOutcome::DryRun(_)) => report.scaled += 1,
                Err(failure) => {
                    report.failed += 1;
                    self.telemetry.inc_error(failure.error.component());
                    match &failure.proposal {
                        Some(p) => warn!(
                            object = %object.name(),
                            kind = %object.kind(),
                            cpu_reasons = %p.cpu.reasons_label(),
                            mem_reasons = %p.mem.reasons_label(),
                            error = %failure.error,
                            "scaling failed"
                        ),
                        None => warn!(
                            object = %object.name(),
                            kind = %object.kind(),
                            error = %failure.error,
                            "scaling failed"
                        ),
                    }
                }
            }
        }

        self.telemetry.record_cycle_time(started.elapsed());
        report
    }

    async fn scale_object(&self, object: &mut ScaledObject) -> Result<ApplyOutcome, ObjectFailure> {
        let mut state = *object.resource_state();
        for dimension in Dimension::ALL {
            let usage = self
                .bounded(self.metrics_source.usage(object, dimension), || {
                    ScaleError::Metrics {
                        object: object.name().to_string(),
                        dimension,
                        message: "query timed out".into(),
                    }
                })
                .await?;
            state.set_usage(dimension, usage);
        }
        object.set_resource_state(state);

        let activity = match (&self.activity_probe, self.rules.uses_activity()) {
            (Some(probe), true) => Some(
                self.bounded(probe.activity(object), || ScaleError::Activity {
                    object: object.name().to_string(),
                    message: "query timed out".into(),
                })
                .await?,
            ),
            _ => None,
        };

        let proposal = resolve(
            self.rules.decide(&state, &self.bounds, activity),
            &state,
            &self.bounds,
            &self.mode,
        );
        debug!(
            object = %object.name(),
            kind = %object.kind(),
            cpu_usage = state.cpu.current_usage,
            mem_usage = state.memory.current_usage,
            activity = ?activity,
            cpu_direction = %proposal.cpu.direction,
            cpu_amount = proposal.cpu.amount,
            cpu_reasons = %proposal.cpu.reasons_label(),
            mem_direction = %proposal.mem.direction,
            mem_amount = proposal.mem.amount,
            mem_reasons = %proposal.mem.reasons_label(),
            "proposal"
        );

        let applied = self
            .bounded(self.provider.apply_proposal(object, &proposal), || {
                ScaleError::Backend(format!("resize of {} timed out", object.name()))
            })
            .await;
        match applied {
            Ok(outcome) => {
                if !proposal.is_noop() {
                    self.telemetry.mark_scaled();
                }
                Ok(outcome)
            }
            Err(error) => Err(ObjectFailure {
                error,
                proposal: Some(proposal),
            }),
        }
    }

    /// Await `call` for at most the configured call timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = ScaleResult<T>>,
        on_timeout: impl FnOnce() -> ScaleError,
    ) -> ScaleResult<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        }
    }

    /// Run the autoscaler loop until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            rules = ?self.rules,
            dry_run = self.provider.is_dry_run(),
            "autoscaler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.cycle(Some(&shutdown)).await;
            info!(
                discovered = report.discovered,
                skipped_not_ready = report.skipped_not_ready,
                scaled = report.scaled,
                unchanged = report.unchanged,
                failed = report.failed,
                "cycle complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("autoscaler shutting down");
    }
}
