//! Full cycles against in-memory collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::watch;

use vscale_autoscale::{Autoscaler, CycleReport, RuleSet};
use vscale_core::config::{DirectSteps, ScalingMode};
use vscale_core::{
    Cluster, Contract, CpuResources, Dimension, MemoryResources, ResizeTarget, ResourceState,
    Resources, ScaleError, ScaleResult, ScaledObject, Server,
};
use vscale_metrics::{ActivityProbe, MetricsSource, ScalerMetrics};
use vscale_provider::{Discovery, Provider, ProviderBackend};

// ── Fakes ─────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeBackend {
    servers: Vec<Server>,
    clusters: Vec<Cluster>,
    fail_listing: bool,
    /// Core ceiling of the account contract; 8 when unset.
    contract_cores: Option<i32>,
    fail_resize_for: Option<String>,
    resizes: Mutex<Vec<(String, ResizeTarget)>>,
}

impl FakeBackend {
    fn resizes(&self) -> Vec<(String, ResizeTarget)> {
        self.resizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderBackend for FakeBackend {
    async fn fetch_contract(&self) -> ScaleResult<Contract> {
        Ok(Contract {
            contract_number: 42,
            cores_per_server: self.contract_cores.unwrap_or(8),
            ram_per_server: 16384,
        })
    }

    async fn list_servers(&self, _datacenter_id: &str) -> ScaleResult<Vec<Server>> {
        if self.fail_listing {
            return Err(ScaleError::Backend("503 Service Unavailable".into()));
        }
        Ok(self.servers.clone())
    }

    async fn get_server(&self, _dc: &str, server_id: &str) -> ScaleResult<Option<Server>> {
        Ok(self.servers.iter().find(|s| s.server_id == server_id).cloned())
    }

    async fn list_clusters(&self, _filter_name: Option<&str>) -> ScaleResult<Vec<Cluster>> {
        Ok(self.clusters.clone())
    }

    async fn resize(&self, object: &ScaledObject, target: ResizeTarget) -> ScaleResult<()> {
        if self.fail_resize_for.as_deref() == Some(object.name()) {
            return Err(ScaleError::Backend("422 Unprocessable Entity".into()));
        }
        self.resizes
            .lock()
            .unwrap()
            .push((object.name().to_string(), target));
        Ok(())
    }
}

/// Usage per object name as `(cpu, memory)`. Unknown names fail.
#[derive(Default)]
struct FakeMetrics {
    usage: HashMap<String, (f32, f32)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    measured: Mutex<Vec<String>>,
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn usage(&self, object: &ScaledObject, dimension: Dimension) -> ScaleResult<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.measured.lock().unwrap().push(object.name().to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let (cpu, mem) = self
            .usage
            .get(object.name())
            .copied()
            .ok_or_else(|| ScaleError::Metrics {
                object: object.name().to_string(),
                dimension,
                message: "no data".into(),
            })?;
        Ok(match dimension {
            Dimension::Cpu => cpu,
            Dimension::Memory => mem,
        })
    }
}

struct FakeActivity(HashMap<String, u64>);

#[async_trait]
impl ActivityProbe for FakeActivity {
    async fn activity(&self, object: &ScaledObject) -> ScaleResult<u64> {
        self.0
            .get(object.name())
            .copied()
            .ok_or_else(|| ScaleError::Activity {
                object: object.name().to_string(),
                message: "connection refused".into(),
            })
    }
}

// ── Fixtures ──────────────────────────────────────────────────────

fn bounds() -> Resources {
    Resources {
        cpu: CpuResources {
            min_cores: 2,
            max_cores: 4,
            min_usage: 0.1,
            max_usage: 0.5,
        },
        memory: MemoryResources {
            min_bytes: 2048,
            max_bytes: 8192,
            min_usage: 0.1,
            max_usage: 0.8,
        },
    }
}

fn server(name: &str, cores: i32, ram: i32, ready: bool) -> Server {
    Server {
        datacenter_id: "dc-1".into(),
        server_id: format!("id-{name}"),
        name: name.into(),
        cpu_architecture: "INTEL_SKYLAKE".into(),
        state: ResourceState::new(cores, ram),
        ready,
    }
}

fn cluster(name: &str, cores: i32, ram: i32) -> Cluster {
    Cluster {
        cluster_id: format!("id-{name}"),
        name: name.into(),
        storage_size: 20480,
        storage_type: "SSD".into(),
        state: ResourceState::new(cores, ram),
        ready: true,
    }
}

fn usage(entries: &[(&str, f32, f32)]) -> FakeMetrics {
    FakeMetrics {
        usage: entries
            .iter()
            .map(|(n, c, m)| (n.to_string(), (*c, *m)))
            .collect(),
        ..Default::default()
    }
}

fn activity(entries: &[(&str, u64)]) -> Arc<FakeActivity> {
    Arc::new(FakeActivity(
        entries.iter().map(|(n, a)| (n.to_string(), *a)).collect(),
    ))
}

struct Harness {
    backend: Arc<FakeBackend>,
    metrics: Arc<FakeMetrics>,
    telemetry: Arc<ScalerMetrics>,
    scaler: Autoscaler,
}

async fn session_load(
    backend: FakeBackend,
    metrics: FakeMetrics,
    probe: Arc<FakeActivity>,
    mode: ScalingMode,
    dry_run: bool,
) -> Harness {
    let discovery = Discovery::DynamicServers {
        datacenter_ids: vec!["dc-1".into()],
        name_pattern: Regex::new(".*").unwrap(),
    };
    harness(backend, metrics, discovery, RuleSet::SessionLoad, mode, dry_run, Some(probe)).await
}

async fn harness(
    backend: FakeBackend,
    metrics: FakeMetrics,
    discovery: Discovery,
    rules: RuleSet,
    mode: ScalingMode,
    dry_run: bool,
    probe: Option<Arc<FakeActivity>>,
) -> Harness {
    let backend = Arc::new(backend);
    let metrics = Arc::new(metrics);
    let telemetry = Arc::new(ScalerMetrics::new());
    let provider = Provider::connect(backend.clone(), discovery, dry_run)
        .await
        .unwrap();
    let mut scaler = Autoscaler::new(
        provider,
        metrics.clone(),
        rules,
        bounds(),
        mode,
        telemetry.clone(),
    )
    .with_call_timeout(Duration::from_millis(200));
    if let Some(probe) = probe {
        scaler = scaler.with_activity_probe(probe);
    }
    Harness {
        backend,
        metrics,
        telemetry,
        scaler,
    }
}

fn target(cores: i32, ram: i32) -> ResizeTarget {
    ResizeTarget { cores, ram }
}

// ── Session load ──────────────────────────────────────────────────

#[tokio::test]
async fn server_below_minimum_is_scaled_up() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 1, 4096, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.2, 0.3)]),
        activity(&[("bbb-1", 3)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(
        report,
        CycleReport {
            discovered: 1,
            scaled: 1,
            ..Default::default()
        }
    );
    assert_eq!(h.backend.resizes(), vec![("bbb-1".into(), target(2, 4096))]);
    assert_eq!(h.telemetry.cycles(), 1);
    assert!(h.telemetry.last_scale_time() > 0);
}

#[tokio::test]
async fn idle_server_shrinks_to_minimum() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 4, 8192, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.0, 0.2)]),
        activity(&[("bbb-1", 0)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.scaled, 1);
    assert_eq!(h.backend.resizes(), vec![("bbb-1".into(), target(2, 2048))]);
}

#[tokio::test]
async fn busy_server_within_bounds_is_unchanged() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 3, 4096, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.3, 0.5)]),
        activity(&[("bbb-1", 12)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.unchanged, 1);
    assert!(h.backend.resizes().is_empty());
    assert_eq!(h.telemetry.last_scale_time(), 0);
}

#[tokio::test]
async fn not_ready_objects_are_not_measured() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 1, 4096, false)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.2, 0.3)]),
        activity(&[("bbb-1", 3)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.skipped_not_ready, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.metrics.calls.load(Ordering::SeqCst), 0);
    assert!(h.backend.resizes().is_empty());
}

#[tokio::test]
async fn metrics_failure_is_isolated_to_its_object() {
    let h = session_load(
        FakeBackend {
            servers: vec![
                server("bbb-1", 1, 4096, true),
                server("bbb-2", 1, 4096, true),
            ],
            ..Default::default()
        },
        usage(&[("bbb-2", 0.2, 0.3)]),
        activity(&[("bbb-1", 1), ("bbb-2", 1)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.scaled, 1);
    assert_eq!(h.backend.resizes(), vec![("bbb-2".into(), target(2, 4096))]);
    assert_eq!(h.telemetry.errors("metrics"), 1);
}

#[tokio::test]
async fn activity_failure_skips_object() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 4, 4096, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.0, 0.0)]),
        activity(&[]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert!(h.backend.resizes().is_empty());
    assert_eq!(h.telemetry.errors("activity"), 1);
}

#[tokio::test]
async fn slow_metrics_time_out() {
    let mut metrics = usage(&[("bbb-1", 0.2, 0.3)]);
    metrics.delay = Some(Duration::from_secs(30));
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 1, 4096, true)],
            ..Default::default()
        },
        metrics,
        activity(&[("bbb-1", 3)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.telemetry.errors("metrics"), 1);
    assert!(h.backend.resizes().is_empty());
}

#[tokio::test]
async fn contract_violation_is_counted_and_not_applied() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 1, 4096, true)],
            contract_cores: Some(1),
            ..Default::default()
        },
        usage(&[("bbb-1", 0.2, 0.3)]),
        activity(&[("bbb-1", 3)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert!(h.backend.resizes().is_empty());
    assert_eq!(h.telemetry.errors("provider"), 1);
    assert_eq!(h.telemetry.last_scale_time(), 0);
}

#[tokio::test]
async fn direct_mode_uses_fixed_steps() {
    let steps = DirectSteps {
        cpu_increase: 2,
        cpu_decrease: 1,
        mem_increase: 1024,
        mem_decrease: 1024,
    };
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 4, 8192, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.0, 0.0)]),
        activity(&[("bbb-1", 0)]),
        ScalingMode::Direct(steps),
        false,
    )
    .await;

    h.scaler.run_cycle().await;
    assert_eq!(h.backend.resizes(), vec![("bbb-1".into(), target(3, 7168))]);
}

#[tokio::test]
async fn direct_steps_stay_within_bounds() {
    let steps = DirectSteps {
        cpu_increase: 3,
        cpu_decrease: 4,
        mem_increase: 8192,
        mem_decrease: 4096,
    };
    let h = session_load(
        FakeBackend {
            servers: vec![
                server("bbb-1", 3, 4096, true),
                server("bbb-2", 3, 4096, true),
            ],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.0, 0.0), ("bbb-2", 0.9, 0.5)]),
        activity(&[("bbb-1", 0), ("bbb-2", 20)]),
        ScalingMode::Direct(steps),
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.scaled, 2);
    assert_eq!(
        h.backend.resizes(),
        vec![
            ("bbb-1".into(), target(2, 2048)),
            ("bbb-2".into(), target(4, 4096)),
        ]
    );
}

#[tokio::test]
async fn zero_direct_step_is_not_applied() {
    let steps = DirectSteps {
        cpu_increase: 1,
        cpu_decrease: 0,
        mem_increase: 1024,
        mem_decrease: 0,
    };
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 3, 4096, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.0, 0.0)]),
        activity(&[("bbb-1", 0)]),
        ScalingMode::Direct(steps),
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.unchanged, 1);
    assert!(h.backend.resizes().is_empty());
    assert_eq!(h.telemetry.last_scale_time(), 0);
}

#[tokio::test]
async fn resize_failure_is_isolated_to_its_object() {
    let h = session_load(
        FakeBackend {
            servers: vec![
                server("bbb-1", 1, 4096, true),
                server("bbb-2", 1, 4096, true),
            ],
            fail_resize_for: Some("bbb-1".into()),
            ..Default::default()
        },
        usage(&[("bbb-1", 0.2, 0.3), ("bbb-2", 0.2, 0.3)]),
        activity(&[("bbb-1", 1), ("bbb-2", 1)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.scaled, 1);
    assert_eq!(h.backend.resizes(), vec![("bbb-2".into(), target(2, 4096))]);
    assert_eq!(h.telemetry.errors("provider"), 1);
}

#[tokio::test]
async fn dry_run_counts_but_never_resizes() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 1, 4096, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.2, 0.3)]),
        activity(&[("bbb-1", 3)]),
        ScalingMode::Heuristic,
        true,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.scaled, 1);
    assert!(h.backend.resizes().is_empty());
}

#[tokio::test]
async fn discovery_failure_skips_cycle() {
    let h = session_load(
        FakeBackend {
            fail_listing: true,
            ..Default::default()
        },
        usage(&[]),
        activity(&[]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report, CycleReport::default());
    assert_eq!(h.telemetry.cycles(), 1);
    assert_eq!(h.telemetry.errors("provider"), 1);
}

#[tokio::test]
async fn capacity_snapshot_is_recorded() {
    let h = session_load(
        FakeBackend {
            servers: vec![
                server("bbb-1", 4, 8192, true),
                server("bbb-2", 2, 2048, false),
            ],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.3, 0.3)]),
        activity(&[("bbb-1", 5)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;

    h.scaler.run_cycle().await;
    let mut capacity = None;
    for _ in 0..50 {
        capacity = h.telemetry.capacity();
        if capacity.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let capacity = capacity.expect("snapshot recorded");
    assert_eq!(capacity.cores_total, 8);
    assert_eq!(capacity.cores_used, 6);
    assert_eq!(capacity.ready, 1);
    assert_eq!(capacity.not_ready, 1);
    assert_eq!(capacity.cores_at_max, 1);
    assert_eq!(capacity.memory_at_max, 1);
}

// ── Symmetric threshold ───────────────────────────────────────────

async fn clusters(backend: FakeBackend, metrics: FakeMetrics) -> Harness {
    let discovery = Discovery::Clusters {
        filter_name: None,
        name_pattern: Regex::new("^pg-").unwrap(),
    };
    harness(
        backend,
        metrics,
        discovery,
        RuleSet::SymmetricThreshold,
        ScalingMode::Heuristic,
        false,
        None,
    )
    .await
}

#[tokio::test]
async fn oversized_cluster_shrinks_to_maximum() {
    let h = clusters(
        FakeBackend {
            clusters: vec![cluster("pg-main", 5, 4096)],
            ..Default::default()
        },
        usage(&[("pg-main", 0.0, 0.5)]),
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.scaled, 1);
    assert_eq!(h.backend.resizes(), vec![("pg-main".into(), target(4, 4096))]);
}

#[tokio::test]
async fn growth_wins_over_shrink() {
    // cpu wants +1, memory above its maximum wants to shrink.
    let h = clusters(
        FakeBackend {
            clusters: vec![cluster("pg-main", 2, 10000)],
            ..Default::default()
        },
        usage(&[("pg-main", 0.9, 0.5)]),
    )
    .await;

    h.scaler.run_cycle().await;
    assert_eq!(h.backend.resizes(), vec![("pg-main".into(), target(3, 10000))]);
}

#[tokio::test]
async fn clusters_not_matching_regex_are_ignored() {
    let h = clusters(
        FakeBackend {
            clusters: vec![cluster("pg-main", 1, 4096), cluster("redis", 1, 4096)],
            ..Default::default()
        },
        usage(&[("pg-main", 0.3, 0.3)]),
    )
    .await;

    let report = h.scaler.run_cycle().await;
    assert_eq!(report.discovered, 1);
    assert_eq!(report.scaled, 1);
}

// ── Loop ──────────────────────────────────────────────────────────

#[tokio::test]
async fn run_stops_on_shutdown() {
    let h = session_load(
        FakeBackend {
            servers: vec![server("bbb-1", 3, 4096, true)],
            ..Default::default()
        },
        usage(&[("bbb-1", 0.3, 0.3)]),
        activity(&[("bbb-1", 2)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;
    let telemetry = h.telemetry.clone();
    let scaler = Arc::new(h.scaler);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn({
        let scaler = scaler.clone();
        async move { scaler.run(Duration::from_secs(3600), rx).await }
    });

    for _ in 0..100 {
        if telemetry.cycles() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(telemetry.cycles(), 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop exits promptly")
        .unwrap();
    assert_eq!(telemetry.cycles(), 1);
}

#[tokio::test]
async fn shutdown_ends_cycle_between_objects() {
    let mut metrics = usage(&[("bbb-1", 0.2, 0.3), ("bbb-2", 0.2, 0.3)]);
    metrics.delay = Some(Duration::from_millis(50));
    let h = session_load(
        FakeBackend {
            servers: vec![
                server("bbb-1", 1, 4096, true),
                server("bbb-2", 1, 4096, true),
            ],
            ..Default::default()
        },
        metrics,
        activity(&[("bbb-1", 1), ("bbb-2", 1)]),
        ScalingMode::Heuristic,
        false,
    )
    .await;
    let metrics = h.metrics.clone();
    let backend = h.backend.clone();
    let scaler = Arc::new(h.scaler);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn({
        let scaler = scaler.clone();
        async move { scaler.run(Duration::from_secs(3600), rx).await }
    });

    for _ in 0..100 {
        if metrics.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop exits promptly")
        .unwrap();

    // The in-flight object completes, the next one is never measured.
    assert_eq!(
        *metrics.measured.lock().unwrap(),
        vec!["bbb-1".to_string(), "bbb-1".to_string()]
    );
    assert_eq!(backend.resizes(), vec![("bbb-1".into(), target(2, 4096))]);
}
