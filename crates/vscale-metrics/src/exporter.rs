//! Scaler metrics: counters and gauges describing the control loop.
//!
//! Uses atomics for everything the loop updates per cycle and a lock
//! around the last capacity snapshot, which is replaced wholesale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use vscale_core::{Dimension, Resources, ScaledObject};

/// Components that can raise a counted error.
pub const COMPONENTS: [&str; 4] = ["config", "provider", "metrics", "activity"];

/// Aggregate capacity across every discovered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacitySnapshot {
    pub cores_total: i64,
    pub cores_used: i64,
    pub memory_total: i64,
    pub memory_used: i64,
    pub ready: u64,
    pub not_ready: u64,
    /// Objects already at the configured core ceiling.
    pub cores_at_max: u64,
    /// Objects already at the configured memory ceiling.
    pub memory_at_max: u64,
}

impl CapacitySnapshot {
    /// Aggregate a read-only copy of the object list.
    ///
    /// Total capacity is what the fleet could reach if every object were
    /// scaled to its maximum.
    pub fn compute(objects: &[ScaledObject], bounds: &Resources) -> Self {
        let count = objects.len() as i64;
        let cpu = bounds.dimension(Dimension::Cpu);
        let mem = bounds.dimension(Dimension::Memory);

        let mut snapshot = CapacitySnapshot {
            cores_total: count * i64::from(cpu.max),
            memory_total: count * i64::from(mem.max),
            ..Default::default()
        };

        for object in objects {
            let state = object.resource_state();
            snapshot.cores_used += i64::from(state.cpu.current_cores);
            snapshot.memory_used += i64::from(state.memory.current_bytes);
            if object.is_ready() {
                snapshot.ready += 1;
            } else {
                snapshot.not_ready += 1;
            }
            if state.cpu.current_cores == cpu.max {
                snapshot.cores_at_max += 1;
            }
            if state.memory.current_bytes == mem.max {
                snapshot.memory_at_max += 1;
            }
        }

        snapshot
    }
}

/// Observability context shared by the control loop and the `/metrics`
/// endpoint.
#[derive(Debug)]
pub struct ScalerMetrics {
    cycles: AtomicU64,
    cycle_time_micros: AtomicU64,
    /// Unix seconds of the last applied resize, 0 when none yet.
    last_scale_time: AtomicU64,
    errors: [AtomicU64; COMPONENTS.len()],
    capacity: RwLock<Option<CapacitySnapshot>>,
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            cycle_time_micros: AtomicU64::new(0),
            last_scale_time: AtomicU64::new(0),
            errors: std::array::from_fn(|_| AtomicU64::new(0)),
            capacity: RwLock::new(None),
        }
    }

    pub fn inc_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn record_cycle_time(&self, elapsed: Duration) {
        self.cycle_time_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Mark a successful resize at the current wall-clock time.
    pub fn mark_scaled(&self) {
        self.last_scale_time.store(epoch_secs(), Ordering::Relaxed);
    }

    pub fn last_scale_time(&self) -> u64 {
        self.last_scale_time.load(Ordering::Relaxed)
    }

    /// Count an error against its component label. Unknown labels are ignored.
    pub fn inc_error(&self, component: &str) {
        if let Some(i) = COMPONENTS.iter().position(|c| *c == component) {
            self.errors[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn errors(&self, component: &str) -> u64 {
        COMPONENTS
            .iter()
            .position(|c| *c == component)
            .map(|i| self.errors[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn record_capacity(&self, snapshot: CapacitySnapshot) {
        *self
            .capacity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    pub fn capacity(&self) -> Option<CapacitySnapshot> {
        *self.capacity.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP vscale_cycle_count Completed scaling cycles.\n");
        out.push_str("# TYPE vscale_cycle_count counter\n");
        out.push_str(&format!("vscale_cycle_count {}\n", self.cycles()));

        out.push_str("# HELP vscale_cycle_time_seconds Duration of the last scaling cycle.\n");
        out.push_str("# TYPE vscale_cycle_time_seconds gauge\n");
        let micros = self.cycle_time_micros.load(Ordering::Relaxed);
        out.push_str(&format!(
            "vscale_cycle_time_seconds {:.3}\n",
            micros as f64 / 1_000_000.0
        ));

        out.push_str("# HELP vscale_last_scale_time Unix time of the last resize.\n");
        out.push_str("# TYPE vscale_last_scale_time gauge\n");
        out.push_str(&format!("vscale_last_scale_time {}\n", self.last_scale_time()));

        let capacity = self.capacity();

        out.push_str("# HELP vscale_capacity_total Capacity if every object ran at its maximum.\n");
        out.push_str("# TYPE vscale_capacity_total gauge\n");
        if let Some(c) = &capacity {
            out.push_str(&format!(
                "vscale_capacity_total{{resource_type=\"cpu\"}} {}\n",
                c.cores_total
            ));
            out.push_str(&format!(
                "vscale_capacity_total{{resource_type=\"memory\"}} {}\n",
                c.memory_total
            ));
        }

        out.push_str("# HELP vscale_capacity_used Currently allocated capacity.\n");
        out.push_str("# TYPE vscale_capacity_used gauge\n");
        if let Some(c) = &capacity {
            out.push_str(&format!(
                "vscale_capacity_used{{resource_type=\"cpu\"}} {}\n",
                c.cores_used
            ));
            out.push_str(&format!(
                "vscale_capacity_used{{resource_type=\"memory\"}} {}\n",
                c.memory_used
            ));
        }

        out.push_str("# HELP vscale_instances_count Discovered objects by readiness.\n");
        out.push_str("# TYPE vscale_instances_count gauge\n");
        if let Some(c) = &capacity {
            out.push_str(&format!("vscale_instances_count{{ready=\"true\"}} {}\n", c.ready));
            out.push_str(&format!(
                "vscale_instances_count{{ready=\"false\"}} {}\n",
                c.not_ready
            ));
        }

        out.push_str("# HELP vscale_max_scaled_instances Objects at their configured maximum.\n");
        out.push_str("# TYPE vscale_max_scaled_instances gauge\n");
        if let Some(c) = &capacity {
            out.push_str(&format!(
                "vscale_max_scaled_instances{{resource_type=\"cpu\"}} {}\n",
                c.cores_at_max
            ));
            out.push_str(&format!(
                "vscale_max_scaled_instances{{resource_type=\"memory\"}} {}\n",
                c.memory_at_max
            ));
        }

        out.push_str("# HELP vscale_component_errors_total Errors by originating component.\n");
        out.push_str("# TYPE vscale_component_errors_total counter\n");
        for (i, component) in COMPONENTS.iter().enumerate() {
            out.push_str(&format!(
                "vscale_component_errors_total{{component=\"{component}\"}} {}\n",
                self.errors[i].load(Ordering::Relaxed)
            ));
        }

        out
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
