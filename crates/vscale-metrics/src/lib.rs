//! vscale-metrics: measurement inputs and observability outputs.
//!
//! Reads utilisation from Prometheus and session activity from
//! BigBlueButton, and exposes the scaler's own counters in the
//! Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsSource (trait)
//!   └── PrometheusSource → GET /api/v1/query, one instant query per dimension
//!
//! ActivityProbe (trait)
//!   └── BbbActivityProbe → GET /bigbluebutton/api/getMeetings, summed participants
//!
//! ScalerMetrics
//!   ├── inc_cycles() / record_cycle_time() / mark_scaled() / inc_error()
//!   ├── record_capacity(CapacitySnapshot) ← detached task per cycle
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod activity;
pub mod exporter;
pub mod source;

pub use activity::{ActivityProbe, BbbActivityProbe};
pub use exporter::{CapacitySnapshot, ScalerMetrics};
pub use source::{MetricsSource, PrometheusSource};
