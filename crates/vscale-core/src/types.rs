//! Domain types for the vscale autoscaler.
//!
//! Scaled objects are rebuilt from a fresh provider listing every cycle.
//! Proposals and scale operations live for a single evaluation and are
//! never persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ScaleError, ScaleResult};

// ── Dimensions ────────────────────────────────────────────────────

/// A resource axis evaluated independently by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Cpu,
    Memory,
}

impl Dimension {
    pub const ALL: [Dimension; 2] = [Dimension::Cpu, Dimension::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Resource state ────────────────────────────────────────────────

/// Current CPU allocation and utilisation of an object.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuState {
    pub current_cores: i32,
    /// Utilisation in `[0, 1]`.
    pub current_usage: f32,
}

/// Current memory allocation and utilisation of an object.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryState {
    /// Allocation in the provider's memory unit.
    pub current_bytes: i32,
    /// Utilisation in `[0, 1]`.
    pub current_usage: f32,
}

/// Allocation and utilisation of both dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceState {
    pub cpu: CpuState,
    pub memory: MemoryState,
}

/// One dimension of a [`ResourceState`], as seen by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionState {
    pub current: i32,
    pub usage: f32,
}

impl ResourceState {
    pub fn new(cores: i32, memory: i32) -> Self {
        Self {
            cpu: CpuState {
                current_cores: cores,
                current_usage: 0.0,
            },
            memory: MemoryState {
                current_bytes: memory,
                current_usage: 0.0,
            },
        }
    }

    pub fn dimension(&self, dimension: Dimension) -> DimensionState {
        match dimension {
            Dimension::Cpu => DimensionState {
                current: self.cpu.current_cores,
                usage: self.cpu.current_usage,
            },
            Dimension::Memory => DimensionState {
                current: self.memory.current_bytes,
                usage: self.memory.current_usage,
            },
        }
    }

    pub fn set_usage(&mut self, dimension: Dimension, usage: f32) {
        match dimension {
            Dimension::Cpu => self.cpu.current_usage = usage,
            Dimension::Memory => self.memory.current_usage = usage,
        }
    }
}

// ── Scaled objects ────────────────────────────────────────────────

/// A virtual server managed by the autoscaler.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub datacenter_id: String,
    pub server_id: String,
    pub name: String,
    pub cpu_architecture: String,
    pub state: ResourceState,
    /// VM running and provisioning complete.
    pub ready: bool,
}

/// A managed database cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub cluster_id: String,
    pub name: String,
    pub storage_size: i32,
    pub storage_type: String,
    pub state: ResourceState,
    pub ready: bool,
}

/// Kind tag of a [`ScaledObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Server,
    Cluster,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Server => f.write_str("server"),
            ObjectKind::Cluster => f.write_str("cluster"),
        }
    }
}

/// A unit of compute under autoscaler management.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaledObject {
    Server(Server),
    Cluster(Cluster),
}

impl ScaledObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ScaledObject::Server(_) => ObjectKind::Server,
            ScaledObject::Cluster(_) => ObjectKind::Cluster,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ScaledObject::Server(s) => &s.name,
            ScaledObject::Cluster(c) => &c.name,
        }
    }

    /// Provider-side business key (server or cluster id).
    pub fn id(&self) -> &str {
        match self {
            ScaledObject::Server(s) => &s.server_id,
            ScaledObject::Cluster(c) => &c.cluster_id,
        }
    }

    pub fn resource_state(&self) -> &ResourceState {
        match self {
            ScaledObject::Server(s) => &s.state,
            ScaledObject::Cluster(c) => &c.state,
        }
    }

    pub fn set_resource_state(&mut self, state: ResourceState) {
        match self {
            ScaledObject::Server(s) => s.state = state,
            ScaledObject::Cluster(c) => c.state = state,
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            ScaledObject::Server(s) => s.ready,
            ScaledObject::Cluster(c) => c.ready,
        }
    }
}

// ── Bounds configuration ──────────────────────────────────────────

/// CPU bounds for every scaled object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuResources {
    pub min_cores: i32,
    pub max_cores: i32,
    #[serde(default)]
    pub min_usage: f32,
    pub max_usage: f32,
}

/// Memory bounds for every scaled object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryResources {
    pub min_bytes: i32,
    pub max_bytes: i32,
    #[serde(default)]
    pub min_usage: f32,
    pub max_usage: f32,
}

/// Static bounds loaded once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: CpuResources,
    pub memory: MemoryResources,
}

/// Bounds of one dimension with the unit-specific field names erased.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionBounds {
    pub min: i32,
    pub max: i32,
    pub min_usage: f32,
    pub max_usage: f32,
}

impl Resources {
    pub fn dimension(&self, dimension: Dimension) -> DimensionBounds {
        match dimension {
            Dimension::Cpu => DimensionBounds {
                min: self.cpu.min_cores,
                max: self.cpu.max_cores,
                min_usage: self.cpu.min_usage,
                max_usage: self.cpu.max_usage,
            },
            Dimension::Memory => DimensionBounds {
                min: self.memory.min_bytes,
                max: self.memory.max_bytes,
                min_usage: self.memory.min_usage,
                max_usage: self.memory.max_usage,
            },
        }
    }

    pub fn validate(&self) -> ScaleResult<()> {
        self.cpu.validate()?;
        self.memory.validate()
    }
}

impl CpuResources {
    pub fn validate(&self) -> ScaleResult<()> {
        if self.min_cores <= 0 {
            return Err(ScaleError::Config(format!(
                "cpu.min_cores must be greater than 0 but got {}",
                self.min_cores
            )));
        }
        if self.max_cores < self.min_cores {
            return Err(ScaleError::Config(format!(
                "cpu.max_cores must be greater than or equal to min_cores ({}) but got {}",
                self.min_cores, self.max_cores
            )));
        }
        validate_usage_window("cpu", self.min_usage, self.max_usage)
    }
}

impl MemoryResources {
    pub fn validate(&self) -> ScaleResult<()> {
        if self.min_bytes < 1024 {
            return Err(ScaleError::Config(format!(
                "memory.min_bytes must be greater than or equal to 1024 but got {}",
                self.min_bytes
            )));
        }
        if self.max_bytes < self.min_bytes {
            return Err(ScaleError::Config(format!(
                "memory.max_bytes must be greater than or equal to min_bytes ({}) but got {}",
                self.min_bytes, self.max_bytes
            )));
        }
        validate_usage_window("memory", self.min_usage, self.max_usage)
    }
}

fn validate_usage_window(section: &str, min_usage: f32, max_usage: f32) -> ScaleResult<()> {
    if !(0.0..=1.0).contains(&min_usage) {
        return Err(ScaleError::Config(format!(
            "{section}.min_usage must be within [0, 1] but got {min_usage}"
        )));
    }
    if !max_usage.is_finite() || max_usage <= min_usage || max_usage > 1.0 {
        return Err(ScaleError::Config(format!(
            "{section}.max_usage must be greater than min_usage ({min_usage}) and at most 1 but got {max_usage}"
        )));
    }
    Ok(())
}

// ── Scaling decisions ─────────────────────────────────────────────

/// Direction of a single-dimension scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleDirection {
    Up,
    Down,
    #[default]
    None,
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDirection::Up => f.write_str("up"),
            ScaleDirection::Down => f.write_str("down"),
            ScaleDirection::None => f.write_str("none"),
        }
    }
}

/// Identifier of a rule that fired during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleRule {
    BelowMinimum,
    UsageAboveMaximum,
    NoActivity,
    AboveMaximum,
    UsageBelowMinimum,
}

impl fmt::Display for ScaleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleRule::BelowMinimum => "below minimum",
            ScaleRule::UsageAboveMaximum => "usage above maximum",
            ScaleRule::NoActivity => "no activity",
            ScaleRule::AboveMaximum => "above maximum",
            ScaleRule::UsageBelowMinimum => "usage below minimum",
        };
        f.write_str(s)
    }
}

/// The decision for one dimension.
///
/// `amount` is always a signed delta to add to the current allocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScaleOp {
    pub direction: ScaleDirection,
    /// Rules that fired, in evaluation order.
    pub reasons: Vec<ScaleRule>,
    pub amount: i32,
}

impl ScaleOp {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn up(amount: i32, reason: ScaleRule) -> Self {
        Self {
            direction: ScaleDirection::Up,
            reasons: vec![reason],
            amount,
        }
    }

    pub fn down(amount: i32, reason: ScaleRule) -> Self {
        Self {
            direction: ScaleDirection::Down,
            reasons: vec![reason],
            amount,
        }
    }

    pub fn is_none(&self) -> bool {
        self.direction == ScaleDirection::None
    }

    /// Drop the decision, keeping the reasons for diagnostics.
    pub fn cancel(&mut self) {
        self.direction = ScaleDirection::None;
        self.amount = 0;
    }

    /// Comma-separated reasons, for logging.
    pub fn reasons_label(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Scaling decision for both dimensions of one object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceScalingProposal {
    pub cpu: ScaleOp,
    pub mem: ScaleOp,
}

impl ResourceScalingProposal {
    pub fn none() -> Self {
        Self::default()
    }

    /// True when neither dimension needs to change.
    pub fn is_noop(&self) -> bool {
        self.cpu.is_none() && self.mem.is_none()
    }

    pub fn op_mut(&mut self, dimension: Dimension) -> &mut ScaleOp {
        match dimension {
            Dimension::Cpu => &mut self.cpu,
            Dimension::Memory => &mut self.mem,
        }
    }
}

// ── Provider contract ─────────────────────────────────────────────

/// Account-level per-resource ceiling, fetched once at provider init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract {
    pub contract_number: i64,
    pub cores_per_server: i32,
    pub ram_per_server: i32,
}

/// Absolute allocation sent to the provider in a single resize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeTarget {
    pub cores: i32,
    pub ram: i32,
}
