//! Rule engine: converts a resource's current state into a proposal.
//!
//! Each dimension is evaluated independently by the same primitive,
//! substituting the matching bound fields. Rules run in a fixed order:
//!
//! ```text
//! 1. current < min                          → Up   to min
//! 2. usage > max_usage and current < max    → Up   proportionally, capped at max
//! 3. activity == 0 and current > min        → Down to min          (session load only)
//! 4. current > max                          → Down to max          (symmetric only)
//! 5. usage < min_usage and current > min    → Down proportionally, floored at min (symmetric only)
//! ```
//!
//! When two rules push the same direction the larger step wins. A later
//! rule pushing the opposite direction replaces the earlier decision.

use vscale_core::config::ServiceConfig;
use vscale_core::{
    Dimension, DimensionBounds, DimensionState, ResourceScalingProposal, ResourceState,
    Resources, ScaleDirection, ScaleOp, ScaleRule,
};

/// The rule variants sharing the [`RuleSet::decide`] contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSet {
    /// Conferencing workloads: scale down only when fully idle.
    SessionLoad,
    /// Database workloads: usage thresholds in both directions.
    SymmetricThreshold,
}

impl RuleSet {
    pub fn for_service(service: &ServiceConfig) -> Self {
        match service {
            ServiceConfig::Bbb { .. } => RuleSet::SessionLoad,
            ServiceConfig::Postgres => RuleSet::SymmetricThreshold,
        }
    }

    /// Whether [`RuleSet::decide`] consumes an activity signal.
    pub fn uses_activity(&self) -> bool {
        matches!(self, RuleSet::SessionLoad)
    }

    /// Evaluate both dimensions.
    ///
    /// `activity` is `None` when no signal applies; the zero-activity rule
    /// only fires on `Some(0)`.
    pub fn decide(
        &self,
        state: &ResourceState,
        bounds: &Resources,
        activity: Option<u64>,
    ) -> ResourceScalingProposal {
        ResourceScalingProposal {
            cpu: self.decide_dimension(
                state.dimension(Dimension::Cpu),
                bounds.dimension(Dimension::Cpu),
                activity,
            ),
            mem: self.decide_dimension(
                state.dimension(Dimension::Memory),
                bounds.dimension(Dimension::Memory),
                activity,
            ),
        }
    }

    fn decide_dimension(
        &self,
        state: DimensionState,
        bounds: DimensionBounds,
        activity: Option<u64>,
    ) -> ScaleOp {
        let mut op = ScaleOp::none();

        below_minimum(&mut op, state, bounds);
        usage_above_maximum(&mut op, state, bounds);

        match self {
            RuleSet::SessionLoad => {
                if activity == Some(0) {
                    no_activity(&mut op, state, bounds);
                }
            }
            RuleSet::SymmetricThreshold => {
                above_maximum(&mut op, state, bounds);
                usage_below_minimum(&mut op, state, bounds);
            }
        }

        op
    }
}

fn below_minimum(op: &mut ScaleOp, state: DimensionState, bounds: DimensionBounds) {
    if state.current < bounds.min {
        push(op, ScaleDirection::Up, bounds.min - state.current, ScaleRule::BelowMinimum);
    }
}

fn usage_above_maximum(op: &mut ScaleOp, state: DimensionState, bounds: DimensionBounds) {
    // Zero usage would divide by zero below.
    if state.usage <= bounds.max_usage || state.current >= bounds.max || state.usage == 0.0 {
        return;
    }
    let usage = f64::from(state.usage);
    let inc = (usage - f64::from(bounds.max_usage)) * f64::from(state.current) / usage;
    let target = (f64::from(state.current) + inc.ceil()).min(f64::from(bounds.max)) as i32;
    push(op, ScaleDirection::Up, target - state.current, ScaleRule::UsageAboveMaximum);
}

fn no_activity(op: &mut ScaleOp, state: DimensionState, bounds: DimensionBounds) {
    if state.current > bounds.min {
        push(op, ScaleDirection::Down, bounds.min - state.current, ScaleRule::NoActivity);
    }
}

fn above_maximum(op: &mut ScaleOp, state: DimensionState, bounds: DimensionBounds) {
    if state.current > bounds.max {
        push(op, ScaleDirection::Down, bounds.max - state.current, ScaleRule::AboveMaximum);
    }
}

fn usage_below_minimum(op: &mut ScaleOp, state: DimensionState, bounds: DimensionBounds) {
    if state.usage >= bounds.min_usage || state.current <= bounds.min || state.usage == 0.0 {
        return;
    }
    let usage = f64::from(state.usage);
    let dec = (f64::from(bounds.min_usage) - usage) * f64::from(state.current) / usage;
    let target = (f64::from(state.current) - dec.ceil()).max(f64::from(bounds.min)) as i32;
    push(op, ScaleDirection::Down, target - state.current, ScaleRule::UsageBelowMinimum);
}

/// Record a fired rule.
fn push(op: &mut ScaleOp, direction: ScaleDirection, amount: i32, rule: ScaleRule) {
    op.reasons.push(rule);
    if op.direction == direction {
        op.amount = match direction {
            ScaleDirection::Up => op.amount.max(amount),
            ScaleDirection::Down => op.amount.min(amount),
            ScaleDirection::None => 0,
        };
    } else {
        op.direction = direction;
        op.amount = amount;
    }
}
