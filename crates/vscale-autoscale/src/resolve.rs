//! Conflict resolver: reconciles the two dimensions of a proposal.
//!
//! A resize is a single provider call, so the dimensions cannot move in
//! opposite directions. Growth wins: any shrink paired with a growth is
//! cancelled before the operating mode is applied. Direct-mode steps are
//! clamped to the configured bounds.

use vscale_core::config::{DirectSteps, ScalingMode};
use vscale_core::{
    Dimension, DimensionBounds, ResourceScalingProposal, ResourceState, Resources,
    ScaleDirection, ScaleOp,
};

/// Resolve a rule-engine proposal for an object in `state` under the
/// configured mode.
pub fn resolve(
    mut proposal: ResourceScalingProposal,
    state: &ResourceState,
    bounds: &Resources,
    mode: &ScalingMode,
) -> ResourceScalingProposal {
    cancel_opposing(&mut proposal);
    if let ScalingMode::Direct(steps) = mode {
        for dimension in Dimension::ALL {
            let (increase, decrease) = step_sizes(steps, dimension);
            override_amount(
                proposal.op_mut(dimension),
                state.dimension(dimension).current,
                bounds.dimension(dimension),
                increase,
                decrease,
            );
        }
    }
    proposal
}

fn cancel_opposing(proposal: &mut ResourceScalingProposal) {
    match (proposal.cpu.direction, proposal.mem.direction) {
        (ScaleDirection::Up, ScaleDirection::Down) => proposal.mem.cancel(),
        (ScaleDirection::Down, ScaleDirection::Up) => proposal.cpu.cancel(),
        _ => {}
    }
}

fn step_sizes(steps: &DirectSteps, dimension: Dimension) -> (i32, i32) {
    match dimension {
        Dimension::Cpu => (steps.cpu_increase, steps.cpu_decrease),
        Dimension::Memory => (steps.mem_increase, steps.mem_decrease),
    }
}

/// Replace the heuristic delta with the fixed step, keeping the target
/// within `[min, max]`. A step that cannot move the target cancels the op.
fn override_amount(
    op: &mut ScaleOp,
    current: i32,
    bounds: DimensionBounds,
    increase: i32,
    decrease: i32,
) {
    let stepped = match op.direction {
        ScaleDirection::Up => current.saturating_add(increase),
        ScaleDirection::Down => current.saturating_sub(decrease),
        ScaleDirection::None => return,
    };
    let target = stepped.max(bounds.min).min(bounds.max);
    let amount = target - current;
    let moves = match op.direction {
        ScaleDirection::Up => amount > 0,
        _ => amount < 0,
    };
    if moves {
        op.amount = amount;
    } else {
        op.cancel();
    }
}
