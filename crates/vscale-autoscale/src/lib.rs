//! vscale-autoscale: vertical scaling decisions and the control loop.
//!
//! Measures the cpu and memory usage of every managed server or cluster,
//! decides a per-dimension step with a fixed rule set, reconciles the two
//! dimensions, and hands the result to the provider gateway.
//!
//! # Scaling Algorithm
//!
//! ```text
//! per dimension (cores or memory):
//!   current < min                        → Up   min - current
//!   usage > max_usage, current < max     → Up   min(current + ceil((usage - max_usage) * current / usage), max) - current
//!   activity == 0, current > min         → Down min - current                  (session load)
//!   current > max                        → Down max - current                  (symmetric)
//!   usage < min_usage, current > min     → Down max(current - ceil(...), min) - current (symmetric)
//!
//! per object:
//!   cpu Up + mem Down (or mirror)        → the Down side becomes None
//!   direct mode                          → amounts replaced by fixed steps
//! ```
//!
//! # Cycle
//!
//! ```text
//! list_scaled_objects() ──► spawn CapacitySnapshot (detached copy)
//!        │
//!        └── for each ready object:
//!              usage(cpu), usage(memory), activity?
//!              decide() → resolve() → apply_proposal()
//! sleep(cycle_time) or shutdown
//! ```

pub mod resolve;
pub mod rules;
pub mod scaler;

pub use resolve::resolve;
pub use rules::RuleSet;
pub use scaler::{Autoscaler, CycleReport};
