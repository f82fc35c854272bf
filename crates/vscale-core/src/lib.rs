//! vscale-core: shared model, configuration and errors.
//!
//! Every other vscale crate depends on this one. It holds no behaviour
//! beyond validation: the rule engine lives in `vscale-autoscale`, the
//! provider gateway in `vscale-provider`.

pub mod config;
pub mod error;
pub mod types;

pub use config::ScalerConfig;
pub use error::{ScaleError, ScaleResult};
pub use types::*;
