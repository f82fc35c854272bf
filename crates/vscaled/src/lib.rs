//! vscaled library surface: collaborator assembly and the metrics router.

pub mod assemble;
pub mod http;

pub use assemble::{build_autoscaler, load_config};
pub use http::build_router;
