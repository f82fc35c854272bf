//! vscale-provider: the cloud side of the autoscaler.
//!
//! Discovers the servers or clusters to manage, validates resize targets
//! against the account contract and applies them.
//!
//! # Architecture
//!
//! ```text
//! Provider (gateway)
//!   ├── connect()              → fetch_contract(), cached read-only
//!   ├── list_scaled_objects()  → static ids | datacenter listing + name regex | cluster listing + name regex
//!   └── apply_proposal()       → target = current + amount
//!                                 → validate_target(contract)
//!                                 → resize() unless dry-run
//!
//! ProviderBackend (trait)
//!   └── IonosBackend → Cloud API v6 + DBaaS Postgres API
//! ```

pub mod backend;
pub mod discovery;
pub mod gateway;
pub mod ionos;

pub use backend::ProviderBackend;
pub use discovery::Discovery;
pub use gateway::{ApplyOutcome, Provider, validate_target};
pub use ionos::IonosBackend;
