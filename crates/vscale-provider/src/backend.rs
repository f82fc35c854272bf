//! The cloud API seam used by the [`Provider`](crate::Provider) gateway.

use async_trait::async_trait;

use vscale_core::{Cluster, Contract, ResizeTarget, ScaleResult, ScaledObject, Server};

/// Raw cloud operations. Implementations translate transport and API
/// failures into [`ScaleError::Backend`](vscale_core::ScaleError::Backend).
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Account limits for the configured contract.
    async fn fetch_contract(&self) -> ScaleResult<Contract>;

    async fn list_servers(&self, datacenter_id: &str) -> ScaleResult<Vec<Server>>;

    /// `Ok(None)` when the server does not exist.
    async fn get_server(&self, datacenter_id: &str, server_id: &str)
    -> ScaleResult<Option<Server>>;

    /// Clusters, optionally narrowed server-side by display name.
    async fn list_clusters(&self, filter_name: Option<&str>) -> ScaleResult<Vec<Cluster>>;

    /// Set both dimensions of `object` in one call.
    async fn resize(&self, object: &ScaledObject, target: ResizeTarget) -> ScaleResult<()>;
}
