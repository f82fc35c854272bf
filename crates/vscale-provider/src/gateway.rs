//! Provider gateway: discovery, contract validation and resize.

use std::sync::Arc;

use tracing::{debug, info};

use vscale_core::{
    Contract, ResizeTarget, ResourceScalingProposal, ScaleError, ScaleResult, ScaledObject,
};

use crate::backend::ProviderBackend;
use crate::discovery::Discovery;

/// Result of [`Provider::apply_proposal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing to change; no backend call was made.
    Unchanged,
    /// The backend accepted the resize.
    Resized(ResizeTarget),
    /// Validated only; the resize call was skipped.
    DryRun(ResizeTarget),
}

/// Wraps a [`ProviderBackend`] with the account contract and object source.
pub struct Provider {
    backend: Arc<dyn ProviderBackend>,
    discovery: Discovery,
    contract: Contract,
    dry_run: bool,
}

impl Provider {
    /// Fetch the contract and return a ready gateway.
    ///
    /// Any failure here is fatal: without the contract no resize can be
    /// validated.
    pub async fn connect(
        backend: Arc<dyn ProviderBackend>,
        discovery: Discovery,
        dry_run: bool,
    ) -> ScaleResult<Self> {
        let contract = backend
            .fetch_contract()
            .await
            .map_err(|e| ScaleError::Config(format!("error while loading contract: {e}")))?;
        info!(
            contract = contract.contract_number,
            cores_per_server = contract.cores_per_server,
            ram_per_server = contract.ram_per_server,
            dry_run,
            "provider connected"
        );
        Ok(Self {
            backend,
            discovery,
            contract,
            dry_run,
        })
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// List the objects managed this cycle.
    pub async fn list_scaled_objects(&self) -> ScaleResult<Vec<ScaledObject>> {
        let mut objects = Vec::new();

        match &self.discovery {
            Discovery::StaticServers(servers) => {
                for s in servers {
                    let server = self
                        .backend
                        .get_server(&s.datacenter_id, &s.server_id)
                        .await
                        .map_err(|e| {
                            ScaleError::Discovery(format!(
                                "error while getting server {} in datacenter {}: {e}",
                                s.server_id, s.datacenter_id
                            ))
                        })?
                        .ok_or_else(|| {
                            ScaleError::Discovery(format!(
                                "server {} not found in datacenter {}",
                                s.server_id, s.datacenter_id
                            ))
                        })?;
                    objects.push(ScaledObject::Server(server));
                }
            }
            Discovery::DynamicServers {
                datacenter_ids,
                name_pattern,
            } => {
                for datacenter_id in datacenter_ids {
                    let servers = self.backend.list_servers(datacenter_id).await.map_err(|e| {
                        ScaleError::Discovery(format!(
                            "error while getting servers in datacenter {datacenter_id}: {e}"
                        ))
                    })?;
                    objects.extend(
                        servers
                            .into_iter()
                            .filter(|s| name_pattern.is_match(&s.name))
                            .map(ScaledObject::Server),
                    );
                }
            }
            Discovery::Clusters {
                filter_name,
                name_pattern,
            } => {
                let clusters = self
                    .backend
                    .list_clusters(filter_name.as_deref())
                    .await
                    .map_err(|e| {
                        ScaleError::Discovery(format!("error while getting clusters: {e}"))
                    })?;
                objects.extend(
                    clusters
                        .into_iter()
                        .filter(|c| name_pattern.is_match(&c.name))
                        .map(ScaledObject::Cluster),
                );
            }
        }

        debug!(count = objects.len(), "discovered scaled objects");
        Ok(objects)
    }

    /// Validate and apply a resolved proposal in a single resize call.
    pub async fn apply_proposal(
        &self,
        object: &ScaledObject,
        proposal: &ResourceScalingProposal,
    ) -> ScaleResult<ApplyOutcome> {
        if proposal.is_noop() {
            return Ok(ApplyOutcome::Unchanged);
        }

        let state = object.resource_state();
        let target = ResizeTarget {
            cores: state.cpu.current_cores + proposal.cpu.amount,
            ram: state.memory.current_bytes + proposal.mem.amount,
        };
        validate_target(object.name(), target, &self.contract)?;

        if self.dry_run {
            info!(
                object = %object.name(),
                kind = %object.kind(),
                cores = target.cores,
                ram = target.ram,
                "dry run, skipping resize"
            );
            return Ok(ApplyOutcome::DryRun(target));
        }

        self.backend.resize(object, target).await?;
        info!(
            object = %object.name(),
            kind = %object.kind(),
            cores = target.cores,
            ram = target.ram,
            "resize requested"
        );
        Ok(ApplyOutcome::Resized(target))
    }
}

/// Check a target against the per-resource ceilings of the contract.
///
/// Both limits are checked so the error names every violation.
pub fn validate_target(object: &str, target: ResizeTarget, contract: &Contract) -> ScaleResult<()> {
    let mut violations = Vec::new();
    if target.cores > contract.cores_per_server {
        violations.push(format!(
            "cores {} are above contract limit {}",
            target.cores, contract.cores_per_server
        ));
    }
    if target.ram > contract.ram_per_server {
        violations.push(format!(
            "memory {} is above contract limit {}",
            target.ram, contract.ram_per_server
        ));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ScaleError::ContractViolation {
            object: object.to_string(),
            violations: violations.join(", "),
        })
    }
}
