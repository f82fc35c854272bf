//! IONOS Cloud backend: Cloud API v6 for servers, DBaaS API for Postgres.
//!
//! Every request carries HTTP basic auth and the `X-Contract-Number`
//! header. Memory is passed through in MiB, the unit the API uses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vscale_core::config::{IonosConfig, Secret};
use vscale_core::{
    Cluster, Contract, ResizeTarget, ResourceState, ScaleError, ScaleResult, ScaledObject, Server,
};

use crate::backend::ProviderBackend;

const READY_STATE: &str = "AVAILABLE";
const RUNNING_VM_STATE: &str = "RUNNING";

pub struct IonosBackend {
    client: reqwest::Client,
    username: Secret,
    password: Secret,
    contract_id: i64,
    endpoint: String,
    dbaas_endpoint: String,
}

impl IonosBackend {
    pub fn new(config: &IonosConfig, timeout: Duration) -> ScaleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::Config(format!("cannot build ionos client: {e}")))?;
        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
            contract_id: config.contract_id,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            dbaas_endpoint: config.dbaas_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(self.username.expose(), Some(self.password.expose()))
            .header("X-Contract-Number", self.contract_id.to_string())
    }

    fn clusters_request(&self, filter_name: Option<&str>) -> RequestBuilder {
        let request = self.request(Method::GET, &format!("{}/clusters", self.dbaas_endpoint));
        match filter_name {
            Some(name) => request.query(&[("filter.name", name)]),
            None => request,
        }
    }

    /// GET and decode; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ScaleResult<Option<T>> {
        self.send_json(self.request(Method::GET, url), url).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> ScaleResult<Option<T>> {
        debug!(%url, "ionos request");
        let response = request
            .send()
            .await
            .map_err(|e| ScaleError::Backend(format!("GET {url}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, url).await?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ScaleError::Backend(format!("GET {url}: malformed response: {e}")))
    }

    async fn patch_json<B: Serialize + Sync>(&self, url: &str, body: &B) -> ScaleResult<()> {
        debug!(%url, "ionos request");
        let response = self
            .request(Method::PATCH, url)
            .json(body)
            .send()
            .await
            .map_err(|e| ScaleError::Backend(format!("PATCH {url}: {e}")))?;
        check_status(response, url).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response, url: &str) -> ScaleResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ScaleError::Backend(format!(
        "{url} returned {status}: {}",
        body.trim()
    )))
}

#[async_trait]
impl ProviderBackend for IonosBackend {
    async fn fetch_contract(&self) -> ScaleResult<Contract> {
        let url = format!("{}/contracts", self.endpoint);
        let contracts: ContractList = self
            .get_json(&url)
            .await?
            .ok_or_else(|| ScaleError::Backend(format!("{url} not found")))?;
        select_contract(contracts, self.contract_id)
    }

    async fn list_servers(&self, datacenter_id: &str) -> ScaleResult<Vec<Server>> {
        let url = format!("{}/datacenters/{datacenter_id}/servers?depth=1", self.endpoint);
        let servers: Collection<ServerResource> = self
            .get_json(&url)
            .await?
            .ok_or_else(|| ScaleError::Backend(format!("datacenter {datacenter_id} not found")))?;
        Ok(servers
            .items
            .into_iter()
            .map(|s| s.into_server(datacenter_id))
            .collect())
    }

    async fn get_server(&self, datacenter_id: &str, server_id: &str) -> ScaleResult<Option<Server>> {
        let url = format!(
            "{}/datacenters/{datacenter_id}/servers/{server_id}?depth=1",
            self.endpoint
        );
        let server: Option<ServerResource> = self.get_json(&url).await?;
        Ok(server.map(|s| s.into_server(datacenter_id)))
    }

    async fn list_clusters(&self, filter_name: Option<&str>) -> ScaleResult<Vec<Cluster>> {
        let url = format!("{}/clusters", self.dbaas_endpoint);
        let clusters: Collection<ClusterResource> = self
            .send_json(self.clusters_request(filter_name), &url)
            .await?
            .ok_or_else(|| ScaleError::Backend(format!("{url} not found")))?;
        Ok(clusters.items.into_iter().map(ClusterResource::into_cluster).collect())
    }

    async fn resize(&self, object: &ScaledObject, target: ResizeTarget) -> ScaleResult<()> {
        let size = SizeProperties {
            cores: target.cores,
            ram: target.ram,
        };
        match object {
            ScaledObject::Server(s) => {
                let url = format!(
                    "{}/datacenters/{}/servers/{}",
                    self.endpoint, s.datacenter_id, s.server_id
                );
                self.patch_json(&url, &size).await
            }
            ScaledObject::Cluster(c) => {
                let url = format!("{}/clusters/{}", self.dbaas_endpoint, c.cluster_id);
                self.patch_json(&url, &ClusterPatch { properties: size }).await
            }
        }
    }
}

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerResource {
    id: String,
    properties: ServerProperties,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerProperties {
    #[serde(default)]
    name: String,
    #[serde(default)]
    cores: i32,
    #[serde(default)]
    ram: i32,
    #[serde(default)]
    cpu_family: Option<String>,
    #[serde(default)]
    vm_state: Option<String>,
}

impl ServerResource {
    fn into_server(self, datacenter_id: &str) -> Server {
        let ready = self.properties.vm_state.as_deref() == Some(RUNNING_VM_STATE)
            && self.metadata.state.as_deref() == Some(READY_STATE);
        Server {
            datacenter_id: datacenter_id.to_string(),
            server_id: self.id,
            name: self.properties.name,
            cpu_architecture: self.properties.cpu_family.unwrap_or_default(),
            state: ResourceState::new(self.properties.cores, self.properties.ram),
            ready,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClusterResource {
    id: String,
    properties: ClusterProperties,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterProperties {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    cores: i32,
    #[serde(default)]
    ram: i32,
    #[serde(default)]
    storage_size: i32,
    #[serde(default)]
    storage_type: Option<String>,
}

impl ClusterResource {
    fn into_cluster(self) -> Cluster {
        Cluster {
            cluster_id: self.id,
            name: self.properties.display_name,
            storage_size: self.properties.storage_size,
            storage_type: self.properties.storage_type.unwrap_or_default(),
            state: ResourceState::new(self.properties.cores, self.properties.ram),
            ready: self.metadata.state.as_deref() == Some(READY_STATE),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContractList {
    #[serde(default)]
    items: Vec<ContractResource>,
}

#[derive(Debug, Deserialize)]
struct ContractResource {
    properties: ContractProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractProperties {
    contract_number: i64,
    resource_limits: ResourceLimits,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLimits {
    cores_per_server: i32,
    ram_per_server: i32,
}

fn select_contract(contracts: ContractList, contract_id: i64) -> ScaleResult<Contract> {
    contracts
        .items
        .into_iter()
        .map(|c| c.properties)
        .find(|p| p.contract_number == contract_id)
        .map(|p| Contract {
            contract_number: p.contract_number,
            cores_per_server: p.resource_limits.cores_per_server,
            ram_per_server: p.resource_limits.ram_per_server,
        })
        .ok_or_else(|| ScaleError::Config(format!("contract_id {contract_id} not found")))
}

#[derive(Debug, Serialize)]
struct SizeProperties {
    cores: i32,
    ram: i32,
}

#[derive(Debug, Serialize)]
struct ClusterPatch {
    properties: SizeProperties,
}
