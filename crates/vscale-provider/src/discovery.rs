//! Object sources: which servers or clusters the scaler manages.

use regex::Regex;

use vscale_core::config::{IonosConfig, StaticServer};
use vscale_core::{ScaleError, ScaleResult};

/// Compiled form of the configured object source.
#[derive(Debug, Clone)]
pub enum Discovery {
    /// An explicit list of servers, each of which must exist.
    StaticServers(Vec<StaticServer>),
    /// Every server in the listed datacenters whose name matches.
    DynamicServers {
        datacenter_ids: Vec<String>,
        name_pattern: Regex,
    },
    /// Every cluster whose name matches, after the optional server-side filter.
    Clusters {
        filter_name: Option<String>,
        name_pattern: Regex,
    },
}

impl Discovery {
    pub fn from_config(config: &IonosConfig) -> ScaleResult<Self> {
        if let Some(source) = &config.server_source {
            if let Some(servers) = &source.static_servers {
                return Ok(Discovery::StaticServers(servers.clone()));
            }
            if let Some(dynamic) = &source.dynamic {
                return Ok(Discovery::DynamicServers {
                    datacenter_ids: dynamic.datacenter_ids.clone(),
                    name_pattern: compile(&dynamic.server_name_regex)?,
                });
            }
        }
        if let Some(source) = &config.cluster_source {
            return Ok(Discovery::Clusters {
                filter_name: source.cluster_filter_name.clone(),
                name_pattern: compile(&source.cluster_name_regex)?,
            });
        }
        Err(ScaleError::Config("no scaled object source provided".into()))
    }
}

fn compile(pattern: &str) -> ScaleResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| ScaleError::Config(format!("invalid name regex {pattern:?}: {e}")))
}
