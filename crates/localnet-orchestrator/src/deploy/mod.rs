//! Deployment descriptor generation.
//!
//! [`render`] turns a [`NetworkRecord`] into the two documents the runtime
//! consumes: a compose document with one service per node (plus the archive
//! process and the reverse proxy when needed) and the proxy's routing file.
//! Rendering is a pure function of the record and a directory path; calling
//! it repeatedly yields byte-identical output.

mod compose;
mod routing;

pub use compose::{
    ComposeDocument, ComposeNetwork, ComposeService, ComposeVolume, CONFIG_DIRECTORY,
    PRECOMPUTED_BLOCKS_FILE,
};
pub use routing::{ProxyConfig, ProxyLocation};

use std::path::Path;

use localnet_core::NodeId;

use crate::error::{OrchestratorError, Result};
use crate::record::NetworkRecord;

/// File name of the compose document inside a network directory.
pub const COMPOSE_FILE: &str = "docker-compose.yaml";

/// File name of the routing document inside a network directory.
pub const ROUTING_FILE: &str = "nginx.conf";

/// Service name of the reverse proxy.
pub const PROXY_SERVICE: &str = "proxy";

/// The rendered deployment of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDeployment {
    pub compose: ComposeDocument,
    pub routing: ProxyConfig,
}

impl RenderedDeployment {
    /// Serializes the compose document.
    pub fn compose_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.compose)?)
    }

    /// Serializes the routing document.
    pub fn routing_conf(&self) -> String {
        self.routing.to_string()
    }

    /// Services that make up node `id`, in start order: the archive process
    /// (if any) before the node itself.
    pub fn services_for(&self, record: &NetworkRecord, id: &NodeId) -> Vec<&ComposeService> {
        let mut services = Vec::new();
        if record.archive.as_ref().is_some_and(|a| &a.node == id) {
            services.extend(self.compose.services.get(&record.archive_service(id)));
        }
        services.extend(self.compose.services.get(id.as_str()));
        services
    }

    /// The reverse proxy service, if the network routes anything.
    pub fn proxy(&self) -> Option<&ComposeService> {
        self.compose.services.get(PROXY_SERVICE)
    }

    /// Named volumes across every service.
    pub fn volumes(&self) -> Vec<String> {
        self.compose.volumes.values().map(|v| v.name.clone()).collect()
    }

    /// Container names across every service.
    pub fn containers(&self) -> Vec<String> {
        self.compose
            .services
            .values()
            .map(|s| s.container_name.clone())
            .collect()
    }
}

/// Renders the deployment of `record` with host paths rooted at
/// `network_dir`.
///
/// Fails with `InvalidTopology` if a routing rule points at a host that no
/// rendered service provides, or if the record is internally inconsistent.
pub fn render(record: &NetworkRecord, network_dir: &Path) -> Result<RenderedDeployment> {
    let compose = compose::build_document(record, network_dir)?;

    for rule in &record.routing {
        let Some(service) = compose.service_by_container(&rule.upstream_host) else {
            return Err(OrchestratorError::invalid_topology(format!(
                "route {} targets {} which is not a service",
                rule.public_path_prefix, rule.upstream_host
            )));
        };
        let exposes_port = service.ports.iter().any(|p| publishes(p, rule.upstream_port));
        if !exposes_port {
            return Err(OrchestratorError::invalid_topology(format!(
                "route {} targets port {} which {} does not expose",
                rule.public_path_prefix, rule.upstream_port, rule.upstream_host
            )));
        }
    }

    let routing = ProxyConfig::from_rules(&record.name, &record.routing);
    Ok(RenderedDeployment { compose, routing })
}

/// Returns true if the compose port entry publishes container port `port`.
fn publishes(entry: &str, port: u16) -> bool {
    let container_side = entry.rsplit(':').next().unwrap_or(entry);
    match container_side.split_once('-') {
        Some((first, last)) => match (first.parse::<u16>(), last.parse::<u16>()) {
            (Ok(first), Ok(last)) => (first..=last).contains(&port),
            _ => false,
        },
        None => container_side.parse::<u16>() == Ok(port),
    }
}
