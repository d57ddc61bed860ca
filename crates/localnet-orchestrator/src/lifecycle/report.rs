//! Read-only views returned by the controller.
//!
//! These are what the CLI prints. They are derived from the record (plus
//! runtime liveness where noted) and never written back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use localnet_core::{NetworkState, NodeId, NodeRole, NodeState};
use serde::{Deserialize, Serialize};

use crate::deploy::{COMPOSE_FILE, ROUTING_FILE};
use crate::genesis::GENESIS_FILE;
use crate::ports::PortBlock;
use crate::record::{NetworkRecord, NodeIdentity};
use crate::runtime::ServiceStatus;
use crate::store::RECORD_FILE;

/// One line of `network list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub name: String,
    pub state: NetworkState,
    pub nodes: usize,
    pub directory: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl NetworkSummary {
    pub(crate) fn new(record: &NetworkRecord, directory: PathBuf) -> Self {
        Self {
            name: record.name.clone(),
            state: record.state,
            nodes: record.topology.len(),
            directory,
            created_at: record.created_at,
        }
    }
}

/// Liveness of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub container: String,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

/// Recorded state and runtime liveness of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub role: NodeRole,
    pub state: NodeState,
    pub services: Vec<ServiceReport>,
}

impl NodeStatus {
    /// Returns true if every service of the node is running.
    pub fn is_live(&self) -> bool {
        !self.services.is_empty() && self.services.iter().all(|s| s.status.is_running())
    }
}

/// Output of `network status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub name: String,
    pub state: NetworkState,
    pub nodes: Vec<NodeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ServiceReport>,
}

/// Ports of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReport {
    pub client: u16,
    pub rest: u16,
    pub external: u16,
    pub metrics: u16,
    pub libp2p_metrics: u16,
}

impl From<PortBlock> for PortReport {
    fn from(block: PortBlock) -> Self {
        Self {
            client: block.client(),
            rest: block.rest(),
            external: block.external(),
            metrics: block.metrics(),
            libp2p_metrics: block.libp2p_metrics(),
        }
    }
}

/// Everything an operator or test driver needs to reach one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub role: NodeRole,
    pub state: NodeState,
    pub status: ServiceStatus,
    pub container: String,
    pub ports: PortReport,
    /// Query endpoint through the reverse proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphql: Option<String>,
    /// Query endpoint on the node's own published port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_graphql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<NodeId>,
}

impl NodeInfo {
    pub(crate) fn new(record: &NetworkRecord, node: &NodeIdentity, network_dir: &Path, status: ServiceStatus) -> Self {
        let prefix = record
            .routing
            .iter()
            .find(|r| r.upstream_host == record.container_name(node.id.as_str()))
            .map(|r| r.public_path_prefix.as_str());
        Self {
            id: node.id.clone(),
            role: node.role,
            state: node.state,
            status,
            container: record.container_name(node.id.as_str()),
            ports: node.ports.into(),
            graphql: prefix.map(|p| format!("http://localhost:{}{}", record.settings.proxy_port, p)),
            direct_graphql: node
                .role
                .exposes_query_endpoint()
                .then(|| format!("http://localhost:{}/graphql", node.ports.rest())),
            public_key: node.public_key().map(str::to_string),
            private_key_path: node
                .signing_keypair_ref
                .as_ref()
                .map(|k| k.host_private_path(network_dir)),
            peer_id: node.peer_id().map(str::to_string),
            coordinator: node.coordinator.clone(),
        }
    }
}

/// A funded zkApp fee payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePayerInfo {
    pub public_key: String,
    pub private_key_path: PathBuf,
}

/// Files making up the network directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub directory: PathBuf,
    pub genesis: PathBuf,
    pub compose: PathBuf,
    pub routing: PathBuf,
    pub record: PathBuf,
}

impl ArtifactPaths {
    pub(crate) fn new(network_dir: &Path) -> Self {
        Self {
            directory: network_dir.to_path_buf(),
            genesis: network_dir.join(GENESIS_FILE),
            compose: network_dir.join(COMPOSE_FILE),
            routing: network_dir.join(ROUTING_FILE),
            record: network_dir.join(RECORD_FILE),
        }
    }
}

/// Output of `network info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub state: NetworkState,
    pub genesis_timestamp: String,
    pub nodes: Vec<NodeInfo>,
    pub fee_payers: Vec<FeePayerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_postgres_uri: Option<String>,
    pub artifacts: ArtifactPaths,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
