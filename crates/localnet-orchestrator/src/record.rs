//! The persisted network aggregate.
//!
//! A [`NetworkRecord`] owns everything needed to operate a network after it
//! was created: the topology it was created from, one fully resolved
//! [`NodeIdentity`] per node, the genesis ledger, the routing rules and the
//! current lifecycle state. Every command after `create` starts by reading it
//! back from the store.

use chrono::{DateTime, Utc};
use localnet_core::{NetworkState, NodeId, NodeRole, NodeState};
use serde::{Deserialize, Serialize};

use crate::genesis::{Account, GenesisLedger};
use crate::keys::KeyRef;
use crate::ports::PortBlock;
use crate::topology::TopologySpec;

/// Fully resolved configuration of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub role: NodeRole,
    #[serde(rename = "base_port")]
    pub ports: PortBlock,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_keypair_ref: Option<KeyRef>,
    pub peer_keypair_ref: KeyRef,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Nodes whose services must be up before this one starts.
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    /// Coordinator a snark worker pulls work from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<NodeId>,
    pub state: NodeState,
}

impl NodeIdentity {
    /// Base port of the node's block.
    pub fn base_port(&self) -> u16 {
        self.ports.base()
    }

    /// Signing public key, if the node has one.
    pub fn public_key(&self) -> Option<&str> {
        self.signing_keypair_ref.as_ref().map(|k| k.public_key.as_str())
    }

    /// Peer id derived from the node's network identity.
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_keypair_ref.peer_id.as_deref()
    }
}

/// Reverse-proxy mapping from a public path to a node's query port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub public_path_prefix: String,
    pub upstream_host: String,
    pub upstream_port: u16,
}

/// The archive process backing an archive node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProcess {
    /// Archive node the process serves.
    pub node: NodeId,
    pub server_port: u16,
    pub image: String,
    pub postgres_uri: String,
}

/// Network-level settings fixed at create time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub signing_key_passphrase: String,
    pub peer_key_passphrase: String,
    pub client_trustlist: String,
    pub snark_worker_fee: String,
    pub proof_level: String,
    pub log_level: String,
    pub proxy_image: String,
    pub proxy_port: u16,
}

/// Top-level persisted aggregate of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub name: String,
    /// The topology document the network was created from.
    pub spec: TopologySpec,
    /// Nodes in resolution order.
    pub topology: Vec<NodeIdentity>,
    /// Service start order; stop order is its reverse.
    pub start_order: Vec<NodeId>,
    /// Unstaked accounts paying zkApp fees.
    #[serde(default)]
    pub fee_payers: Vec<KeyRef>,
    /// Accounts taken from an operator-supplied ledger.
    #[serde(default)]
    pub imported_accounts: Vec<Account>,
    pub genesis: GenesisLedger,
    pub routing: Vec<RoutingRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveProcess>,
    pub settings: NetworkSettings,
    pub state: NetworkState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NetworkRecord {
    /// Returns the node with `id`.
    pub fn node(&self, id: &NodeId) -> Option<&NodeIdentity> {
        self.topology.iter().find(|n| &n.id == id)
    }

    /// Returns the node with `id` for mutation.
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeIdentity> {
        self.topology.iter_mut().find(|n| &n.id == id)
    }

    /// Iterates the nodes of `role` in resolution order.
    pub fn nodes_by_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeIdentity> {
        self.topology.iter().filter(move |n| n.role == role)
    }

    /// Container name of a service of this network. Unique per host because
    /// network names are unique per store.
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", service, self.name)
    }

    /// Name of the bridge network every service joins.
    pub fn bridge_network(&self) -> String {
        format!("{}-net", self.name)
    }

    /// Named volume holding a node's daemon config directory.
    pub fn config_volume(&self, id: &NodeId) -> String {
        format!("{}-{}-config", id, self.name)
    }

    /// Service name of the archive process serving `node`.
    pub fn archive_service(&self, node: &NodeId) -> String {
        archive_process_name(node)
    }

    /// Recomputes the network state from the node states.
    pub fn refresh_state(&mut self) {
        self.state = NetworkState::rollup(self.topology.iter().map(|n| n.state));
        self.updated_at = Utc::now();
    }
}

/// Service name of the archive process serving the archive node `node`.
pub fn archive_process_name(node: &NodeId) -> String {
    format!("{node}-process")
}
