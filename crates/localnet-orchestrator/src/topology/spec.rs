//! Topology documents.
//!
//! A topology lists role groups (role, count, optional image and per-node
//! overrides) and the transaction workloads the network should support. It is
//! read once at create time and stored verbatim in the network record.
//!
//! ```json
//! {
//!   "groups": [
//!     { "role": "seed", "count": 1 },
//!     { "role": "whale", "count": 2 },
//!     { "role": "fish", "count": 1, "overrides": { "0": { "base_port": 5100 } } }
//!   ],
//!   "transactions": { "value_transfers": true }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use localnet_core::NodeRole;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Declarative description of one network's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpec {
    /// Role groups in declaration order.
    pub groups: Vec<RoleGroup>,

    /// Transaction workloads the network must be able to carry.
    #[serde(default)]
    pub transactions: TransactionConfig,

    /// Fee snark coordinators charge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snark_worker_fee: Option<String>,

    /// Proof level for snark workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_level: Option<String>,
}

/// A number of nodes sharing one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGroup {
    pub role: NodeRole,
    pub count: u16,

    /// Daemon image for this group instead of the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Per-node overrides keyed by the node's index within the group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<u16, NodeOverride>,
}

/// Overrides for a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeOverride {
    /// Node id instead of `<role>-<index>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Explicit base port instead of the role default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,

    /// Arguments appended to the node's command line.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

/// Transaction workloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Periodic value transfers between producers.
    pub value_transfers: bool,
    /// zkApp transactions.
    pub zkapps: bool,
    /// Extra funded accounts paying zkApp fees.
    pub zkapp_fee_payers: u16,
}

impl TopologySpec {
    /// Creates a builder.
    pub fn builder() -> TopologySpecBuilder {
        TopologySpecBuilder::default()
    }

    /// Reads a topology document from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::invalid_topology(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::invalid_topology(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Total number of nodes of `role` across groups.
    pub fn count_of(&self, role: NodeRole) -> usize {
        self.groups
            .iter()
            .filter(|g| g.role == role)
            .map(|g| g.count as usize)
            .sum()
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.groups.iter().map(|g| g.count as usize).sum()
    }
}

/// Builder for [`TopologySpec`].
#[derive(Debug, Default)]
pub struct TopologySpecBuilder {
    spec: TopologySpec,
}

impl TopologySpecBuilder {
    /// Adds a group of `count` nodes of `role`.
    pub fn group(mut self, role: NodeRole, count: u16) -> Self {
        self.spec.groups.push(RoleGroup {
            role,
            count,
            image: None,
            overrides: BTreeMap::new(),
        });
        self
    }

    /// Sets the image of the most recently added group.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        if let Some(group) = self.spec.groups.last_mut() {
            group.image = Some(image.into());
        }
        self
    }

    /// Adds an override to the most recently added group.
    pub fn override_node(mut self, index: u16, node: NodeOverride) -> Self {
        if let Some(group) = self.spec.groups.last_mut() {
            group.overrides.insert(index, node);
        }
        self
    }

    /// Requests periodic value transfers.
    pub fn value_transfers(mut self, enabled: bool) -> Self {
        self.spec.transactions.value_transfers = enabled;
        self
    }

    /// Requests zkApp transactions with `fee_payers` extra fee-payer accounts.
    pub fn zkapps(mut self, enabled: bool, fee_payers: u16) -> Self {
        self.spec.transactions.zkapps = enabled;
        self.spec.transactions.zkapp_fee_payers = fee_payers;
        self
    }

    /// Sets the snark worker fee.
    pub fn snark_worker_fee(mut self, fee: impl Into<String>) -> Self {
        self.spec.snark_worker_fee = Some(fee.into());
        self
    }

    /// Builds the topology.
    pub fn build(self) -> TopologySpec {
        self.spec
    }
}
