//! Port allocation.
//!
//! Every node owns a block of five consecutive ports starting at its base
//! port: client, REST/GraphQL, external (peer-to-peer), metrics and libp2p
//! metrics. The `n`-th node of a role gets `role_base + 5n` unless the
//! topology pins an explicit base. Allocation is a pure function of the
//! topology, so resolving the same input twice yields the same ports.

use std::collections::BTreeMap;

use localnet_core::{NodeId, NodeRole};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RolePorts;
use crate::error::{OrchestratorError, Result};

/// Number of ports in a node's block.
pub const BLOCK_SIZE: u16 = 5;

/// A node's five-port block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortBlock {
    base: u16,
}

impl PortBlock {
    /// Creates a block starting at `base`, or `None` if it would run past
    /// port 65535.
    pub fn new(base: u16) -> Option<Self> {
        base.checked_add(BLOCK_SIZE - 1).map(|_| Self { base })
    }

    pub fn base(self) -> u16 {
        self.base
    }

    pub fn client(self) -> u16 {
        self.base
    }

    pub fn rest(self) -> u16 {
        self.base + 1
    }

    pub fn external(self) -> u16 {
        self.base + 2
    }

    pub fn metrics(self) -> u16 {
        self.base + 3
    }

    pub fn libp2p_metrics(self) -> u16 {
        self.base + 4
    }

    /// Last port of the block.
    pub fn last(self) -> u16 {
        self.base + BLOCK_SIZE - 1
    }

    /// Returns true if `port` lies inside the block.
    pub fn contains(self, port: u16) -> bool {
        (self.base..=self.last()).contains(&port)
    }

    /// Returns true if the two blocks share at least one port.
    pub fn overlaps(self, other: PortBlock) -> bool {
        self.base <= other.last() && other.base <= self.last()
    }
}

/// One node's allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRequest {
    pub node: NodeId,
    pub role: NodeRole,
    /// Position of the node among nodes of its role.
    pub index: u16,
    /// Explicit base port from the topology, if any.
    pub base_override: Option<u16>,
}

/// A single port reserved for something other than a node block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedPort {
    pub owner: String,
    pub port: u16,
}

/// Assigns port blocks from per-role bases.
#[derive(Debug, Clone)]
pub struct PortAllocator<'a> {
    ports: &'a RolePorts,
}

impl<'a> PortAllocator<'a> {
    pub fn new(ports: &'a RolePorts) -> Self {
        Self { ports }
    }

    /// Computes the block of one node.
    pub fn allocate(&self, role: NodeRole, index: u16, base_override: Option<u16>) -> Result<PortBlock> {
        let base = match base_override {
            Some(base) => Some(base),
            None => index
                .checked_mul(BLOCK_SIZE)
                .and_then(|offset| self.ports.base_for(role).checked_add(offset)),
        };
        base.and_then(PortBlock::new).ok_or_else(|| {
            OrchestratorError::invalid_topology(format!(
                "{role} node #{index} does not fit below port 65535"
            ))
        })
    }

    /// Allocates every requested node and checks that no two blocks, and no
    /// block and reserved port, intersect.
    pub fn allocate_all(
        &self,
        requests: &[PortRequest],
        reserved: &[ReservedPort],
    ) -> Result<BTreeMap<NodeId, PortBlock>> {
        let mut blocks = BTreeMap::new();
        for request in requests {
            let block = self.allocate(request.role, request.index, request.base_override)?;
            debug!(node = %request.node, base = block.base(), "Allocated port block");
            blocks.insert(request.node.clone(), block);
        }
        check_disjoint(&blocks, reserved)?;
        Ok(blocks)
    }
}

/// Fails with `PortConflict` naming the first colliding pair.
pub fn check_disjoint(blocks: &BTreeMap<NodeId, PortBlock>, reserved: &[ReservedPort]) -> Result<()> {
    let mut sorted: Vec<(&NodeId, PortBlock)> = blocks.iter().map(|(id, b)| (id, *b)).collect();
    sorted.sort_by_key(|(id, block)| (block.base(), (*id).clone()));

    for pair in sorted.windows(2) {
        let (first, a) = pair[0];
        let (second, b) = pair[1];
        if a.overlaps(b) {
            return Err(OrchestratorError::port_conflict(
                first.as_str(),
                second.as_str(),
                b.base(),
            ));
        }
    }

    for (index, reserved_port) in reserved.iter().enumerate() {
        if let Some((id, _)) = sorted.iter().find(|(_, block)| block.contains(reserved_port.port)) {
            return Err(OrchestratorError::port_conflict(
                id.as_str(),
                reserved_port.owner.as_str(),
                reserved_port.port,
            ));
        }
        if let Some(other) = reserved[..index].iter().find(|r| r.port == reserved_port.port) {
            return Err(OrchestratorError::port_conflict(
                other.owner.as_str(),
                reserved_port.owner.as_str(),
                reserved_port.port,
            ));
        }
    }

    Ok(())
}
