//! Node identification and role types.
//!
//! A local network is a set of nodes, each playing exactly one [`NodeRole`].
//! Nodes are addressed by a [`NodeId`] that is unique within its network and
//! doubles as the stem of container, volume and routing names, so it is kept
//! to a conservative character set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StateError;

/// Identifier of a node, unique within one network.
///
/// Identifiers start with a lowercase letter or digit and continue with
/// lowercase letters, digits, `-` or `_`.
///
/// # Examples
///
/// ```
/// use localnet_core::node::{NodeId, NodeRole};
///
/// let id = NodeId::parse("seed-0").unwrap();
/// assert_eq!(id, NodeId::for_role(NodeRole::Seed, 0));
/// assert!(NodeId::parse("Seed 0").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parses and validates an identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, StateError> {
        let value = value.into();
        validate_identifier(&value)?;
        Ok(Self(value))
    }

    /// Returns the default identifier of the `index`-th node of `role`.
    pub fn for_role(role: NodeRole, index: u16) -> Self {
        Self(format!("{}-{}", role.slug(), index))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl FromStr for NodeId {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Checks that `value` is usable as a node or network identifier.
pub fn validate_identifier(value: &str) -> Result<(), StateError> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(StateError::invalid_identifier(value, "must not be empty"));
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(StateError::invalid_identifier(
            value,
            "must start with a lowercase letter or digit",
        ));
    }
    let allowed = |c: &char| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_';
    if let Some(bad) = chars.find(|c| !allowed(c)) {
        return Err(StateError::invalid_identifier(
            value,
            format!("unexpected character {bad:?}"),
        ));
    }
    if value.len() > 63 {
        return Err(StateError::invalid_identifier(value, "longer than 63 characters"));
    }
    Ok(())
}

/// Role a node plays in the network.
///
/// The role determines the node's default port block, the flags its process
/// is launched with, and which key material it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    /// Bootstrap peer every other daemon connects to.
    #[serde(rename = "seed")]
    Seed,
    /// Block producer holding the large stake tier.
    #[serde(rename = "whale", alias = "whale-block-producer")]
    WhaleBlockProducer,
    /// Block producer holding the small stake tier.
    #[serde(rename = "fish", alias = "fish-block-producer")]
    FishBlockProducer,
    /// Daemon that neither seeds nor produces blocks.
    #[serde(rename = "node", alias = "plain-node")]
    PlainNode,
    /// Daemon that coordinates snark work and sells it at a fee.
    #[serde(rename = "snark-coordinator")]
    SnarkCoordinator,
    /// Internal proving process attached to a coordinator.
    #[serde(rename = "snark-worker")]
    SnarkWorker,
    /// Daemon that forwards blocks to an archive process.
    #[serde(rename = "archive")]
    Archive,
}

impl NodeRole {
    /// Every role, in the order nodes are listed in reports.
    pub const ALL: [NodeRole; 7] = [
        NodeRole::Seed,
        NodeRole::WhaleBlockProducer,
        NodeRole::FishBlockProducer,
        NodeRole::PlainNode,
        NodeRole::SnarkCoordinator,
        NodeRole::SnarkWorker,
        NodeRole::Archive,
    ];

    /// Short name used in identifiers and topology documents.
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::WhaleBlockProducer => "whale",
            Self::FishBlockProducer => "fish",
            Self::PlainNode => "node",
            Self::SnarkCoordinator => "snark-coordinator",
            Self::SnarkWorker => "snark-worker",
            Self::Archive => "archive",
        }
    }

    /// Returns true for roles that run the full daemon.
    pub const fn is_daemon(self) -> bool {
        !matches!(self, Self::SnarkWorker)
    }

    /// Returns true for block producers of either stake tier.
    pub const fn is_block_producer(self) -> bool {
        matches!(self, Self::WhaleBlockProducer | Self::FishBlockProducer)
    }

    /// Returns true for roles that sign with their own account key.
    pub const fn needs_signing_key(self) -> bool {
        matches!(
            self,
            Self::WhaleBlockProducer | Self::FishBlockProducer | Self::SnarkCoordinator
        )
    }

    /// Returns true for roles that serve the GraphQL query endpoint.
    pub const fn exposes_query_endpoint(self) -> bool {
        self.is_daemon()
    }

    /// Returns true for roles that bootstrap from the seeds.
    pub const fn needs_peers(self) -> bool {
        self.is_daemon() && !matches!(self, Self::Seed)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for NodeRole {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.slug() == s)
            .ok_or_else(|| StateError::UnknownRole(s.to_string()))
    }
}
