//! Localnet Core - shared identifiers and lifecycle rules for local test networks.
//!
//! This crate holds the small set of types every other localnet crate agrees on:
//!
//! - [`node`]: node identifiers (`NodeId`) and the node role catalogue (`NodeRole`)
//! - [`state`]: per-node and per-network run states and their transition rules
//! - [`error`]: error type for identifier parsing and illegal transitions
//!
//! # Example
//!
//! ```
//! use localnet_core::{NetworkState, NodeId, NodeRole, NodeState};
//!
//! let id = NodeId::for_role(NodeRole::WhaleBlockProducer, 1);
//! assert_eq!(id.as_str(), "whale-1");
//!
//! let state = NodeState::Created.transition(NodeState::Running).unwrap();
//! assert_eq!(state, NodeState::Running);
//!
//! let network = NetworkState::rollup([NodeState::Running, NodeState::Stopped]);
//! assert_eq!(network, NetworkState::Degraded);
//! ```

pub mod error;
pub mod node;
pub mod state;

pub use error::StateError;
pub use node::{NodeId, NodeRole};
pub use state::{NetworkState, NodeState};
