//! Lifecycle state machine for nodes and networks.
//!
//! Each node moves through `Created -> Running <-> Stopped -> Deleted`. The
//! network-level state is never set directly by single-node operations; it is
//! rolled up from the node states with [`NetworkState::rollup`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StateError;

/// Run state of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Resolved and persisted, never started.
    Created,
    /// The runtime reported the node's services as started.
    Running,
    /// Stopped after having run at least once.
    Stopped,
    /// Torn down. Terminal.
    Deleted,
}

impl NodeState {
    /// Returns true if the lifecycle rules allow moving from `self` to `next`.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Created, Deleted)
                | (Stopped, Deleted)
        )
    }

    /// Moves to `next`, failing with [`StateError::InvalidTransition`] if the
    /// move is not allowed.
    pub fn transition(self, next: NodeState) -> Result<NodeState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError::invalid_transition(self, next))
        }
    }

    /// Returns true if the node is running.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Run state of a whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    /// Resolved and persisted, never started.
    Created,
    /// Every node is running.
    Running,
    /// Some, but not all, nodes are running.
    Degraded,
    /// No node is running and at least one has run before.
    Stopped,
    /// Torn down. Terminal.
    Deleted,
}

impl NetworkState {
    /// Derives the network state from its node states.
    ///
    /// All running gives `Running`, some running gives `Degraded`, none
    /// running and none ever started gives `Created`, anything else is
    /// `Stopped`. An empty node set is `Created`.
    pub fn rollup<I>(nodes: I) -> NetworkState
    where
        I: IntoIterator<Item = NodeState>,
    {
        let mut total = 0usize;
        let mut running = 0usize;
        let mut created = 0usize;
        for state in nodes {
            total += 1;
            match state {
                NodeState::Running => running += 1,
                NodeState::Created => created += 1,
                NodeState::Stopped | NodeState::Deleted => {}
            }
        }

        if total == 0 || created == total {
            NetworkState::Created
        } else if running == total {
            NetworkState::Running
        } else if running > 0 {
            NetworkState::Degraded
        } else {
            NetworkState::Stopped
        }
    }

    /// Returns true while any node may be running; delete and reset refuse
    /// to proceed in these states.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }

    /// Returns true once the network has been deleted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Checks that a start request is acceptable in this state.
    pub fn check_startable(self) -> Result<(), StateError> {
        if self.is_terminal() {
            Err(StateError::invalid_transition(self, NetworkState::Running))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Degraded => "Degraded",
            Self::Stopped => "Stopped",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}
