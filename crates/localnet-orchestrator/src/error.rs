//! Error types for the orchestrator crate.
//!
//! Every failure a lifecycle command can end with is one variant here. All of
//! them are terminal for the invoking command; nothing is retried internally.

use std::path::PathBuf;

use localnet_core::StateError;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while resolving, persisting or operating a network.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A structural precondition on the topology is not met.
    #[error("invalid topology: {reason}")]
    InvalidTopology {
        /// The unmet precondition.
        reason: String,
    },

    /// Two port blocks (or a block and a reserved port) intersect.
    #[error("port conflict: {first} and {second} both claim port {port}")]
    PortConflict {
        /// The node or service holding the lower block.
        first: String,
        /// The node or service whose block collides with it.
        second: String,
        /// The first port claimed by both.
        port: u16,
    },

    /// A network with this name is already persisted.
    #[error("network already exists: {0}")]
    AlreadyExists(String),

    /// No network with this name is persisted.
    #[error("network not found: {0}")]
    NotFound(String),

    /// The network has no node with this id.
    #[error("node {node} not found in network {network}")]
    NodeNotFound {
        /// The network that was searched.
        network: String,
        /// The missing node id.
        node: String,
    },

    /// A timestamp update targeted an artifact that does not exist.
    #[error("config not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The network is running and must be stopped first.
    #[error("network {network} is busy ({state}); stop it first")]
    NetworkBusy {
        /// The busy network.
        network: String,
        /// Its current state.
        state: String,
    },

    /// The container runtime reported a failure.
    #[error("runtime failure for {service}: {reason}")]
    RuntimeFailure {
        /// The service the runtime was acting on.
        service: String,
        /// The collaborator's message.
        reason: String,
    },

    /// The lifecycle rules reject the requested state change.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The starting state.
        from: String,
        /// The target state.
        to: String,
    },

    /// Key generation produced no usable key.
    #[error("key generation failed for {name}: {reason}")]
    KeyGeneration {
        /// The key being generated.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// Another invocation holds the network lock.
    #[error("could not lock network {network}: {reason}")]
    Lock {
        /// The network being locked.
        network: String,
        /// Why the lock could not be taken.
        reason: String,
    },

    /// Invalid configuration values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Creates an invalid topology error.
    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopology {
            reason: reason.into(),
        }
    }

    /// Creates a port conflict error.
    pub fn port_conflict(first: impl Into<String>, second: impl Into<String>, port: u16) -> Self {
        Self::PortConflict {
            first: first.into(),
            second: second.into(),
            port,
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(network: impl Into<String>) -> Self {
        Self::AlreadyExists(network.into())
    }

    /// Creates a not found error.
    pub fn not_found(network: impl Into<String>) -> Self {
        Self::NotFound(network.into())
    }

    /// Creates a node not found error.
    pub fn node_not_found(network: impl Into<String>, node: impl Into<String>) -> Self {
        Self::NodeNotFound {
            network: network.into(),
            node: node.into(),
        }
    }

    /// Creates a network busy error.
    pub fn network_busy(network: impl Into<String>, state: impl ToString) -> Self {
        Self::NetworkBusy {
            network: network.into(),
            state: state.to_string(),
        }
    }

    /// Creates a runtime failure error.
    pub fn runtime_failure(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::RuntimeFailure {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a key generation error.
    pub fn key_generation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyGeneration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a lock error.
    pub fn lock(network: impl Into<String>, reason: impl ToString) -> Self {
        Self::Lock {
            network: network.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Returns true if the error names something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::NodeNotFound { .. } | Self::ConfigNotFound(_)
        )
    }

    /// Returns true if the error was caused by the request rather than by the
    /// environment, so re-running the same command cannot succeed.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopology { .. }
                | Self::PortConflict { .. }
                | Self::AlreadyExists(_)
                | Self::NotFound(_)
                | Self::NodeNotFound { .. }
                | Self::NetworkBusy { .. }
                | Self::InvalidStateTransition { .. }
                | Self::Configuration(_)
        )
    }
}

impl From<StateError> for OrchestratorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InvalidTransition { from, to } => Self::InvalidStateTransition { from, to },
            other => Self::invalid_topology(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
