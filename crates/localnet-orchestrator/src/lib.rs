//! Provisioning and lifecycle control for local multi-node test networks.
//!
//! This crate turns a declarative topology (how many seeds, block producers,
//! snark coordinators and workers, archive nodes) into a running network of
//! containers on one host, and keeps enough state on disk to stop, restart,
//! reset and delete it across invocations.
//!
//! # Overview
//!
//! A `create` runs the pipeline once and persists its output:
//!
//! ```text
//! TopologySpec --plan--> ports, node ids, dependencies, start order
//!              --keys--> signing and network-identity keypairs
//!              --genesis--> funded ledger
//!              --render--> docker-compose.yaml + nginx.conf
//!              --store--> network.json (the NetworkRecord)
//! ```
//!
//! Every later command reads the [`NetworkRecord`] back, re-renders the
//! deployment from it and drives a [`ContainerRuntime`] service by service.
//!
//! # Architecture
//!
//! - [`ports`]: deterministic per-role port blocks and conflict detection
//! - [`keys`]: key material layout, delegated generation, cleanup
//! - [`genesis`]: ledger construction, reset and timestamp touch
//! - [`topology`]: topology documents and their resolution into records
//! - [`deploy`]: compose and reverse-proxy descriptors rendered from a record
//! - [`store`]: per-network directories, atomic writes, advisory locks
//! - [`runtime`]: the container engine seam and its Docker implementation
//! - [`lifecycle`]: the [`Controller`] implementing every operator command
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use localnet_core::NodeRole;
//! use localnet_orchestrator::{
//!     Controller, CreateOptions, DockerKeyGenerator, DockerRuntime, KeyMaterialManager,
//!     NetworkDefaults, NetworkStore, PostgresConfig, TopologySpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let defaults = NetworkDefaults::default();
//!     let runtime = DockerRuntime::connect().await?;
//!     let generator = DockerKeyGenerator::new(
//!         runtime.client(),
//!         defaults.images.daemon.clone(),
//!         defaults.signing_key_passphrase.clone(),
//!         defaults.peer_key_passphrase.clone(),
//!     );
//!     let controller = Controller::new(
//!         Arc::new(runtime),
//!         KeyMaterialManager::new(Arc::new(generator)),
//!         NetworkStore::new("/tmp/localnet"),
//!         defaults,
//!         PostgresConfig::from_env()?,
//!     );
//!
//!     let spec = TopologySpec::builder()
//!         .group(NodeRole::Seed, 1)
//!         .group(NodeRole::WhaleBlockProducer, 2)
//!         .group(NodeRole::FishBlockProducer, 1)
//!         .build();
//!     controller.create("default", &spec, &CreateOptions::default()).await?;
//!     controller.start("default", None).await?;
//!     Ok(())
//! }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod deploy;
pub mod error;
pub mod genesis;
pub mod keys;
pub mod lifecycle;
pub mod ports;
pub mod record;
pub mod runtime;
pub mod store;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at the crate root
pub use config::{NetworkDefaults, PostgresConfig};
pub use error::{OrchestratorError, Result};
pub use genesis::GenesisLedger;
pub use keys::{DockerKeyGenerator, KeyGenerator, KeyMaterialManager};
pub use lifecycle::{
    list_networks, Controller, CreateOptions, NetworkInfo, NetworkStatus, NetworkSummary, NodeStartOptions,
    ResetMode,
};
pub use record::NetworkRecord;
pub use runtime::{ContainerRuntime, DockerRuntime, ServiceStatus};
pub use store::NetworkStore;
pub use topology::{TopologyResolver, TopologySpec};
