//! Container orchestration document.
//!
//! A typed model of the subset of the compose format this tool emits. Maps
//! are `BTreeMap`s so serialization order, and therefore the rendered file,
//! depends only on content.

use std::collections::BTreeMap;
use std::path::Path;

use localnet_core::{NodeId, NodeRole};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::genesis::GENESIS_FILE;
use crate::keys::CONTAINER_NETWORK_DIR;
use crate::record::{NetworkRecord, NodeIdentity};

/// Mount point of a node's config volume.
pub const CONFIG_DIRECTORY: &str = "/config-directory";

/// Where daemons append every block they produce or receive, inside the
/// config volume.
pub const PRECOMPUTED_BLOCKS_FILE: &str = "/config-directory/precomputed_blocks.log";

/// Port nginx listens on inside the proxy container.
pub const PROXY_CONTAINER_PORT: u16 = 80;

/// Path of the routing file inside the proxy container.
const PROXY_CONF_TARGET: &str = "/etc/nginx/conf.d/default.conf";

/// Top-level compose document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeDocument {
    /// Project name.
    pub name: String,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

impl ComposeDocument {
    /// Finds the service whose container is named `container`.
    pub fn service_by_container(&self, container: &str) -> Option<&ComposeService> {
        self.services.values().find(|s| s.container_name == container)
    }
}

/// One service entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ComposeService {
    /// Named volumes this service mounts, i.e. mount sources that are not
    /// host paths.
    pub fn named_volumes(&self) -> Vec<String> {
        self.volumes
            .iter()
            .filter_map(|v| v.split(':').next())
            .filter(|source| !source.starts_with('/') && !source.starts_with('.'))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeVolume {
    pub name: String,
}

/// Builds the compose document of `record`. Host paths are rooted at
/// `network_dir`.
pub(crate) fn build_document(record: &NetworkRecord, network_dir: &Path) -> Result<ComposeDocument> {
    let bridge = record.bridge_network();
    let mut document = ComposeDocument {
        name: record.name.clone(),
        ..Default::default()
    };
    document.networks.insert(
        bridge.clone(),
        ComposeNetwork {
            name: bridge.clone(),
            driver: "bridge".to_string(),
        },
    );

    let network_mount = format!("{}:{}", network_dir.display(), CONTAINER_NETWORK_DIR);

    for node in &record.topology {
        let volume = record.config_volume(&node.id);
        document.volumes.insert(volume.clone(), ComposeVolume { name: volume.clone() });

        let mut service = ComposeService {
            image: node.image.clone(),
            container_name: record.container_name(node.id.as_str()),
            entrypoint: vec!["mina".to_string()],
            command: node_command(record, node)?,
            environment: daemon_environment(record),
            volumes: vec![network_mount.clone(), format!("{volume}:{CONFIG_DIRECTORY}")],
            networks: vec![bridge.clone()],
            depends_on: node.depends_on.iter().map(|d| d.to_string()).collect(),
            labels: labels(record, node.id.as_str(), node.role.slug()),
            ..Default::default()
        };
        if node.role.is_daemon() {
            let ports = node.ports;
            service.ports = vec![format!(
                "{first}-{last}:{first}-{last}",
                first = ports.base(),
                last = ports.last()
            )];
        }

        if let Some(archive) = record.archive.as_ref().filter(|a| a.node == node.id) {
            let process = record.archive_service(&node.id);
            service.depends_on.push(process.clone());
            document.services.insert(
                process.clone(),
                ComposeService {
                    image: archive.image.clone(),
                    container_name: record.container_name(&process),
                    entrypoint: vec!["mina-archive".to_string()],
                    command: vec![
                        "run".to_string(),
                        "--postgres-uri".to_string(),
                        archive.postgres_uri.clone(),
                        "--server-port".to_string(),
                        archive.server_port.to_string(),
                    ],
                    volumes: vec![network_mount.clone()],
                    networks: vec![bridge.clone()],
                    labels: labels(record, &process, "archive-process"),
                    ..Default::default()
                },
            );
        }

        document.services.insert(node.id.to_string(), service);
    }

    if !record.routing.is_empty() {
        let routed: Vec<String> = record
            .topology
            .iter()
            .filter(|n| n.role.exposes_query_endpoint())
            .map(|n| n.id.to_string())
            .collect();
        document.services.insert(
            super::PROXY_SERVICE.to_string(),
            ComposeService {
                image: record.settings.proxy_image.clone(),
                container_name: record.container_name(super::PROXY_SERVICE),
                ports: vec![format!("{}:{}", record.settings.proxy_port, PROXY_CONTAINER_PORT)],
                volumes: vec![format!(
                    "{}:{}:ro",
                    network_dir.join(super::ROUTING_FILE).display(),
                    PROXY_CONF_TARGET
                )],
                networks: vec![bridge.clone()],
                depends_on: routed,
                labels: labels(record, super::PROXY_SERVICE, "proxy"),
                ..Default::default()
            },
        );
    }

    Ok(document)
}

fn daemon_environment(record: &NetworkRecord) -> BTreeMap<String, String> {
    let settings = &record.settings;
    BTreeMap::from([
        ("MINA_PRIVKEY_PASS".to_string(), settings.signing_key_passphrase.clone()),
        ("MINA_LIBP2P_PASS".to_string(), settings.peer_key_passphrase.clone()),
        ("MINA_CLIENT_TRUSTLIST".to_string(), settings.client_trustlist.clone()),
    ])
}

fn labels(record: &NetworkRecord, service: &str, role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("localnet.network".to_string(), record.name.clone()),
        ("localnet.service".to_string(), service.to_string()),
        ("localnet.role".to_string(), role.to_string()),
    ])
}

/// Builds the launch command of `node` from its role and allocated ports.
pub(crate) fn node_command(record: &NetworkRecord, node: &NodeIdentity) -> Result<Vec<String>> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    if node.role == NodeRole::SnarkWorker {
        let coordinator = worker_coordinator(record, node)?;
        let daemon_address = format!(
            "{}:{}",
            record.container_name(coordinator.id.as_str()),
            coordinator.ports.client()
        );
        push(&[
            "internal",
            "snark-worker",
            "-shutdown-on-disconnect",
            "false",
            "-config-directory",
            CONFIG_DIRECTORY,
            "-daemon-address",
            daemon_address.as_str(),
            "-proof-level",
            record.settings.proof_level.as_str(),
        ]);
        args.extend(node.extra_args.iter().cloned());
        return Ok(args);
    }

    let ports = node.ports;
    let [client, rest, external, metrics, libp2p_metrics] = [
        ports.client(),
        ports.rest(),
        ports.external(),
        ports.metrics(),
        ports.libp2p_metrics(),
    ]
    .map(|port| port.to_string());
    let genesis = format!("{CONTAINER_NETWORK_DIR}/{GENESIS_FILE}");
    let log_level = record.settings.log_level.as_str();
    push(&[
        "daemon",
        "-client-port",
        client.as_str(),
        "-rest-port",
        rest.as_str(),
        "-insecure-rest-server",
        "-external-port",
        external.as_str(),
        "-metrics-port",
        metrics.as_str(),
        "-libp2p-metrics-port",
        libp2p_metrics.as_str(),
        "-config-file",
        genesis.as_str(),
        "-log-json",
        "-log-level",
        log_level,
        "-file-log-level",
        log_level,
        "-config-directory",
        CONFIG_DIRECTORY,
        "-log-precomputed-blocks",
        "true",
        "-precomputed-blocks-file",
        PRECOMPUTED_BLOCKS_FILE,
    ]);

    if node.role == NodeRole::Seed {
        push(&["-seed"]);
    } else {
        for peer in seed_peers(record)? {
            push(&["-peer", peer.as_str()]);
        }
    }

    match node.role {
        NodeRole::WhaleBlockProducer | NodeRole::FishBlockProducer => {
            let key = signing_key(node)?.container_private_path();
            push(&["-block-producer-key", key.as_str()]);
        }
        NodeRole::SnarkCoordinator => {
            let key = signing_key(node)?;
            push(&[
                "-work-selection",
                "seq",
                "-snark-worker-fee",
                record.settings.snark_worker_fee.as_str(),
                "-run-snark-coordinator",
                key.public_key.as_str(),
            ]);
        }
        NodeRole::Archive => {
            let archive = record
                .archive
                .as_ref()
                .filter(|a| a.node == node.id)
                .ok_or_else(|| inconsistent(&node.id, "archive node has no archive process"))?;
            let address = format!(
                "{}:{}",
                record.container_name(&record.archive_service(&node.id)),
                archive.server_port
            );
            push(&["-archive-address", address.as_str()]);
        }
        NodeRole::Seed | NodeRole::PlainNode | NodeRole::SnarkWorker => {}
    }

    let peer_key = node.peer_keypair_ref.container_private_path();
    push(&["-libp2p-keypair", peer_key.as_str()]);
    args.extend(node.extra_args.iter().cloned());
    Ok(args)
}

/// Peer multiaddrs of every seed, in record order.
fn seed_peers(record: &NetworkRecord) -> Result<Vec<String>> {
    record
        .nodes_by_role(NodeRole::Seed)
        .map(|seed| {
            let peer_id = seed
                .peer_id()
                .ok_or_else(|| inconsistent(&seed.id, "seed has no peer id"))?;
            Ok(format!(
                "/dns4/{}/tcp/{}/p2p/{}",
                record.container_name(seed.id.as_str()),
                seed.ports.external(),
                peer_id
            ))
        })
        .collect()
}

fn worker_coordinator<'a>(record: &'a NetworkRecord, node: &NodeIdentity) -> Result<&'a NodeIdentity> {
    node.coordinator
        .as_ref()
        .and_then(|id| record.node(id))
        .filter(|c| c.role == NodeRole::SnarkCoordinator)
        .ok_or_else(|| inconsistent(&node.id, "snark worker has no coordinator"))
}

fn signing_key(node: &NodeIdentity) -> Result<&crate::keys::KeyRef> {
    node.signing_keypair_ref
        .as_ref()
        .ok_or_else(|| inconsistent(&node.id, "node has no signing key"))
}

fn inconsistent(node: &NodeId, reason: &str) -> OrchestratorError {
    OrchestratorError::invalid_topology(format!("{node}: {reason}"))
}
