//! Topology resolution.
//!
//! Resolution runs in two phases. [`TopologyResolver::plan`] is pure: it
//! checks every structural precondition, names the nodes, allocates their
//! port blocks and derives the dependency edges and start order. Only a plan
//! that passed all of that reaches [`TopologyResolver::resolve`], which
//! generates keys, builds the genesis ledger and assembles the record.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Utc;
use localnet_core::{NetworkState, NodeId, NodeRole, NodeState};
use tracing::{debug, info, warn};

use crate::config::{NetworkDefaults, PostgresConfig};
use crate::deploy::PROXY_SERVICE;
use crate::error::{OrchestratorError, Result};
use crate::genesis::{self, FundedKey, GenesisLedger, StakeTier};
use crate::keys::{KeyMaterialManager, KeyRef, KeyRequest, ProvisionedKeys};
use crate::ports::{PortAllocator, PortBlock, PortRequest, ReservedPort};
use crate::record::{
    archive_process_name, ArchiveProcess, NetworkRecord, NetworkSettings, NodeIdentity, RoutingRule,
};
use crate::topology::TopologySpec;

/// A node as planned, before any key exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub id: NodeId,
    pub role: NodeRole,
    pub ports: PortBlock,
    pub image: String,
    pub extra_args: Vec<String>,
    pub depends_on: Vec<NodeId>,
    pub coordinator: Option<NodeId>,
}

/// Output of the validation phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub nodes: Vec<PlannedNode>,
    pub start_order: Vec<NodeId>,
    /// Owner names of the zkApp fee-payer keys.
    pub fee_payers: Vec<String>,
}

impl ResolvedPlan {
    /// Keys to provision: a network identity for every node, a signing key
    /// for nodes that sign, and one signing key per zkApp fee payer.
    pub fn key_requests(&self) -> Vec<KeyRequest> {
        let mut requests: Vec<KeyRequest> = self
            .nodes
            .iter()
            .map(|n| KeyRequest {
                name: n.id.to_string(),
                signing: n.role.needs_signing_key(),
                peer: true,
            })
            .collect();
        requests.extend(self.fee_payers.iter().map(|name| KeyRequest {
            name: name.clone(),
            signing: true,
            peer: false,
        }));
        requests
    }

    fn node(&self, id: &NodeId) -> Option<&PlannedNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

/// Resolves topology documents against the network defaults.
pub struct TopologyResolver<'a> {
    defaults: &'a NetworkDefaults,
    postgres: &'a PostgresConfig,
    keys: &'a KeyMaterialManager,
}

impl<'a> TopologyResolver<'a> {
    pub fn new(defaults: &'a NetworkDefaults, postgres: &'a PostgresConfig, keys: &'a KeyMaterialManager) -> Self {
        Self {
            defaults,
            postgres,
            keys,
        }
    }

    /// Validates `spec` and computes everything that does not need keys.
    /// Has no side effects.
    pub fn plan(&self, spec: &TopologySpec) -> Result<ResolvedPlan> {
        check_preconditions(spec)?;

        let mut counters: BTreeMap<NodeRole, u16> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut pending = Vec::with_capacity(spec.node_count());
        let mut requests = Vec::with_capacity(spec.node_count());

        for group in &spec.groups {
            if let Some(index) = group.overrides.keys().find(|i| **i >= group.count) {
                return Err(OrchestratorError::invalid_topology(format!(
                    "override for {} #{} but the group has only {} nodes",
                    group.role, index, group.count
                )));
            }

            for position in 0..group.count {
                let counter = counters.entry(group.role).or_insert(0);
                let index = *counter;
                *counter = counter.checked_add(1).ok_or_else(|| {
                    OrchestratorError::invalid_topology(format!("too many {} nodes", group.role))
                })?;

                let node_override = group.overrides.get(&position);
                let id = match node_override.and_then(|o| o.name.as_deref()) {
                    Some(name) => NodeId::parse(name)?,
                    None => NodeId::for_role(group.role, index),
                };
                if !seen.insert(id.clone()) {
                    return Err(OrchestratorError::invalid_topology(format!(
                        "node id {id} is used more than once"
                    )));
                }

                requests.push(PortRequest {
                    node: id.clone(),
                    role: group.role,
                    index,
                    base_override: node_override.and_then(|o| o.base_port),
                });
                let image = group
                    .image
                    .clone()
                    .unwrap_or_else(|| self.defaults.images.daemon.clone());
                let extra_args = node_override.map(|o| o.extra_args.clone()).unwrap_or_default();
                pending.push((id, group.role, image, extra_args));
            }
        }

        check_service_names(&pending)?;

        let blocks = PortAllocator::new(&self.defaults.ports).allocate_all(&requests, &self.reserved_ports(spec))?;
        let mut nodes = Vec::with_capacity(pending.len());
        for (id, role, image, extra_args) in pending {
            let ports = blocks.get(&id).copied().ok_or_else(|| {
                OrchestratorError::invalid_topology(format!("no port block allocated for {id}"))
            })?;
            nodes.push(PlannedNode {
                id,
                role,
                ports,
                image,
                extra_args,
                depends_on: Vec::new(),
                coordinator: None,
            });
        }

        wire_dependencies(&mut nodes);
        let edges: Vec<(NodeId, Vec<NodeId>)> = nodes
            .iter()
            .map(|n| (n.id.clone(), n.depends_on.clone()))
            .collect();
        let start_order = start_order(&edges)?;

        let fee_payers: Vec<String> = if spec.transactions.zkapps {
            (0..spec.transactions.zkapp_fee_payers)
                .map(|i| format!("zkapp-fee-payer-{i}"))
                .collect()
        } else {
            Vec::new()
        };
        if let Some(clash) = fee_payers.iter().find(|f| seen.iter().any(|id| id.as_str() == f.as_str())) {
            return Err(OrchestratorError::invalid_topology(format!(
                "node id {clash} is reserved for a zkApp fee payer"
            )));
        }

        if spec.count_of(NodeRole::Seed) == 0 {
            warn!("Topology has no seed node; daemons will start without peers");
        }
        debug!(nodes = nodes.len(), "Planned topology");

        Ok(ResolvedPlan {
            nodes,
            start_order,
            fee_payers,
        })
    }

    /// Resolves `spec` into a record for network `name`, generating keys under
    /// `network_dir`. Accounts of `base_genesis` are kept ahead of the
    /// generated ones.
    pub async fn resolve(
        &self,
        name: &str,
        spec: &TopologySpec,
        network_dir: &Path,
        base_genesis: Option<&GenesisLedger>,
    ) -> Result<NetworkRecord> {
        let plan = self.plan(spec)?;
        let keys = self.keys.provision(network_dir, &plan.key_requests()).await?;
        self.assemble(name, spec, plan, keys, base_genesis)
    }

    /// Builds the record from a validated plan and the keys provisioned for
    /// it: genesis ledger, routing rules, archive process and settings.
    pub fn assemble(
        &self,
        name: &str,
        spec: &TopologySpec,
        plan: ResolvedPlan,
        mut keys: BTreeMap<String, ProvisionedKeys>,
        base_genesis: Option<&GenesisLedger>,
    ) -> Result<NetworkRecord> {
        let mut funded = Vec::new();
        let mut topology = Vec::with_capacity(plan.nodes.len());
        for node in plan.nodes {
            let provisioned = keys.remove(node.id.as_str()).unwrap_or_default();
            let peer = provisioned.peer.ok_or_else(|| {
                OrchestratorError::key_generation(node.id.as_str(), "no network identity provisioned")
            })?;
            let tier = match node.role {
                NodeRole::WhaleBlockProducer => Some(StakeTier::Whale),
                NodeRole::FishBlockProducer => Some(StakeTier::Fish),
                _ => None,
            };
            if let (Some(tier), Some(signing)) = (tier, provisioned.signing.as_ref()) {
                funded.push(FundedKey {
                    public_key: signing.public_key.clone(),
                    tier,
                });
            }
            topology.push(NodeIdentity {
                id: node.id,
                role: node.role,
                ports: node.ports,
                image: node.image,
                signing_keypair_ref: provisioned.signing,
                peer_keypair_ref: peer,
                extra_args: node.extra_args,
                depends_on: node.depends_on,
                coordinator: node.coordinator,
                state: NodeState::Created,
            });
        }

        let mut fee_payers: Vec<KeyRef> = Vec::with_capacity(plan.fee_payers.len());
        for owner in &plan.fee_payers {
            let signing = keys
                .remove(owner)
                .and_then(|k| k.signing)
                .ok_or_else(|| OrchestratorError::key_generation(owner, "no signing key provisioned"))?;
            funded.push(FundedKey {
                public_key: signing.public_key.clone(),
                tier: StakeTier::FeePayer,
            });
            fee_payers.push(signing);
        }

        let genesis = genesis::build(&funded, &self.defaults.stake, base_genesis)?;

        let archive = topology
            .iter()
            .find(|n| n.role == NodeRole::Archive)
            .map(|n| ArchiveProcess {
                node: n.id.clone(),
                server_port: self.defaults.ports.archive_server,
                image: self.defaults.images.archive.clone(),
                postgres_uri: self.postgres.uri(),
            });

        let now = Utc::now();
        let mut record = NetworkRecord {
            name: name.to_string(),
            spec: spec.clone(),
            topology,
            start_order: plan.start_order,
            fee_payers,
            imported_accounts: base_genesis.map(|g| g.accounts.clone()).unwrap_or_default(),
            genesis,
            routing: Vec::new(),
            archive,
            settings: self.settings(spec),
            state: NetworkState::Created,
            created_at: now,
            updated_at: now,
        };
        record.routing = routing_rules(&record);

        info!(
            network = %name,
            nodes = record.topology.len(),
            accounts = record.genesis.accounts.len(),
            "Resolved topology"
        );
        Ok(record)
    }

    fn reserved_ports(&self, spec: &TopologySpec) -> Vec<ReservedPort> {
        let mut reserved = Vec::new();
        if spec.groups.iter().any(|g| g.role.exposes_query_endpoint() && g.count > 0) {
            reserved.push(ReservedPort {
                owner: "proxy".to_string(),
                port: self.defaults.ports.proxy,
            });
        }
        if spec.count_of(NodeRole::Archive) > 0 {
            reserved.push(ReservedPort {
                owner: "archive-process".to_string(),
                port: self.defaults.ports.archive_server,
            });
        }
        reserved
    }

    fn settings(&self, spec: &TopologySpec) -> NetworkSettings {
        let defaults = self.defaults;
        NetworkSettings {
            signing_key_passphrase: defaults.signing_key_passphrase.clone(),
            peer_key_passphrase: defaults.peer_key_passphrase.clone(),
            client_trustlist: defaults.client_trustlist.clone(),
            snark_worker_fee: spec
                .snark_worker_fee
                .clone()
                .unwrap_or_else(|| defaults.snark_worker_fee.clone()),
            proof_level: spec
                .proof_level
                .clone()
                .unwrap_or_else(|| defaults.proof_level.clone()),
            log_level: defaults.log_level.clone(),
            proxy_image: defaults.images.proxy.clone(),
            proxy_port: defaults.ports.proxy,
        }
    }
}

fn check_preconditions(spec: &TopologySpec) -> Result<()> {
    let whales = spec.count_of(NodeRole::WhaleBlockProducer);
    let fish = spec.count_of(NodeRole::FishBlockProducer);

    if spec.node_count() == 0 {
        return Err(OrchestratorError::invalid_topology("topology has no nodes"));
    }
    if spec.transactions.value_transfers && fish == 0 {
        return Err(OrchestratorError::invalid_topology(
            "value transfers require at least one fish block producer",
        ));
    }
    if spec.transactions.zkapps && (whales < 2 || fish == 0) {
        return Err(OrchestratorError::invalid_topology(format!(
            "zkApp transactions require at least two whale and one fish block producer (have {whales} whale, {fish} fish)"
        )));
    }
    if spec.count_of(NodeRole::SnarkWorker) > 0 && spec.count_of(NodeRole::SnarkCoordinator) == 0 {
        return Err(OrchestratorError::invalid_topology(
            "snark workers require a snark coordinator",
        ));
    }
    if spec.count_of(NodeRole::Archive) > 1 {
        return Err(OrchestratorError::invalid_topology(
            "at most one archive node is supported",
        ));
    }
    Ok(())
}

/// Rejects node ids that would collide with a generated service name: the
/// reverse proxy, or the process of an archive node.
fn check_service_names(pending: &[(NodeId, NodeRole, String, Vec<String>)]) -> Result<()> {
    let mut reserved = BTreeMap::from([(PROXY_SERVICE.to_string(), "the reverse proxy".to_string())]);
    for (id, role, _, _) in pending {
        if *role == NodeRole::Archive {
            reserved.insert(archive_process_name(id), format!("the archive process of {id}"));
        }
    }
    for (id, _, _, _) in pending {
        if let Some(owner) = reserved.get(id.as_str()) {
            return Err(OrchestratorError::invalid_topology(format!(
                "node id {id} is reserved for {owner}"
            )));
        }
    }
    Ok(())
}

/// Non-seed daemons depend on every seed; workers depend on a coordinator,
/// assigned round-robin.
fn wire_dependencies(nodes: &mut [PlannedNode]) {
    let seeds: Vec<NodeId> = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Seed)
        .map(|n| n.id.clone())
        .collect();
    let coordinators: Vec<NodeId> = nodes
        .iter()
        .filter(|n| n.role == NodeRole::SnarkCoordinator)
        .map(|n| n.id.clone())
        .collect();

    let mut next_coordinator = 0;
    for node in nodes.iter_mut() {
        if node.role.needs_peers() {
            node.depends_on = seeds.clone();
        }
        if node.role == NodeRole::SnarkWorker && !coordinators.is_empty() {
            let coordinator = coordinators[next_coordinator % coordinators.len()].clone();
            next_coordinator += 1;
            node.depends_on = vec![coordinator.clone()];
            node.coordinator = Some(coordinator);
        }
    }
}

/// Orders nodes so every node comes after the nodes it depends on. Ties are
/// broken by node id. Fails with `InvalidTopology` on a cycle or an edge to
/// an unknown node.
pub fn start_order(edges: &[(NodeId, Vec<NodeId>)]) -> Result<Vec<NodeId>> {
    let known: BTreeSet<&NodeId> = edges.iter().map(|(id, _)| id).collect();
    let mut pending: BTreeMap<&NodeId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();

    for (id, depends_on) in edges {
        pending.insert(id, depends_on.len());
        for dependency in depends_on {
            if !known.contains(dependency) {
                return Err(OrchestratorError::invalid_topology(format!(
                    "{id} depends on unknown node {dependency}"
                )));
            }
            dependents.entry(dependency).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<&NodeId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(*dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() != edges.len() {
        let stuck: Vec<String> = pending
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(OrchestratorError::invalid_topology(format!(
            "dependency cycle between {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// One rule per node serving the query endpoint: `/<id>/graphql` to the
/// node's REST port.
fn routing_rules(record: &NetworkRecord) -> Vec<RoutingRule> {
    record
        .topology
        .iter()
        .filter(|n| n.role.exposes_query_endpoint())
        .map(|n| RoutingRule {
            public_path_prefix: format!("/{}/graphql", n.id),
            upstream_host: record.container_name(n.id.as_str()),
            upstream_port: n.ports.rest(),
        })
        .collect()
}
