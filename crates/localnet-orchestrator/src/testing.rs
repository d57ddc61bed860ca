//! In-memory collaborators and record builders shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use localnet_core::NodeRole;

use crate::config::{NetworkDefaults, PostgresConfig};
use crate::deploy::ComposeService;
use crate::error::{OrchestratorError, Result};
use crate::keys::{
    GeneratedKey, KeyGenerator, KeyMaterialManager, KeyRef, KeyRequest, ProvisionedKeys, PEER_KEY_DIR,
    SIGNING_KEY_DIR,
};
use crate::record::NetworkRecord;
use crate::runtime::{ContainerRuntime, ServiceStatus};
use crate::topology::{TopologyResolver, TopologySpec};

/// Key generator that numbers its keys instead of running a keygen image.
#[derive(Debug, Default)]
pub(crate) struct FakeKeyGenerator {
    counter: AtomicUsize,
    limit: Mutex<Option<usize>>,
}

impl FakeKeyGenerator {
    /// Number of keys generated so far.
    pub(crate) fn calls(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    /// Lets `count` more keys succeed, then fails every further one.
    pub(crate) fn fail_after(&self, count: usize) {
        *self.limit.lock().unwrap() = Some(self.calls() + count);
    }

    fn next(&self, network_dir: &Path, relative_path: &Path) -> Result<usize> {
        if let Some(limit) = *self.limit.lock().unwrap() {
            if self.calls() >= limit {
                return Err(OrchestratorError::key_generation(
                    relative_path.display().to_string(),
                    "injected failure",
                ));
            }
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        std::fs::write(network_dir.join(relative_path), format!("private-{n}"))?;
        Ok(n)
    }
}

#[async_trait]
impl KeyGenerator for FakeKeyGenerator {
    async fn generate_signing_keypair(&self, network_dir: &Path, relative_path: &Path) -> Result<GeneratedKey> {
        let n = self.next(network_dir, relative_path)?;
        Ok(GeneratedKey {
            public_key: format!("B62qfake{n}"),
            peer_id: None,
        })
    }

    async fn generate_peer_keypair(&self, network_dir: &Path, relative_path: &Path) -> Result<GeneratedKey> {
        let n = self.next(network_dir, relative_path)?;
        Ok(GeneratedKey {
            public_key: format!("CAESfake{n},CAESpub{n},12D3KooWfake{n}"),
            peer_id: Some(format!("12D3KooWfake{n}")),
        })
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    /// Container name to running flag.
    containers: BTreeMap<String, bool>,
    networks: BTreeSet<String>,
    started: Vec<String>,
    stopped: Vec<String>,
    removed_volumes: Vec<String>,
    one_shots: Vec<ComposeService>,
    calls: Vec<String>,
    fail_on: BTreeSet<String>,
}

/// Container runtime that only tracks container state in memory.
#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    /// Makes every start or stop of `container` fail.
    pub(crate) fn fail_on(&self, container: &str) {
        self.state.lock().unwrap().fail_on.insert(container.to_string());
    }

    pub(crate) fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    /// Every call made, as `<method> <target>`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Containers in the order they were successfully started.
    pub(crate) fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    /// Containers in the order they were stopped.
    pub(crate) fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Names of the containers currently running.
    pub(crate) fn running(&self) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|(_, running)| **running)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn containers(&self) -> BTreeMap<String, bool> {
        self.state.lock().unwrap().containers.clone()
    }

    pub(crate) fn networks(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().networks.clone()
    }

    pub(crate) fn removed_volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_volumes.clone()
    }

    /// Services run through `run_once`, in order.
    pub(crate) fn one_shots(&self) -> Vec<ComposeService> {
        self.state.lock().unwrap().one_shots.clone()
    }

    fn check(state: &RuntimeState, container: &str) -> Result<()> {
        if state.fail_on.contains(container) {
            return Err(OrchestratorError::runtime_failure(container, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_network(&self, network: &str, _labels: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("ensure_network {network}"));
        state.networks.insert(network.to_string());
        Ok(())
    }

    async fn start_service(&self, service: &ComposeService) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = service.container_name.clone();
        state.calls.push(format!("start {name}"));
        Self::check(&state, &name)?;
        state.containers.insert(name.clone(), true);
        state.started.push(name);
        Ok(())
    }

    async fn stop_service(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop {container}"));
        Self::check(&state, container)?;
        if let Some(running) = state.containers.get_mut(container) {
            *running = false;
        }
        state.stopped.push(container.to_string());
        Ok(())
    }

    async fn service_status(&self, container: &str) -> Result<ServiceStatus> {
        let state = self.state.lock().unwrap();
        Ok(match state.containers.get(container) {
            Some(true) => ServiceStatus::Running,
            Some(false) => ServiceStatus::Exited { exit_code: Some(0) },
            None => ServiceStatus::Missing,
        })
    }

    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("logs {container}"));
        if !state.containers.contains_key(container) {
            return Err(OrchestratorError::runtime_failure(container, "no such container"));
        }
        let lines = tail.unwrap_or(3).min(3);
        Ok((0..lines).map(|i| format!("{container} line {i}\n")).collect())
    }

    async fn teardown(&self, network: &str, containers: &[String], volumes: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("teardown {network}"));
        for container in containers {
            state.containers.remove(container);
        }
        state.removed_volumes.extend(volumes.iter().cloned());
        state.networks.remove(network);
        Ok(())
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("exec {container}"));
        Self::check(&state, container)?;
        match state.containers.get(container) {
            Some(true) => Ok(format!("{container}$ {}\n", command.join(" "))),
            Some(false) => Err(OrchestratorError::runtime_failure(container, "container is not running")),
            None => Err(OrchestratorError::runtime_failure(container, "no such container")),
        }
    }

    async fn run_once(&self, service: &ComposeService) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let name = service.container_name.clone();
        state.calls.push(format!("run_once {name}"));
        Self::check(&state, &name)?;
        state.one_shots.push(service.clone());
        Ok(format!("{name} done\n"))
    }

    async fn remove_service(&self, container: &str, volumes: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {container}"));
        Self::check(&state, container)?;
        state.containers.remove(container);
        state.removed_volumes.extend(volumes.iter().cloned());
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Deterministic key references for `requests`, named after their owners.
pub(crate) fn fake_keys(requests: &[KeyRequest]) -> BTreeMap<String, ProvisionedKeys> {
    requests
        .iter()
        .map(|request| {
            let signing = request.signing.then(|| KeyRef {
                private_path: Path::new(SIGNING_KEY_DIR).join(&request.name),
                public_path: PathBuf::from(format!("{SIGNING_KEY_DIR}/{}.pub", request.name)),
                public_key: format!("B62q{}", request.name.replace('-', "")),
                peer_id: None,
            });
            let peer = request.peer.then(|| KeyRef {
                private_path: Path::new(PEER_KEY_DIR).join(&request.name),
                public_path: PathBuf::from(format!("{PEER_KEY_DIR}/{}.peerid", request.name)),
                public_key: format!("CAES{0},CAESpub,12D3KooW{0}", request.name),
                peer_id: Some(format!("12D3KooW{}", request.name)),
            });
            (request.name.clone(), ProvisionedKeys { signing, peer })
        })
        .collect()
}

/// Resolves `spec` with default settings and fake keys, without touching
/// the filesystem.
pub(crate) fn record_for(name: &str, spec: &TopologySpec) -> NetworkRecord {
    let defaults = NetworkDefaults::default();
    let postgres = PostgresConfig::default();
    let keys = KeyMaterialManager::new(Arc::new(FakeKeyGenerator::default()));
    let resolver = TopologyResolver::new(&defaults, &postgres, &keys);
    let plan = resolver.plan(spec).unwrap();
    let provisioned = fake_keys(&plan.key_requests());
    resolver.assemble(name, spec, plan, provisioned, None).unwrap()
}

/// One seed, two whales and a fish.
pub(crate) fn sample_record(name: &str) -> NetworkRecord {
    let spec = TopologySpec::builder()
        .group(NodeRole::Seed, 1)
        .group(NodeRole::WhaleBlockProducer, 2)
        .group(NodeRole::FishBlockProducer, 1)
        .build();
    record_for(name, &spec)
}

/// A whale plus one snark coordinator serving two workers.
pub(crate) fn snark_record(name: &str) -> NetworkRecord {
    let spec = TopologySpec::builder()
        .group(NodeRole::Seed, 1)
        .group(NodeRole::WhaleBlockProducer, 1)
        .group(NodeRole::SnarkCoordinator, 1)
        .group(NodeRole::SnarkWorker, 2)
        .build();
    record_for(name, &spec)
}

/// A whale and an archive node with its archive process.
pub(crate) fn archive_record(name: &str) -> NetworkRecord {
    let spec = TopologySpec::builder()
        .group(NodeRole::Seed, 1)
        .group(NodeRole::WhaleBlockProducer, 1)
        .group(NodeRole::Archive, 1)
        .build();
    record_for(name, &spec)
}
