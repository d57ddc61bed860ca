//! Key material management.
//!
//! Each network directory holds two owner-only key directories: signing
//! keypairs (block producers, snark coordinators, zkApp fee payers) and
//! network-identity keypairs (one per node, used for peer addressing). The
//! actual key generation is delegated to a [`KeyGenerator`]; this module only
//! decides what to generate, where, and with which permissions.
//!
//! Provisioning is deliberately not idempotent: each call produces fresh keys.
//! Callers gate it behind create or an explicit reset.

mod docker;

pub use docker::DockerKeyGenerator;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use localnet_core::node::validate_identifier;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

/// Directory of signing keypairs inside a network directory.
pub const SIGNING_KEY_DIR: &str = "network-keypairs";

/// Directory of network-identity keypairs inside a network directory.
pub const PEER_KEY_DIR: &str = "libp2p-keypairs";

/// Mount point of the network directory inside containers.
pub const CONTAINER_NETWORK_DIR: &str = "/local-network";

/// Reference to a generated keypair. Paths are relative to the network
/// directory so the record stays valid if the storage root moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    /// Public key (signing keys) or public identity string (peer keys).
    pub public_key: String,
    /// Peer id, for network-identity keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

impl KeyRef {
    /// Host path of the private key.
    pub fn host_private_path(&self, network_dir: &Path) -> PathBuf {
        network_dir.join(&self.private_path)
    }

    /// Path of the private key as seen from inside a container.
    pub fn container_private_path(&self) -> String {
        format!("{}/{}", CONTAINER_NETWORK_DIR, self.private_path.display())
    }
}

/// Output of one key generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub public_key: String,
    pub peer_id: Option<String>,
}

/// Opaque keypair generation.
///
/// Implementations write the private key to `network_dir/relative_path` and
/// return the public half. Every call must produce a new keypair.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generates a signing keypair.
    async fn generate_signing_keypair(&self, network_dir: &Path, relative_path: &Path) -> Result<GeneratedKey>;

    /// Generates a network-identity keypair; the result carries a peer id.
    async fn generate_peer_keypair(&self, network_dir: &Path, relative_path: &Path) -> Result<GeneratedKey>;
}

/// What to generate for one key owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    /// Owner name; becomes the key file name.
    pub name: String,
    pub signing: bool,
    pub peer: bool,
}

/// Keys generated for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionedKeys {
    pub signing: Option<KeyRef>,
    pub peer: Option<KeyRef>,
}

/// Creates and cleans key material under network directories.
#[derive(Clone)]
pub struct KeyMaterialManager {
    generator: Arc<dyn KeyGenerator>,
}

impl KeyMaterialManager {
    pub fn new(generator: Arc<dyn KeyGenerator>) -> Self {
        Self { generator }
    }

    /// Generates every requested key under `network_dir`.
    ///
    /// Requests are validated before anything touches the disk. Public halves
    /// are written next to the private keys as world-readable files.
    pub async fn provision(
        &self,
        network_dir: &Path,
        requests: &[KeyRequest],
    ) -> Result<BTreeMap<String, ProvisionedKeys>> {
        let mut names = BTreeSet::new();
        for request in requests {
            validate_identifier(&request.name)
                .map_err(|e| OrchestratorError::invalid_topology(e.to_string()))?;
            if !names.insert(request.name.as_str()) {
                return Err(OrchestratorError::invalid_topology(format!(
                    "key owner {} requested twice",
                    request.name
                )));
            }
        }

        prepare_key_dirs(network_dir)?;

        let mut provisioned = BTreeMap::new();
        for request in requests {
            let mut keys = ProvisionedKeys::default();

            if request.signing {
                let private_path = Path::new(SIGNING_KEY_DIR).join(&request.name);
                let generated = self
                    .generator
                    .generate_signing_keypair(network_dir, &private_path)
                    .await?;
                let public_path = Path::new(SIGNING_KEY_DIR).join(format!("{}.pub", request.name));
                write_public(&network_dir.join(&public_path), &generated.public_key)?;
                debug!(owner = %request.name, public_key = %generated.public_key, "Generated signing keypair");
                keys.signing = Some(KeyRef {
                    private_path,
                    public_path,
                    public_key: generated.public_key,
                    peer_id: None,
                });
            }

            if request.peer {
                let private_path = Path::new(PEER_KEY_DIR).join(&request.name);
                let generated = self
                    .generator
                    .generate_peer_keypair(network_dir, &private_path)
                    .await?;
                let peer_id = generated.peer_id.clone().ok_or_else(|| {
                    OrchestratorError::key_generation(&request.name, "generator returned no peer id")
                })?;
                let public_path = Path::new(PEER_KEY_DIR).join(format!("{}.peerid", request.name));
                write_public(&network_dir.join(&public_path), &peer_id)?;
                debug!(owner = %request.name, peer_id = %peer_id, "Generated network identity");
                keys.peer = Some(KeyRef {
                    private_path,
                    public_path,
                    public_key: generated.public_key,
                    peer_id: Some(peer_id),
                });
            }

            provisioned.insert(request.name.clone(), keys);
        }

        info!(
            network_dir = %network_dir.display(),
            owners = provisioned.len(),
            "Provisioned key material"
        );
        Ok(provisioned)
    }

    /// Replaces the key directories of `network_dir` with the ones
    /// provisioned under `staging`.
    ///
    /// The previous directories are moved into `staging` rather than deleted,
    /// so the caller discards them together with the staging directory.
    pub fn adopt(&self, staging: &Path, network_dir: &Path) -> Result<()> {
        for dir in [SIGNING_KEY_DIR, PEER_KEY_DIR] {
            let staged = staging.join(dir);
            if !staged.is_dir() {
                return Err(OrchestratorError::key_generation(
                    dir,
                    format!("nothing staged at {}", staged.display()),
                ));
            }
        }
        for dir in [SIGNING_KEY_DIR, PEER_KEY_DIR] {
            let current = network_dir.join(dir);
            match std::fs::rename(&current, staging.join(format!("{dir}.replaced"))) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            std::fs::rename(staging.join(dir), &current)?;
        }
        info!(network_dir = %network_dir.display(), "Replaced key material");
        Ok(())
    }
}

fn prepare_key_dirs(network_dir: &Path) -> Result<()> {
    for dir in [SIGNING_KEY_DIR, PEER_KEY_DIR] {
        let path = network_dir.join(dir);
        std::fs::create_dir_all(&path)?;
        set_mode(&path, 0o700)?;
    }
    Ok(())
}

fn write_public(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, format!("{content}\n"))?;
    set_mode(path, 0o644)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeKeyGenerator;
    use tempfile::tempdir;

    fn manager() -> (KeyMaterialManager, Arc<FakeKeyGenerator>) {
        let generator = Arc::new(FakeKeyGenerator::default());
        (KeyMaterialManager::new(generator.clone()), generator)
    }

    fn requests() -> Vec<KeyRequest> {
        vec![
            KeyRequest { name: "seed-0".into(), signing: false, peer: true },
            KeyRequest { name: "whale-0".into(), signing: true, peer: true },
            KeyRequest { name: "zkapp-fee-payer-0".into(), signing: true, peer: false },
        ]
    }

    #[tokio::test]
    async fn test_provision_layout() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager();

        let keys = manager.provision(dir.path(), &requests()).await.unwrap();

        let seed = &keys["seed-0"];
        assert!(seed.signing.is_none());
        let peer = seed.peer.as_ref().unwrap();
        assert!(peer.peer_id.is_some());
        assert!(peer.host_private_path(dir.path()).is_file());
        assert_eq!(peer.container_private_path(), "/local-network/libp2p-keypairs/seed-0");

        let whale = &keys["whale-0"];
        let signing = whale.signing.as_ref().unwrap();
        assert_eq!(signing.private_path, Path::new("network-keypairs/whale-0"));
        let public = std::fs::read_to_string(dir.path().join(&signing.public_path)).unwrap();
        assert_eq!(public.trim(), signing.public_key);

        assert!(keys["zkapp-fee-payer-0"].peer.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provision_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let (manager, _) = manager();
        let keys = manager.provision(dir.path(), &requests()).await.unwrap();

        for sub in [SIGNING_KEY_DIR, PEER_KEY_DIR] {
            let mode = std::fs::metadata(dir.path().join(sub)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
        let public = &keys["whale-0"].signing.as_ref().unwrap().public_path;
        let mode = std::fs::metadata(dir.path().join(public)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_provision_twice_yields_new_keys() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager();

        let first = manager.provision(dir.path(), &requests()).await.unwrap();
        let second = manager.provision(dir.path(), &requests()).await.unwrap();
        assert_ne!(
            first["whale-0"].signing.as_ref().unwrap().public_key,
            second["whale-0"].signing.as_ref().unwrap().public_key
        );
    }

    #[tokio::test]
    async fn test_invalid_requests_touch_nothing() {
        let dir = tempdir().unwrap();
        let (manager, generator) = manager();

        let mut duplicated = requests();
        duplicated.push(duplicated[0].clone());
        assert!(manager.provision(dir.path(), &duplicated).await.is_err());

        let bad_name = vec![KeyRequest { name: "../escape".into(), signing: true, peer: false }];
        assert!(manager.provision(dir.path(), &bad_name).await.is_err());

        assert_eq!(generator.calls(), 0);
        assert!(!dir.path().join(SIGNING_KEY_DIR).exists());
    }

    #[tokio::test]
    async fn test_adopt_swaps_key_dirs() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let (manager, _) = manager();
        let old = manager.provision(dir.path(), &requests()).await.unwrap();

        let err = manager.adopt(&staging, dir.path()).unwrap_err();
        assert!(matches!(err, OrchestratorError::KeyGeneration { .. }));
        let whale = old["whale-0"].signing.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(whale.host_private_path(dir.path())).unwrap(), "private-1");

        let new = manager.provision(&staging, &requests()).await.unwrap();
        manager.adopt(&staging, dir.path()).unwrap();

        let whale = new["whale-0"].signing.as_ref().unwrap();
        let public = std::fs::read_to_string(dir.path().join(&whale.public_path)).unwrap();
        assert_eq!(public.trim(), whale.public_key);
        assert!(!staging.join(SIGNING_KEY_DIR).exists());
        assert!(staging.join(format!("{SIGNING_KEY_DIR}.replaced")).is_dir());
    }
}
