//! Key generation through the daemon image.
//!
//! Each key is produced by a one-shot container running the daemon's own key
//! tooling with the network directory mounted at `/local-network`. The
//! container runs as the owner of the network directory so the generated
//! files stay readable by the operator.

use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::keys::{GeneratedKey, KeyGenerator, CONTAINER_NETWORK_DIR};
use crate::runtime::ensure_image;

/// Generates keys by running the daemon image's key commands.
pub struct DockerKeyGenerator {
    docker: Docker,
    image: String,
    signing_passphrase: String,
    peer_passphrase: String,
}

impl DockerKeyGenerator {
    pub fn new(
        docker: Docker,
        image: impl Into<String>,
        signing_passphrase: impl Into<String>,
        peer_passphrase: impl Into<String>,
    ) -> Self {
        Self {
            docker,
            image: image.into(),
            signing_passphrase: signing_passphrase.into(),
            peer_passphrase: peer_passphrase.into(),
        }
    }

    async fn run(&self, network_dir: &Path, key_name: &str, args: Vec<String>) -> Result<String> {
        ensure_image(&self.docker, &self.image).await?;

        let bind = format!("{}:{}", network_dir.display(), CONTAINER_NETWORK_DIR);
        let config = Config {
            image: Some(self.image.clone()),
            entrypoint: Some(vec!["mina".to_string()]),
            cmd: Some(args),
            env: Some(vec![
                format!("MINA_PRIVKEY_PASS={}", self.signing_passphrase),
                format!("MINA_LIBP2P_PASS={}", self.peer_passphrase),
            ]),
            user: owner_of(network_dir),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container::<String, String>(None, config)
            .await?;
        let id = created.id;
        debug!(container = %id, key = %key_name, "Created key generation container");

        let outcome = self.run_to_completion(&id, key_name).await;

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&id, Some(remove)).await {
            warn!(container = %id, error = %e, "Failed to remove key generation container");
        }

        outcome
    }

    async fn run_to_completion(&self, id: &str, key_name: &str) -> Result<String> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        while let Some(result) = wait.next().await {
            if let Err(e) = result {
                let output = self.collect_logs(id).await.unwrap_or_default();
                return Err(OrchestratorError::key_generation(
                    key_name,
                    format!("{e}: {}", output.trim()),
                ));
            }
        }

        self.collect_logs(id).await
    }

    async fn collect_logs(&self, id: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?.to_string());
        }
        Ok(output)
    }
}

#[async_trait]
impl KeyGenerator for DockerKeyGenerator {
    async fn generate_signing_keypair(&self, network_dir: &Path, relative_path: &Path) -> Result<GeneratedKey> {
        let name = relative_path.display().to_string();
        let args = vec![
            "advanced".to_string(),
            "generate-keypair".to_string(),
            "-privkey-path".to_string(),
            format!("{}/{}", CONTAINER_NETWORK_DIR, name),
        ];
        let output = self.run(network_dir, &name, args).await?;
        let public_key = parse_signing_output(&output)
            .ok_or_else(|| OrchestratorError::key_generation(&name, "no public key in output"))?;
        Ok(GeneratedKey {
            public_key,
            peer_id: None,
        })
    }

    async fn generate_peer_keypair(&self, network_dir: &Path, relative_path: &Path) -> Result<GeneratedKey> {
        let name = relative_path.display().to_string();
        let args = vec![
            "libp2p".to_string(),
            "generate-keypair".to_string(),
            "-privkey-path".to_string(),
            format!("{}/{}", CONTAINER_NETWORK_DIR, name),
        ];
        let output = self.run(network_dir, &name, args).await?;
        let (public_key, peer_id) = parse_peer_output(&output)
            .ok_or_else(|| OrchestratorError::key_generation(&name, "no libp2p keypair in output"))?;
        Ok(GeneratedKey {
            public_key,
            peer_id: Some(peer_id),
        })
    }
}

/// Extracts the key from a `Public key: <key>` line.
fn parse_signing_output(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Public key:"))
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Extracts the comma-separated keypair printed after `libp2p keypair:`.
/// The peer id is its last field.
fn parse_peer_output(output: &str) -> Option<(String, String)> {
    let mut lines = output.lines().map(str::trim);
    lines.find(|line| line.starts_with("libp2p keypair:"))?;
    let keypair = lines.find(|line| !line.is_empty())?;
    let peer_id = keypair.rsplit(',').next()?.trim();
    if peer_id.is_empty() || !keypair.contains(',') {
        return None;
    }
    Some((keypair.to_string(), peer_id.to_string()))
}

#[cfg(unix)]
fn owner_of(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path)
        .ok()
        .map(|meta| format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner_of(_path: &Path) -> Option<String> {
    None
}
