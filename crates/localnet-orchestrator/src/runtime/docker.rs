//! Docker runtime implementation.
//!
//! Services are created straight from their rendered [`ComposeService`]
//! entries through the Docker API (via bollard), so the compose file on disk
//! and the running containers cannot drift apart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::service::{HostConfig, PortBinding};
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::deploy::ComposeService;
use crate::error::{OrchestratorError, Result};
use crate::runtime::r#trait::{ContainerRuntime, ServiceStatus};

/// Seconds a container gets to exit before it is killed.
const STOP_TIMEOUT_SECS: i64 = 30;

/// Container runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and verifies it answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// The underlying client, shared with the key generator.
    pub fn client(&self) -> Docker {
        self.docker.clone()
    }

    async fn create_container(&self, service: &ComposeService) -> Result<()> {
        ensure_image(&self.docker, &service.image).await?;
        let config = container_config(service)?;
        let options = CreateContainerOptions {
            name: service.container_name.as_str(),
            platform: None,
        };
        let response = self.docker.create_container(Some(options), config).await?;
        info!(container = %service.container_name, id = %response.id, "Created container");
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: false,
            ..Default::default()
        };
        match self.docker.remove_container(container, Some(options)).await {
            Ok(()) => {
                info!(container = %container, "Removed container");
                Ok(())
            }
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        match self
            .docker
            .remove_volume(volume, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => {
                debug!(volume = %volume, "Removed volume");
                Ok(())
            }
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_exit(&self, container: &str) -> Result<String> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(container, None::<WaitContainerOptions<String>>);
        while let Some(result) = wait.next().await {
            if let Err(e) = result {
                let output = self.collect_logs(container).await.unwrap_or_default();
                return Err(OrchestratorError::runtime_failure(
                    container,
                    format!("{e}: {}", output.trim()),
                ));
            }
        }

        self.collect_logs(container).await
    }

    async fn collect_logs(&self, container: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?.to_string());
        }
        Ok(output)
    }
}

/// Translates a rendered service into a container create request.
fn container_config(service: &ComposeService) -> Result<Config<String>> {
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for entry in &service.ports {
        let pairs = parse_port_entry(entry).ok_or_else(|| {
            OrchestratorError::runtime_failure(
                &service.container_name,
                format!("unparsable port entry {entry}"),
            )
        })?;
        for (host, container) in pairs {
            let key = format!("{container}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host.to_string()),
                }]),
            );
        }
    }

    let host_config = HostConfig {
        binds: Some(service.volumes.clone()),
        port_bindings: Some(port_bindings),
        network_mode: service.networks.first().cloned(),
        ..Default::default()
    };

    Ok(Config {
        image: Some(service.image.clone()),
        entrypoint: (!service.entrypoint.is_empty()).then(|| service.entrypoint.clone()),
        cmd: (!service.command.is_empty()).then(|| service.command.clone()),
        env: Some(
            service
                .environment
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
        ),
        labels: Some(service.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self, network: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let filters: HashMap<String, Vec<String>> = [("name".to_string(), vec![network.to_string()])]
            .into_iter()
            .collect();
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await?;
        if existing.iter().any(|n| n.name.as_deref() == Some(network)) {
            debug!(network = %network, "Using existing network");
            return Ok(());
        }

        let labels: HashMap<&str, &str> = labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let options = CreateNetworkOptions {
            name: network,
            driver: "bridge",
            labels,
            ..Default::default()
        };
        let response = self.docker.create_network(options).await?;
        info!(network = %network, id = ?response.id, "Created network");
        Ok(())
    }

    async fn start_service(&self, service: &ComposeService) -> Result<()> {
        let name = service.container_name.as_str();
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                if inspect.state.and_then(|s| s.running) == Some(true) {
                    debug!(container = %name, "Container already running");
                    return Ok(());
                }
            }
            Err(e) if is_status(&e, 404) => self.create_container(service).await?,
            Err(e) => return Err(e.into()),
        }

        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => {}
            Err(e) if is_status(&e, 304) => {}
            Err(e) => return Err(e.into()),
        }
        info!(container = %name, "Started container");
        Ok(())
    }

    async fn stop_service(&self, container: &str) -> Result<()> {
        let options = StopContainerOptions { t: STOP_TIMEOUT_SECS };
        match self.docker.stop_container(container, Some(options)).await {
            Ok(()) => {
                info!(container = %container, "Stopped container");
                Ok(())
            }
            Err(e) if is_status(&e, 304) || is_status(&e, 404) => {
                debug!(container = %container, "Container not running");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn service_status(&self, container: &str) -> Result<ServiceStatus> {
        match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let state = inspect.state.unwrap_or_default();
                if state.running == Some(true) {
                    Ok(ServiceStatus::Running)
                } else {
                    Ok(ServiceStatus::Exited {
                        exit_code: state.exit_code,
                    })
                }
            }
            Err(e) if is_status(&e, 404) => Ok(ServiceStatus::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container, Some(options));
        let mut output = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => output.push_str(&log.to_string()),
                Err(e) if is_status(&e, 404) => {
                    return Err(OrchestratorError::runtime_failure(container, "no such container"));
                }
                Err(e) => return Err(OrchestratorError::DockerApi(e)),
            }
        }
        Ok(output)
    }

    async fn teardown(&self, network: &str, containers: &[String], volumes: &[String]) -> Result<()> {
        let mut errors = Vec::new();

        for container in containers {
            if let Err(e) = self.remove_container(container).await {
                error!(container = %container, error = %e, "Failed to remove container");
                errors.push(format!("{container}: {e}"));
            }
        }

        for volume in volumes {
            if let Err(e) = self.remove_volume(volume).await {
                warn!(volume = %volume, error = %e, "Failed to remove volume");
                errors.push(format!("{volume}: {e}"));
            }
        }

        match self.docker.remove_network(network).await {
            Ok(()) => info!(network = %network, "Removed network"),
            Err(e) if is_status(&e, 404) => {}
            Err(e) => {
                error!(network = %network, error = %e, "Failed to remove network");
                errors.push(format!("{network}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::runtime_failure(network, errors.join("; ")))
        }
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<String> {
        let options = CreateExecOptions::<String> {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };
        let exec = match self.docker.create_exec(container, options).await {
            Ok(exec) => exec,
            Err(e) if is_status(&e, 404) => {
                return Err(OrchestratorError::runtime_failure(container, "no such container"));
            }
            Err(e) if is_status(&e, 409) => {
                return Err(OrchestratorError::runtime_failure(container, "container is not running"));
            }
            Err(e) => return Err(e.into()),
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = self.docker.start_exec(&exec.id, None).await? {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                    LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        match inspect.exit_code {
            Some(0) | None => {
                debug!(container = %container, command = ?command, "Exec finished");
                Ok(stdout)
            }
            Some(code) => Err(OrchestratorError::runtime_failure(
                container,
                format!("{} exited with {code}: {}", command.join(" "), stderr.trim()),
            )),
        }
    }

    async fn run_once(&self, service: &ComposeService) -> Result<String> {
        let name = service.container_name.as_str();
        self.remove_container(name).await?;
        self.create_container(service).await?;

        let outcome = self.wait_for_exit(name).await;

        if let Err(e) = self.remove_container(name).await {
            warn!(container = %name, error = %e, "Failed to remove one-shot container");
        }
        outcome
    }

    async fn remove_service(&self, container: &str, volumes: &[String]) -> Result<()> {
        self.remove_container(container).await?;
        for volume in volumes {
            self.remove_volume(volume).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "docker"
    }
}

/// Pulls `image` unless the daemon already has it.
pub(crate) async fn ensure_image(docker: &Docker, image: &str) -> Result<()> {
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }

    info!(image = %image, "Pulling image");
    let options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };
    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        match result {
            Ok(info) => {
                if let Some(status) = info.status {
                    debug!(status = %status, "Pull progress");
                }
            }
            Err(e) => return Err(OrchestratorError::runtime_failure(image, e)),
        }
    }
    Ok(())
}

fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

/// Expands a compose port entry (`"4000-4004:4000-4004"` or `"7070:80"`) into
/// `(host, container)` pairs.
fn parse_port_entry(entry: &str) -> Option<Vec<(u16, u16)>> {
    let (host, container) = entry.split_once(':')?;
    let range = |part: &str| -> Option<(u16, u16)> {
        match part.split_once('-') {
            Some((first, last)) => Some((first.parse().ok()?, last.parse().ok()?)),
            None => {
                let port = part.parse().ok()?;
                Some((port, port))
            }
        }
    };
    let (host_first, host_last) = range(host)?;
    let (container_first, container_last) = range(container)?;
    if host_last < host_first || host_last - host_first != container_last.checked_sub(container_first)? {
        return None;
    }
    Some(
        (0..=host_last - host_first)
            .map(|offset| (host_first + offset, container_first + offset))
            .collect(),
    )
}
