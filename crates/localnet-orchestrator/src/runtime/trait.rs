//! Container runtime trait definition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deploy::ComposeService;
use crate::error::Result;

/// Operations the lifecycle controller needs from a container engine.
///
/// Every method is addressed by container name, which is unique per host
/// (`<service>-<network>`). Calls must be idempotent with respect to
/// already-correct state: starting a running service, stopping a stopped one
/// or tearing down resources that are already gone all succeed.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the controller holds them behind an
/// `Arc` and may be driven from any task.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates the bridge network `network` unless it already exists.
    async fn ensure_network(&self, network: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Brings `service` up, creating its container on first use.
    ///
    /// Returns once the engine reports the container as started.
    async fn start_service(&self, service: &ComposeService) -> Result<()>;

    /// Stops the container named `container`. Missing or already stopped
    /// containers are not an error.
    async fn stop_service(&self, container: &str) -> Result<()>;

    /// Reports the liveness of `container`.
    async fn service_status(&self, container: &str) -> Result<ServiceStatus>;

    /// Returns the combined stdout/stderr of `container`, optionally only the
    /// last `tail` lines.
    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String>;

    /// Removes `containers`, `volumes` and the bridge network `network`.
    /// Resources that do not exist are skipped.
    async fn teardown(&self, network: &str, containers: &[String], volumes: &[String]) -> Result<()>;

    /// Runs `command` inside the running container `container` and returns
    /// its stdout. A non-zero exit status is an error.
    async fn exec(&self, container: &str, command: &[String]) -> Result<String>;

    /// Runs `service` as a one-shot container: create, start, wait for exit,
    /// collect output, remove. A non-zero exit status is an error.
    async fn run_once(&self, service: &ComposeService) -> Result<String>;

    /// Removes the container `container` (running or not) together with the
    /// named `volumes`, so the next start begins from an empty state.
    async fn remove_service(&self, container: &str, volumes: &[String]) -> Result<()>;

    /// Returns the runtime name for logging.
    fn name(&self) -> &str;
}

/// Liveness of one container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceStatus {
    /// The container is running.
    Running,
    /// The container exists but is not running.
    Exited {
        /// Last exit code, if the container ever ran.
        exit_code: Option<i64>,
    },
    /// No container with that name exists.
    Missing,
}

impl ServiceStatus {
    /// Returns true if the container is running.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ServiceStatus::Exited { exit_code: Some(137) }).unwrap();
        assert_eq!(json, r#"{"status":"exited","exit_code":137}"#);
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Running).unwrap(),
            r#"{"status":"running"}"#
        );
        assert!(ServiceStatus::Running.is_running());
        assert!(!ServiceStatus::Missing.is_running());
    }
}
