//! Container runtime collaborators.
//!
//! The lifecycle controller never talks to a container engine directly. It
//! drives a [`ContainerRuntime`] one rendered service at a time and waits for
//! each call to report success or failure before committing any state.

mod docker;
mod r#trait;

pub use docker::DockerRuntime;
pub(crate) use docker::ensure_image;
pub use r#trait::{ContainerRuntime, ServiceStatus};
