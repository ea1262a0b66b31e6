//! Container runtime capability
//!
//! The provisioner only needs a narrow slice of a container engine: make an
//! image present, create a container from it with one published port, start
//! it, inspect it, and (for opt-in rollback) remove it. [`ContainerRuntime`]
//! captures exactly that slice; [`docker::DockerRuntime`] implements it over
//! the Docker Engine API.

pub mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::ProvisionError;

/// Label keys set on every container this service creates
pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const LABEL_OWNER: &str = "owner";
pub const LABEL_DB_TYPE: &str = "db-type";
pub const MANAGED_BY: &str = "dbprovision";

/// Container runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine could not be reached or rejected the call
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Container failed to start: {0}")]
    StartFailed(String),

    /// The container is not running or the port has no host binding yet
    #[error("Container port {0} is not bound to a host port")]
    PortNotBound(u16),

    #[error("Container not found: {0}")]
    NotFound(String),
}

impl From<RuntimeError> for ProvisionError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => ProvisionError::RuntimeUnavailable(msg),
            RuntimeError::ImagePull { image, reason } => {
                ProvisionError::ImagePullFailed { image, reason }
            }
            RuntimeError::StartFailed(msg) => ProvisionError::StartFailed(msg),
            other @ (RuntimeError::PortNotBound(_) | RuntimeError::NotFound(_)) => {
                ProvisionError::RuntimeUnavailable(other.to_string())
            }
        }
    }
}

/// What to run
#[derive(Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Ordered environment bindings; values may contain credentials
    pub env: Vec<(String, String)>,
    /// TCP port the engine listens on inside the container
    pub container_port: u16,
    pub labels: Vec<(String, String)>,
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("env", &env_keys)
            .field("container_port", &self.container_port)
            .field("labels", &self.labels)
            .finish()
    }
}

/// Reference to a created container, valid for the duration of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Docker ids are 64 hex chars; the 12-char prefix is what the CLI shows
        let short = self.id.get(..12).unwrap_or(&self.id);
        f.write_str(short)
    }
}

/// Observed container state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInspection {
    pub running: bool,
    /// Container TCP port -> host port
    pub published_ports: HashMap<u16, u16>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make the image available locally, pulling it when missing
    ///
    /// Runtimes that resolve images on their own keep the default.
    async fn ensure_image(&self, _image: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Create the container with its port published to a runtime-chosen
    /// host port
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn inspect_container(
        &self,
        handle: &ContainerHandle,
    ) -> Result<ContainerInspection, RuntimeError>;

    /// Force-remove the container and its anonymous volumes
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Host port published for `container_port`
    ///
    /// Fails with [`RuntimeError::PortNotBound`] unless the container is
    /// running and the port has a host binding.
    async fn resolve_published_port(
        &self,
        handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<u16, RuntimeError> {
        let inspection = self.inspect_container(handle).await?;
        if !inspection.running {
            return Err(RuntimeError::PortNotBound(container_port));
        }
        inspection
            .published_ports
            .get(&container_port)
            .copied()
            .ok_or(RuntimeError::PortNotBound(container_port))
    }
}
