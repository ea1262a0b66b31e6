//! Docker Engine implementation of [`ContainerRuntime`]

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ContainerHandle, ContainerInspection, ContainerRuntime, ContainerSpec, RuntimeError};
use crate::config::DockerSettings;

/// Container runtime backed by a Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    bind_ip: String,
}

impl DockerRuntime {
    /// Wrap an existing client
    pub fn new(docker: Docker, bind_ip: impl Into<String>) -> Self {
        Self {
            docker,
            bind_ip: bind_ip.into(),
        }
    }

    /// Connect using the configured endpoint, or the local defaults
    /// (`DOCKER_HOST` or the platform socket) when none is set
    pub fn connect(settings: &DockerSettings) -> Result<Self, RuntimeError> {
        let docker = match settings.endpoint.as_deref() {
            None | Some("") => Docker::connect_with_local_defaults(),
            Some(endpoint) if endpoint.starts_with("unix://") => Docker::connect_with_socket(
                endpoint,
                settings.timeout_secs,
                API_DEFAULT_VERSION,
            ),
            Some(endpoint) if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") => {
                Docker::connect_with_http(endpoint, settings.timeout_secs, API_DEFAULT_VERSION)
            }
            Some(endpoint) => {
                return Err(RuntimeError::Unavailable(format!(
                    "unsupported Docker endpoint scheme: {}",
                    endpoint
                )))
            }
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self::new(docker, settings.bind_ip.clone()))
    }

    /// Ping the daemon
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }
}

fn port_key(container_port: u16) -> String {
    format!("{}/tcp", container_port)
}

/// Map Docker's `"5432/tcp" -> [{HostPort: "55000"}]` bindings to numbers
///
/// Unbound entries, non-tcp ports and unparsable values are skipped.
fn published_ports(ports: &PortMap) -> HashMap<u16, u16> {
    let mut out = HashMap::new();
    for (key, bindings) in ports {
        let Some(port) = key
            .strip_suffix("/tcp")
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };

        let host_port = bindings
            .iter()
            .flatten()
            .filter_map(|b| b.host_port.as_deref())
            .filter_map(|p| p.parse::<u16>().ok())
            .find(|p| *p != 0);

        if let Some(host_port) = host_port {
            out.insert(port, host_port);
        }
    }
    out
}

fn runtime_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(RuntimeError::Unavailable(e.to_string())),
        }

        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePull {
                        image: image.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let key = port_key(spec.container_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(key.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: Some(self.bind_ip.clone()),
                // Empty host port lets the daemon pick a free one
                host_port: None,
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(
                spec.env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(spec.labels.iter().cloned().collect()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "Docker warning");
        }

        Ok(ContainerHandle::new(response.id))
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.docker
            .start_container::<String>(&handle.id, None)
            .await
            .map_err(|e| match e {
                DockerError::DockerResponseServerError { message, .. } => {
                    RuntimeError::StartFailed(message)
                }
                other => RuntimeError::Unavailable(other.to_string()),
            })
    }

    async fn inspect_container(
        &self,
        handle: &ContainerHandle,
    ) -> Result<ContainerInspection, RuntimeError> {
        let response = self
            .docker
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
            .map_err(runtime_error)?;

        let running = response
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let published_ports = response
            .network_settings
            .as_ref()
            .and_then(|n| n.ports.as_ref())
            .map(published_ports)
            .unwrap_or_default();

        Ok(ContainerInspection {
            running,
            published_ports,
        })
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(runtime_error)
    }
}
