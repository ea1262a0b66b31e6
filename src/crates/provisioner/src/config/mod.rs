//! Configuration module for provisioner-server
//!
//! - TOML server configuration (registry database, Docker, provisioning, engines)
//! - `${VAR:default}` environment expansion

pub mod env;
pub mod server;

pub use env::{expand_env_in_string, expand_variables};
pub use server::{
    DatabaseConfig, DockerSettings, ProvisioningConfig, ReadinessConfig, ServerConfig,
    ServerConfigError, ServerInfoConfig,
};
