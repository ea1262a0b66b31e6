//! On-demand provisioning of ephemeral, per-tenant database instances
//!
//! Given an owner, login, password, database name and engine type, the
//! [`Provisioner`] either hands back the connection string of a database it
//! issued earlier (when the password verifies against the stored hash) or
//! starts a fresh database container, registers it and returns a new
//! connection string.
//!
//! # Modules
//!
//! - `engine` - Engine profiles (image, port, env naming, connection template)
//! - `credentials` - One-way password hashing and verification
//! - `runtime` - Container runtime capability and its Docker implementation
//! - `registry` - Connection registry capability and its SQL implementation
//! - `readiness` - Bounded poll-with-backoff until a container is reachable
//! - `provisioner` - The provisioning state machine
//! - `db` - SQLite connection, models and repositories backing the registry
//! - `config` - Server configuration loading
//! - `proto`, `services`, `api` - Transport adapters

pub mod api;
pub mod config;
pub mod credentials;
pub mod db;
pub mod engine;
pub mod proto;
pub mod provisioner;
pub mod readiness;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod services;

pub use engine::{EngineProfile, EngineRegistry};
pub use provisioner::{MismatchPolicy, ProvisionStage, Provisioner, ProvisionerConfig};
pub use request::{NaturalKey, ProvisionRequest};

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a provisioning call
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required request field was missing or empty
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The requested engine type is not registered
    #[error("Unsupported database type: {0}")]
    UnsupportedEngine(String),

    /// A record exists for the key but the password does not verify
    #[error("Credentials do not match the existing database")]
    CredentialMismatch,

    /// The container runtime could not be reached or rejected the call
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The engine image could not be materialized
    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    /// The container was created but would not start
    #[error("Failed to start container: {0}")]
    StartFailed(String),

    /// The database did not become reachable within the readiness bound
    #[error("Database was not ready after {0:?}")]
    ReadinessTimeout(Duration),

    /// The connection registry could not be read or written
    #[error("Connection registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// A concurrent request registered the same key and could not be resolved
    #[error("A connection for this database was registered concurrently")]
    DuplicateKey,

    /// The caller cancelled the request
    #[error("Provisioning cancelled during {stage}")]
    Cancelled { stage: ProvisionStage },

    /// Password hashing failed
    #[error("Credential codec failure: {0}")]
    Credential(String),
}

/// Coarse classification used for retry decisions and status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fix the request; retrying unchanged will fail again
    Client,
    /// Infrastructure hiccup; the whole call may be retried
    Transient,
    /// Server-side fault that retrying will not fix
    Fatal,
}

impl ProvisionError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ProvisionError::InvalidRequest(_)
            | ProvisionError::UnsupportedEngine(_)
            | ProvisionError::CredentialMismatch => ErrorClass::Client,
            ProvisionError::RuntimeUnavailable(_)
            | ProvisionError::ImagePullFailed { .. }
            | ProvisionError::StartFailed(_)
            | ProvisionError::ReadinessTimeout(_)
            | ProvisionError::RegistryUnavailable(_)
            | ProvisionError::DuplicateKey
            | ProvisionError::Cancelled { .. } => ErrorClass::Transient,
            ProvisionError::Credential(_) => ErrorClass::Fatal,
        }
    }

    /// Whether the caller may safely retry the whole provisioning call
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Stable identifier for programmatic handling
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::InvalidRequest(_) => "INVALID_REQUEST",
            ProvisionError::UnsupportedEngine(_) => "UNSUPPORTED_ENGINE",
            ProvisionError::CredentialMismatch => "CREDENTIAL_MISMATCH",
            ProvisionError::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            ProvisionError::ImagePullFailed { .. } => "IMAGE_PULL_FAILED",
            ProvisionError::StartFailed(_) => "START_FAILED",
            ProvisionError::ReadinessTimeout(_) => "READINESS_TIMEOUT",
            ProvisionError::RegistryUnavailable(_) => "REGISTRY_UNAVAILABLE",
            ProvisionError::DuplicateKey => "DUPLICATE_KEY",
            ProvisionError::Cancelled { .. } => "CANCELLED",
            ProvisionError::Credential(_) => "CREDENTIAL_FAILURE",
        }
    }
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
