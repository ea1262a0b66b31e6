//! Provisioning orchestrator
//!
//! [`Provisioner::create_database`] runs one request through
//!
//! ```text
//! LookupExisting -> Reuse
//!                -> ResolveEngine -> PullImage -> CreateContainer
//!                   -> StartContainer -> AwaitReady -> ResolvePort
//!                   -> BuildConnectionString -> HashCredential -> Persist -> Done
//! ```
//!
//! Stages execute strictly in order. Every external call is bounded by the
//! configured per-call timeout (the image pull by its own, longer bound) and
//! aborts as soon as the caller's cancellation token fires. The registry
//! write itself runs to completion on its own task so that its outcome is
//! known before any rollback decision.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::credentials::CredentialCodec;
use crate::db::models::ConnectionRecord;
use crate::engine::{ConnectionParams, EngineProfile, EngineRegistry};
use crate::readiness::{self, ReadinessError, ReadinessPolicy};
use crate::registry::ConnectionRegistry;
use crate::request::{NaturalKey, ProvisionRequest};
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, RuntimeError, LABEL_DB_TYPE,
    LABEL_MANAGED_BY, LABEL_OWNER, MANAGED_BY,
};
use crate::{ProvisionError, Result};

/// What to do when a record exists but the password does not verify
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Fail with `CredentialMismatch` without touching the runtime
    #[default]
    Reject,
    /// Provision a fresh database and atomically replace the record
    Replace,
}

/// Provisioning state machine stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionStage {
    LookupExisting,
    Reuse,
    ResolveEngine,
    PullImage,
    CreateContainer,
    StartContainer,
    AwaitReady,
    ResolvePort,
    BuildConnectionString,
    HashCredential,
    Persist,
    Done,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Host placed in issued connection strings and checked for readiness
    pub public_host: String,

    /// Bound on each runtime or registry call
    pub call_timeout: Duration,

    /// Bound on making the engine image present locally
    pub pull_timeout: Duration,

    pub readiness: ReadinessPolicy,

    /// Force-remove the container when a later stage fails
    pub rollback_on_failure: bool,

    pub mismatch_policy: MismatchPolicy,

    /// Prefix for generated container names
    pub container_prefix: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            public_host: "localhost".to_string(),
            call_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(600),
            readiness: ReadinessPolicy::default(),
            rollback_on_failure: false,
            mismatch_policy: MismatchPolicy::Reject,
            container_prefix: "dbprov".to_string(),
        }
    }
}

impl ProvisionerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_rollback_on_failure(mut self, rollback: bool) -> Self {
        self.rollback_on_failure = rollback;
        self
    }

    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch_policy = policy;
        self
    }

    pub fn with_container_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.container_prefix = prefix.into();
        self
    }
}

/// How a provisioning run that got past `CreateContainer` ended
enum Completion {
    /// Our record was persisted
    Registered(String),
    /// A concurrent request registered first with the same password; the
    /// winner's string is returned and our container is surplus
    Adopted(String),
    /// A concurrent request registered first with another password; our own
    /// string is returned and our container stays up unregistered
    Unregistered(String),
}

/// Reuse-or-create orchestrator
pub struct Provisioner {
    engines: Arc<EngineRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn ConnectionRegistry>,
    codec: Arc<dyn CredentialCodec>,
    config: ProvisionerConfig,
}

impl Provisioner {
    pub fn new(
        engines: Arc<EngineRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn ConnectionRegistry>,
        codec: Arc<dyn CredentialCodec>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            engines,
            runtime,
            registry,
            codec,
            config,
        }
    }

    /// Return a connection string for the requested database
    ///
    /// Reuses the registered database when the password verifies against the
    /// stored hash; otherwise provisions a new container and registers it.
    pub async fn create_database(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        request.validate()?;

        let span = info_span!(
            "provision",
            request_id = %Uuid::new_v4(),
            owner = %request.key.owner,
            db_type = %request.key.db_type,
        );

        async {
            let result = self.run(request, cancel).await;
            if let Err(err) = &result {
                debug!(kind = err.kind(), error = %err, "Provisioning failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &ProvisionRequest, cancel: &CancellationToken) -> Result<String> {
        let key = &request.key;

        let existing = self
            .registry_call(ProvisionStage::LookupExisting, cancel, self.registry.find(key))
            .await?;

        let replace = match existing {
            None => false,
            Some(record) => {
                if self
                    .verify(ProvisionStage::LookupExisting, &record.hashed_password, &request.password, cancel)
                    .await?
                {
                    info!(stage = %ProvisionStage::Reuse, "Reusing registered database");
                    return Ok(record.connection_string);
                }
                match self.config.mismatch_policy {
                    MismatchPolicy::Reject => return Err(ProvisionError::CredentialMismatch),
                    MismatchPolicy::Replace => {
                        info!("Password mismatch; provisioning a replacement database");
                        true
                    }
                }
            }
        };

        debug!(stage = %ProvisionStage::ResolveEngine, "Resolving engine");
        let profile = self.engines.resolve(&key.db_type)?;

        self.guarded(
            ProvisionStage::PullImage,
            cancel,
            self.config.pull_timeout,
            self.runtime.ensure_image(&profile.image),
            |reason| ProvisionError::ImagePullFailed {
                image: profile.image.clone(),
                reason,
            },
        )
        .await?;

        let spec = self.container_spec(request, profile);
        let handle = self
            .runtime_call(
                ProvisionStage::CreateContainer,
                cancel,
                self.runtime.create_container(&spec),
            )
            .await?;
        debug!(container = %handle, name = %spec.name, "Container created");

        match self.complete(request, profile, &handle, replace, cancel).await {
            Ok(Completion::Registered(connection_string)) => {
                info!(stage = %ProvisionStage::Done, container = %handle, "Provisioned new database");
                Ok(connection_string)
            }
            Ok(Completion::Adopted(connection_string)) => {
                info!(container = %handle, "Concurrent request registered first; returning its database");
                if self.config.rollback_on_failure {
                    self.rollback(key, &handle).await;
                }
                Ok(connection_string)
            }
            Ok(Completion::Unregistered(connection_string)) => {
                warn!(
                    container = %handle,
                    "Concurrent request registered first with another password; container left running unregistered"
                );
                Ok(connection_string)
            }
            Err(err) => {
                if self.config.rollback_on_failure {
                    self.rollback(key, &handle).await;
                }
                Err(err)
            }
        }
    }

    /// Stages after `CreateContainer`
    async fn complete(
        &self,
        request: &ProvisionRequest,
        profile: &EngineProfile,
        handle: &ContainerHandle,
        replace: bool,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let key = &request.key;

        self.runtime_call(
            ProvisionStage::StartContainer,
            cancel,
            self.runtime.start_container(handle),
        )
        .await?;

        debug!(stage = %ProvisionStage::AwaitReady, container = %handle, "Waiting for readiness");
        readiness::await_ready(
            self.runtime.as_ref(),
            handle,
            profile.container_port,
            profile.wire_protocol,
            &self.config.public_host,
            &self.config.readiness,
            self.config.call_timeout,
            cancel,
        )
        .await
        .map_err(|err| match err {
            ReadinessError::Timeout(waited) => ProvisionError::ReadinessTimeout(waited),
            ReadinessError::Cancelled => ProvisionError::Cancelled {
                stage: ProvisionStage::AwaitReady,
            },
            ReadinessError::Runtime(e) => e.into(),
        })?;

        let max_wait = self.config.readiness.max_wait;
        let host_port = self
            .runtime_call(ProvisionStage::ResolvePort, cancel, async {
                self.runtime
                    .resolve_published_port(handle, profile.container_port)
                    .await
                    .map_err(|err| match err {
                        RuntimeError::PortNotBound(_) => ProvisionError::ReadinessTimeout(max_wait),
                        other => other.into(),
                    })
            })
            .await?;

        debug!(stage = %ProvisionStage::BuildConnectionString, host_port, "Port resolved");
        let connection_string = profile.connection_string(&ConnectionParams {
            login: &key.login,
            password: request.password.expose_secret(),
            host: &self.config.public_host,
            port: host_port,
            db_name: &key.db_name,
        });

        let hashed_password = self.hash(&request.password, cancel).await?;

        let record = ConnectionRecord::new(key, hashed_password, connection_string, handle.id.clone());
        match self.persist(&record, replace, cancel).await {
            Ok(()) => Ok(Completion::Registered(record.connection_string)),
            Err(ProvisionError::DuplicateKey) => {
                self.resolve_conflict(request, record.connection_string, cancel)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// Write the record on a detached task
    ///
    /// The write is never dropped half way: when the caller gives up (token or
    /// per-call timeout) and rollback is enabled, the write is given another
    /// `call_timeout` to settle so that the rollback check sees its outcome.
    async fn persist(
        &self,
        record: &ConnectionRecord,
        replace: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(stage = %ProvisionStage::Persist, replace, "Registering connection");

        let registry = Arc::clone(&self.registry);
        let owned = record.clone();
        let mut write = tokio::spawn(async move {
            if replace {
                registry.replace(&owned).await
            } else {
                registry.save(&owned).await
            }
        });

        let outcome = self
            .registry_call(ProvisionStage::Persist, cancel, async {
                match (&mut write).await {
                    Ok(result) => result.map_err(ProvisionError::from),
                    Err(e) => Err(ProvisionError::RegistryUnavailable(e.to_string())),
                }
            })
            .await;

        if outcome.is_err() && self.config.rollback_on_failure && !write.is_finished() {
            if tokio::time::timeout(self.config.call_timeout, write).await.is_err() {
                warn!("Registry write still pending after failure");
            }
        }

        outcome
    }

    /// First writer wins: look at the record that beat us to `Persist`
    async fn resolve_conflict(
        &self,
        request: &ProvisionRequest,
        own_connection_string: String,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let winner = self
            .registry_call(ProvisionStage::Persist, cancel, self.registry.find(&request.key))
            .await?;

        let Some(winner) = winner else {
            // Conflicting record vanished before we could read it
            return Err(ProvisionError::DuplicateKey);
        };

        if self
            .verify(ProvisionStage::Persist, &winner.hashed_password, &request.password, cancel)
            .await?
        {
            Ok(Completion::Adopted(winner.connection_string))
        } else {
            Ok(Completion::Unregistered(own_connection_string))
        }
    }

    fn container_spec(&self, request: &ProvisionRequest, profile: &EngineProfile) -> ContainerSpec {
        let key = &request.key;
        let suffix = Uuid::new_v4().simple().to_string();

        ContainerSpec {
            name: format!(
                "{}-{}-{}",
                self.config.container_prefix,
                profile.name,
                &suffix[..12]
            ),
            image: profile.image.clone(),
            env: profile.environment(&key.login, &request.password, &key.db_name),
            container_port: profile.container_port,
            labels: vec![
                (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
                (LABEL_OWNER.to_string(), key.owner.clone()),
                (LABEL_DB_TYPE.to_string(), key.db_type.clone()),
            ],
        }
    }

    /// Remove our container unless the registry points at it
    ///
    /// A registry write that timed out or was cancelled may still have
    /// committed; removing the container then would leave a record that is
    /// reused forever. When the registry cannot be read the container is kept.
    async fn rollback(&self, key: &NaturalKey, handle: &ContainerHandle) {
        // Not bound to the request token, which may already have fired
        match tokio::time::timeout(self.config.call_timeout, self.registry.find(key)).await {
            Ok(Ok(Some(record))) if record.container_id == handle.id => {
                warn!(container = %handle, "Container is registered despite the failure; keeping it");
                return;
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(container = %handle, error = %err, "Cannot confirm container is unregistered; keeping it");
                return;
            }
            Err(_) => {
                warn!(container = %handle, "Timed out confirming container is unregistered; keeping it");
                return;
            }
        }

        match tokio::time::timeout(self.config.call_timeout, self.runtime.remove_container(handle))
            .await
        {
            Ok(Ok(())) => warn!(container = %handle, "Removed container after failed provisioning"),
            Ok(Err(err)) => {
                warn!(container = %handle, error = %err, "Failed to remove container; manual cleanup required")
            }
            Err(_) => {
                warn!(container = %handle, "Timed out removing container; manual cleanup required")
            }
        }
    }

    async fn hash(&self, password: &SecretString, cancel: &CancellationToken) -> Result<String> {
        let stage = ProvisionStage::HashCredential;
        debug!(stage = %stage, "Hashing credential");

        let codec = Arc::clone(&self.codec);
        let password = SecretString::from(password.expose_secret().to_string());
        let task = tokio::task::spawn_blocking(move || codec.hash(&password));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisionError::Cancelled { stage }),
            joined = task => match joined {
                Ok(result) => Ok(result?),
                Err(e) => Err(ProvisionError::Credential(e.to_string())),
            },
        }
    }

    async fn verify(
        &self,
        stage: ProvisionStage,
        digest: &str,
        password: &SecretString,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let codec = Arc::clone(&self.codec);
        let digest = digest.to_string();
        let password = SecretString::from(password.expose_secret().to_string());
        let task = tokio::task::spawn_blocking(move || codec.verify(&digest, &password));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisionError::Cancelled { stage }),
            joined = task => joined.map_err(|e| ProvisionError::Credential(e.to_string())),
        }
    }

    async fn runtime_call<T, E, F>(
        &self,
        stage: ProvisionStage,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<ProvisionError>,
    {
        self.guarded(
            stage,
            cancel,
            self.config.call_timeout,
            call,
            ProvisionError::RuntimeUnavailable,
        )
        .await
    }

    async fn registry_call<T, E, F>(
        &self,
        stage: ProvisionStage,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<ProvisionError>,
    {
        self.guarded(
            stage,
            cancel,
            self.config.call_timeout,
            call,
            ProvisionError::RegistryUnavailable,
        )
        .await
    }

    /// Run an external call under the cancellation token and per-call timeout
    async fn guarded<T, E, F, M>(
        &self,
        stage: ProvisionStage,
        cancel: &CancellationToken,
        timeout: Duration,
        call: F,
        on_timeout: M,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<ProvisionError>,
        M: FnOnce(String) -> ProvisionError,
    {
        debug!(stage = %stage, "Calling external service");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisionError::Cancelled { stage }),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(on_timeout(format!("{} timed out after {:?}", stage, timeout))),
            },
        }
    }
}
