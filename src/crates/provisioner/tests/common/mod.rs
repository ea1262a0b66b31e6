//! Shared fixtures for provisioning tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use provisioner::credentials::{BcryptCodec, CodecError, CredentialCodec};
use provisioner::db::models::ConnectionRecord;
use provisioner::db::DatabaseConnection;
use provisioner::readiness::ReadinessPolicy;
use provisioner::registry::{ConnectionRegistry, RegistryError, SqlRegistry};
use provisioner::request::NaturalKey;
use provisioner::runtime::{
    ContainerHandle, ContainerInspection, ContainerRuntime, ContainerSpec, RuntimeError,
};
use provisioner::{EngineRegistry, Provisioner, ProvisionerConfig};
use secrecy::SecretString;

pub const FIRST_HOST_PORT: u16 = 55000;

/// In-memory container runtime
///
/// Every created container gets its own host port, starting at
/// [`FIRST_HOST_PORT`], and is reported running with that port bound
/// unless `never_ready` is set.
#[derive(Default)]
pub struct MockRuntime {
    pub pulls: AtomicUsize,
    pub creates: AtomicUsize,
    pub starts: AtomicUsize,
    pub inspects: AtomicUsize,
    pub removes: AtomicUsize,
    pub specs: Mutex<Vec<ContainerSpec>>,
    ports: Mutex<HashMap<String, (u16, u16)>>,
    never_ready: bool,
    fail_pull: bool,
    pull_delay: Option<Duration>,
    fail_create: bool,
    fail_start: bool,
    create_barrier: Option<Arc<Barrier>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers start but their port never gets a host binding
    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::default()
        }
    }

    /// Image pulls fail as if the registry rejected the image
    pub fn failing_pull() -> Self {
        Self {
            fail_pull: true,
            ..Self::default()
        }
    }

    /// Image pulls take `delay` to finish
    pub fn slow_pull(delay: Duration) -> Self {
        Self {
            pull_delay: Some(delay),
            ..Self::default()
        }
    }

    /// The engine refuses to create containers
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// `create_container` waits until `parties` creates are in flight
    pub fn with_create_barrier(parties: usize) -> Self {
        Self {
            create_barrier: Some(Arc::new(Barrier::new(parties))),
            ..Self::default()
        }
    }

    pub fn runtime_calls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
            + self.creates.load(Ordering::SeqCst)
            + self.starts.load(Ordering::SeqCst)
            + self.inspects.load(Ordering::SeqCst)
            + self.removes.load(Ordering::SeqCst)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_pull {
            return Err(RuntimeError::ImagePull {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(RuntimeError::Unavailable("Cannot connect to the Docker daemon".to_string()));
        }
        self.specs.lock().unwrap().push(spec.clone());

        if let Some(barrier) = &self.create_barrier {
            barrier.wait().await;
        }

        let id = format!("{:064x}", n + 1);
        let host_port = FIRST_HOST_PORT + n as u16;
        self.ports
            .lock()
            .unwrap()
            .insert(id.clone(), (spec.container_port, host_port));
        Ok(ContainerHandle::new(id))
    }

    async fn start_container(&self, _handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(RuntimeError::StartFailed("port is already allocated".to_string()));
        }
        Ok(())
    }

    async fn inspect_container(
        &self,
        handle: &ContainerHandle,
    ) -> Result<ContainerInspection, RuntimeError> {
        self.inspects.fetch_add(1, Ordering::SeqCst);

        let (container_port, host_port) = self
            .ports
            .lock()
            .unwrap()
            .get(&handle.id)
            .copied()
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))?;

        let mut published_ports = HashMap::new();
        if !self.never_ready {
            published_ports.insert(container_port, host_port);
        }
        Ok(ContainerInspection {
            running: true,
            published_ports,
        })
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.ports.lock().unwrap().remove(&handle.id);
        Ok(())
    }
}

/// Registry whose backing store is down
#[derive(Default)]
pub struct FailingRegistry;

#[async_trait]
impl ConnectionRegistry for FailingRegistry {
    async fn find(&self, _key: &NaturalKey) -> Result<Option<ConnectionRecord>, RegistryError> {
        Err(RegistryError::Unavailable("database is locked".to_string()))
    }

    async fn save(&self, _record: &ConnectionRecord) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("database is locked".to_string()))
    }

    async fn replace(&self, _record: &ConnectionRecord) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("database is locked".to_string()))
    }
}

/// SQL registry whose writes commit, then take `ack_delay` to return
pub struct SlowAckRegistry {
    pub inner: SqlRegistry,
    pub ack_delay: Duration,
}

#[async_trait]
impl ConnectionRegistry for SlowAckRegistry {
    async fn find(&self, key: &NaturalKey) -> Result<Option<ConnectionRecord>, RegistryError> {
        self.inner.find(key).await
    }

    async fn save(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        self.inner.save(record).await?;
        tokio::time::sleep(self.ack_delay).await;
        Ok(())
    }

    async fn replace(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        self.inner.replace(record).await?;
        tokio::time::sleep(self.ack_delay).await;
        Ok(())
    }
}

/// SQL registry that can be read but rejects every write
pub struct ReadOnlyRegistry {
    pub inner: SqlRegistry,
}

#[async_trait]
impl ConnectionRegistry for ReadOnlyRegistry {
    async fn find(&self, key: &NaturalKey) -> Result<Option<ConnectionRecord>, RegistryError> {
        self.inner.find(key).await
    }

    async fn save(&self, _record: &ConnectionRecord) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("disk I/O error".to_string()))
    }

    async fn replace(&self, _record: &ConnectionRecord) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("disk I/O error".to_string()))
    }
}

/// Registry where every insert collides but the colliding record is gone
/// by the time it is read
#[derive(Default)]
pub struct VanishingWinnerRegistry {
    pub finds: AtomicUsize,
}

#[async_trait]
impl ConnectionRegistry for VanishingWinnerRegistry {
    async fn find(&self, _key: &NaturalKey) -> Result<Option<ConnectionRecord>, RegistryError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn save(&self, _record: &ConnectionRecord) -> Result<(), RegistryError> {
        Err(RegistryError::DuplicateKey)
    }

    async fn replace(&self, _record: &ConnectionRecord) -> Result<(), RegistryError> {
        Err(RegistryError::DuplicateKey)
    }
}

/// Codec whose hashing backend always fails
pub struct BrokenCodec;

impl CredentialCodec for BrokenCodec {
    fn hash(&self, _password: &SecretString) -> Result<String, CodecError> {
        Err(CodecError::Hash("invalid salt".to_string()))
    }

    fn verify(&self, _digest: &str, _password: &SecretString) -> bool {
        false
    }
}

/// Fresh in-memory registry database with migrations applied
pub async fn setup_db() -> DatabaseConnection {
    // A single connection keeps every query on the same in-memory database
    let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
        .await
        .expect("Failed to open in-memory database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

/// Provisioner settings with fast, deterministic readiness polling
pub fn test_config() -> ProvisionerConfig {
    ProvisionerConfig::new()
        .with_public_host("db.test.local")
        .with_call_timeout(Duration::from_secs(5))
        .with_readiness(
            ReadinessPolicy::new(Duration::from_secs(2))
                .with_initial_interval(Duration::from_millis(5))
                .with_max_interval(Duration::from_millis(20))
                .with_jitter(false)
                .with_tcp_probe(false),
        )
}

pub fn test_codec() -> Arc<BcryptCodec> {
    Arc::new(BcryptCodec::new(4).expect("cost 4 is valid"))
}

/// Provisioner over the given runtime and a fresh SQL registry
pub async fn setup_provisioner(
    runtime: Arc<MockRuntime>,
    config: ProvisionerConfig,
) -> (Arc<Provisioner>, DatabaseConnection) {
    let db = setup_db().await;
    let provisioner = Provisioner::new(
        Arc::new(EngineRegistry::builtin()),
        runtime,
        Arc::new(SqlRegistry::new(db.clone())),
        test_codec(),
        config,
    );
    (Arc::new(provisioner), db)
}

/// Provisioner over explicit collaborators and the built-in engines
pub fn provisioner_with(
    runtime: Arc<MockRuntime>,
    registry: Arc<dyn ConnectionRegistry>,
    codec: Arc<dyn CredentialCodec>,
    config: ProvisionerConfig,
) -> Provisioner {
    Provisioner::new(
        Arc::new(EngineRegistry::builtin()),
        runtime,
        registry,
        codec,
        config,
    )
}
