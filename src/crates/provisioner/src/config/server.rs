//! Server configuration for provisioner-server
//!
//! Loads and parses provisioner-server.toml. Every section is optional and
//! falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::env::expand_variables;
use crate::credentials::{MAX_COST, MIN_COST};
use crate::engine::{EngineConfigError, EngineRegistry, EngineSettings};
use crate::provisioner::{MismatchPolicy, ProvisionerConfig};
use crate::readiness::ReadinessPolicy;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid engine configuration: {0}")]
    Engine(#[from] EngineConfigError),
}

/// Server identification and listen address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfoConfig {
    /// Server name for identification
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: "provisioner-server".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Registry database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:provisioner.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Longest readiness wait accepted from configuration (one hour)
pub const MAX_READINESS_WAIT_SECS: u64 = 3600;

/// Docker daemon connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// `unix://`, `tcp://` or `http://` endpoint; local defaults when unset
    pub endpoint: Option<String>,
    /// Client request timeout in seconds
    pub timeout_secs: u64,
    /// Bound on pulling a missing engine image, in seconds
    pub pull_timeout_secs: u64,
    /// Host interface published container ports bind to
    pub bind_ip: String,
    /// Host name placed in issued connection strings
    pub public_host: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 120,
            pull_timeout_secs: 600,
            bind_ip: "0.0.0.0".to_string(),
            public_host: "localhost".to_string(),
        }
    }
}

/// Readiness wait settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_wait_secs: u64,
    pub initial_interval_ms: u64,
    pub backoff_factor: f64,
    pub max_interval_ms: u64,
    pub jitter: bool,
    pub tcp_probe: bool,
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 60,
            initial_interval_ms: 250,
            backoff_factor: 2.0,
            max_interval_ms: 5000,
            jitter: true,
            tcp_probe: true,
            probe_timeout_ms: 1000,
        }
    }
}

impl ReadinessConfig {
    pub fn to_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy::new(Duration::from_secs(self.max_wait_secs))
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_backoff_factor(self.backoff_factor)
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_jitter(self.jitter)
            .with_tcp_probe(self.tcp_probe)
            .with_probe_timeout(Duration::from_millis(self.probe_timeout_ms))
    }
}

/// Orchestrator behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Bound on each runtime or registry call
    pub call_timeout_secs: u64,
    pub bcrypt_cost: u32,
    pub rollback_on_failure: bool,
    pub mismatch_policy: MismatchPolicy,
    pub container_prefix: String,
    pub readiness: ReadinessConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            bcrypt_cost: 10,
            rollback_on_failure: false,
            mismatch_policy: MismatchPolicy::Reject,
            container_prefix: "dbprov".to_string(),
            readiness: ReadinessConfig::default(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerInfoConfig,
    pub database: DatabaseConfig,
    pub docker: DockerSettings,
    pub provisioning: ProvisioningConfig,
    /// Overrides for built-in engines and additional engines
    pub engines: BTreeMap<String, EngineSettings>,
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ServerConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(ServerConfigError::ReadError)?;
        Self::from_str(&content)
    }

    /// Load configuration from TOML string, expanding `${VAR:default}` references
    pub fn from_str(content: &str) -> Result<Self, ServerConfigError> {
        let mut value: toml::Value = toml::from_str(content).map_err(ServerConfigError::ParseError)?;
        expand_variables(&mut value);
        value.try_into().map_err(ServerConfigError::ParseError)
    }

    /// Load configuration from default location or environment
    ///
    /// Searches for config in:
    /// 1. CONFIG_PATH environment variable
    /// 2. ./config/provisioner-server.toml
    /// 3. ../config/provisioner-server.toml (for development)
    /// 4. ./provisioner-server.toml
    pub fn load() -> Result<Self, ServerConfigError> {
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(config_path);
        }

        let paths = [
            PathBuf::from("config/provisioner-server.toml"),
            PathBuf::from("../config/provisioner-server.toml"),
            PathBuf::from("./provisioner-server.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Err(ServerConfigError::InvalidConfig(
            "Configuration file not found. Set CONFIG_PATH or place provisioner-server.toml in config/".to_string(),
        ))
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ServerConfigError> {
        let invalid = |msg: &str| Err(ServerConfigError::InvalidConfig(msg.to_string()));

        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be at least 1");
        }
        if self.docker.public_host.trim().is_empty() {
            return invalid("docker.public_host must not be empty");
        }
        if self.docker.timeout_secs == 0 {
            return invalid("docker.timeout_secs must be at least 1");
        }
        if self.docker.pull_timeout_secs == 0 {
            return invalid("docker.pull_timeout_secs must be at least 1");
        }

        let p = &self.provisioning;
        if p.call_timeout_secs == 0 {
            return invalid("provisioning.call_timeout_secs must be at least 1");
        }
        if !(MIN_COST..=MAX_COST).contains(&p.bcrypt_cost) {
            return Err(ServerConfigError::InvalidConfig(format!(
                "provisioning.bcrypt_cost must be within {}..={}",
                MIN_COST, MAX_COST
            )));
        }
        if p.container_prefix.trim().is_empty() {
            return invalid("provisioning.container_prefix must not be empty");
        }

        let r = &p.readiness;
        if r.max_wait_secs == 0 || r.max_wait_secs > MAX_READINESS_WAIT_SECS {
            return Err(ServerConfigError::InvalidConfig(format!(
                "provisioning.readiness.max_wait_secs must be within 1..={}",
                MAX_READINESS_WAIT_SECS
            )));
        }
        if r.initial_interval_ms == 0 || r.max_interval_ms < r.initial_interval_ms {
            return invalid(
                "provisioning.readiness intervals must satisfy 0 < initial_interval_ms <= max_interval_ms",
            );
        }
        if !r.backoff_factor.is_finite() || r.backoff_factor < 1.0 {
            return invalid("provisioning.readiness.backoff_factor must be >= 1.0");
        }
        if r.tcp_probe && r.probe_timeout_ms == 0 {
            return invalid("provisioning.readiness.probe_timeout_ms must be at least 1");
        }

        self.engine_registry()?;
        Ok(())
    }

    /// Build the engine registry from built-ins plus `[engines.*]`
    pub fn engine_registry(&self) -> Result<EngineRegistry, ServerConfigError> {
        Ok(EngineRegistry::from_settings(&self.engines)?)
    }

    /// Provisioner settings derived from `[docker]` and `[provisioning]`
    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig::new()
            .with_public_host(self.docker.public_host.clone())
            .with_call_timeout(Duration::from_secs(self.provisioning.call_timeout_secs))
            .with_pull_timeout(Duration::from_secs(self.docker.pull_timeout_secs))
            .with_readiness(self.provisioning.readiness.to_policy())
            .with_rollback_on_failure(self.provisioning.rollback_on_failure)
            .with_mismatch_policy(self.provisioning.mismatch_policy)
            .with_container_prefix(self.provisioning.container_prefix.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[server]
name = "provisioner-test"
port = 9090

[database]
url = "sqlite::memory:"
max_connections = 2

[docker]
endpoint = "unix:///var/run/docker.sock"
public_host = "db.example.com"

[provisioning]
call_timeout_secs = 10
bcrypt_cost = 12
rollback_on_failure = true
mismatch_policy = "replace"

[provisioning.readiness]
max_wait_secs = 90
tcp_probe = false

[engines.postgresql]
image = "postgres:15"
"#;

        let config = ServerConfig::from_str(toml_content).unwrap();
        assert_eq!(config.server.name, "provisioner-test");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(
            config.docker.endpoint.as_deref(),
            Some("unix:///var/run/docker.sock")
        );
        assert_eq!(config.docker.bind_ip, "0.0.0.0");
        assert_eq!(config.provisioning.bcrypt_cost, 12);
        assert_eq!(config.provisioning.mismatch_policy, MismatchPolicy::Replace);
        assert_eq!(config.provisioning.readiness.max_wait_secs, 90);
        assert!(!config.provisioning.readiness.tcp_probe);
        assert_eq!(config.provisioning.readiness.initial_interval_ms, 250);
        assert!(config.validate().is_ok());

        let registry = config.engine_registry().unwrap();
        assert_eq!(registry.resolve("postgresql").unwrap().image, "postgres:15");

        let provisioner = config.provisioner_config();
        assert_eq!(provisioner.public_host, "db.example.com");
        assert_eq!(provisioner.call_timeout, Duration::from_secs(10));
        assert_eq!(provisioner.pull_timeout, Duration::from_secs(600));
        assert_eq!(provisioner.readiness.max_wait, Duration::from_secs(90));
        assert!(provisioner.rollback_on_failure);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.docker.public_host, "localhost");
        assert_eq!(config.provisioning.mismatch_policy, MismatchPolicy::Reject);
        assert!(!config.provisioning.rollback_on_failure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_expansion() {
        let config = ServerConfig::from_str(
            r#"
[database]
url = "sqlite:${DBPROV_SERVER_TEST_UNSET:registry.db}?mode=rwc"
"#,
        )
        .unwrap();
        assert_eq!(config.database.url, "sqlite:registry.db?mode=rwc");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.provisioning.bcrypt_cost = 3;
        assert!(matches!(
            config.validate(),
            Err(ServerConfigError::InvalidConfig(_))
        ));

        let mut config = ServerConfig::default();
        config.provisioning.readiness.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.provisioning.readiness.max_interval_ms = 10;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.docker.public_host = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_engine_template() {
        let config = ServerConfig::from_str(
            r#"
[engines.mysql]
connection_template = "{user}@{host}"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ServerConfigError::Engine(_))
        ));
    }

    #[test]
    fn test_readiness_wait_is_bounded() {
        let config = ServerConfig::from_str(
            r#"
[provisioning.readiness]
max_wait_secs = 86400
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ServerConfigError::InvalidConfig(ref msg)) if msg.contains("max_wait_secs")
        ));

        let config = ServerConfig::from_str("[provisioning.readiness]\nmax_wait_secs = 3600").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pull_timeout_is_rejected() {
        let config = ServerConfig::from_str("[docker]\npull_timeout_secs = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ServerConfigError::InvalidConfig(ref msg)) if msg.contains("pull_timeout_secs")
        ));
    }

    #[test]
    fn test_invalid_mismatch_policy_fails_to_parse() {
        let result = ServerConfig::from_str(
            r#"
[provisioning]
mismatch_policy = "overwrite"
"#,
        );
        assert!(matches!(result, Err(ServerConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7070").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 7070);
    }

    #[test]
    fn test_missing_file() {
        let result = ServerConfig::from_file("/nonexistent/provisioner-server.toml");
        assert!(matches!(result, Err(ServerConfigError::ReadError(_))));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../../config/provisioner-server.toml"
        );
        let config = ServerConfig::from_file(path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.provisioning.mismatch_policy, MismatchPolicy::Reject);
        assert_eq!(config.engine_registry().unwrap().names(), vec!["mysql", "postgresql"]);
    }
}
