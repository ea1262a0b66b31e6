//! Engine profiles
//!
//! An engine profile holds everything needed to provision one database engine:
//! the image to run, the port the engine listens on inside the container, the
//! environment variable names the image reads credentials from, and the
//! connection-string template handed back to callers.
//!
//! Profiles live in an [`EngineRegistry`] that is built once at start-up and
//! shared read-only between requests.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::readiness::WireProtocol;
use crate::ProvisionError;

pub const POSTGRESQL: &str = "postgresql";
pub const MYSQL: &str = "mysql";

/// Errors raised while building the engine registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineConfigError {
    #[error("Unknown placeholder {{{placeholder}}} in template for engine {engine}")]
    UnknownPlaceholder { engine: String, placeholder: String },

    #[error("Unbalanced braces in template for engine {0}")]
    UnbalancedBraces(String),

    #[error("Engine {engine} is missing required setting `{field}`")]
    MissingSetting { engine: String, field: &'static str },

    #[error("Engine {0} has an invalid container port")]
    InvalidPort(String),
}

/// Values substituted into a connection-string template
#[derive(Debug, Clone, Copy)]
pub struct ConnectionParams<'a> {
    pub login: &'a str,
    pub password: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub db_name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Login,
    Password,
    Host,
    Port,
    DbName,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "login" => Some(Placeholder::Login),
            "password" => Some(Placeholder::Password),
            "host" => Some(Placeholder::Host),
            "port" => Some(Placeholder::Port),
            "db_name" => Some(Placeholder::DbName),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A parsed connection-string template
///
/// Parsed once, rendered in a single pass: substituted values are never
/// scanned for placeholders again, so a password containing `{port}` stays
/// literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl ConnectionTemplate {
    /// Parse a template using `{login}`, `{password}`, `{host}`, `{port}` and
    /// `{db_name}` placeholders
    pub fn parse(engine: &str, source: &str) -> Result<Self, EngineConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        if n == '{' {
                            return Err(EngineConfigError::UnbalancedBraces(engine.to_string()));
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(EngineConfigError::UnbalancedBraces(engine.to_string()));
                    }
                    let field = Placeholder::parse(&name).ok_or_else(|| {
                        EngineConfigError::UnknownPlaceholder {
                            engine: engine.to_string(),
                            placeholder: name.clone(),
                        }
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(EngineConfigError::UnbalancedBraces(engine.to_string())),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Substitute connection parameters
    pub fn render(&self, params: &ConnectionParams<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Placeholder::Login) => out.push_str(params.login),
                Segment::Field(Placeholder::Password) => out.push_str(params.password),
                Segment::Field(Placeholder::Host) => out.push_str(params.host),
                Segment::Field(Placeholder::Port) => out.push_str(&params.port.to_string()),
                Segment::Field(Placeholder::DbName) => out.push_str(params.db_name),
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Provisioning parameters for one engine type
#[derive(Debug, Clone)]
pub struct EngineProfile {
    pub name: String,
    pub image: String,
    pub container_port: u16,
    /// What the readiness check expects to hear on the published port
    pub wire_protocol: WireProtocol,
    pub user_env: String,
    pub password_env: String,
    pub database_env: String,
    /// Static variables appended after the credential bindings
    pub extra_env: Vec<(String, String)>,
    pub template: ConnectionTemplate,
}

impl EngineProfile {
    fn postgresql() -> Self {
        Self {
            name: POSTGRESQL.to_string(),
            image: "postgres:16".to_string(),
            container_port: 5432,
            wire_protocol: WireProtocol::Postgres,
            user_env: "POSTGRES_USER".to_string(),
            password_env: "POSTGRES_PASSWORD".to_string(),
            database_env: "POSTGRES_DB".to_string(),
            extra_env: Vec::new(),
            template: ConnectionTemplate {
                source: "postgres://{login}:{password}@{host}:{port}/{db_name}?sslmode=disable"
                    .to_string(),
                segments: vec![
                    Segment::Literal("postgres://".to_string()),
                    Segment::Field(Placeholder::Login),
                    Segment::Literal(":".to_string()),
                    Segment::Field(Placeholder::Password),
                    Segment::Literal("@".to_string()),
                    Segment::Field(Placeholder::Host),
                    Segment::Literal(":".to_string()),
                    Segment::Field(Placeholder::Port),
                    Segment::Literal("/".to_string()),
                    Segment::Field(Placeholder::DbName),
                    Segment::Literal("?sslmode=disable".to_string()),
                ],
            },
        }
    }

    fn mysql() -> Self {
        Self {
            name: MYSQL.to_string(),
            image: "mysql:8".to_string(),
            container_port: 3306,
            wire_protocol: WireProtocol::Mysql,
            user_env: "MYSQL_USER".to_string(),
            password_env: "MYSQL_PASSWORD".to_string(),
            database_env: "MYSQL_DATABASE".to_string(),
            extra_env: vec![("MYSQL_RANDOM_ROOT_PASSWORD".to_string(), "yes".to_string())],
            template: ConnectionTemplate {
                source: "{login}:{password}@tcp({host}:{port})/{db_name}".to_string(),
                segments: vec![
                    Segment::Field(Placeholder::Login),
                    Segment::Literal(":".to_string()),
                    Segment::Field(Placeholder::Password),
                    Segment::Literal("@tcp(".to_string()),
                    Segment::Field(Placeholder::Host),
                    Segment::Literal(":".to_string()),
                    Segment::Field(Placeholder::Port),
                    Segment::Literal(")/".to_string()),
                    Segment::Field(Placeholder::DbName),
                ],
            },
        }
    }

    /// Ordered container environment: user, password, database, then extras
    pub fn environment(
        &self,
        login: &str,
        password: &SecretString,
        db_name: &str,
    ) -> Vec<(String, String)> {
        let mut env = Vec::with_capacity(3 + self.extra_env.len());
        env.push((self.user_env.clone(), login.to_string()));
        env.push((self.password_env.clone(), password.expose_secret().to_string()));
        env.push((self.database_env.clone(), db_name.to_string()));
        env.extend(self.extra_env.iter().cloned());
        env
    }

    pub fn connection_string(&self, params: &ConnectionParams<'_>) -> String {
        self.template.render(params)
    }
}

/// Per-engine settings from the `[engines.<name>]` configuration tables
///
/// For a built-in engine every field is optional and overrides the default.
/// A new engine must set every field except `extra_env` and `wire_protocol`,
/// which defaults to a plain TCP connect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub container_port: Option<u16>,
    #[serde(default)]
    pub wire_protocol: Option<WireProtocol>,
    #[serde(default)]
    pub user_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub database_env: Option<String>,
    #[serde(default)]
    pub connection_template: Option<String>,
    #[serde(default)]
    pub extra_env: Option<BTreeMap<String, String>>,
}

/// Immutable mapping from `db_type` to its profile
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    profiles: HashMap<String, EngineProfile>,
}

impl EngineRegistry {
    /// Registry with the built-in `postgresql` and `mysql` engines
    pub fn builtin() -> Self {
        let profiles = [EngineProfile::postgresql(), EngineProfile::mysql()]
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { profiles }
    }

    /// Built-ins with configuration overrides and additional engines applied
    pub fn from_settings(
        settings: &BTreeMap<String, EngineSettings>,
    ) -> Result<Self, EngineConfigError> {
        let mut registry = Self::builtin();

        for (name, s) in settings {
            let profile = match registry.profiles.remove(name) {
                Some(base) => apply_overrides(base, s)?,
                None => new_profile(name, s)?,
            };
            if profile.container_port == 0 {
                return Err(EngineConfigError::InvalidPort(name.clone()));
            }
            registry.profiles.insert(name.clone(), profile);
        }

        Ok(registry)
    }

    /// Look up the profile for a `db_type`
    pub fn resolve(&self, db_type: &str) -> Result<&EngineProfile, ProvisionError> {
        self.profiles
            .get(db_type)
            .ok_or_else(|| ProvisionError::UnsupportedEngine(db_type.to_string()))
    }

    /// Registered engine names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn apply_overrides(
    mut base: EngineProfile,
    s: &EngineSettings,
) -> Result<EngineProfile, EngineConfigError> {
    if let Some(image) = &s.image {
        base.image = image.clone();
    }
    if let Some(port) = s.container_port {
        base.container_port = port;
    }
    if let Some(protocol) = s.wire_protocol {
        base.wire_protocol = protocol;
    }
    if let Some(v) = &s.user_env {
        base.user_env = v.clone();
    }
    if let Some(v) = &s.password_env {
        base.password_env = v.clone();
    }
    if let Some(v) = &s.database_env {
        base.database_env = v.clone();
    }
    if let Some(t) = &s.connection_template {
        base.template = ConnectionTemplate::parse(&base.name, t)?;
    }
    if let Some(extra) = &s.extra_env {
        base.extra_env = extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    }
    Ok(base)
}

fn new_profile(name: &str, s: &EngineSettings) -> Result<EngineProfile, EngineConfigError> {
    fn required<'a>(
        engine: &str,
        field: &'static str,
        value: &'a Option<String>,
    ) -> Result<&'a String, EngineConfigError> {
        value.as_ref().ok_or_else(|| EngineConfigError::MissingSetting {
            engine: engine.to_string(),
            field,
        })
    }

    let template = required(name, "connection_template", &s.connection_template)?;

    Ok(EngineProfile {
        name: name.to_string(),
        image: required(name, "image", &s.image)?.clone(),
        container_port: s.container_port.ok_or_else(|| EngineConfigError::MissingSetting {
            engine: name.to_string(),
            field: "container_port",
        })?,
        wire_protocol: s.wire_protocol.unwrap_or_default(),
        user_env: required(name, "user_env", &s.user_env)?.clone(),
        password_env: required(name, "password_env", &s.password_env)?.clone(),
        database_env: required(name, "database_env", &s.database_env)?.clone(),
        extra_env: s
            .extra_env
            .as_ref()
            .map(|extra| extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        template: ConnectionTemplate::parse(name, template)?,
    })
}
