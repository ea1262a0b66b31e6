//! Provisioning request and natural key

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::ProvisionError;

/// The `(owner, login, db_name, db_type)` tuple identifying one database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub owner: String,
    pub login: String,
    pub db_name: String,
    pub db_type: String,
}

impl NaturalKey {
    pub fn new(
        owner: impl Into<String>,
        login: impl Into<String>,
        db_name: impl Into<String>,
        db_type: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            login: login.into(),
            db_name: db_name.into(),
            db_type: db_type.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.owner, self.login, self.db_name, self.db_type
        )
    }
}

/// A single provisioning call
///
/// The plaintext password only lives here, in memory, for the duration of the
/// call. `Debug` output redacts it.
#[derive(Debug)]
pub struct ProvisionRequest {
    pub key: NaturalKey,
    pub password: SecretString,
}

impl ProvisionRequest {
    pub fn new(
        owner: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
        db_name: impl Into<String>,
        db_type: impl Into<String>,
    ) -> Self {
        Self {
            key: NaturalKey::new(owner, login, db_name, db_type),
            password: SecretString::from(password.into()),
        }
    }

    /// Check that every field is present
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let fields = [
            ("owner", self.key.owner.as_str()),
            ("login", self.key.login.as_str()),
            ("password", self.password.expose_secret()),
            ("db_name", self.key.db_name.as_str()),
            ("db_type", self.key.db_type.as_str()),
        ];

        for (name, value) in fields {
            if value.is_empty() {
                return Err(ProvisionError::InvalidRequest(format!("{} is required", name)));
            }
        }

        Ok(())
    }
}
