//! Connection registry capability
//!
//! The registry is the only memory the provisioner has: it maps a natural key
//! to the connection string issued for it and the hash of the password it was
//! issued with.

pub mod sql;

pub use sql::SqlRegistry;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::ConnectionRecord;
use crate::db::DatabaseError;
use crate::request::NaturalKey;
use crate::ProvisionError;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The store could not be queried or written
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// A record for the natural key already exists
    #[error("A record for this key already exists")]
    DuplicateKey,
}

impl From<DatabaseError> for RegistryError {
    fn from(err: DatabaseError) -> Self {
        if err.is_constraint_violation() {
            RegistryError::DuplicateKey
        } else {
            RegistryError::Unavailable(err.to_string())
        }
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from(err).into()
    }
}

impl From<RegistryError> for ProvisionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable(msg) => ProvisionError::RegistryUnavailable(msg),
            RegistryError::DuplicateKey => ProvisionError::DuplicateKey,
        }
    }
}

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Record for the full natural key
    ///
    /// `Ok(None)` means nothing was ever registered; a failing store is always
    /// an error, never absence.
    async fn find(&self, key: &NaturalKey) -> Result<Option<ConnectionRecord>, RegistryError>;

    /// Register a new record
    async fn save(&self, record: &ConnectionRecord) -> Result<(), RegistryError>;

    /// Atomically replace whatever is registered under the record's key
    async fn replace(&self, record: &ConnectionRecord) -> Result<(), RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_is_duplicate_key() {
        let err: RegistryError = DatabaseError::ConstraintViolation("UNIQUE constraint failed".to_string()).into();
        assert!(matches!(err, RegistryError::DuplicateKey));

        let err: ProvisionError = err.into();
        assert!(matches!(err, ProvisionError::DuplicateKey));
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        let err: RegistryError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, RegistryError::Unavailable(_)));

        let err: ProvisionError = err.into();
        assert!(matches!(err, ProvisionError::RegistryUnavailable(_)));
    }
}
