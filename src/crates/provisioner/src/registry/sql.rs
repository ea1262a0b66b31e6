//! SQL-backed connection registry

use async_trait::async_trait;
use tracing::debug;

use super::{ConnectionRegistry, RegistryError};
use crate::db::models::ConnectionRecord;
use crate::db::repositories::ConnectionRepository;
use crate::db::DatabaseConnection;
use crate::request::NaturalKey;

/// Registry stored in the `connections` table
#[derive(Debug, Clone)]
pub struct SqlRegistry {
    db: DatabaseConnection,
}

impl SqlRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ConnectionRegistry for SqlRegistry {
    async fn find(&self, key: &NaturalKey) -> Result<Option<ConnectionRecord>, RegistryError> {
        let record = ConnectionRepository::find_by_key(self.db.pool(), key).await?;
        debug!(key = %key, found = record.is_some(), "Registry lookup");
        Ok(record)
    }

    async fn save(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        ConnectionRepository::insert(self.db.pool(), record).await?;
        Ok(())
    }

    async fn replace(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        ConnectionRepository::replace(self.db.pool(), record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> SqlRegistry {
        let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        db.run_migrations().await.unwrap();
        SqlRegistry::new(db)
    }

    fn key() -> NaturalKey {
        NaturalKey::new("acme", "alice", "app", "postgresql")
    }

    #[tokio::test]
    async fn test_save_then_find() {
        let registry = registry().await;
        assert!(registry.find(&key()).await.unwrap().is_none());

        let record = ConnectionRecord::new(&key(), "digest", "conn", "c1");
        registry.save(&record).await.unwrap();

        assert_eq!(registry.find(&key()).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_second_save_is_duplicate_key() {
        let registry = registry().await;
        registry
            .save(&ConnectionRecord::new(&key(), "d1", "s1", "c1"))
            .await
            .unwrap();

        let err = registry
            .save(&ConnectionRecord::new(&key(), "d2", "s2", "c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey));
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable_not_absent() {
        let registry = registry().await;
        registry.database().close().await;

        let err = registry.find(&key()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
    }
}
