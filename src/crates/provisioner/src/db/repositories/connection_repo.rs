//! Connection repository for database operations

use crate::db::connection::DatabasePool;
use crate::db::models::ConnectionRecord;
use crate::request::NaturalKey;

/// Connection repository for managing connection record operations
pub struct ConnectionRepository;

impl ConnectionRepository {
    /// Get the record for a natural key
    pub async fn find_by_key(
        pool: &DatabasePool,
        key: &NaturalKey,
    ) -> Result<Option<ConnectionRecord>, sqlx::Error> {
        sqlx::query_as::<_, ConnectionRecord>(
            "SELECT * FROM connections
             WHERE owner = ? AND login = ? AND db_name = ? AND db_type = ?",
        )
        .bind(&key.owner)
        .bind(&key.login)
        .bind(&key.db_name)
        .bind(&key.db_type)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new record
    ///
    /// Fails with a unique violation when a record for the same natural key
    /// already exists.
    pub async fn insert(pool: &DatabasePool, record: &ConnectionRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO connections
             (id, owner, login, db_name, db_type, hashed_password, connection_string, container_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.owner)
        .bind(&record.login)
        .bind(&record.db_name)
        .bind(&record.db_type)
        .bind(&record.hashed_password)
        .bind(&record.connection_string)
        .bind(&record.container_id)
        .bind(&record.created_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Delete whatever is registered under the record's natural key and insert
    /// the record, in one transaction
    pub async fn replace(pool: &DatabasePool, record: &ConnectionRecord) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "DELETE FROM connections
             WHERE owner = ? AND login = ? AND db_name = ? AND db_type = ?",
        )
        .bind(&record.owner)
        .bind(&record.login)
        .bind(&record.db_name)
        .bind(&record.db_type)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO connections
             (id, owner, login, db_name, db_type, hashed_password, connection_string, container_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.owner)
        .bind(&record.login)
        .bind(&record.db_name)
        .bind(&record.db_type)
        .bind(&record.hashed_password)
        .bind(&record.connection_string)
        .bind(&record.container_id)
        .bind(&record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    /// Count records for a natural key
    pub async fn count_by_key(pool: &DatabasePool, key: &NaturalKey) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM connections
             WHERE owner = ? AND login = ? AND db_name = ? AND db_type = ?",
        )
        .bind(&key.owner)
        .bind(&key.login)
        .bind(&key.db_name)
        .bind(&key.db_type)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConnection;

    async fn setup_db() -> DatabaseConnection {
        let conn = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        conn.run_migrations().await.unwrap();
        conn
    }

    fn key() -> NaturalKey {
        NaturalKey::new("acme", "alice", "app", "postgresql")
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = setup_db().await;
        let record = ConnectionRecord::new(&key(), "digest", "postgres://...", "c1");

        ConnectionRepository::insert(db.pool(), &record).await.unwrap();

        let found = ConnectionRepository::find_by_key(db.pool(), &key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let db = setup_db().await;
        let found = ConnectionRepository::find_by_key(db.pool(), &key()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_requires_full_key() {
        let db = setup_db().await;
        let record = ConnectionRecord::new(&key(), "digest", "postgres://...", "c1");
        ConnectionRepository::insert(db.pool(), &record).await.unwrap();

        let other = NaturalKey::new("acme", "alice", "app", "mysql");
        assert!(ConnectionRepository::find_by_key(db.pool(), &other)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_rejected() {
        let db = setup_db().await;
        let first = ConnectionRecord::new(&key(), "d1", "s1", "c1");
        let second = ConnectionRecord::new(&key(), "d2", "s2", "c2");

        ConnectionRepository::insert(db.pool(), &first).await.unwrap();
        let err = ConnectionRepository::insert(db.pool(), &second)
            .await
            .unwrap_err();

        match err {
            sqlx::Error::Database(db_err) => assert!(db_err.is_unique_violation()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ConnectionRepository::count_by_key(db.pool(), &key()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_swaps_record() {
        let db = setup_db().await;
        let first = ConnectionRecord::new(&key(), "d1", "s1", "c1");
        let second = ConnectionRecord::new(&key(), "d2", "s2", "c2");

        ConnectionRepository::insert(db.pool(), &first).await.unwrap();
        ConnectionRepository::replace(db.pool(), &second).await.unwrap();

        let found = ConnectionRepository::find_by_key(db.pool(), &key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
        assert_eq!(found.connection_string, "s2");
        assert_eq!(ConnectionRepository::count_by_key(db.pool(), &key()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_without_existing_inserts() {
        let db = setup_db().await;
        let record = ConnectionRecord::new(&key(), "d1", "s1", "c1");

        ConnectionRepository::replace(db.pool(), &record).await.unwrap();
        assert_eq!(ConnectionRepository::count_by_key(db.pool(), &key()).await.unwrap(), 1);
    }
}
