//! Connection record model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::request::NaturalKey;

/// One provisioned database and the credential it was issued for
///
/// Inserted once per successful provisioning and never updated in place.
///
/// # Timestamps
/// `created_at` is an RFC 3339 string.
#[derive(Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Surrogate key (UUID string)
    pub id: String,

    pub owner: String,
    pub login: String,
    pub db_name: String,
    pub db_type: String,

    /// bcrypt digest of the password the database was issued with
    pub hashed_password: String,

    /// Engine-specific URI including the host-published port
    pub connection_string: String,

    /// Runtime id of the backing container
    pub container_id: String,

    pub created_at: String,
}

impl ConnectionRecord {
    /// Create a new record with a fresh id and the current timestamp
    pub fn new(
        key: &NaturalKey,
        hashed_password: impl Into<String>,
        connection_string: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: key.owner.clone(),
            login: key.login.clone(),
            db_name: key.db_name.clone(),
            db_type: key.db_type.clone(),
            hashed_password: hashed_password.into(),
            connection_string: connection_string.into(),
            container_id: container_id.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// The connection string embeds the plaintext password
impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("login", &self.login)
            .field("db_name", &self.db_name)
            .field("db_type", &self.db_type)
            .field("container_id", &self.container_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
