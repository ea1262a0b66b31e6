//! Creator service message definitions and service trait
//!
//! Hand-written equivalents of the prost/tonic generated code for
//! `creator.proto`, kept as plain serde types so the HTTP layer can reuse them.

pub mod creator {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    pub mod creator_service_server {
        use tonic::async_trait;

        #[async_trait]
        pub trait CreatorService: Send + Sync + 'static {
            async fn create_db(
                &self,
                request: tonic::Request<super::CreateDbRequest>,
            ) -> Result<tonic::Response<super::CreateDbResponse>, tonic::Status>;
        }
    }

    /// Missing fields deserialize as empty strings and are rejected by the service
    #[derive(Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CreateDbRequest {
        /// Owner (tenant) identity
        pub user: String,
        pub login: String,
        pub password: String,
        pub db_name: String,
        pub db_type: String,
    }

    impl fmt::Debug for CreateDbRequest {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("CreateDbRequest")
                .field("user", &self.user)
                .field("login", &self.login)
                .field("password", &"[REDACTED]")
                .field("db_name", &self.db_name)
                .field("db_type", &self.db_type)
                .finish()
        }
    }

    #[derive(Clone, Serialize, Deserialize)]
    pub struct CreateDbResponse {
        pub connection_string: String,
    }

    impl fmt::Debug for CreateDbResponse {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("CreateDbResponse").finish_non_exhaustive()
        }
    }
}
