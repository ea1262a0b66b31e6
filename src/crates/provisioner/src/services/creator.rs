use crate::proto::creator::{
    creator_service_server::CreatorService, CreateDbRequest, CreateDbResponse,
};
use crate::provisioner::Provisioner;
use crate::request::ProvisionRequest;
use crate::{ErrorClass, ProvisionError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

pub struct CreatorServiceImpl {
    provisioner: Arc<Provisioner>,
}

impl CreatorServiceImpl {
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        Self { provisioner }
    }
}

/// Map a provisioning failure to a status carrying only a safe message
pub fn status_from_error(err: &ProvisionError) -> Status {
    match err {
        ProvisionError::CredentialMismatch => Status::permission_denied(err.to_string()),
        ProvisionError::Cancelled { .. } => Status::cancelled("Request cancelled"),
        _ => match err.class() {
            ErrorClass::Client => Status::invalid_argument(err.to_string()),
            ErrorClass::Transient => {
                tracing::error!(kind = err.kind(), error = %err, "Provisioning failed");
                Status::unavailable("Database provisioning is temporarily unavailable, retry later")
            }
            ErrorClass::Fatal => {
                tracing::error!(kind = err.kind(), error = %err, "Provisioning failed");
                Status::internal("Internal error creating database")
            }
        },
    }
}

#[tonic::async_trait]
impl CreatorService for CreatorServiceImpl {
    async fn create_db(
        &self,
        request: Request<CreateDbRequest>,
    ) -> Result<Response<CreateDbResponse>, Status> {
        let req = request.into_inner();

        // Validate input
        let required = [
            ("user", &req.user),
            ("login", &req.login),
            ("password", &req.password),
            ("db_name", &req.db_name),
            ("db_type", &req.db_type),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(Status::invalid_argument(format!("{} is required", field)));
            }
        }

        let provision = ProvisionRequest::new(req.user, req.login, req.password, req.db_name, req.db_type);

        // Provisioning runs on its own task so that a dropped request cancels
        // it through the token instead of abandoning it mid-stage
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let provisioner = Arc::clone(&self.provisioner);
        let task = tokio::spawn(async move { provisioner.create_database(&provision, &cancel).await });

        let connection_string = task
            .await
            .map_err(|e| {
                tracing::error!("Provisioning task failed: {}", e);
                Status::internal("Internal error creating database")
            })?
            .map_err(|e| status_from_error(&e))?;

        Ok(Response::new(CreateDbResponse { connection_string }))
    }
}
