//! Provisioner server binary
//!
//! Serves the database provisioning API over HTTP, backed by a local Docker
//! daemon for containers and a SQLite connection registry.

use std::net::SocketAddr;
use std::sync::Arc;

use provisioner::api::create_router;
use provisioner::config::ServerConfig;
use provisioner::credentials::BcryptCodec;
use provisioner::db::DatabaseConnection;
use provisioner::registry::SqlRegistry;
use provisioner::runtime::DockerRuntime;
use provisioner::services::CreatorServiceImpl;
use provisioner::Provisioner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing/logging
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    // Load configuration from provisioner-server.toml
    tracing::info!("Loading server configuration...");
    let config = match ServerConfig::load() {
        Ok(cfg) => {
            tracing::info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            return Err(format!(
                "Configuration required: {}. Set CONFIG_PATH or place config/provisioner-server.toml",
                e
            )
            .into());
        }
    };
    config.validate()?;

    let engines = Arc::new(config.engine_registry()?);
    tracing::info!("Engines: {}", engines.names().join(", "));
    tracing::info!("Mismatch policy: {:?}", config.provisioning.mismatch_policy);
    tracing::info!("Rollback on failure: {}", config.provisioning.rollback_on_failure);

    // HOST/PORT override the configured listen address
    let port = match std::env::var("PORT") {
        Ok(value) => value
            .parse::<u16>()
            .map_err(|e| format!("PORT must be a valid u16: {}", e))?,
        Err(_) => config.server.port,
    };
    let host = std::env::var("HOST").unwrap_or_else(|_| config.server.host.clone());
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Initialize registry database
    tracing::info!("Connecting to registry database: {}", config.database.url);
    let db = DatabaseConnection::with_max_connections(
        &config.database.url,
        config.database.max_connections,
    )
    .await?;

    tracing::info!("Running database migrations");
    db.run_migrations().await?;

    tracing::info!("Performing database health check");
    db.health_check().await?;

    // Container runtime; an unreachable daemon is reported per request
    let runtime = DockerRuntime::connect(&config.docker)?;
    match runtime.ping().await {
        Ok(()) => tracing::info!("Docker daemon reachable"),
        Err(e) => tracing::warn!("Docker daemon not reachable yet: {}", e),
    }

    let codec = BcryptCodec::new(config.provisioning.bcrypt_cost)?;

    let provisioner = Arc::new(Provisioner::new(
        engines,
        Arc::new(runtime),
        Arc::new(SqlRegistry::new(db.clone())),
        Arc::new(codec),
        config.provisioner_config(),
    ));
    let creator = Arc::new(CreatorServiceImpl::new(provisioner));

    // Build the router
    tracing::info!("Building API router");
    let app = create_router(db.clone(), creator);

    tracing::info!("Starting {} on {}", config.server.name, addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Run server with graceful shutdown
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    tracing::info!("Provisioner server shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL-C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL-C signal, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down");
        }
    }
}
