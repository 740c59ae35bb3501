use std::sync::Arc;

use iam_service::{
    clock::{SharedClock, SystemClock},
    config::IamConfig,
    repositories::Repositories,
    services::{
        AuditSink, GovernorRateLimitStore, InMemoryRevocationStore, JsonLinesAuditSink,
        MemoryAuditSink, RateLimitStore, RedisRateLimitStore, RedisRevocationStore,
        RevocationStore,
    },
    IamCore,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IamConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting IAM service"
    );

    let (revocations, rate_limiter): (Arc<dyn RevocationStore>, Arc<dyn RateLimitStore>) =
        match &config.redis {
            Some(redis) => {
                let revocations = RedisRevocationStore::connect(&redis.url).await?;
                let rate_limiter = RedisRateLimitStore::connect(&redis.url, &config.rate_limit).await?;
                tracing::info!("Redis-backed revocation and rate limit stores initialized");
                (Arc::new(revocations), Arc::new(rate_limiter))
            }
            None => {
                tracing::info!("In-process revocation and rate limit stores initialized");
                (
                    Arc::new(InMemoryRevocationStore::default()),
                    Arc::new(GovernorRateLimitStore::new(&config.rate_limit)?),
                )
            }
        };

    let audit_sink: Arc<dyn AuditSink> = match &config.audit.log_path {
        Some(path) => Arc::new(JsonLinesAuditSink::open(path).await?),
        None => {
            tracing::warn!("AUDIT_LOG_PATH not set, audit records are kept in memory only");
            Arc::new(MemoryAuditSink::default())
        }
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let interval = std::time::Duration::from_secs(config.maintenance.interval_seconds);
    let core = IamCore::new(
        config,
        Repositories::in_memory(),
        clock,
        revocations,
        rate_limiter,
        audit_sink,
    )?;
    core.seed_default_roles().await?;

    let shutdown = CancellationToken::new();
    let maintenance = core.maintenance.clone().spawn(interval, shutdown.clone());

    tracing::info!("IAM service ready");

    shutdown_signal().await;
    shutdown.cancel();
    if let Err(e) = maintenance.await {
        tracing::error!(error = %e, "Maintenance task ended abnormally");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
