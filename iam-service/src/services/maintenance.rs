use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::access_control::AccessControlService;
use super::audit::AuditLogger;
use super::identity::IdentityService;
use super::rate_limit::RateLimitStore;
use super::session::SessionManager;
use super::token::TokenService;
use super::IamError;
use crate::clock::SharedClock;
use crate::config::MaintenanceConfig;
use crate::repositories::AccessAttemptRepository;

/// Counts from one sweep. `None` means that step failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub revocations_purged: Option<usize>,
    pub rate_limit_keys_remaining: Option<usize>,
    pub attempts_purged: Option<usize>,
    pub sessions_expired: Option<usize>,
    pub session_locks_remaining: usize,
    pub identity_locks_remaining: usize,
}

/// Periodic housekeeping for the bounded in-memory stores.
#[derive(Clone)]
pub struct Maintenance {
    tokens: Arc<TokenService>,
    rate_limiter: Arc<dyn RateLimitStore>,
    attempts: Arc<dyn AccessAttemptRepository>,
    sessions: Arc<SessionManager>,
    identities: IdentityService,
    access: AccessControlService,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
    config: MaintenanceConfig,
}

impl Maintenance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: Arc<TokenService>,
        rate_limiter: Arc<dyn RateLimitStore>,
        attempts: Arc<dyn AccessAttemptRepository>,
        sessions: Arc<SessionManager>,
        identities: IdentityService,
        access: AccessControlService,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            tokens,
            rate_limiter,
            attempts,
            sessions,
            identities,
            access,
            audit,
            clock,
            config,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds.max(1))
    }

    async fn report_failure(&self, step: &str, error: IamError) {
        tracing::error!(step = step, error = %error, "Maintenance step failed");
        if let Err(e) = self.audit.audit_failure(step, None, &error).await {
            tracing::error!(step = step, error = %e, "Failed to audit maintenance failure");
        }
    }

    /// One sweep. A failing step is logged and audited; the others still run.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.tokens.purge_expired_revocations().await {
            Ok(n) => report.revocations_purged = Some(n),
            Err(e) => self.report_failure("maintenance.purge_revocations", e).await,
        }

        match self.rate_limiter.evict_idle().await {
            Ok(n) => report.rate_limit_keys_remaining = Some(n),
            Err(e) => {
                self.report_failure("maintenance.evict_rate_limits", IamError::Infrastructure(e))
                    .await
            }
        }

        let cutoff = self.clock.now() - ChronoDuration::hours(self.config.attempt_retention_hours);
        match self.attempts.purge_older_than(cutoff).await {
            Ok(n) => report.attempts_purged = Some(n),
            Err(e) => self.report_failure("maintenance.purge_attempts", e).await,
        }

        match self.sessions.expire_stale_sessions().await {
            Ok(n) => report.sessions_expired = Some(n),
            Err(e) => self.report_failure("maintenance.expire_sessions", e).await,
        }

        report.session_locks_remaining = self.sessions.drop_idle_locks();
        report.identity_locks_remaining =
            self.identities.drop_idle_locks() + self.access.drop_idle_locks();

        tracing::debug!(
            revocations_purged = ?report.revocations_purged,
            attempts_purged = ?report.attempts_purged,
            sessions_expired = ?report.sessions_expired,
            "Maintenance sweep complete"
        );
        report
    }

    /// Runs `run_once` every `interval` until `shutdown` is cancelled.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs(), "Maintenance task started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Maintenance task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}
