pub mod clock;
pub mod config;
pub mod dtos;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::IamConfig;
use crate::models::{Role, GLOBAL_SCOPE};
use crate::repositories::Repositories;
use crate::services::{
    AccessControlService, AuditLogger, AuditSink, AuthorizationService, EventBus, EventPublisher,
    GovernorRateLimitStore, IamError, IdentityService, InMemoryRevocationStore, Maintenance,
    MemoryAuditSink, PolicyAdministrationPoint, PolicyDecisionPoint, PolicyInformationPoint,
    RateLimitStore, RevocationStore, SecurityAlertHandler, SessionManager,
    SessionRevocationHandler, TokenService,
};
use crate::utils::Argon2Hasher;

/// Every service, wired once. Cloning shares the same instances.
#[derive(Clone)]
pub struct IamCore {
    pub config: IamConfig,
    pub identities: IdentityService,
    pub sessions: Arc<SessionManager>,
    pub access: AccessControlService,
    pub pip: PolicyInformationPoint,
    pub pdp: PolicyDecisionPoint,
    pub pap: PolicyAdministrationPoint,
    pub authorization: AuthorizationService,
    pub tokens: Arc<TokenService>,
    pub events: Arc<EventBus>,
    pub audit: Arc<AuditLogger>,
    pub alerts: Arc<SecurityAlertHandler>,
    pub maintenance: Maintenance,
}

impl IamCore {
    /// Builds the services over the given ports and registers the built-in
    /// event handlers.
    pub fn new(
        config: IamConfig,
        repos: Repositories,
        clock: SharedClock,
        revocations: Arc<dyn RevocationStore>,
        rate_limiter: Arc<dyn RateLimitStore>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, IamError> {
        let events = Arc::new(EventBus::new(&config.event_bus));
        let audit = Arc::new(AuditLogger::new(audit_sink, clock.clone()));
        let publisher = EventPublisher::new(audit.clone(), events.clone());
        let tokens = Arc::new(TokenService::new(&config.token, revocations, clock.clone())?);

        let identities = IdentityService::new(
            repos.identities.clone(),
            repos.access_controls.clone(),
            repos.access_attempts.clone(),
            Arc::new(Argon2Hasher),
            publisher.clone(),
            clock.clone(),
            config.identity.clone(),
        )?;

        let sessions = Arc::new(SessionManager::new(
            repos.sessions.clone(),
            repos.access_attempts.clone(),
            identities.clone(),
            tokens.clone(),
            rate_limiter.clone(),
            publisher.clone(),
            clock.clone(),
            config.session.clone(),
        ));

        let access = AccessControlService::new(
            repos.identities.clone(),
            repos.access_controls.clone(),
            repos.roles.clone(),
            repos.permissions.clone(),
            publisher.clone(),
            clock.clone(),
        );

        let pip = PolicyInformationPoint::new(
            repos.policies.clone(),
            repos.identities.clone(),
            access.clone(),
            clock.clone(),
        );
        let pdp = PolicyDecisionPoint::new(pip.clone());
        let pap = PolicyAdministrationPoint::new(repos.policies.clone(), publisher.clone(), clock.clone());

        let alerts = Arc::new(SecurityAlertHandler::default());

        let authorization = AuthorizationService::new(
            pdp.clone(),
            access.clone(),
            repos.access_attempts.clone(),
            publisher.clone(),
            audit.clone(),
            clock.clone(),
        );

        let maintenance = Maintenance::new(
            tokens.clone(),
            rate_limiter,
            repos.access_attempts.clone(),
            sessions.clone(),
            identities.clone(),
            access.clone(),
            audit.clone(),
            clock,
            config.maintenance.clone(),
        );

        events.register(audit.clone());
        events.register(alerts.clone());
        events.register(Arc::new(SessionRevocationHandler::new(&sessions)));

        tracing::info!(service = %config.service_name, "IAM core initialized");

        Ok(Self {
            config,
            identities,
            sessions,
            access,
            pip,
            pdp,
            pap,
            authorization,
            tokens,
            events,
            audit,
            alerts,
            maintenance,
        })
    }

    /// Fully in-process core: in-memory repositories, revocation list,
    /// governor rate limiter and audit sink.
    pub fn in_memory(config: IamConfig, clock: SharedClock) -> Result<Self, IamError> {
        let rate_limiter = Arc::new(GovernorRateLimitStore::new(&config.rate_limit)?);
        Self::new(
            config,
            Repositories::in_memory(),
            clock,
            Arc::new(InMemoryRevocationStore::default()),
            rate_limiter,
            Arc::new(MemoryAuditSink::default()),
        )
    }

    /// Bootstrap catalogue for the fitness domain. Safe to run repeatedly.
    pub async fn seed_default_roles(&self) -> Result<Vec<Role>, IamError> {
        let catalogue: [(&str, &str, &[(&str, &str)]); 3] = [
            (
                "member",
                "Logs workouts and follows programs",
                &[
                    ("workout", "read"),
                    ("workout", "create"),
                    ("exercise", "read"),
                    ("program", "read"),
                ],
            ),
            (
                "trainer",
                "Builds programs and exercises for members",
                &[
                    ("workout", "*"),
                    ("exercise", "*"),
                    ("program", "*"),
                ],
            ),
            ("admin", "Full access to every resource", &[("*", "*")]),
        ];

        let mut roles = Vec::with_capacity(catalogue.len());
        for (name, description, permissions) in catalogue {
            roles.push(
                self.access
                    .ensure_role(name, GLOBAL_SCOPE, description, true, permissions)
                    .await?,
            );
        }
        tracing::info!(count = roles.len(), "Default roles seeded");
        Ok(roles)
    }
}
