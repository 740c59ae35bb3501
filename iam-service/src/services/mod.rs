//! Services layer for the IAM core.
//!
//! Identity lifecycle, sessions and tokens, RBAC, policy decisions, and the
//! security event bus with the handlers it drives.

pub mod access_control;
pub mod alerting;
pub mod audit;
pub mod authorization;
pub mod error;
pub mod event_bus;
pub mod identity;
pub mod maintenance;
pub mod policy;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod token;

pub use access_control::AccessControlService;
pub use alerting::{SecurityAlert, SecurityAlertHandler};
pub use audit::{
    AuditLogger, AuditOutcome, AuditRecord, AuditSeverity, AuditSink, EventPublisher,
    JsonLinesAuditSink, MemoryAuditSink, AUDIT_RECORD_KEY,
};
pub use authorization::{AccessDecision, AuthorizationService, DecisionSource};
pub use error::{ErrorKind, IamError};
pub use event_bus::{EventBus, EventHandler};
pub use identity::IdentityService;
pub use maintenance::{Maintenance, MaintenanceReport};
pub use policy::{
    AccessRequest, Decision, PolicyAdministrationPoint, PolicyDecision, PolicyDecisionPoint,
    PolicyInformationPoint, RuleEngine,
};
pub use rate_limit::{
    GovernorRateLimitStore, RateLimitDecision, RateLimitStore, RedisRateLimitStore,
};
pub use revocation::{InMemoryRevocationStore, RedisRevocationStore, RevocationStore};
pub use session::{SessionGrant, SessionManager, SessionRevocationHandler};
pub use token::{AccessTokenClaims, RefreshTokenClaims, TokenPair, TokenService};
