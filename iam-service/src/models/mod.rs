pub mod access_attempt;
pub mod access_control;
pub mod event;
pub mod identity;
pub mod permission;
pub mod policy;
pub mod role;
pub mod session;

pub use access_attempt::{AccessAttempt, AttemptKind, AttemptOutcome, RiskLevel};
pub use access_control::{AccessControl, AccessLevel, PermissionGrant, RoleAssignment};
pub use event::{EventType, SecurityEvent};
pub use identity::{Identity, IdentityStatus, RoleName, Username};
pub use permission::{Permission, WILDCARD};
pub use policy::{
    AttributeCondition, ConditionOperator, Policy, PolicyDocument, PolicyEffect, PolicyTarget,
};
pub use role::{Role, GLOBAL_SCOPE};
pub use session::{AuthenticationMethod, Session, SessionStatus};
