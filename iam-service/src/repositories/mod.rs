//! Persistence ports.
//!
//! Every service talks to storage through these traits only. The in-memory
//! implementations in [`memory`] are the reference behaviour; a durable
//! backend implements the same contracts.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AccessAttempt, AccessControl, Identity, Permission, Policy, Role, Session,
};
use crate::services::IamError;

pub use memory::{
    InMemoryAccessAttemptRepository, InMemoryAccessControlRepository, InMemoryIdentityRepository,
    InMemoryPermissionRepository, InMemoryPolicyRepository, InMemoryRoleRepository,
    InMemorySessionRepository,
};

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Fails with `IdentityAlreadyExists` when the username or email is taken.
    async fn insert(&self, identity: &Identity) -> Result<(), IamError>;
    async fn update(&self, identity: &Identity) -> Result<(), IamError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, IamError>;
    /// Case-insensitive lookup.
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, IamError>;
    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, IamError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), IamError>;
    async fn update(&self, session: &Session) -> Result<(), IamError>;
    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<Session>, IamError>;
    async fn find_by_refresh_token_id(&self, jti: &str) -> Result<Option<Session>, IamError>;
    async fn list_by_identity(&self, identity_id: Uuid) -> Result<Vec<Session>, IamError>;
    /// Active sessions whose expiry is at or before `now`.
    async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, IamError>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Fails with `Conflict` when the name is taken within the scope.
    async fn insert(&self, role: &Role) -> Result<(), IamError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Role>, IamError>;
    async fn find_by_name(&self, scope: &str, name: &str) -> Result<Option<Role>, IamError>;
    async fn list(&self) -> Result<Vec<Role>, IamError>;
    /// Returns false when the link already existed.
    async fn add_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool, IamError>;
    async fn remove_permission(&self, role_id: Uuid, permission_id: Uuid)
        -> Result<bool, IamError>;
    async fn permission_ids(&self, role_id: Uuid) -> Result<Vec<Uuid>, IamError>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Fails with `Conflict` when `(resource, action)` already exists.
    async fn insert(&self, permission: &Permission) -> Result<(), IamError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Permission>, IamError>;
    async fn find_by_resource_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, IamError>;
    /// Unknown ids are skipped.
    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<Permission>, IamError>;
}

#[async_trait]
pub trait AccessControlRepository: Send + Sync {
    /// Inserts only when the identity has no aggregate yet. Returns whether
    /// it inserted.
    async fn insert_if_absent(&self, access: &AccessControl) -> Result<bool, IamError>;
    async fn save(&self, access: &AccessControl) -> Result<(), IamError>;
    async fn find_by_identity(&self, identity_id: Uuid)
        -> Result<Option<AccessControl>, IamError>;
}

#[async_trait]
pub trait AccessAttemptRepository: Send + Sync {
    async fn append(&self, attempt: &AccessAttempt) -> Result<(), IamError>;
    /// Login attempts for an identity at or after `since`, oldest first.
    async fn list_logins_for_identity(
        &self,
        identity_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessAttempt>, IamError>;
    async fn count_denied_for_ip(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, IamError>;
    /// Deletes attempts older than `cutoff`, returning how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, IamError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn insert(&self, policy: &Policy) -> Result<(), IamError>;
    async fn update(&self, policy: &Policy) -> Result<(), IamError>;
    async fn delete(&self, id: Uuid) -> Result<bool, IamError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Policy>, IamError>;
    /// Policies whose target covers `(resource, action)`, including
    /// wildcard targets and disabled policies.
    async fn find_by_target(&self, resource: &str, action: &str)
        -> Result<Vec<Policy>, IamError>;
    async fn list(&self) -> Result<Vec<Policy>, IamError>;
}

/// Bundle of every port, handed to `IamCore`.
#[derive(Clone)]
pub struct Repositories {
    pub identities: Arc<dyn IdentityRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub access_controls: Arc<dyn AccessControlRepository>,
    pub access_attempts: Arc<dyn AccessAttemptRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            identities: Arc::new(InMemoryIdentityRepository::default()),
            sessions: Arc::new(InMemorySessionRepository::default()),
            roles: Arc::new(InMemoryRoleRepository::default()),
            permissions: Arc::new(InMemoryPermissionRepository::default()),
            access_controls: Arc::new(InMemoryAccessControlRepository::default()),
            access_attempts: Arc::new(InMemoryAccessAttemptRepository::default()),
            policies: Arc::new(InMemoryPolicyRepository::default()),
        }
    }
}
