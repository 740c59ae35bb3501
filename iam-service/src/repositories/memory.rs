//! In-memory reference implementations of the repository ports.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use super::{
    AccessAttemptRepository, AccessControlRepository, IdentityRepository, PermissionRepository,
    PolicyRepository, RoleRepository, SessionRepository,
};
use crate::models::{
    AccessAttempt, AccessControl, AttemptKind, AttemptOutcome, Identity, Permission, Policy, Role,
    Session, SessionStatus,
};
use crate::services::IamError;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ==================== Identities ====================

#[derive(Default)]
struct IdentityTables {
    by_id: HashMap<Uuid, Identity>,
    by_username: HashMap<String, Uuid>,
    by_email: HashMap<String, Uuid>,
}

/// Username and email uniqueness are enforced under one lock.
#[derive(Default)]
pub struct InMemoryIdentityRepository {
    tables: RwLock<IdentityTables>,
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn insert(&self, identity: &Identity) -> Result<(), IamError> {
        let username = identity.username.as_str().to_lowercase();
        let email = identity.email.to_lowercase();
        let mut tables = write(&self.tables);

        if tables.by_username.contains_key(&username) {
            return Err(IamError::IdentityAlreadyExists {
                field: "username".to_string(),
            });
        }
        if tables.by_email.contains_key(&email) {
            return Err(IamError::IdentityAlreadyExists {
                field: "email".to_string(),
            });
        }

        tables.by_username.insert(username, identity.id);
        tables.by_email.insert(email, identity.id);
        tables.by_id.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update(&self, identity: &Identity) -> Result<(), IamError> {
        let mut tables = write(&self.tables);
        match tables.by_id.get_mut(&identity.id) {
            Some(existing) => {
                *existing = identity.clone();
                Ok(())
            }
            None => Err(IamError::not_found("Identity", identity.id)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, IamError> {
        Ok(read(&self.tables).by_id.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, IamError> {
        let tables = read(&self.tables);
        Ok(tables
            .by_username
            .get(&username.to_lowercase())
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, IamError> {
        let tables = read(&self.tables);
        Ok(tables
            .by_email
            .get(&email.to_lowercase())
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }
}

// ==================== Sessions ====================

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: DashMap<Uuid, Session>,
    by_refresh_token: DashMap<String, Uuid>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), IamError> {
        match self.sessions.entry(session.session_id) {
            Entry::Occupied(_) => Err(IamError::Conflict(format!(
                "session {} already exists",
                session.session_id
            ))),
            Entry::Vacant(slot) => {
                self.by_refresh_token
                    .insert(session.refresh_token_id.clone(), session.session_id);
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, session: &Session) -> Result<(), IamError> {
        let mut existing = self
            .sessions
            .get_mut(&session.session_id)
            .ok_or_else(|| IamError::not_found("Session", session.session_id))?;

        if existing.refresh_token_id != session.refresh_token_id {
            self.by_refresh_token.remove(&existing.refresh_token_id);
            self.by_refresh_token
                .insert(session.refresh_token_id.clone(), session.session_id);
        }
        *existing = session.clone();
        Ok(())
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<Session>, IamError> {
        Ok(self.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn find_by_refresh_token_id(&self, jti: &str) -> Result<Option<Session>, IamError> {
        let Some(session_id) = self.by_refresh_token.get(jti).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn list_by_identity(&self, identity_id: Uuid) -> Result<Vec<Session>, IamError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.identity_id == identity_id)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by_key(|s| s.issued_at);
        Ok(sessions)
    }

    async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, IamError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active && s.expires_at <= now)
            .map(|s| s.clone())
            .collect())
    }
}

// ==================== Roles ====================

#[derive(Default)]
struct RoleTables {
    by_id: HashMap<Uuid, Role>,
    by_scoped_name: HashMap<(String, String), Uuid>,
    permissions: HashMap<Uuid, BTreeSet<Uuid>>,
}

#[derive(Default)]
pub struct InMemoryRoleRepository {
    tables: RwLock<RoleTables>,
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn insert(&self, role: &Role) -> Result<(), IamError> {
        let key = (role.scope.clone(), role.name.as_str().to_lowercase());
        let mut tables = write(&self.tables);
        if tables.by_scoped_name.contains_key(&key) {
            return Err(IamError::Conflict(format!(
                "role '{}' already exists in scope '{}'",
                role.name, role.scope
            )));
        }
        tables.by_scoped_name.insert(key, role.id);
        tables.by_id.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Role>, IamError> {
        Ok(read(&self.tables).by_id.get(&id).cloned())
    }

    async fn find_by_name(&self, scope: &str, name: &str) -> Result<Option<Role>, IamError> {
        let tables = read(&self.tables);
        Ok(tables
            .by_scoped_name
            .get(&(scope.to_string(), name.to_lowercase()))
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Role>, IamError> {
        let mut roles: Vec<Role> = read(&self.tables).by_id.values().cloned().collect();
        roles.sort_by(|a, b| (&a.scope, &a.name).cmp(&(&b.scope, &b.name)));
        Ok(roles)
    }

    async fn add_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool, IamError> {
        let mut tables = write(&self.tables);
        if !tables.by_id.contains_key(&role_id) {
            return Err(IamError::not_found("Role", role_id));
        }
        Ok(tables
            .permissions
            .entry(role_id)
            .or_default()
            .insert(permission_id))
    }

    async fn remove_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, IamError> {
        let mut tables = write(&self.tables);
        Ok(tables
            .permissions
            .get_mut(&role_id)
            .is_some_and(|set| set.remove(&permission_id)))
    }

    async fn permission_ids(&self, role_id: Uuid) -> Result<Vec<Uuid>, IamError> {
        Ok(read(&self.tables)
            .permissions
            .get(&role_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}

// ==================== Permissions ====================

#[derive(Default)]
pub struct InMemoryPermissionRepository {
    by_id: DashMap<Uuid, Permission>,
    by_pair: DashMap<(String, String), Uuid>,
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionRepository {
    async fn insert(&self, permission: &Permission) -> Result<(), IamError> {
        let key = (permission.resource.clone(), permission.action.clone());
        match self.by_pair.entry(key) {
            Entry::Occupied(_) => Err(IamError::Conflict(format!(
                "permission {}:{} already exists",
                permission.resource, permission.action
            ))),
            Entry::Vacant(slot) => {
                self.by_id.insert(permission.id, permission.clone());
                slot.insert(permission.id);
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Permission>, IamError> {
        Ok(self.by_id.get(&id).map(|p| p.clone()))
    }

    async fn find_by_resource_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, IamError> {
        let key = (resource.to_string(), action.to_string());
        let Some(id) = self.by_pair.get(&key).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|p| p.clone()))
    }

    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<Permission>, IamError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|p| p.clone()))
            .collect())
    }
}

// ==================== Access control ====================

#[derive(Default)]
pub struct InMemoryAccessControlRepository {
    by_identity: DashMap<Uuid, AccessControl>,
}

#[async_trait]
impl AccessControlRepository for InMemoryAccessControlRepository {
    async fn insert_if_absent(&self, access: &AccessControl) -> Result<bool, IamError> {
        match self.by_identity.entry(access.identity_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(access.clone());
                Ok(true)
            }
        }
    }

    async fn save(&self, access: &AccessControl) -> Result<(), IamError> {
        self.by_identity.insert(access.identity_id, access.clone());
        Ok(())
    }

    async fn find_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<AccessControl>, IamError> {
        Ok(self.by_identity.get(&identity_id).map(|a| a.clone()))
    }
}

// ==================== Access attempts ====================

#[derive(Default)]
pub struct InMemoryAccessAttemptRepository {
    attempts: RwLock<Vec<AccessAttempt>>,
}

impl InMemoryAccessAttemptRepository {
    pub fn len(&self) -> usize {
        read(&self.attempts).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccessAttemptRepository for InMemoryAccessAttemptRepository {
    async fn append(&self, attempt: &AccessAttempt) -> Result<(), IamError> {
        write(&self.attempts).push(attempt.clone());
        Ok(())
    }

    async fn list_logins_for_identity(
        &self,
        identity_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessAttempt>, IamError> {
        let mut attempts: Vec<AccessAttempt> = read(&self.attempts)
            .iter()
            .filter(|a| {
                a.kind == AttemptKind::Login
                    && a.identity_id == Some(identity_id)
                    && a.timestamp >= since
            })
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.timestamp);
        Ok(attempts)
    }

    async fn count_denied_for_ip(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, IamError> {
        Ok(read(&self.attempts)
            .iter()
            .filter(|a| {
                a.outcome == AttemptOutcome::Denied
                    && a.ip_address == ip_address
                    && a.timestamp >= since
            })
            .count())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, IamError> {
        let mut attempts = write(&self.attempts);
        let before = attempts.len();
        attempts.retain(|a| a.timestamp >= cutoff);
        Ok(before - attempts.len())
    }
}

// ==================== Policies ====================

#[derive(Default)]
pub struct InMemoryPolicyRepository {
    policies: DashMap<Uuid, Policy>,
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn insert(&self, policy: &Policy) -> Result<(), IamError> {
        match self.policies.entry(policy.id) {
            Entry::Occupied(_) => Err(IamError::Conflict(format!(
                "policy {} already exists",
                policy.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(policy.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, policy: &Policy) -> Result<(), IamError> {
        match self.policies.get_mut(&policy.id) {
            Some(mut existing) => {
                *existing = policy.clone();
                Ok(())
            }
            None => Err(IamError::not_found("Policy", policy.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, IamError> {
        Ok(self.policies.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Policy>, IamError> {
        Ok(self.policies.get(&id).map(|p| p.clone()))
    }

    async fn find_by_target(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Vec<Policy>, IamError> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.target.matches(resource, action))
            .map(|p| p.clone())
            .collect())
    }

    async fn list(&self) -> Result<Vec<Policy>, IamError> {
        Ok(self.policies.iter().map(|p| p.clone()).collect())
    }
}
