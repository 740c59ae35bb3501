use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use uuid::Uuid;

use super::audit::EventPublisher;
use super::IamError;
use crate::clock::SharedClock;
use crate::dtos::{validate_command, AssignRoleCommand, GrantPermissionCommand};
use crate::models::{
    AccessControl, AccessLevel, EventType, Permission, PermissionGrant, Role, RoleAssignment,
    RoleName, SecurityEvent,
};
use crate::repositories::{
    AccessControlRepository, IdentityRepository, PermissionRepository, RoleRepository,
};

const SOURCE: &str = "access_control";

/// Role-based access control over the per-identity `AccessControl`
/// aggregate.
#[derive(Clone)]
pub struct AccessControlService {
    identities: Arc<dyn IdentityRepository>,
    access_controls: Arc<dyn AccessControlRepository>,
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
    events: EventPublisher,
    clock: SharedClock,
    /// Serialises read-modify-write of one identity's aggregate.
    locks: Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccessControlService {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        access_controls: Arc<dyn AccessControlRepository>,
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
        events: EventPublisher,
        clock: SharedClock,
    ) -> Self {
        Self {
            identities,
            access_controls,
            roles,
            permissions,
            events,
            clock,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, identity_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(identity_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Returns how many per-identity locks remain.
    pub fn drop_idle_locks(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks.len()
    }

    // ==================== Catalogue ====================

    pub async fn create_role(
        &self,
        name: &str,
        scope: &str,
        description: &str,
        is_system_role: bool,
    ) -> Result<Role, IamError> {
        let role = Role::new(
            RoleName::parse(name.trim())?,
            scope,
            description,
            is_system_role,
            self.clock.now(),
        );
        self.roles.insert(&role).await?;
        tracing::info!(role_id = %role.id, role = %role.name, scope = %role.scope, "Role created");
        self.events
            .audit()
            .audit_success(
                "role_created",
                None,
                json!({ "role_id": role.id, "role": role.name.as_str(), "scope": role.scope }),
            )
            .await?;
        Ok(role)
    }

    pub async fn find_role_by_name(&self, scope: &str, name: &str) -> Result<Option<Role>, IamError> {
        self.roles.find_by_name(scope, name).await
    }

    pub async fn create_permission(&self, resource: &str, action: &str) -> Result<Permission, IamError> {
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() {
            return Err(IamError::validation(
                "permission",
                "resource and action must not be empty",
            ));
        }
        let permission = Permission::new(format!("{}:{}", resource, action), resource, action);
        self.permissions.insert(&permission).await?;
        tracing::info!(permission_id = %permission.id, permission = %permission.name, "Permission created");
        self.events
            .audit()
            .audit_success(
                "permission_created",
                None,
                json!({ "permission_id": permission.id, "permission": permission.name }),
            )
            .await?;
        Ok(permission)
    }

    async fn find_or_create_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Permission, IamError> {
        if let Some(existing) = self
            .permissions
            .find_by_resource_action(resource, action)
            .await?
        {
            return Ok(existing);
        }
        match self.create_permission(resource, action).await {
            Ok(permission) => Ok(permission),
            // Lost a creation race; the winner's row is the one to use.
            Err(IamError::Conflict(_)) => self
                .permissions
                .find_by_resource_action(resource, action)
                .await?
                .ok_or_else(|| IamError::not_found("Permission", format!("{}:{}", resource, action))),
            Err(e) => Err(e),
        }
    }

    /// Returns false when the role already had the permission.
    pub async fn add_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, IamError> {
        if self.permissions.find_by_id(permission_id).await?.is_none() {
            return Err(IamError::not_found("Permission", permission_id));
        }
        let added = self.roles.add_permission(role_id, permission_id).await?;
        if added {
            self.audit_role_change("role_permission_added", role_id, permission_id)
                .await?;
        }
        Ok(added)
    }

    pub async fn remove_permission_from_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, IamError> {
        let removed = self.roles.remove_permission(role_id, permission_id).await?;
        if removed {
            self.audit_role_change("role_permission_removed", role_id, permission_id)
                .await?;
        }
        Ok(removed)
    }

    async fn audit_role_change(
        &self,
        operation: &str,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), IamError> {
        self.events
            .audit()
            .audit_success(
                operation,
                None,
                json!({ "role_id": role_id, "permission_id": permission_id }),
            )
            .await
    }

    /// Idempotent bootstrap: the role exists afterwards with at least the
    /// given `(resource, action)` permissions.
    pub async fn ensure_role(
        &self,
        name: &str,
        scope: &str,
        description: &str,
        is_system_role: bool,
        permissions: &[(&str, &str)],
    ) -> Result<Role, IamError> {
        let role = match self.roles.find_by_name(scope, name).await? {
            Some(role) => role,
            None => match self.create_role(name, scope, description, is_system_role).await {
                Ok(role) => role,
                Err(IamError::Conflict(_)) => self
                    .roles
                    .find_by_name(scope, name)
                    .await?
                    .ok_or_else(|| IamError::not_found("Role", name))?,
                Err(e) => return Err(e),
            },
        };

        for (resource, action) in permissions {
            let permission = self.find_or_create_permission(resource, action).await?;
            self.add_permission_to_role(role.id, permission.id).await?;
        }
        Ok(role)
    }

    // ==================== Assignments ====================

    async fn load(&self, identity_id: Uuid) -> Result<AccessControl, IamError> {
        if let Some(access) = self.access_controls.find_by_identity(identity_id).await? {
            return Ok(access);
        }
        if self.identities.find_by_id(identity_id).await?.is_none() {
            return Err(IamError::not_found("Identity", identity_id));
        }
        // Identity exists without an aggregate; create its single one.
        let access = AccessControl::new(identity_id, self.clock.now());
        self.access_controls.insert_if_absent(&access).await?;
        self.access_controls
            .find_by_identity(identity_id)
            .await?
            .ok_or_else(|| IamError::not_found("AccessControl", identity_id))
    }

    /// Assigning an already-held role changes nothing.
    pub async fn assign_role(
        &self,
        command: AssignRoleCommand,
        granted_by: Option<Uuid>,
    ) -> Result<AccessControl, IamError> {
        validate_command(&command)?;
        if let (Some(from), Some(until)) = (command.effective_from, command.effective_until) {
            if until <= from {
                return Err(IamError::validation(
                    "effective_until",
                    "must be after effective_from",
                ));
            }
        }
        let role = self
            .roles
            .find_by_id(command.role_id)
            .await?
            .ok_or_else(|| IamError::not_found("Role", command.role_id))?;

        let lock = self.lock_for(command.identity_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let mut access = self.load(command.identity_id).await?;
        let changed = access.assign_role(
            RoleAssignment {
                role_id: role.id,
                granted_by,
                granted_at: now,
                effective_from: command.effective_from,
                effective_until: command.effective_until,
            },
            now,
        );
        if !changed {
            return Ok(access);
        }
        self.access_controls.save(&access).await?;

        tracing::info!(identity_id = %command.identity_id, role = %role.name, "Role assigned");
        let mut event = SecurityEvent::new(
            EventType::RoleAssigned,
            SOURCE,
            json!({ "role_id": role.id, "role": role.name.as_str(), "granted_by": granted_by }),
            now,
        )
        .with_user(command.identity_id);
        if let Some(by) = granted_by {
            event = event.with_context("granted_by", by.to_string());
        }
        self.events.publish(event).await?;
        Ok(access)
    }

    pub async fn revoke_role(&self, identity_id: Uuid, role_id: Uuid) -> Result<bool, IamError> {
        let lock = self.lock_for(identity_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let mut access = self.load(identity_id).await?;
        if !access.revoke_role(role_id, now) {
            return Ok(false);
        }
        self.access_controls.save(&access).await?;

        tracing::info!(identity_id = %identity_id, role_id = %role_id, "Role revoked");
        self.events
            .publish(
                SecurityEvent::new(EventType::RoleRevoked, SOURCE, json!({ "role_id": role_id }), now)
                    .with_user(identity_id),
            )
            .await?;
        Ok(true)
    }

    pub async fn grant_permission(
        &self,
        command: GrantPermissionCommand,
        granted_by: Option<Uuid>,
    ) -> Result<AccessControl, IamError> {
        validate_command(&command)?;
        let permission = self
            .permissions
            .find_by_id(command.permission_id)
            .await?
            .ok_or_else(|| IamError::not_found("Permission", command.permission_id))?;

        let lock = self.lock_for(command.identity_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let mut access = self.load(command.identity_id).await?;
        let changed = access.grant_permission(
            PermissionGrant {
                permission_id: permission.id,
                granted_by,
                granted_at: now,
                conditions: command.conditions,
            },
            now,
        );
        if !changed {
            return Ok(access);
        }
        self.access_controls.save(&access).await?;

        tracing::info!(identity_id = %command.identity_id, permission = %permission.name, "Permission granted");
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::PermissionGranted,
                    SOURCE,
                    json!({
                        "permission_id": permission.id,
                        "resource": permission.resource,
                        "action": permission.action,
                        "granted_by": granted_by,
                    }),
                    now,
                )
                .with_user(command.identity_id),
            )
            .await?;
        Ok(access)
    }

    pub async fn revoke_permission(
        &self,
        identity_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, IamError> {
        let lock = self.lock_for(identity_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let mut access = self.load(identity_id).await?;
        if !access.revoke_permission(permission_id, now) {
            return Ok(false);
        }
        self.access_controls.save(&access).await?;

        tracing::info!(identity_id = %identity_id, permission_id = %permission_id, "Permission revoked");
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::PermissionRevoked,
                    SOURCE,
                    json!({ "permission_id": permission_id }),
                    now,
                )
                .with_user(identity_id),
            )
            .await?;
        Ok(true)
    }

    pub async fn set_access_level(
        &self,
        identity_id: Uuid,
        level: AccessLevel,
    ) -> Result<AccessControl, IamError> {
        let lock = self.lock_for(identity_id);
        let _guard = lock.lock().await;
        let mut access = self.load(identity_id).await?;
        if access.access_level == level {
            return Ok(access);
        }
        access.access_level = level;
        access.updated_at = self.clock.now();
        self.access_controls.save(&access).await?;
        tracing::info!(identity_id = %identity_id, level = level.as_str(), "Access level changed");
        self.events
            .audit()
            .audit_success(
                "access_level_changed",
                Some(&identity_id.to_string()),
                json!({ "access_level": level.as_str() }),
            )
            .await?;
        Ok(access)
    }

    pub async fn get_access_control(&self, identity_id: Uuid) -> Result<AccessControl, IamError> {
        self.load(identity_id).await
    }

    // ==================== Queries ====================

    /// Names of the roles currently in effect for an identity.
    pub async fn effective_role_names(&self, identity_id: Uuid) -> Result<Vec<String>, IamError> {
        let access = self.load(identity_id).await?;
        let mut names = Vec::new();
        for role_id in access.effective_role_ids(self.clock.now()) {
            if let Some(role) = self.roles.find_by_id(role_id).await? {
                names.push(role.name.as_str().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Direct grants plus everything reachable through effective roles.
    pub async fn get_effective_permissions(
        &self,
        identity_id: Uuid,
    ) -> Result<BTreeSet<Permission>, IamError> {
        let access = self.load(identity_id).await?;
        let mut ids: BTreeSet<Uuid> = access.permission_ids();
        for role_id in access.effective_role_ids(self.clock.now()) {
            ids.extend(self.roles.permission_ids(role_id).await?);
        }
        let ids: Vec<Uuid> = ids.into_iter().collect();
        Ok(self.permissions.find_many(&ids).await?.into_iter().collect())
    }

    /// Default deny. Stops at the first matching permission.
    pub async fn has_permission(
        &self,
        identity_id: Uuid,
        resource: &str,
        action: &str,
    ) -> Result<bool, IamError> {
        let access = match self.load(identity_id).await {
            Ok(access) => access,
            Err(IamError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        if access.access_level == AccessLevel::SuperAdmin {
            return Ok(true);
        }

        let direct: Vec<Uuid> = access.permission_ids().into_iter().collect();
        if self
            .permissions
            .find_many(&direct)
            .await?
            .iter()
            .any(|p| p.matches(resource, action))
        {
            return Ok(true);
        }

        for role_id in access.effective_role_ids(self.clock.now()) {
            let ids = self.roles.permission_ids(role_id).await?;
            if self
                .permissions
                .find_many(&ids)
                .await?
                .iter()
                .any(|p| p.matches(resource, action))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
