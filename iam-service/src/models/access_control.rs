//! AccessControl aggregate - the single authoritative record of what an
//! identity may do.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
    SuperAdmin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
            AccessLevel::SuperAdmin => "super_admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: Uuid,
    pub granted_by: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_from.map_or(true, |from| from <= now)
            && self.effective_until.map_or(true, |until| now < until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub permission_id: Uuid,
    pub granted_by: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
    /// Recorded with the grant for audit; attribute constraints are
    /// enforced through policies.
    pub conditions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessControl {
    pub identity_id: Uuid,
    pub role_assignments: BTreeMap<Uuid, RoleAssignment>,
    pub permission_grants: BTreeMap<Uuid, PermissionGrant>,
    pub access_level: AccessLevel,
    pub updated_at: DateTime<Utc>,
}

impl AccessControl {
    pub fn new(identity_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            identity_id,
            role_assignments: BTreeMap::new(),
            permission_grants: BTreeMap::new(),
            access_level: AccessLevel::Read,
            updated_at: now,
        }
    }

    /// Adds the assignment unless the role is already held. Returns whether
    /// anything changed.
    pub fn assign_role(&mut self, assignment: RoleAssignment, now: DateTime<Utc>) -> bool {
        if self.role_assignments.contains_key(&assignment.role_id) {
            return false;
        }
        self.role_assignments.insert(assignment.role_id, assignment);
        self.updated_at = now;
        true
    }

    pub fn grant_permission(&mut self, grant: PermissionGrant, now: DateTime<Utc>) -> bool {
        if self.permission_grants.contains_key(&grant.permission_id) {
            return false;
        }
        self.permission_grants.insert(grant.permission_id, grant);
        self.updated_at = now;
        true
    }

    pub fn revoke_role(&mut self, role_id: Uuid, now: DateTime<Utc>) -> bool {
        let removed = self.role_assignments.remove(&role_id).is_some();
        if removed {
            self.updated_at = now;
        }
        removed
    }

    pub fn revoke_permission(&mut self, permission_id: Uuid, now: DateTime<Utc>) -> bool {
        let removed = self.permission_grants.remove(&permission_id).is_some();
        if removed {
            self.updated_at = now;
        }
        removed
    }

    /// Roles whose effective window covers `now`.
    pub fn effective_role_ids(&self, now: DateTime<Utc>) -> BTreeSet<Uuid> {
        self.role_assignments
            .values()
            .filter(|a| a.is_effective_at(now))
            .map(|a| a.role_id)
            .collect()
    }

    pub fn permission_ids(&self) -> BTreeSet<Uuid> {
        self.permission_grants.keys().copied().collect()
    }
}
