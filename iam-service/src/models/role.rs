//! Role model - scoped roles with permission mappings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RoleName;

pub const GLOBAL_SCOPE: &str = "global";

/// Role entity. Name is unique within its scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: RoleName,
    pub scope: String,
    pub description: String,
    pub is_system_role: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        name: RoleName,
        scope: impl Into<String>,
        description: impl Into<String>,
        is_system_role: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            scope: scope.into(),
            description: description.into(),
            is_system_role,
            created_at: now,
        }
    }
}
