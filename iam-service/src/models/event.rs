//! Security event model carried by the event bus.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Security event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IdentityCreated,
    IdentityStatusChanged,
    EmailVerified,
    MfaEnabled,
    PasswordChanged,
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    SessionCreated,
    SessionRefreshed,
    SessionRevoked,
    SuspiciousSession,
    TokenRevoked,
    RoleAssigned,
    RoleRevoked,
    PermissionGranted,
    PermissionRevoked,
    AccessGranted,
    AccessDenied,
    PolicyCreated,
    PolicyUpdated,
    PolicyDeleted,
    RateLimitExceeded,
}

impl EventType {
    pub const ALL: [EventType; 23] = [
        EventType::IdentityCreated,
        EventType::IdentityStatusChanged,
        EventType::EmailVerified,
        EventType::MfaEnabled,
        EventType::PasswordChanged,
        EventType::LoginSucceeded,
        EventType::LoginFailed,
        EventType::AccountLocked,
        EventType::SessionCreated,
        EventType::SessionRefreshed,
        EventType::SessionRevoked,
        EventType::SuspiciousSession,
        EventType::TokenRevoked,
        EventType::RoleAssigned,
        EventType::RoleRevoked,
        EventType::PermissionGranted,
        EventType::PermissionRevoked,
        EventType::AccessGranted,
        EventType::AccessDenied,
        EventType::PolicyCreated,
        EventType::PolicyUpdated,
        EventType::PolicyDeleted,
        EventType::RateLimitExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::IdentityCreated => "identity_created",
            EventType::IdentityStatusChanged => "identity_status_changed",
            EventType::EmailVerified => "email_verified",
            EventType::MfaEnabled => "mfa_enabled",
            EventType::PasswordChanged => "password_changed",
            EventType::LoginSucceeded => "login_succeeded",
            EventType::LoginFailed => "login_failed",
            EventType::AccountLocked => "account_locked",
            EventType::SessionCreated => "session_created",
            EventType::SessionRefreshed => "session_refreshed",
            EventType::SessionRevoked => "session_revoked",
            EventType::SuspiciousSession => "suspicious_session",
            EventType::TokenRevoked => "token_revoked",
            EventType::RoleAssigned => "role_assigned",
            EventType::RoleRevoked => "role_revoked",
            EventType::PermissionGranted => "permission_granted",
            EventType::PermissionRevoked => "permission_revoked",
            EventType::AccessGranted => "access_granted",
            EventType::AccessDenied => "access_denied",
            EventType::PolicyCreated => "policy_created",
            EventType::PolicyUpdated => "policy_updated",
            EventType::PolicyDeleted => "policy_deleted",
            EventType::RateLimitExceeded => "rate_limit_exceeded",
        }
    }

    /// Events describing a failed or rejected operation.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::LoginFailed
                | EventType::AccountLocked
                | EventType::AccessDenied
                | EventType::SuspiciousSession
                | EventType::RateLimitExceeded
        )
    }
}

/// Immutable event record. `handled_by` is filled in by the bus after
/// dispatch, on the copy kept in its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Value,
    pub origin_user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub trace_id: Option<String>,
    pub context: Option<BTreeMap<String, String>>,
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub handled_by: Vec<String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp,
            source: source.into(),
            payload,
            origin_user_id: None,
            session_id: None,
            trace_id: None,
            context: None,
            metadata: None,
            handled_by: Vec::new(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.origin_user_id = Some(user_id);
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key).map(String::as_str)
    }

    /// String field from the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_lists_every_type_once() {
        let mut seen = std::collections::BTreeSet::new();
        for t in EventType::ALL {
            assert!(seen.insert(t.as_str()));
        }
        assert_eq!(seen.len(), EventType::ALL.len());
    }

    #[test]
    fn serializes_type_tag() {
        let event = SecurityEvent::new(
            EventType::SessionCreated,
            "session_manager",
            json!({ "ip_address": "10.0.0.1" }),
            Utc::now(),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session_created");
        assert_eq!(event.payload_str("ip_address"), Some("10.0.0.1"));
    }
}
