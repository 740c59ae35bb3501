use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::AuthenticationMethod;
use crate::utils::Password;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIdentityCommand {
    #[validate(length(min = 2, max = 100, message = "Username must be 2-100 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: Password,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionCommand {
    pub identity_id: Uuid,

    #[validate(length(max = 512, message = "Device fingerprint is too long"))]
    pub device_fingerprint: Option<String>,

    #[validate(length(min = 1, max = 64, message = "IP address is required"))]
    pub ip_address: String,

    #[validate(length(max = 1024, message = "User agent is too long"))]
    #[serde(default)]
    pub user_agent: String,

    #[serde(default = "default_method")]
    pub authentication_method: AuthenticationMethod,
}

fn default_method() -> AuthenticationMethod {
    AuthenticationMethod::Password
}

/// Username or email plus secret.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginCommand {
    #[validate(length(min = 1, max = 254, message = "Identifier is required"))]
    pub identifier: String,

    pub password: Password,

    #[validate(length(min = 1, max = 64, message = "IP address is required"))]
    pub ip_address: String,

    #[validate(length(max = 1024, message = "User agent is too long"))]
    #[serde(default)]
    pub user_agent: String,

    #[validate(length(max = 512, message = "Device fingerprint is too long"))]
    pub device_fingerprint: Option<String>,

    #[serde(default = "default_method")]
    pub authentication_method: AuthenticationMethod,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshSessionCommand {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,

    #[validate(length(min = 1, max = 64, message = "IP address is required"))]
    pub ip_address: String,

    #[validate(length(max = 1024, message = "User agent is too long"))]
    #[serde(default)]
    pub user_agent: String,

    #[validate(length(max = 512, message = "Device fingerprint is too long"))]
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeSessionCommand {
    pub session_id: Uuid,

    #[validate(length(max = 256, message = "Reason is too long"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleCommand {
    pub identity_id: Uuid,
    pub role_id: Uuid,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantPermissionCommand {
    pub identity_id: Uuid,
    pub permission_id: Uuid,
    #[serde(default)]
    pub conditions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ValidateAccessCommand {
    pub subject: Uuid,

    #[validate(length(min = 1, max = 128, message = "Resource is required"))]
    pub resource: String,

    #[validate(length(min = 1, max = 128, message = "Action is required"))]
    pub action: String,

    pub session_id: Option<Uuid>,

    #[validate(length(max = 64, message = "IP address is too long"))]
    pub ip_address: Option<String>,

    /// Caller-supplied attributes, e.g. `resource.owner_id`.
    #[serde(default)]
    pub environment: BTreeMap<String, serde_json::Value>,
}

impl ValidateAccessCommand {
    pub fn new(subject: Uuid, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject,
            resource: resource.into(),
            action: action.into(),
            session_id: None,
            ip_address: None,
            environment: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.environment.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_identity_rejects_bad_email() {
        let cmd: CreateIdentityCommand = serde_json::from_value(json!({
            "username": "alice",
            "email": "not-an-email",
            "password": "Passw0rd!"
        }))
        .unwrap();
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn login_defaults_to_password_method() {
        let cmd: LoginCommand = serde_json::from_value(json!({
            "identifier": "alice",
            "password": "Passw0rd!",
            "ip_address": "10.0.0.1"
        }))
        .unwrap();
        assert!(cmd.validate().is_ok());
        assert_eq!(cmd.authentication_method, AuthenticationMethod::Password);
        assert!(!format!("{:?}", cmd).contains("Passw0rd"));
    }
}
