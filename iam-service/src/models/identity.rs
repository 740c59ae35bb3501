//! Identity model - registered principals.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::IamError;

const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 100;

/// Shared check for usernames and role names: 2-100 chars, starts with an
/// ASCII alphanumeric, remaining chars alphanumeric or one of `extra`.
fn validate_name(field: &str, value: &str, extra: &[char]) -> Result<(), IamError> {
    let len = value.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(IamError::validation(
            field,
            format!(
                "must be between {} and {} characters",
                NAME_MIN_LEN, NAME_MAX_LEN
            ),
        ));
    }

    let mut chars = value.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(IamError::validation(
            field,
            "must start with a letter or digit",
        ));
    }

    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || extra.contains(c))) {
        return Err(IamError::validation(
            field,
            format!("contains invalid character '{}'", bad),
        ));
    }

    Ok(())
}

/// Validated username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub fn parse(value: impl Into<String>) -> Result<Self, IamError> {
        let value = value.into();
        validate_name("username", &value, &['_', '.', '-'])?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = IamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Username> for String {
    fn from(u: Username) -> Self {
        u.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated role name. Same rules as usernames, `:` also allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    pub fn parse(value: impl Into<String>) -> Result<Self, IamError> {
        let value = value.into();
        validate_name("role_name", &value, &['_', '.', '-', ':'])?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoleName {
    type Error = IamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoleName> for String {
    fn from(r: RoleName) -> Self {
        r.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Inactive,
    Suspended,
    Locked,
    PendingVerification,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
            IdentityStatus::Suspended => "suspended",
            IdentityStatus::Locked => "locked",
            IdentityStatus::PendingVerification => "pending_verification",
        }
    }

    /// Whether a transition from `self` to `to` is allowed.
    /// Staying in the same state is handled by callers as a no-op.
    pub fn can_transition_to(&self, to: IdentityStatus) -> bool {
        use IdentityStatus::*;
        matches!(
            (self, to),
            (PendingVerification, Active | Inactive | Suspended)
                | (Active, Inactive | Suspended | Locked)
                | (Locked, Active | Suspended | Inactive)
                | (Suspended, Active | Inactive)
                | (Inactive, Active)
        )
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity entity. Never physically deleted. Serializes every field,
/// the credential hash included; use `IdentityResponse` for output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: Username,
    pub email: String,
    pub password_hash: String,
    pub status: IdentityStatus,
    pub mfa_enabled: bool,
    pub email_verified: bool,
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(
        username: Username,
        email: String,
        password_hash: String,
        status: IdentityStatus,
        attributes: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            status,
            mfa_enabled: false,
            email_verified: false,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_accepts_valid_values() {
        assert!(Username::parse("alice").is_ok());
        assert!(Username::parse("a1").is_ok());
        assert!(Username::parse("coach.mike-2_0").is_ok());
    }

    #[test]
    fn username_rejects_bad_length_and_chars() {
        assert!(Username::parse("a").is_err());
        assert!(Username::parse("x".repeat(101)).is_err());
        assert!(Username::parse("_alice").is_err());
        assert!(Username::parse("alice smith").is_err());
        assert!(Username::parse("alice;drop").is_err());
    }

    #[test]
    fn username_error_is_domain_validation() {
        let err = Username::parse("!").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn role_name_allows_scope_separator() {
        assert!(RoleName::parse("gym:trainer").is_ok());
        assert!(Username::parse("gym:trainer").is_err());
    }

    #[test]
    fn status_transitions() {
        use IdentityStatus::*;
        assert!(Active.can_transition_to(Locked));
        assert!(Locked.can_transition_to(Active));
        assert!(PendingVerification.can_transition_to(Active));
        assert!(!Active.can_transition_to(PendingVerification));
        assert!(!Inactive.can_transition_to(Locked));
    }
}
