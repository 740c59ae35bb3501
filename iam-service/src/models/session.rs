//! Session model - authenticated sessions bound to a refresh token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session state codes. Every state other than `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Terminated,
    Suspended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Suspended => "suspended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// How the principal proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    Password,
    Mfa,
    Sso,
    ApiKey,
}

impl AuthenticationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationMethod::Password => "password",
            AuthenticationMethod::Mfa => "mfa",
            AuthenticationMethod::Sso => "sso",
            AuthenticationMethod::ApiKey => "api_key",
        }
    }
}

/// Session entity. Use `SessionResponse` for output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub identity_id: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub auth_method: AuthenticationMethod,
    /// jti of the only refresh token currently accepted for this session.
    pub refresh_token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub risk_score: u8,
    pub suspicious: bool,
    pub status: SessionStatus,
    pub terminated_reason: Option<String>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Active and not past expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && !self.is_expired_at(now)
    }

    /// Move to a terminal state. Returns false when already terminal.
    pub fn end(&mut self, status: SessionStatus, reason: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.terminated_reason = reason;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            session_id: Uuid::new_v4(),
            identity_id: Uuid::new_v4(),
            device_fingerprint: "fp".into(),
            ip_address: "127.0.0.1".into(),
            user_agent: "test".into(),
            auth_method: AuthenticationMethod::Password,
            refresh_token_id: "jti".into(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
            last_accessed_at: now,
            risk_score: 0,
            suspicious: false,
            status: SessionStatus::Active,
            terminated_reason: None,
        }
    }

    #[test]
    fn terminal_states_never_return_to_active() {
        let now = Utc::now();
        let mut s = session(now);
        assert!(s.end(SessionStatus::Terminated, Some("logout".into())));
        assert!(!s.end(SessionStatus::Expired, None));
        assert!(!s.end(SessionStatus::Active, None));
        assert_eq!(s.status, SessionStatus::Terminated);
        assert_eq!(s.terminated_reason.as_deref(), Some("logout"));
    }

    #[test]
    fn validity_tracks_expiry() {
        let now = Utc::now();
        let s = session(now);
        assert!(s.is_valid_at(now));
        assert!(!s.is_valid_at(now + Duration::hours(1)));
    }
}
