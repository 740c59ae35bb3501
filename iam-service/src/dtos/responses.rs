use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::models::{AuthenticationMethod, Identity, IdentityStatus, Session, SessionStatus};

/// Outward view of an identity. Carries no credential material.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub status: IdentityStatus,
    pub mfa_enabled: bool,
    pub email_verified: bool,
    pub attributes: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.as_str().to_string(),
            email: identity.email,
            status: identity.status,
            mfa_enabled: identity.mfa_enabled,
            email_verified: identity.email_verified,
            attributes: identity.attributes,
            created_at: identity.created_at.to_rfc3339(),
            updated_at: identity.updated_at.to_rfc3339(),
        }
    }
}

/// Outward view of a session. The refresh token id stays server side.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub identity_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub auth_method: AuthenticationMethod,
    pub issued_at: String,
    pub expires_at: String,
    pub last_accessed_at: String,
    pub risk_score: u8,
    pub suspicious: bool,
    pub status: SessionStatus,
    pub terminated_reason: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            identity_id: session.identity_id,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            auth_method: session.auth_method,
            issued_at: session.issued_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
            last_accessed_at: session.last_accessed_at.to_rfc3339(),
            risk_score: session.risk_score,
            suspicious: session.suspicious,
            status: session.status,
            terminated_reason: session.terminated_reason,
        }
    }
}

/// `serialize_with` adapter that writes a session as its response view.
pub fn serialize_session<S: Serializer>(session: &Session, serializer: S) -> Result<S::Ok, S::Error> {
    SessionResponse::from(session.clone()).serialize(serializer)
}
