use std::net::IpAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::audit::EventPublisher;
use super::event_bus::EventHandler;
use super::identity::IdentityService;
use super::rate_limit::{rate_limit_key, RateLimitStore};
use super::token::{AccessTokenClaims, TokenPair, TokenService};
use super::IamError;
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::dtos::{
    serialize_session, validate_command, CreateSessionCommand, LoginCommand, RefreshSessionCommand,
    RevokeSessionCommand,
};
use crate::models::{
    AuthenticationMethod, EventType, IdentityStatus, SecurityEvent, Session, SessionStatus,
};
use crate::repositories::{AccessAttemptRepository, SessionRepository};
use crate::utils::device_fingerprint;

const SOURCE: &str = "session_manager";

/// A created or refreshed session with its token pair.
#[derive(Debug, Clone, Serialize)]
pub struct SessionGrant {
    #[serde(serialize_with = "serialize_session")]
    pub session: Session,
    pub tokens: TokenPair,
    pub suspicious: bool,
}

/// Inputs to the risk score.
#[derive(Debug, Clone, Copy)]
pub struct RiskSignals {
    pub first_session: bool,
    pub known_device: bool,
    pub ip: IpSignal,
    pub recent_denied_from_ip: usize,
    pub method: AuthenticationMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSignal {
    Private,
    Unparsable,
    NewPublic,
    KnownPublic,
}

impl IpSignal {
    fn classify(ip_address: &str, seen_before: bool) -> Self {
        match ip_address.trim().parse::<IpAddr>() {
            Err(_) => IpSignal::Unparsable,
            Ok(ip) if is_private(&ip) => IpSignal::Private,
            Ok(_) if seen_before => IpSignal::KnownPublic,
            Ok(_) => IpSignal::NewPublic,
        }
    }
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Deterministic 0-100 score; higher is riskier.
pub fn score_risk(signals: &RiskSignals) -> u8 {
    let device: u32 = match (signals.first_session, signals.known_device) {
        (true, _) => 15,
        (false, true) => 0,
        (false, false) => 30,
    };
    let ip: u32 = match signals.ip {
        IpSignal::Private | IpSignal::KnownPublic => 0,
        IpSignal::Unparsable => 25,
        IpSignal::NewPublic => 15,
    };
    let denied = (signals.recent_denied_from_ip as u32 * 10).min(30);
    let method: u32 = match signals.method {
        AuthenticationMethod::Mfa => 0,
        AuthenticationMethod::Sso => 10,
        AuthenticationMethod::Password => 15,
        AuthenticationMethod::ApiKey => 20,
    };
    (device + ip + denied + method).min(100) as u8
}

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    attempts: Arc<dyn AccessAttemptRepository>,
    identities: IdentityService,
    tokens: Arc<TokenService>,
    rate_limiter: Arc<dyn RateLimitStore>,
    events: EventPublisher,
    clock: SharedClock,
    config: SessionConfig,
    locks: Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        attempts: Arc<dyn AccessAttemptRepository>,
        identities: IdentityService,
        tokens: Arc<TokenService>,
        rate_limiter: Arc<dyn RateLimitStore>,
        events: EventPublisher,
        clock: SharedClock,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            attempts,
            identities,
            tokens,
            rate_limiter,
            events,
            clock,
            config,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn session_ttl(&self) -> Duration {
        Duration::hours(self.config.session_ttl_hours)
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops per-session locks nobody is holding. Returns how many remain.
    pub fn drop_idle_locks(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks.len()
    }

    async fn assess_risk(
        &self,
        identity_id: Uuid,
        exclude: Option<Uuid>,
        fingerprint: &str,
        ip_address: &str,
        method: AuthenticationMethod,
    ) -> Result<u8, IamError> {
        let now = self.clock.now();
        let history: Vec<Session> = self
            .sessions
            .list_by_identity(identity_id)
            .await?
            .into_iter()
            .filter(|s| Some(s.session_id) != exclude)
            .collect();
        let denied = self
            .attempts
            .count_denied_for_ip(
                ip_address,
                now - Duration::minutes(self.config.risk_lookback_minutes),
            )
            .await?;

        let signals = RiskSignals {
            first_session: history.is_empty(),
            known_device: history.iter().any(|s| s.device_fingerprint == fingerprint),
            ip: IpSignal::classify(ip_address, history.iter().any(|s| s.ip_address == ip_address)),
            recent_denied_from_ip: denied,
            method,
        };
        Ok(score_risk(&signals))
    }

    async fn flag_if_suspicious(&self, session: &Session) -> Result<(), IamError> {
        if !session.suspicious {
            return Ok(());
        }
        tracing::warn!(
            session_id = %session.session_id,
            identity_id = %session.identity_id,
            risk_score = session.risk_score,
            "Suspicious session"
        );
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::SuspiciousSession,
                    SOURCE,
                    json!({
                        "risk_score": session.risk_score,
                        "ip_address": session.ip_address,
                        "auth_method": session.auth_method.as_str(),
                    }),
                    self.clock.now(),
                )
                .with_user(session.identity_id)
                .with_session(session.session_id),
            )
            .await
    }

    /// Sign tokens, then persist the session in one write. Nothing is
    /// stored if signing or risk scoring fails.
    pub async fn create_session(
        &self,
        command: CreateSessionCommand,
    ) -> Result<SessionGrant, IamError> {
        validate_command(&command)?;
        let identity = self.identities.get(command.identity_id).await?;
        if !identity.is_active() {
            return Err(IamError::AccountInactive {
                status: identity.status.to_string(),
            });
        }

        let now = self.clock.now();
        let session_id = Uuid::new_v4();
        let fingerprint =
            device_fingerprint(command.device_fingerprint.as_deref(), &command.user_agent);
        let risk_score = self
            .assess_risk(
                identity.id,
                None,
                &fingerprint,
                &command.ip_address,
                command.authentication_method,
            )
            .await?;
        let (tokens, refresh_jti) = self.tokens.issue_token_pair(identity.id, session_id)?;

        let session = Session {
            session_id,
            identity_id: identity.id,
            device_fingerprint: fingerprint,
            ip_address: command.ip_address,
            user_agent: command.user_agent,
            auth_method: command.authentication_method,
            refresh_token_id: refresh_jti,
            issued_at: now,
            expires_at: now + self.session_ttl(),
            last_accessed_at: now,
            risk_score,
            suspicious: risk_score > self.config.risk_threshold,
            status: SessionStatus::Active,
            terminated_reason: None,
        };
        self.sessions.insert(&session).await?;

        tracing::info!(
            session_id = %session.session_id,
            identity_id = %session.identity_id,
            risk_score = session.risk_score,
            "Session created"
        );
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::SessionCreated,
                    SOURCE,
                    json!({
                        "ip_address": session.ip_address,
                        "auth_method": session.auth_method.as_str(),
                        "risk_score": session.risk_score,
                    }),
                    now,
                )
                .with_user(session.identity_id)
                .with_session(session.session_id),
            )
            .await?;
        self.flag_if_suspicious(&session).await?;

        Ok(SessionGrant {
            suspicious: session.suspicious,
            session,
            tokens,
        })
    }

    /// Rate limit, verify credentials, open a session.
    pub async fn authenticate(&self, command: LoginCommand) -> Result<SessionGrant, IamError> {
        validate_command(&command)?;

        let key = rate_limit_key(&command.ip_address, &command.identifier);
        let decision = self.rate_limiter.check(&key).await.map_err(|e| {
            tracing::error!(error = %e, "Rate limit store unavailable, rejecting login");
            IamError::Infrastructure(e)
        })?;
        if !decision.allowed {
            let retry_after_secs = decision.retry_after.map(|d| d.as_secs().max(1));
            tracing::warn!(ip_address = %command.ip_address, "Login rate limit exceeded");
            self.events
                .publish(SecurityEvent::new(
                    EventType::RateLimitExceeded,
                    SOURCE,
                    json!({
                        "identifier": command.identifier,
                        "ip_address": command.ip_address,
                        "retry_after_secs": retry_after_secs,
                    }),
                    self.clock.now(),
                ))
                .await?;
            return Err(IamError::RateLimited { retry_after_secs });
        }

        let identity = self
            .identities
            .verify_credentials(&command.identifier, &command.password, &command.ip_address)
            .await?;

        self.create_session(CreateSessionCommand {
            identity_id: identity.id,
            device_fingerprint: command.device_fingerprint,
            ip_address: command.ip_address,
            user_agent: command.user_agent,
            authentication_method: command.authentication_method,
        })
        .await
    }

    /// Rotate the refresh token. Any failure is reported as `InvalidToken`.
    pub async fn refresh_session(
        &self,
        command: RefreshSessionCommand,
    ) -> Result<SessionGrant, IamError> {
        validate_command(&command)?;
        match self.rotate(command).await {
            Ok(grant) => Ok(grant),
            Err(IamError::Infrastructure(e)) => Err(IamError::Infrastructure(e)),
            Err(e) => {
                tracing::warn!(reason = e.code(), "Refresh rejected");
                Err(IamError::InvalidToken)
            }
        }
    }

    async fn rotate(&self, command: RefreshSessionCommand) -> Result<SessionGrant, IamError> {
        let claims = self.tokens.verify_refresh(&command.refresh_token).await?;
        let session_id = self
            .sessions
            .find_by_refresh_token_id(&claims.jti)
            .await?
            .ok_or(IamError::InvalidToken)?
            .session_id;

        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent refresh may have rotated.
        let mut session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or(IamError::InvalidToken)?;
        let jti_matches: bool = session
            .refresh_token_id
            .as_bytes()
            .ct_eq(claims.jti.as_bytes())
            .into();
        if !jti_matches || session.identity_id.to_string() != claims.sub {
            return Err(IamError::InvalidToken);
        }

        let now = self.clock.now();
        if !session.is_active() {
            return Err(IamError::SessionInactive {
                session_id: session_id.to_string(),
            });
        }
        if session.is_expired_at(now) {
            self.mark_expired(&mut session).await?;
            return Err(IamError::SessionInactive {
                session_id: session_id.to_string(),
            });
        }

        let identity = self.identities.get(session.identity_id).await?;
        if !identity.is_active() {
            return Err(IamError::AccountInactive {
                status: identity.status.to_string(),
            });
        }

        let fingerprint =
            device_fingerprint(command.device_fingerprint.as_deref(), &command.user_agent);
        let risk_score = self
            .assess_risk(
                identity.id,
                Some(session_id),
                &fingerprint,
                &command.ip_address,
                session.auth_method,
            )
            .await?;
        let (tokens, new_jti) = self.tokens.issue_token_pair(identity.id, session_id)?;

        let old_jti = std::mem::replace(&mut session.refresh_token_id, new_jti);
        session.expires_at = (now + self.session_ttl()).max(session.expires_at + Duration::seconds(1));
        session.last_accessed_at = now;
        session.ip_address = command.ip_address;
        session.user_agent = command.user_agent;
        session.device_fingerprint = fingerprint;
        session.risk_score = risk_score;
        session.suspicious = risk_score > self.config.risk_threshold;
        self.sessions.update(&session).await?;

        let old_exp = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(now + self.tokens.refresh_ttl());
        self.tokens.revoke_id(&old_jti, old_exp).await?;

        tracing::info!(session_id = %session_id, identity_id = %session.identity_id, "Session refreshed");
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::SessionRefreshed,
                    SOURCE,
                    json!({ "ip_address": session.ip_address, "risk_score": session.risk_score }),
                    now,
                )
                .with_user(session.identity_id)
                .with_session(session_id),
            )
            .await?;
        self.flag_if_suspicious(&session).await?;

        Ok(SessionGrant {
            suspicious: session.suspicious,
            session,
            tokens,
        })
    }

    async fn mark_expired(&self, session: &mut Session) -> Result<(), IamError> {
        if session.end(SessionStatus::Expired, Some("expired".to_string())) {
            self.sessions.update(session).await?;
            tracing::debug!(session_id = %session.session_id, "Session expired");
        }
        Ok(())
    }

    /// Terminate a session. Ending an already-ended session is a no-op.
    pub async fn revoke_session(&self, command: RevokeSessionCommand) -> Result<Session, IamError> {
        validate_command(&command)?;
        let lock = self.lock_for(command.session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .sessions
            .find_by_id(command.session_id)
            .await?
            .ok_or_else(|| IamError::SessionNotFound {
                session_id: command.session_id.to_string(),
            })?;
        if session.status.is_terminal() {
            return Ok(session);
        }

        let now = self.clock.now();
        let reason = command.reason.unwrap_or_else(|| "revoked".to_string());
        session.end(SessionStatus::Terminated, Some(reason.clone()));
        self.sessions.update(&session).await?;
        // The refresh token cannot outlive its ttl from now.
        self.tokens
            .revoke_id(&session.refresh_token_id, now + self.tokens.refresh_ttl())
            .await?;

        tracing::info!(session_id = %session.session_id, identity_id = %session.identity_id, reason = %reason, "Session revoked");
        self.events
            .publish(
                SecurityEvent::new(EventType::SessionRevoked, SOURCE, json!({ "reason": reason }), now)
                    .with_user(session.identity_id)
                    .with_session(session.session_id),
            )
            .await?;

        Ok(session)
    }

    /// Terminate every active session of an identity. Returns how many ended.
    pub async fn revoke_all_sessions(
        &self,
        identity_id: Uuid,
        reason: &str,
    ) -> Result<usize, IamError> {
        let active: Vec<Uuid> = self
            .sessions
            .list_by_identity(identity_id)
            .await?
            .into_iter()
            .filter(Session::is_active)
            .map(|s| s.session_id)
            .collect();

        let mut revoked = 0;
        for session_id in active {
            let session = self
                .revoke_session(RevokeSessionCommand {
                    session_id,
                    reason: Some(reason.to_string()),
                })
                .await?;
            if session.status == SessionStatus::Terminated {
                revoked += 1;
            }
        }
        if revoked > 0 {
            tracing::info!(identity_id = %identity_id, count = revoked, reason = reason, "Sessions revoked");
        }
        Ok(revoked)
    }

    /// The session if it is active and unexpired; touches last access.
    pub async fn validate_session(&self, session_id: Uuid) -> Result<Option<Session>, IamError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.sessions.find_by_id(session_id).await? else {
            return Ok(None);
        };
        if !session.is_active() {
            return Ok(None);
        }

        let now = self.clock.now();
        if session.is_expired_at(now) {
            self.mark_expired(&mut session).await?;
            return Ok(None);
        }

        session.last_accessed_at = now;
        self.sessions.update(&session).await?;
        Ok(Some(session))
    }

    /// Verify an access token and the session it is bound to.
    pub async fn authorize_access_token(
        &self,
        token: &str,
    ) -> Result<(AccessTokenClaims, Session), IamError> {
        let claims = self.tokens.verify_access(token).await?;
        let session_id: Uuid = claims
            .session_id
            .parse()
            .map_err(|_| IamError::InvalidToken)?;
        let session = self
            .validate_session(session_id)
            .await?
            .ok_or_else(|| IamError::SessionInactive {
                session_id: session_id.to_string(),
            })?;
        if session.identity_id.to_string() != claims.sub {
            return Err(IamError::InvalidToken);
        }
        Ok((claims, session))
    }

    pub async fn get_active_sessions(&self, identity_id: Uuid) -> Result<Vec<Session>, IamError> {
        let now = self.clock.now();
        Ok(self
            .sessions
            .list_by_identity(identity_id)
            .await?
            .into_iter()
            .filter(|s| s.is_valid_at(now))
            .collect())
    }

    /// Move active sessions past expiry to `expired`. Returns how many.
    pub async fn expire_stale_sessions(&self) -> Result<usize, IamError> {
        let now: DateTime<Utc> = self.clock.now();
        let stale = self.sessions.list_expired_active(now).await?;

        let mut expired = 0;
        for candidate in stale {
            let lock = self.lock_for(candidate.session_id);
            let _guard = lock.lock().await;
            if let Some(mut session) = self.sessions.find_by_id(candidate.session_id).await? {
                if session.is_active() && session.is_expired_at(now) {
                    self.mark_expired(&mut session).await?;
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }
}

/// Ends sessions when their identity loses the right to hold them.
pub struct SessionRevocationHandler {
    sessions: Weak<SessionManager>,
}

impl SessionRevocationHandler {
    pub const NAME: &'static str = "session_revocation";

    pub fn new(sessions: &Arc<SessionManager>) -> Self {
        Self {
            sessions: Arc::downgrade(sessions),
        }
    }

    fn revocation_reason(event: &SecurityEvent) -> Option<&'static str> {
        match event.event_type {
            EventType::AccountLocked => Some("account_locked"),
            EventType::PasswordChanged => Some("password_changed"),
            EventType::IdentityStatusChanged => {
                let to = event.payload_str("to")?;
                [
                    IdentityStatus::Suspended,
                    IdentityStatus::Locked,
                    IdentityStatus::Inactive,
                ]
                .iter()
                .find(|s| s.as_str() == to)
                .map(|_| "identity_status_changed")
            }
            _ => None,
        }
    }
}

#[async_trait]
impl EventHandler for SessionRevocationHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::AccountLocked | EventType::PasswordChanged | EventType::IdentityStatusChanged
        )
    }

    fn priority(&self) -> i32 {
        75
    }

    async fn handle(&self, event: &SecurityEvent) -> anyhow::Result<()> {
        let (Some(reason), Some(identity_id)) =
            (Self::revocation_reason(event), event.origin_user_id)
        else {
            return Ok(());
        };
        let Some(sessions) = self.sessions.upgrade() else {
            return Ok(());
        };
        sessions
            .revoke_all_sessions(identity_id, reason)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke sessions for {}: {}", identity_id, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(method: AuthenticationMethod) -> RiskSignals {
        RiskSignals {
            first_session: false,
            known_device: true,
            ip: IpSignal::Private,
            recent_denied_from_ip: 0,
            method,
        }
    }

    #[test]
    fn known_device_on_private_network_is_low_risk() {
        assert_eq!(score_risk(&signals(AuthenticationMethod::Mfa)), 0);
        assert_eq!(score_risk(&signals(AuthenticationMethod::Password)), 15);
    }

    #[test]
    fn risk_is_capped_at_100() {
        let worst = RiskSignals {
            first_session: false,
            known_device: false,
            ip: IpSignal::Unparsable,
            recent_denied_from_ip: 10,
            method: AuthenticationMethod::ApiKey,
        };
        assert_eq!(score_risk(&worst), 100);
    }

    #[test]
    fn new_device_from_new_public_ip_after_failures_is_suspicious() {
        let s = RiskSignals {
            first_session: false,
            known_device: false,
            ip: IpSignal::NewPublic,
            recent_denied_from_ip: 2,
            method: AuthenticationMethod::Password,
        };
        assert_eq!(score_risk(&s), 30 + 15 + 20 + 15);
        assert!(score_risk(&s) > 70);
    }

    #[test]
    fn ip_classification() {
        assert_eq!(IpSignal::classify("127.0.0.1", false), IpSignal::Private);
        assert_eq!(IpSignal::classify("10.1.2.3", false), IpSignal::Private);
        assert_eq!(IpSignal::classify("fd00::1", false), IpSignal::Private);
        assert_eq!(IpSignal::classify("8.8.8.8", false), IpSignal::NewPublic);
        assert_eq!(IpSignal::classify("8.8.8.8", true), IpSignal::KnownPublic);
        assert_eq!(IpSignal::classify("not-an-ip", false), IpSignal::Unparsable);
    }
}
