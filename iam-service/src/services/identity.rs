use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use serde_json::json;
use uuid::Uuid;

use super::audit::EventPublisher;
use super::IamError;
use crate::clock::SharedClock;
use crate::config::IdentityConfig;
use crate::dtos::{validate_command, CreateIdentityCommand};
use crate::models::{
    AccessAttempt, AccessControl, AttemptOutcome, EventType, Identity, IdentityStatus,
    SecurityEvent, Username,
};
use crate::repositories::{AccessAttemptRepository, AccessControlRepository, IdentityRepository};
use crate::utils::{CredentialHasher, Password, PasswordHashString};

const SOURCE: &str = "identity_service";

/// Registration, credential verification and identity lifecycle.
#[derive(Clone)]
pub struct IdentityService {
    identities: Arc<dyn IdentityRepository>,
    access_controls: Arc<dyn AccessControlRepository>,
    attempts: Arc<dyn AccessAttemptRepository>,
    hasher: Arc<dyn CredentialHasher>,
    events: EventPublisher,
    clock: SharedClock,
    config: IdentityConfig,
    /// Verified against on unknown identifiers so both paths hash once.
    dummy_hash: PasswordHashString,
    /// Serialises read-modify-write of one identity record.
    locks: Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityService {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        access_controls: Arc<dyn AccessControlRepository>,
        attempts: Arc<dyn AccessAttemptRepository>,
        hasher: Arc<dyn CredentialHasher>,
        events: EventPublisher,
        clock: SharedClock,
        config: IdentityConfig,
    ) -> Result<Self, IamError> {
        let dummy_hash = hasher.hash(&Password::new(Uuid::new_v4().to_string()))?;
        Ok(Self {
            identities,
            access_controls,
            attempts,
            hasher,
            events,
            clock,
            config,
            dummy_hash,
            locks: Arc::new(DashMap::new()),
        })
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Returns how many per-identity locks remain.
    pub fn drop_idle_locks(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks.len()
    }

    pub async fn create(&self, command: CreateIdentityCommand) -> Result<Identity, IamError> {
        validate_command(&command)?;
        let username = Username::parse(command.username.trim())?;
        self.config
            .password_policy
            .validate(command.password.as_str())?;

        let hash = self.hasher.hash(&command.password)?;
        let status = if self.config.require_email_verification {
            IdentityStatus::PendingVerification
        } else {
            IdentityStatus::Active
        };
        let now = self.clock.now();
        let identity = Identity::new(
            username,
            command.email.trim().to_lowercase(),
            hash.into_string(),
            status,
            command.attributes,
            now,
        );

        self.identities.insert(&identity).await?;
        self.access_controls
            .insert_if_absent(&AccessControl::new(identity.id, now))
            .await?;

        tracing::info!(identity_id = %identity.id, status = %identity.status, "Identity created");

        self.events
            .publish(
                SecurityEvent::new(
                    EventType::IdentityCreated,
                    SOURCE,
                    json!({ "username": identity.username.as_str(), "status": identity.status.as_str() }),
                    now,
                )
                .with_user(identity.id),
            )
            .await?;

        Ok(identity)
    }

    pub async fn get(&self, id: Uuid) -> Result<Identity, IamError> {
        self.identities
            .find_by_id(id)
            .await?
            .ok_or_else(|| IamError::not_found("Identity", id))
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>, IamError> {
        let identifier = identifier.trim();
        if identifier.contains('@') {
            if let Some(identity) = self.identities.find_by_email(identifier).await? {
                return Ok(Some(identity));
            }
        }
        self.identities.find_by_username(identifier).await
    }

    /// Check a secret for a username or email. Unknown identifiers and wrong
    /// secrets produce the same error.
    pub async fn verify_credentials(
        &self,
        identifier: &str,
        secret: &Password,
        ip_address: &str,
    ) -> Result<Identity, IamError> {
        let now = self.clock.now();

        let Some(identity) = self.find_by_identifier(identifier).await? else {
            let _ = self.hasher.verify(secret, &self.dummy_hash);
            self.attempts
                .append(&AccessAttempt::login(
                    None,
                    identifier,
                    ip_address,
                    AttemptOutcome::Denied,
                    now,
                ))
                .await?;
            self.emit_login_failed(None, identifier, ip_address).await?;
            return Err(IamError::InvalidCredentials);
        };

        let matches = self.hasher.verify(
            secret,
            &PasswordHashString::new(identity.password_hash.clone()),
        )?;

        if !matches {
            self.attempts
                .append(&AccessAttempt::login(
                    Some(identity.id),
                    identifier,
                    ip_address,
                    AttemptOutcome::Denied,
                    now,
                ))
                .await?;
            self.emit_login_failed(Some(identity.id), identifier, ip_address)
                .await?;
            self.lock_if_threshold_reached(identity.id, identifier).await?;
            return Err(IamError::InvalidCredentials);
        }

        if !identity.is_active() {
            self.attempts
                .append(&AccessAttempt::login(
                    Some(identity.id),
                    identifier,
                    ip_address,
                    AttemptOutcome::Denied,
                    now,
                ))
                .await?;
            tracing::warn!(identity_id = %identity.id, status = %identity.status, "Login for inactive identity");
            return Err(IamError::AccountInactive {
                status: identity.status.to_string(),
            });
        }

        self.attempts
            .append(&AccessAttempt::login(
                Some(identity.id),
                identifier,
                ip_address,
                AttemptOutcome::Granted,
                now,
            ))
            .await?;
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::LoginSucceeded,
                    SOURCE,
                    json!({ "identifier": identifier, "ip_address": ip_address }),
                    now,
                )
                .with_user(identity.id),
            )
            .await?;

        Ok(identity)
    }

    async fn emit_login_failed(
        &self,
        identity_id: Option<Uuid>,
        identifier: &str,
        ip: &str,
    ) -> Result<(), IamError> {
        tracing::warn!(identifier = identifier, ip_address = ip, "Login failed");
        let mut event = SecurityEvent::new(
            EventType::LoginFailed,
            SOURCE,
            json!({ "identifier": identifier, "ip_address": ip, "reason": "INVALID_CREDENTIALS" }),
            self.clock.now(),
        );
        if let Some(id) = identity_id {
            event = event.with_user(id);
        }
        self.events.publish(event).await
    }

    /// Consecutive failures since the last success inside the window.
    async fn recent_failures(&self, identity_id: Uuid) -> Result<u32, IamError> {
        let since = self.clock.now() - Duration::minutes(self.config.lockout_window_minutes);
        let attempts = self
            .attempts
            .list_logins_for_identity(identity_id, since)
            .await?;
        let failures = attempts
            .iter()
            .rev()
            .take_while(|a| a.outcome == AttemptOutcome::Denied)
            .count();
        Ok(failures as u32)
    }

    async fn lock_if_threshold_reached(
        &self,
        id: Uuid,
        identifier: &str,
    ) -> Result<(), IamError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        // The caller's snapshot predates the hash check; work on a fresh read.
        let mut identity = self.get(id).await?;
        if identity.status != IdentityStatus::Active {
            return Ok(());
        }
        let failures = self.recent_failures(identity.id).await?;
        if failures < self.config.max_failed_attempts {
            return Ok(());
        }

        let now = self.clock.now();
        identity.status = IdentityStatus::Locked;
        identity.updated_at = now;
        self.identities.update(&identity).await?;

        tracing::warn!(identity_id = %identity.id, failures = failures, "Identity locked after repeated failed logins");
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::AccountLocked,
                    SOURCE,
                    json!({ "identifier": identifier, "failures": failures }),
                    now,
                )
                .with_user(identity.id),
            )
            .await?;
        Ok(())
    }

    /// Apply a lifecycle transition. Moving to the current status is a
    /// no-op.
    pub async fn change_status(
        &self,
        id: Uuid,
        new_status: IdentityStatus,
        reason: Option<&str>,
    ) -> Result<Identity, IamError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut identity = self.get(id).await?;
        if identity.status == new_status {
            return Ok(identity);
        }
        if !identity.status.can_transition_to(new_status) {
            return Err(IamError::validation(
                "status",
                format!(
                    "cannot change status from {} to {}",
                    identity.status, new_status
                ),
            ));
        }

        let previous = identity.status;
        let now = self.clock.now();
        identity.status = new_status;
        identity.updated_at = now;
        self.identities.update(&identity).await?;

        tracing::info!(identity_id = %id, from = %previous, to = %new_status, "Identity status changed");
        self.events
            .publish(
                SecurityEvent::new(
                    EventType::IdentityStatusChanged,
                    SOURCE,
                    json!({
                        "from": previous.as_str(),
                        "to": new_status.as_str(),
                        "reason": reason,
                    }),
                    now,
                )
                .with_user(id),
            )
            .await?;

        Ok(identity)
    }

    pub async fn verify_email(&self, id: Uuid) -> Result<Identity, IamError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut identity = self.get(id).await?;
        if identity.email_verified {
            return Ok(identity);
        }

        let now = self.clock.now();
        identity.email_verified = true;
        if identity.status == IdentityStatus::PendingVerification {
            identity.status = IdentityStatus::Active;
        }
        identity.updated_at = now;
        self.identities.update(&identity).await?;

        tracing::info!(identity_id = %id, "Email verified");
        self.events
            .publish(SecurityEvent::new(EventType::EmailVerified, SOURCE, json!({}), now).with_user(id))
            .await?;
        Ok(identity)
    }

    pub async fn enable_mfa(&self, id: Uuid) -> Result<Identity, IamError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut identity = self.get(id).await?;
        if identity.mfa_enabled {
            return Ok(identity);
        }

        let now = self.clock.now();
        identity.mfa_enabled = true;
        identity.updated_at = now;
        self.identities.update(&identity).await?;

        tracing::info!(identity_id = %id, "MFA enabled");
        self.events
            .publish(SecurityEvent::new(EventType::MfaEnabled, SOURCE, json!({}), now).with_user(id))
            .await?;
        Ok(identity)
    }

    pub async fn change_password(
        &self,
        id: Uuid,
        current: &Password,
        new_password: &Password,
    ) -> Result<(), IamError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut identity = self.get(id).await?;
        let matches = self.hasher.verify(
            current,
            &PasswordHashString::new(identity.password_hash.clone()),
        )?;
        if !matches {
            return Err(IamError::InvalidCredentials);
        }
        self.config
            .password_policy
            .validate(new_password.as_str())?;

        let now = self.clock.now();
        identity.password_hash = self.hasher.hash(new_password)?.into_string();
        identity.updated_at = now;
        self.identities.update(&identity).await?;

        tracing::info!(identity_id = %id, "Password changed");
        self.events
            .publish(SecurityEvent::new(EventType::PasswordChanged, SOURCE, json!({}), now).with_user(id))
            .await?;
        Ok(())
    }
}
