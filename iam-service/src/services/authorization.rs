use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::access_control::AccessControlService;
use super::audit::{AuditLogger, AuditSeverity, EventPublisher};
use super::policy::{AccessRequest, Decision, PolicyDecisionPoint};
use super::IamError;
use crate::clock::SharedClock;
use crate::dtos::{validate_command, ValidateAccessCommand};
use crate::models::{AccessAttempt, AttemptOutcome, EventType, RiskLevel, SecurityEvent};
use crate::repositories::AccessAttemptRepository;

const SOURCE: &str = "authorization";
const UNKNOWN_IP: &str = "unknown";

/// Which layer produced the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Policy,
    Rbac,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Policy => "policy",
            DecisionSource::Rbac => "rbac",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub decision: Decision,
    pub source: DecisionSource,
    pub policy_id: Option<Uuid>,
    pub reason: String,
}

/// Policy first, RBAC as fallback when no policy applies.
#[derive(Clone)]
pub struct AuthorizationService {
    pdp: PolicyDecisionPoint,
    access: AccessControlService,
    attempts: Arc<dyn AccessAttemptRepository>,
    events: EventPublisher,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
}

impl AuthorizationService {
    pub fn new(
        pdp: PolicyDecisionPoint,
        access: AccessControlService,
        attempts: Arc<dyn AccessAttemptRepository>,
        events: EventPublisher,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
    ) -> Self {
        Self {
            pdp,
            access,
            attempts,
            events,
            audit,
            clock,
        }
    }

    pub async fn check_access(&self, command: ValidateAccessCommand) -> Result<AccessDecision, IamError> {
        validate_command(&command)?;

        let request = AccessRequest::from(&command);
        let policy = self.pdp.decide(&request).await;

        let decision = match policy.decision {
            Decision::Permit | Decision::Deny => AccessDecision {
                allowed: policy.decision == Decision::Permit,
                decision: policy.decision,
                source: DecisionSource::Policy,
                policy_id: policy.matched_policy_id,
                reason: policy.reason,
            },
            Decision::Indeterminate => {
                self.audit
                    .audit_security_event(
                        "policy_indeterminate",
                        AuditSeverity::Warning,
                        Some(&command.subject.to_string()),
                        json!({
                            "resource": command.resource,
                            "action": command.action,
                            "policy_id": policy.matched_policy_id,
                            "reason": policy.reason,
                        }),
                    )
                    .await?;
                AccessDecision {
                    allowed: false,
                    decision: Decision::Indeterminate,
                    source: DecisionSource::Policy,
                    policy_id: policy.matched_policy_id,
                    reason: policy.reason,
                }
            }
            Decision::NotApplicable => {
                let allowed = self
                    .access
                    .has_permission(command.subject, &command.resource, &command.action)
                    .await?;
                AccessDecision {
                    allowed,
                    decision: Decision::NotApplicable,
                    source: DecisionSource::Rbac,
                    policy_id: None,
                    reason: if allowed {
                        "granted by role or direct permission".to_string()
                    } else {
                        "no matching permission".to_string()
                    },
                }
            }
        };

        self.record(&command, &decision).await?;
        Ok(decision)
    }

    /// `check_access` that fails with `AccessDenied` instead of returning a
    /// negative decision.
    pub async fn require_access(&self, command: ValidateAccessCommand) -> Result<AccessDecision, IamError> {
        let resource = command.resource.clone();
        let action = command.action.clone();
        let decision = self.check_access(command).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(IamError::AccessDenied { resource, action })
        }
    }

    async fn record(&self, command: &ValidateAccessCommand, decision: &AccessDecision) -> Result<(), IamError> {
        let now = self.clock.now();
        let ip_address = command.ip_address.as_deref().unwrap_or(UNKNOWN_IP);
        let (outcome, risk) = match (decision.allowed, decision.decision) {
            (true, _) => (AttemptOutcome::Granted, RiskLevel::Low),
            (false, Decision::Indeterminate) => (AttemptOutcome::Denied, RiskLevel::High),
            (false, _) => (AttemptOutcome::Denied, RiskLevel::Medium),
        };
        self.attempts
            .append(&AccessAttempt::authorization(command.subject, ip_address, outcome, risk, now))
            .await?;

        if decision.allowed {
            tracing::debug!(
                identity_id = %command.subject,
                resource = %command.resource,
                action = %command.action,
                source = decision.source.as_str(),
                "Access granted"
            );
        } else {
            tracing::warn!(
                identity_id = %command.subject,
                resource = %command.resource,
                action = %command.action,
                decision = decision.decision.as_str(),
                source = decision.source.as_str(),
                "Access denied"
            );
        }

        let event_type = if decision.allowed {
            EventType::AccessGranted
        } else {
            EventType::AccessDenied
        };
        let mut event = SecurityEvent::new(
            event_type,
            SOURCE,
            json!({
                "resource": command.resource,
                "action": command.action,
                "decision": decision.decision.as_str(),
                "source": decision.source.as_str(),
                "policy_id": decision.policy_id,
                "reason": decision.reason,
                "ip_address": ip_address,
            }),
            now,
        )
        .with_user(command.subject);
        if let Some(session_id) = command.session_id {
            event = event.with_session(session_id);
        }
        self.events.publish(event).await?;
        Ok(())
    }
}
