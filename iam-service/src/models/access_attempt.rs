//! Access attempt model - append-only record of authentication and
//! authorization outcomes, purged after the retention window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => RiskLevel::Low,
            40..=69 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

/// What kind of check produced the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Login,
    Authorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessAttempt {
    pub id: Uuid,
    pub kind: AttemptKind,
    pub identity_id: Option<Uuid>,
    pub identifier: Option<String>,
    pub ip_address: String,
    pub outcome: AttemptOutcome,
    pub risk_level: RiskLevel,
    pub timestamp: DateTime<Utc>,
}

impl AccessAttempt {
    pub fn login(
        identity_id: Option<Uuid>,
        identifier: &str,
        ip_address: &str,
        outcome: AttemptOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AttemptKind::Login,
            identity_id,
            identifier: Some(identifier.to_string()),
            ip_address: ip_address.to_string(),
            outcome,
            risk_level: match outcome {
                AttemptOutcome::Granted => RiskLevel::Low,
                AttemptOutcome::Denied => RiskLevel::Medium,
            },
            timestamp,
        }
    }

    pub fn authorization(
        identity_id: Uuid,
        ip_address: &str,
        outcome: AttemptOutcome,
        risk_level: RiskLevel,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AttemptKind::Authorization,
            identity_id: Some(identity_id),
            identifier: None,
            ip_address: ip_address.to_string(),
            outcome,
            risk_level,
            timestamp,
        }
    }
}
