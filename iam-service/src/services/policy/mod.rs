//! Attribute-based policy engine layered over RBAC.
//!
//! - [`PolicyInformationPoint`] finds candidate policies and resolves the
//!   attributes they are evaluated against
//! - [`RuleEngine`] evaluates one policy's conditions
//! - [`PolicyDecisionPoint`] combines the results into one decision
//! - [`PolicyAdministrationPoint`] is the only write path for policies

mod pap;
mod pdp;
mod pip;
mod rules;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub use pap::PolicyAdministrationPoint;
pub use pdp::PolicyDecisionPoint;
pub use pip::PolicyInformationPoint;
pub use rules::{RuleEngine, RuleResult};

use crate::dtos::ValidateAccessCommand;

/// Resolved attribute bag, keyed by dotted names such as `subject.roles`.
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub subject: Uuid,
    pub resource: String,
    pub action: String,
    pub environment: Attributes,
}

impl From<&ValidateAccessCommand> for AccessRequest {
    fn from(command: &ValidateAccessCommand) -> Self {
        Self {
            subject: command.subject,
            resource: command.resource.clone(),
            action: command.action.clone(),
            environment: command.environment.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Permit => "PERMIT",
            Decision::Deny => "DENY",
            Decision::NotApplicable => "NOT_APPLICABLE",
            Decision::Indeterminate => "INDETERMINATE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub matched_policy_id: Option<Uuid>,
    pub reason: String,
}

impl PolicyDecision {
    fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::NotApplicable,
            matched_policy_id: None,
            reason: reason.into(),
        }
    }

    fn indeterminate(policy_id: Option<Uuid>, reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Indeterminate,
            matched_policy_id: policy_id,
            reason: reason.into(),
        }
    }
}
