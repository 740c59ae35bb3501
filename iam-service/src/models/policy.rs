//! Policy model - attribute-based rules layered over RBAC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::permission::WILDCARD;
use crate::services::IamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Permit,
    Deny,
}

/// Which requests a policy is considered for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTarget {
    pub resource: String,
    pub action: String,
}

impl PolicyTarget {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == WILDCARD || self.resource == resource)
            && (self.action == WILDCARD || self.action == action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
    /// `value` names another attribute whose value must be equal.
    EqualsAttribute,
}

/// Predicate over one request attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCondition {
    pub attribute: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl AttributeCondition {
    pub fn new(attribute: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value,
        }
    }

    /// Shape check done at administration time.
    pub fn validate(&self) -> Result<(), IamError> {
        if self.attribute.trim().is_empty() {
            return Err(IamError::validation(
                "conditions.attribute",
                "attribute name must not be empty",
            ));
        }
        let ok = match self.operator {
            ConditionOperator::In | ConditionOperator::NotIn => self.value.is_array(),
            ConditionOperator::GreaterThan | ConditionOperator::LessThan => self.value.is_number(),
            ConditionOperator::EqualsAttribute => {
                self.value.as_str().is_some_and(|s| !s.is_empty())
            }
            ConditionOperator::Exists => true,
            ConditionOperator::Equals
            | ConditionOperator::NotEquals
            | ConditionOperator::Contains => !self.value.is_null(),
        };
        if ok {
            Ok(())
        } else {
            Err(IamError::validation(
                "conditions.value",
                format!(
                    "value {} is not valid for operator {:?} on '{}'",
                    self.value, self.operator, self.attribute
                ),
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub target: PolicyTarget,
    pub conditions: Vec<AttributeCondition>,
    pub effect: PolicyEffect,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn validate(&self) -> Result<(), IamError> {
        if self.name.trim().is_empty() {
            return Err(IamError::validation("name", "policy name must not be empty"));
        }
        if self.target.resource.trim().is_empty() || self.target.action.trim().is_empty() {
            return Err(IamError::validation(
                "target",
                "target resource and action must not be empty",
            ));
        }
        self.conditions.iter().try_for_each(AttributeCondition::validate)
    }
}

/// Writable fields of a policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub target: PolicyTarget,
    #[serde(default)]
    pub conditions: Vec<AttributeCondition>,
    pub effect: PolicyEffect,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PolicyDocument {
    pub fn into_policy(self, id: Uuid, created_at: DateTime<Utc>, now: DateTime<Utc>) -> Policy {
        Policy {
            id,
            name: self.name,
            description: self.description,
            target: self.target,
            conditions: self.conditions,
            effect: self.effect,
            priority: self.priority,
            enabled: self.enabled,
            created_at,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_shapes_are_checked() {
        assert!(AttributeCondition::new("env.hour", ConditionOperator::GreaterThan, json!(8))
            .validate()
            .is_ok());
        assert!(AttributeCondition::new("env.hour", ConditionOperator::GreaterThan, json!("8"))
            .validate()
            .is_err());
        assert!(AttributeCondition::new("subject.roles", ConditionOperator::In, json!("x"))
            .validate()
            .is_err());
        assert!(AttributeCondition::new("", ConditionOperator::Exists, Value::Null)
            .validate()
            .is_err());
    }

    #[test]
    fn document_deserializes_with_defaults() {
        let doc: PolicyDocument = serde_json::from_value(json!({
            "name": "deny-night",
            "target": { "resource": "workout", "action": "*" },
            "effect": "deny"
        }))
        .unwrap();
        assert!(doc.enabled);
        assert_eq!(doc.priority, 0);
        assert!(doc.conditions.is_empty());
        assert!(doc.target.matches("workout", "delete"));
    }
}
