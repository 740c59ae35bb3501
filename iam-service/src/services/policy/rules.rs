use serde_json::Value;
use uuid::Uuid;

use super::Attributes;
use crate::models::{AttributeCondition, ConditionOperator, Policy, PolicyEffect};
use crate::services::IamError;

/// A policy whose conditions all held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleResult {
    pub policy_id: Uuid,
    pub effect: PolicyEffect,
    pub priority: i32,
}

/// Stateless condition evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    /// `Ok(None)` when some condition is false. Conditions are AND-ed; a
    /// policy with no conditions always matches.
    pub fn evaluate(
        &self,
        policy: &Policy,
        attributes: &Attributes,
    ) -> Result<Option<RuleResult>, IamError> {
        for condition in &policy.conditions {
            if !self.check(condition, attributes)? {
                return Ok(None);
            }
        }
        Ok(Some(RuleResult {
            policy_id: policy.id,
            effect: policy.effect,
            priority: policy.priority,
        }))
    }

    fn check(&self, condition: &AttributeCondition, attributes: &Attributes) -> Result<bool, IamError> {
        let actual = attributes
            .get(&condition.attribute)
            .filter(|v| !v.is_null());
        let expected = &condition.value;

        if condition.operator == ConditionOperator::Exists {
            let want_present = expected.as_bool().unwrap_or(true);
            return Ok(actual.is_some() == want_present);
        }

        let Some(actual) = actual else {
            return Ok(false);
        };

        match condition.operator {
            ConditionOperator::Equals => equal(condition, actual, expected),
            ConditionOperator::NotEquals => equal(condition, actual, expected).map(|eq| !eq),
            ConditionOperator::In => member(condition, actual, expected),
            ConditionOperator::NotIn => member(condition, actual, expected).map(|m| !m),
            ConditionOperator::GreaterThan => {
                let (a, b) = numbers(condition, actual, expected)?;
                Ok(a > b)
            }
            ConditionOperator::LessThan => {
                let (a, b) = numbers(condition, actual, expected)?;
                Ok(a < b)
            }
            ConditionOperator::Contains => match (actual, expected) {
                (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
                (Value::Array(items), needle) => Ok(items.iter().any(|item| same(item, needle))),
                _ => Err(mismatch(condition, actual)),
            },
            ConditionOperator::EqualsAttribute => {
                let other = expected
                    .as_str()
                    .ok_or_else(|| mismatch(condition, expected))?;
                match attributes.get(other).filter(|v| !v.is_null()) {
                    Some(other_value) => equal(condition, actual, other_value),
                    None => Ok(false),
                }
            }
            ConditionOperator::Exists => Ok(true),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(condition: &AttributeCondition, actual: &Value) -> IamError {
    IamError::PolicyEvaluation(format!(
        "operator {:?} on '{}' cannot compare {} with {}",
        condition.operator,
        condition.attribute,
        kind(actual),
        kind(&condition.value)
    ))
}

/// Numbers compare by value regardless of integer/float representation.
fn same(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn equal(condition: &AttributeCondition, actual: &Value, expected: &Value) -> Result<bool, IamError> {
    if kind(actual) != kind(expected) {
        return Err(mismatch(condition, actual));
    }
    Ok(same(actual, expected))
}

/// `actual` is in `expected`; an array `actual` matches on any overlap.
fn member(condition: &AttributeCondition, actual: &Value, expected: &Value) -> Result<bool, IamError> {
    let Value::Array(allowed) = expected else {
        return Err(mismatch(condition, actual));
    };
    Ok(match actual {
        Value::Array(values) => values.iter().any(|v| allowed.iter().any(|a| same(v, a))),
        value => allowed.iter().any(|a| same(value, a)),
    })
}

fn numbers(condition: &AttributeCondition, actual: &Value, expected: &Value) -> Result<(f64, f64), IamError> {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(mismatch(condition, actual)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PolicyTarget;
    use chrono::Utc;
    use serde_json::json;

    fn policy(conditions: Vec<AttributeCondition>) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            name: "p".into(),
            description: String::new(),
            target: PolicyTarget::new("workout", "*"),
            conditions,
            effect: PolicyEffect::Permit,
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn all_conditions_must_hold() {
        let p = policy(vec![
            AttributeCondition::new("subject.roles", ConditionOperator::In, json!(["trainer"])),
            AttributeCondition::new("env.hour", ConditionOperator::LessThan, json!(18)),
        ]);
        let engine = RuleEngine;

        let ok = attrs(&[("subject.roles", json!(["member", "trainer"])), ("env.hour", json!(9))]);
        assert!(engine.evaluate(&p, &ok).unwrap().is_some());

        let late = attrs(&[("subject.roles", json!(["trainer"])), ("env.hour", json!(20))]);
        assert!(engine.evaluate(&p, &late).unwrap().is_none());
    }

    #[test]
    fn missing_attribute_is_false_not_error() {
        let p = policy(vec![AttributeCondition::new(
            "resource.owner_id",
            ConditionOperator::Equals,
            json!("abc"),
        )]);
        assert!(RuleEngine.evaluate(&p, &Attributes::new()).unwrap().is_none());
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let p = policy(vec![AttributeCondition::new(
            "env.hour",
            ConditionOperator::GreaterThan,
            json!(8),
        )]);
        let err = RuleEngine
            .evaluate(&p, &attrs(&[("env.hour", json!("nine"))]))
            .unwrap_err();
        assert_eq!(err.code(), "POLICY_EVALUATION_ERROR");
    }

    #[test]
    fn equals_attribute_compares_two_attributes() {
        let p = policy(vec![AttributeCondition::new(
            "resource.owner_id",
            ConditionOperator::EqualsAttribute,
            json!("subject.id"),
        )]);
        let owner = attrs(&[("resource.owner_id", json!("u1")), ("subject.id", json!("u1"))]);
        let other = attrs(&[("resource.owner_id", json!("u2")), ("subject.id", json!("u1"))]);
        assert!(RuleEngine.evaluate(&p, &owner).unwrap().is_some());
        assert!(RuleEngine.evaluate(&p, &other).unwrap().is_none());
    }

    #[test]
    fn integer_and_float_compare_equal() {
        let p = policy(vec![AttributeCondition::new(
            "subject.level",
            ConditionOperator::Equals,
            json!(3),
        )]);
        assert!(RuleEngine
            .evaluate(&p, &attrs(&[("subject.level", json!(3.0))]))
            .unwrap()
            .is_some());
    }
}
