use super::{AccessRequest, Decision, PolicyDecision, PolicyInformationPoint, RuleEngine, RuleResult};
use crate::models::PolicyEffect;

/// Combines policy results. Reads only; never fails.
#[derive(Clone)]
pub struct PolicyDecisionPoint {
    pip: PolicyInformationPoint,
    rules: RuleEngine,
}

impl PolicyDecisionPoint {
    pub fn new(pip: PolicyInformationPoint) -> Self {
        Self {
            pip,
            rules: RuleEngine,
        }
    }

    pub fn information_point(&self) -> &PolicyInformationPoint {
        &self.pip
    }

    pub async fn decide(&self, request: &AccessRequest) -> PolicyDecision {
        let policies = match self
            .pip
            .applicable_policies(&request.resource, &request.action)
            .await
        {
            Ok(policies) => policies,
            Err(e) => return PolicyDecision::indeterminate(None, e.to_string()),
        };
        if policies.is_empty() {
            return PolicyDecision::not_applicable("no policy targets this request");
        }

        let attributes = match self.pip.resolve_attributes(request).await {
            Ok(attributes) => attributes,
            Err(e) => return PolicyDecision::indeterminate(None, e.to_string()),
        };

        let mut matched: Vec<RuleResult> = Vec::new();
        for policy in &policies {
            match self.rules.evaluate(policy, &attributes) {
                Ok(Some(result)) => matched.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(policy_id = %policy.id, error = %e, "Policy evaluation failed");
                    return PolicyDecision::indeterminate(Some(policy.id), e.to_string());
                }
            }
        }

        combine(&matched)
    }
}

/// Highest priority wins; a deny at the same priority as the best permit
/// overrides it.
fn combine(matched: &[RuleResult]) -> PolicyDecision {
    let best = |effect: PolicyEffect| {
        matched
            .iter()
            .filter(|r| r.effect == effect)
            .max_by_key(|r| r.priority)
    };

    match (best(PolicyEffect::Permit), best(PolicyEffect::Deny)) {
        (None, None) => PolicyDecision::not_applicable("no policy conditions matched"),
        (Some(permit), Some(deny)) if permit.priority > deny.priority => PolicyDecision {
            decision: Decision::Permit,
            matched_policy_id: Some(permit.policy_id),
            reason: format!("permit at priority {} outranks deny", permit.priority),
        },
        (_, Some(deny)) => PolicyDecision {
            decision: Decision::Deny,
            matched_policy_id: Some(deny.policy_id),
            reason: format!("deny at priority {}", deny.priority),
        },
        (Some(permit), None) => PolicyDecision {
            decision: Decision::Permit,
            matched_policy_id: Some(permit.policy_id),
            reason: format!("permit at priority {}", permit.priority),
        },
    }
}
