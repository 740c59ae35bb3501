use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::models::{EventType, Policy, PolicyDocument, SecurityEvent};
use crate::repositories::PolicyRepository;
use crate::services::audit::EventPublisher;
use crate::services::IamError;

const SOURCE: &str = "policy_administration";

/// The only write path for policies.
#[derive(Clone)]
pub struct PolicyAdministrationPoint {
    policies: Arc<dyn PolicyRepository>,
    events: EventPublisher,
    clock: SharedClock,
}

impl PolicyAdministrationPoint {
    pub fn new(policies: Arc<dyn PolicyRepository>, events: EventPublisher, clock: SharedClock) -> Self {
        Self {
            policies,
            events,
            clock,
        }
    }

    async fn announce(
        &self,
        event_type: EventType,
        policy: &Policy,
        actor: Option<Uuid>,
    ) -> Result<(), IamError> {
        let mut event = SecurityEvent::new(
            event_type,
            SOURCE,
            json!({
                "policy_id": policy.id,
                "name": policy.name,
                "resource": policy.target.resource,
                "action": policy.target.action,
                "effect": policy.effect,
                "enabled": policy.enabled,
            }),
            self.clock.now(),
        );
        if let Some(actor) = actor {
            event = event.with_user(actor);
        }
        self.events.publish(event).await
    }

    pub async fn create_policy(
        &self,
        document: PolicyDocument,
        actor: Option<Uuid>,
    ) -> Result<Policy, IamError> {
        let now = self.clock.now();
        let policy = document.into_policy(Uuid::new_v4(), now, now);
        policy.validate()?;
        self.policies.insert(&policy).await?;

        tracing::info!(policy_id = %policy.id, name = %policy.name, effect = ?policy.effect, "Policy created");
        self.announce(EventType::PolicyCreated, &policy, actor).await?;
        Ok(policy)
    }

    pub async fn update_policy(
        &self,
        id: Uuid,
        document: PolicyDocument,
        actor: Option<Uuid>,
    ) -> Result<Policy, IamError> {
        let existing = self.get_policy(id).await?;
        let policy = document.into_policy(id, existing.created_at, self.clock.now());
        policy.validate()?;
        self.policies.update(&policy).await?;

        tracing::info!(policy_id = %id, name = %policy.name, "Policy updated");
        self.announce(EventType::PolicyUpdated, &policy, actor).await?;
        Ok(policy)
    }

    pub async fn set_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        actor: Option<Uuid>,
    ) -> Result<Policy, IamError> {
        let mut policy = self.get_policy(id).await?;
        if policy.enabled == enabled {
            return Ok(policy);
        }
        policy.enabled = enabled;
        policy.updated_at = self.clock.now();
        self.policies.update(&policy).await?;

        tracing::info!(policy_id = %id, enabled = enabled, "Policy toggled");
        self.announce(EventType::PolicyUpdated, &policy, actor).await?;
        Ok(policy)
    }

    /// Returns false when the policy did not exist.
    pub async fn delete_policy(&self, id: Uuid, actor: Option<Uuid>) -> Result<bool, IamError> {
        let Some(policy) = self.policies.find_by_id(id).await? else {
            return Ok(false);
        };
        if !self.policies.delete(id).await? {
            return Ok(false);
        }

        tracing::info!(policy_id = %id, name = %policy.name, "Policy deleted");
        self.announce(EventType::PolicyDeleted, &policy, actor).await?;
        Ok(true)
    }

    pub async fn get_policy(&self, id: Uuid) -> Result<Policy, IamError> {
        self.policies
            .find_by_id(id)
            .await?
            .ok_or_else(|| IamError::not_found("Policy", id))
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>, IamError> {
        let mut policies = self.policies.list().await?;
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        Ok(policies)
    }
}
