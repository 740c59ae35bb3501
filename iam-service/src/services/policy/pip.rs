use std::sync::Arc;

use chrono::{Datelike, Timelike};
use serde_json::{json, Value};

use super::{AccessRequest, Attributes};
use crate::clock::SharedClock;
use crate::models::Policy;
use crate::repositories::{IdentityRepository, PolicyRepository};
use crate::services::access_control::AccessControlService;
use crate::services::IamError;

/// Read side of the policy engine.
#[derive(Clone)]
pub struct PolicyInformationPoint {
    policies: Arc<dyn PolicyRepository>,
    identities: Arc<dyn IdentityRepository>,
    access: AccessControlService,
    clock: SharedClock,
}

impl PolicyInformationPoint {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        identities: Arc<dyn IdentityRepository>,
        access: AccessControlService,
        clock: SharedClock,
    ) -> Self {
        Self {
            policies,
            identities,
            access,
            clock,
        }
    }

    /// Enabled policies whose target covers the request, highest priority
    /// first.
    pub async fn applicable_policies(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Vec<Policy>, IamError> {
        let mut policies: Vec<Policy> = self
            .policies
            .find_by_target(resource, action)
            .await?
            .into_iter()
            .filter(|p| p.enabled && p.target.matches(resource, action))
            .collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        Ok(policies)
    }

    /// Caller environment overlaid with attributes this service owns.
    ///
    /// Callers may only contribute keys outside the `subject.*` and `env.*`
    /// namespaces; `resource` and `action` come from the request itself.
    /// An unknown subject is an error so no policy is evaluated against
    /// caller-supplied data alone.
    pub async fn resolve_attributes(&self, request: &AccessRequest) -> Result<Attributes, IamError> {
        let Some(identity) = self.identities.find_by_id(request.subject).await? else {
            return Err(IamError::not_found("Identity", request.subject));
        };

        let mut attributes: Attributes = request
            .environment
            .iter()
            .filter(|(key, _)| !is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let now = self.clock.now();

        attributes.insert("resource".to_string(), json!(request.resource));
        attributes.insert("action".to_string(), json!(request.action));
        attributes.insert("subject.id".to_string(), json!(request.subject.to_string()));
        attributes.insert("env.hour".to_string(), json!(now.hour()));
        attributes.insert(
            "env.weekday".to_string(),
            json!(now.weekday().number_from_monday()),
        );
        attributes.insert("env.timestamp".to_string(), json!(now.timestamp()));

        attributes.insert("subject.username".to_string(), json!(identity.username.as_str()));
        attributes.insert("subject.status".to_string(), json!(identity.status.as_str()));
        attributes.insert("subject.mfa_enabled".to_string(), json!(identity.mfa_enabled));
        attributes.insert(
            "subject.email_verified".to_string(),
            json!(identity.email_verified),
        );
        for (key, value) in &identity.attributes {
            attributes.insert(format!("subject.attributes.{}", key), Value::String(value.clone()));
        }

        let access = self.access.get_access_control(identity.id).await?;
        attributes.insert(
            "subject.access_level".to_string(),
            json!(access.access_level.as_str()),
        );
        attributes.insert(
            "subject.roles".to_string(),
            json!(self.access.effective_role_names(identity.id).await?),
        );

        Ok(attributes)
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(key, "resource" | "action" | "subject" | "env")
        || key.starts_with("subject.")
        || key.starts_with("env.")
}
