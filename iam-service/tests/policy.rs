mod common;

use chrono::Duration;
use common::{setup, start_time, TestContext};
use iam_service::dtos::{AssignRoleCommand, ValidateAccessCommand};
use iam_service::models::{
    AttributeCondition, ConditionOperator, EventType, Identity, PolicyDocument, PolicyEffect,
    PolicyTarget, GLOBAL_SCOPE,
};
use iam_service::services::{AccessDecision, Decision, DecisionSource};
use serde_json::json;
use uuid::Uuid;

fn document(
    name: &str,
    resource: &str,
    action: &str,
    effect: PolicyEffect,
    priority: i32,
    conditions: Vec<AttributeCondition>,
) -> PolicyDocument {
    PolicyDocument {
        name: name.to_string(),
        description: String::new(),
        target: PolicyTarget::new(resource, action),
        conditions,
        effect,
        priority,
        enabled: true,
    }
}

async fn with_role(ctx: &TestContext, username: &str, role: &str) -> Identity {
    let identity = ctx.create_identity(username).await;
    let role = ctx
        .core
        .access
        .find_role_by_name(GLOBAL_SCOPE, role)
        .await
        .unwrap()
        .unwrap();
    ctx.core
        .access
        .assign_role(
            AssignRoleCommand {
                identity_id: identity.id,
                role_id: role.id,
                effective_from: None,
                effective_until: None,
            },
            None,
        )
        .await
        .unwrap();
    identity
}

#[tokio::test]
async fn deny_policy_overrides_role_grant_only_when_it_matches() {
    let ctx = setup();
    ctx.core.seed_default_roles().await.unwrap();
    let alice = with_role(&ctx, "alice", "trainer").await;

    ctx.core
        .pap
        .create_policy(
            document(
                "no-deletes-after-hours",
                "workout",
                "delete",
                PolicyEffect::Deny,
                10,
                vec![AttributeCondition::new(
                    "env.hour",
                    ConditionOperator::GreaterThan,
                    json!(17),
                )],
            ),
            None,
        )
        .await
        .unwrap();

    // 10:00, the deny does not match and RBAC decides.
    let morning = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "workout", "delete"))
        .await
        .unwrap();
    assert!(morning.allowed);
    assert_eq!(morning.source, DecisionSource::Rbac);

    ctx.clock.advance(Duration::hours(10));
    let evening = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "workout", "delete"))
        .await
        .unwrap();
    assert!(!evening.allowed);
    assert_eq!(evening.decision, Decision::Deny);
    assert_eq!(evening.source, DecisionSource::Policy);

    let err = ctx
        .core
        .authorization
        .require_access(ValidateAccessCommand::new(alice.id, "workout", "delete"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ACCESS_DENIED");
}

#[tokio::test]
async fn owners_may_update_their_own_workouts() {
    let ctx = setup();
    ctx.core.seed_default_roles().await.unwrap();
    let alice = with_role(&ctx, "alice", "member").await;

    ctx.core
        .pap
        .create_policy(
            document(
                "owner-can-update",
                "workout",
                "update",
                PolicyEffect::Permit,
                0,
                vec![AttributeCondition::new(
                    "resource.owner_id",
                    ConditionOperator::EqualsAttribute,
                    json!("subject.id"),
                )],
            ),
            None,
        )
        .await
        .unwrap();

    let own = ctx
        .core
        .authorization
        .check_access(
            ValidateAccessCommand::new(alice.id, "workout", "update")
                .with_attribute("resource.owner_id", json!(alice.id.to_string())),
        )
        .await
        .unwrap();
    assert!(own.allowed);
    assert_eq!(own.source, DecisionSource::Policy);

    let other = ctx
        .core
        .authorization
        .check_access(
            ValidateAccessCommand::new(alice.id, "workout", "update")
                .with_attribute("resource.owner_id", json!(Uuid::new_v4().to_string())),
        )
        .await
        .unwrap();
    assert!(!other.allowed);
    assert_eq!(other.decision, Decision::NotApplicable);
    assert_eq!(other.source, DecisionSource::Rbac);
}

#[tokio::test]
async fn callers_cannot_spoof_subject_attributes() {
    let ctx = setup();
    ctx.core.seed_default_roles().await.unwrap();
    let alice = with_role(&ctx, "alice", "member").await;

    ctx.core
        .pap
        .create_policy(
            document(
                "admins-delete-programs",
                "program",
                "delete",
                PolicyEffect::Permit,
                0,
                vec![AttributeCondition::new(
                    "subject.roles",
                    ConditionOperator::In,
                    json!(["admin"]),
                )],
            ),
            None,
        )
        .await
        .unwrap();
    ctx.core
        .pap
        .create_policy(
            document(
                "ops-deletes-exercises",
                "exercise",
                "delete",
                PolicyEffect::Permit,
                0,
                vec![AttributeCondition::new(
                    "subject.attributes.department",
                    ConditionOperator::Equals,
                    json!("ops"),
                )],
            ),
            None,
        )
        .await
        .unwrap();

    let roles = ctx
        .core
        .authorization
        .check_access(
            ValidateAccessCommand::new(alice.id, "program", "delete")
                .with_attribute("subject.roles", json!(["admin"])),
        )
        .await
        .unwrap();
    assert!(!roles.allowed);
    assert_eq!(roles.decision, Decision::NotApplicable);

    // alice has no department attribute of her own to overwrite the caller's.
    let department = ctx
        .core
        .authorization
        .check_access(
            ValidateAccessCommand::new(alice.id, "exercise", "delete")
                .with_attribute("subject.attributes.department", json!("ops"))
                .with_attribute("env.hour", json!(3)),
        )
        .await
        .unwrap();
    assert!(!department.allowed);
    assert_eq!(department.decision, Decision::NotApplicable);

    let stranger = ctx
        .core
        .authorization
        .check_access(
            ValidateAccessCommand::new(Uuid::new_v4(), "program", "delete")
                .with_attribute("subject.roles", json!(["admin"])),
        )
        .await
        .unwrap();
    assert!(!stranger.allowed);
    assert_eq!(stranger.decision, Decision::Indeterminate);
}

#[tokio::test]
async fn caller_resource_attributes_still_reach_policies() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    ctx.core
        .pap
        .create_policy(
            document(
                "public-programs",
                "program",
                "read",
                PolicyEffect::Permit,
                0,
                vec![AttributeCondition::new(
                    "resource.visibility",
                    ConditionOperator::Equals,
                    json!("public"),
                )],
            ),
            None,
        )
        .await
        .unwrap();

    let decision = ctx
        .core
        .authorization
        .check_access(
            ValidateAccessCommand::new(alice.id, "program", "read")
                .with_attribute("resource.visibility", json!("public"))
                .with_attribute("action", json!("delete")),
        )
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.decision, Decision::Permit);
}

#[tokio::test]
async fn higher_priority_permit_beats_lower_priority_deny() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    ctx.core
        .pap
        .create_policy(document("deny-all", "exercise", "*", PolicyEffect::Deny, 1, vec![]), None)
        .await
        .unwrap();
    let permit = ctx
        .core
        .pap
        .create_policy(
            document("everyone-reads-exercises", "exercise", "read", PolicyEffect::Permit, 5, vec![]),
            None,
        )
        .await
        .unwrap();

    let read = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "exercise", "read"))
        .await
        .unwrap();
    assert!(read.allowed);
    assert_eq!(read.policy_id, Some(permit.id));

    let write = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "exercise", "update"))
        .await
        .unwrap();
    assert!(!write.allowed);
    assert_eq!(write.decision, Decision::Deny);
}

#[tokio::test]
async fn type_mismatch_is_indeterminate_and_denied() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    ctx.core
        .pap
        .create_policy(
            document(
                "broken",
                "workout",
                "read",
                PolicyEffect::Permit,
                0,
                vec![AttributeCondition::new(
                    "subject.status",
                    ConditionOperator::GreaterThan,
                    json!(3),
                )],
            ),
            None,
        )
        .await
        .unwrap();

    let decision = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "workout", "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.decision, Decision::Indeterminate);

    assert!(ctx
        .audit
        .records()
        .iter()
        .any(|r| r.event_type == "policy_indeterminate"));
    assert!(ctx
        .core
        .events
        .history()
        .iter()
        .any(|e| e.event_type == EventType::AccessDenied));

    let attempts = ctx
        .repos
        .access_attempts
        .count_denied_for_ip("unknown", start_time())
        .await
        .unwrap();
    assert_eq!(attempts, 1);
}

async fn read_program(ctx: &TestContext, identity: &Identity) -> AccessDecision {
    ctx.core
        .authorization
        .check_access(ValidateAccessCommand::new(identity.id, "program", "read"))
        .await
        .unwrap()
}

#[tokio::test]
async fn disabled_and_deleted_policies_are_ignored() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    let policy = ctx
        .core
        .pap
        .create_policy(document("allow-read", "program", "read", PolicyEffect::Permit, 0, vec![]), None)
        .await
        .unwrap();
    assert!(read_program(&ctx, &alice).await.allowed);

    ctx.core.pap.set_enabled(policy.id, false, None).await.unwrap();
    let disabled = read_program(&ctx, &alice).await;
    assert!(!disabled.allowed);
    assert_eq!(disabled.source, DecisionSource::Rbac);

    ctx.core.pap.set_enabled(policy.id, true, None).await.unwrap();
    assert!(read_program(&ctx, &alice).await.allowed);

    assert!(ctx.core.pap.delete_policy(policy.id, None).await.unwrap());
    assert!(!ctx.core.pap.delete_policy(policy.id, None).await.unwrap());
    assert!(!read_program(&ctx, &alice).await.allowed);

    let types: Vec<EventType> = ctx.core.events.history().iter().map(|e| e.event_type).collect();
    assert!(types.contains(&EventType::PolicyCreated));
    assert!(types.contains(&EventType::PolicyUpdated));
    assert!(types.contains(&EventType::PolicyDeleted));
}

#[tokio::test]
async fn malformed_documents_are_rejected() {
    let ctx = setup();

    let unnamed = ctx
        .core
        .pap
        .create_policy(document(" ", "workout", "read", PolicyEffect::Permit, 0, vec![]), None)
        .await
        .unwrap_err();
    assert_eq!(unnamed.code(), "VALIDATION_ERROR");

    let bad_in = ctx
        .core
        .pap
        .create_policy(
            document(
                "bad-in",
                "workout",
                "read",
                PolicyEffect::Permit,
                0,
                vec![AttributeCondition::new(
                    "subject.roles",
                    ConditionOperator::In,
                    json!("trainer"),
                )],
            ),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(bad_in.code(), "VALIDATION_ERROR");
    assert!(ctx.core.pap.list_policies().await.unwrap().is_empty());
}
