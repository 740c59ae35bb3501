mod common;

use common::{login_command, setup, PASSWORD};
use iam_service::dtos::{AssignRoleCommand, RevokeSessionCommand, ValidateAccessCommand};
use iam_service::models::{EventType, GLOBAL_SCOPE};

#[tokio::test]
async fn register_assign_login_authorize_and_logout() {
    let ctx = setup();
    ctx.core.seed_default_roles().await.unwrap();

    let alice = ctx.create_identity("alice").await;
    let trainer = ctx
        .core
        .access
        .find_role_by_name(GLOBAL_SCOPE, "trainer")
        .await
        .unwrap()
        .unwrap();
    ctx.core
        .access
        .assign_role(
            AssignRoleCommand {
                identity_id: alice.id,
                role_id: trainer.id,
                effective_from: None,
                effective_until: None,
            },
            None,
        )
        .await
        .unwrap();

    let grant = ctx
        .core
        .sessions
        .authenticate(login_command("alice@example.com", PASSWORD))
        .await
        .unwrap();
    let (claims, session) = ctx
        .core
        .sessions
        .authorize_access_token(&grant.tokens.access_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, alice.id.to_string());

    let decision = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand {
            session_id: Some(session.session_id),
            ..ValidateAccessCommand::new(alice.id, "workout", "create")
        })
        .await
        .unwrap();
    assert!(decision.allowed);

    let billing = ctx
        .core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "billing", "read"))
        .await
        .unwrap();
    assert!(!billing.allowed);

    ctx.core
        .sessions
        .revoke_session(RevokeSessionCommand {
            session_id: session.session_id,
            reason: Some("logout".to_string()),
        })
        .await
        .unwrap();
    assert!(ctx
        .core
        .sessions
        .validate_session(session.session_id)
        .await
        .unwrap()
        .is_none());

    let types: Vec<EventType> = ctx.core.events.history().iter().map(|e| e.event_type).collect();
    for expected in [
        EventType::IdentityCreated,
        EventType::RoleAssigned,
        EventType::LoginSucceeded,
        EventType::SessionCreated,
        EventType::AccessGranted,
        EventType::AccessDenied,
        EventType::SessionRevoked,
    ] {
        assert!(types.contains(&expected), "missing {:?}", expected);
    }

    let granted = ctx
        .core
        .events
        .history()
        .into_iter()
        .find(|e| e.event_type == EventType::AccessGranted)
        .unwrap();
    assert_eq!(granted.session_id, Some(session.session_id));
    assert_eq!(granted.payload_str("source"), Some("rbac"));
}
