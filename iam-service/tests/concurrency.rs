mod common;

use std::collections::HashSet;

use common::{setup, PASSWORD};
use iam_service::dtos::{
    AssignRoleCommand, CreateIdentityCommand, CreateSessionCommand, RefreshSessionCommand,
    RevokeSessionCommand,
};
use iam_service::models::{AuthenticationMethod, EventType, IdentityStatus, GLOBAL_SCOPE};
use iam_service::utils::Password;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_with_one_username_create_one_identity() {
    let ctx = setup();

    let attempts = (0..4).map(|i| {
        let identities = ctx.core.identities.clone();
        tokio::spawn(async move {
            identities
                .create(CreateIdentityCommand {
                    username: "alice".to_string(),
                    email: format!("alice{}@example.com", i),
                    password: Password::new(PASSWORD),
                    attributes: Default::default(),
                })
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let created = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(e)) if e.code() == "IDENTITY_ALREADY_EXISTS"))
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_have_exactly_one_winner() {
    let ctx = setup();
    ctx.create_identity("alice").await;
    let grant = ctx.login("alice").await;

    let attempts = (0..2).map(|_| {
        let sessions = ctx.core.sessions.clone();
        let refresh_token = grant.tokens.refresh_token.clone();
        tokio::spawn(async move {
            sessions
                .refresh_session(RefreshSessionCommand {
                    refresh_token,
                    ip_address: "10.0.0.1".to_string(),
                    user_agent: "integration-tests/1.0".to_string(),
                    device_fingerprint: Some("device-1".to_string()),
                })
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(e)) if e.code() == "INVALID_TOKEN"))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_revocations_end_the_session_once() {
    let ctx = setup();
    ctx.create_identity("alice").await;
    let grant = ctx.login("alice").await;
    let session_id = grant.session.session_id;

    let attempts = (0..4).map(|i| {
        let sessions = ctx.core.sessions.clone();
        tokio::spawn(async move {
            sessions
                .revoke_session(RevokeSessionCommand {
                    session_id,
                    reason: Some(format!("caller-{}", i)),
                })
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let reasons: HashSet<Option<String>> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().terminated_reason)
        .collect();
    assert_eq!(reasons.len(), 1);

    let revoked_events = ctx
        .core
        .events
        .history()
        .iter()
        .filter(|e| e.event_type == iam_service::models::EventType::SessionRevoked)
        .count();
    assert_eq!(revoked_events, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_role_assignments_are_not_lost() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    let mut role_ids = Vec::new();
    for name in ["r1", "r2", "r3", "r4"] {
        let role = ctx
            .core
            .access
            .ensure_role(name, GLOBAL_SCOPE, "", false, &[(name, "read")])
            .await
            .unwrap();
        role_ids.push(role.id);
    }

    let assignments = role_ids.iter().map(|role_id| {
        let access = ctx.core.access.clone();
        let command = AssignRoleCommand {
            identity_id: alice.id,
            role_id: *role_id,
            effective_from: None,
            effective_until: None,
        };
        tokio::spawn(async move { access.assign_role(command, None).await })
    });
    for result in futures::future::join_all(assignments).await {
        result.unwrap().unwrap();
    }

    let access = ctx.core.access.get_access_control(alice.id).await.unwrap();
    assert_eq!(access.role_assignments.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_session_creation_yields_independent_sessions() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    let attempts = (0..5).map(|i| {
        let sessions = ctx.core.sessions.clone();
        let command = CreateSessionCommand {
            identity_id: alice.id,
            device_fingerprint: Some(format!("device-{}", i)),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "integration-tests/1.0".to_string(),
            authentication_method: AuthenticationMethod::Password,
        };
        tokio::spawn(async move { sessions.create_session(command).await })
    });
    let session_ids: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().session.session_id)
        .collect();
    let distinct: HashSet<_> = session_ids.iter().copied().collect();
    assert_eq!(distinct.len(), 5);

    let revoked = session_ids[0];
    ctx.core
        .sessions
        .revoke_session(RevokeSessionCommand {
            session_id: revoked,
            reason: Some("logout".to_string()),
        })
        .await
        .unwrap();

    assert!(ctx
        .core
        .sessions
        .validate_session(revoked)
        .await
        .unwrap()
        .is_none());
    for session_id in &session_ids[1..] {
        let session = ctx
            .core
            .sessions
            .validate_session(*session_id)
            .await
            .unwrap()
            .expect("other sessions stay valid");
        assert_eq!(session.identity_id, alice.id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identity_updates_are_not_lost() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    let verify = {
        let identities = ctx.core.identities.clone();
        tokio::spawn(async move { identities.verify_email(alice.id).await })
    };
    let mfa = {
        let identities = ctx.core.identities.clone();
        tokio::spawn(async move { identities.enable_mfa(alice.id).await })
    };
    verify.await.unwrap().unwrap();
    mfa.await.unwrap().unwrap();

    let stored = ctx.core.identities.get(alice.id).await.unwrap();
    assert!(stored.email_verified);
    assert!(stored.mfa_enabled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failed_logins_lock_the_identity_once() {
    let ctx = setup();
    let alice = ctx.create_identity("alice").await;

    let attempts = (0..8).map(|_| {
        let identities = ctx.core.identities.clone();
        tokio::spawn(async move {
            identities
                .verify_credentials("alice", &Password::new("Wr0ngPassword!"), "10.0.0.9")
                .await
        })
    });
    for result in futures::future::join_all(attempts).await {
        assert_eq!(result.unwrap().unwrap_err().code(), "INVALID_CREDENTIALS");
    }

    let stored = ctx.core.identities.get(alice.id).await.unwrap();
    assert_eq!(stored.status, IdentityStatus::Locked);
    let locked_events = ctx
        .core
        .events
        .history()
        .iter()
        .filter(|e| e.event_type == EventType::AccountLocked)
        .count();
    assert_eq!(locked_events, 1);
}
