mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{login_command, start_time, test_config, PASSWORD};
use iam_service::clock::ManualClock;
use iam_service::dtos::{CreateIdentityCommand, ValidateAccessCommand};
use iam_service::models::EventType;
use iam_service::repositories::Repositories;
use iam_service::services::{
    AuditRecord, AuditSink, GovernorRateLimitStore, InMemoryRevocationStore, MemoryAuditSink,
};
use iam_service::utils::Password;
use iam_service::IamCore;

/// Memory sink that can be switched to fail every write.
#[derive(Default)]
struct SwitchableSink {
    failing: AtomicBool,
    records: MemoryAuditSink,
}

#[async_trait]
impl AuditSink for SwitchableSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.records.write(record).await
    }
}

fn core_with(sink: Arc<SwitchableSink>) -> IamCore {
    let config = test_config();
    let rate_limiter = Arc::new(GovernorRateLimitStore::new(&config.rate_limit).unwrap());
    IamCore::new(
        config,
        Repositories::in_memory(),
        Arc::new(ManualClock::new(start_time())),
        Arc::new(InMemoryRevocationStore::default()),
        rate_limiter,
        sink,
    )
    .unwrap()
}

fn create_command(username: &str) -> CreateIdentityCommand {
    CreateIdentityCommand {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password: Password::new(PASSWORD),
        attributes: Default::default(),
    }
}

#[tokio::test]
async fn every_decision_is_written_to_the_sink_once() {
    let sink = Arc::new(SwitchableSink::default());
    let core = core_with(sink.clone());
    let alice = core.identities.create(create_command("alice")).await.unwrap();

    let decision = core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "workout", "delete"))
        .await
        .unwrap();
    assert!(!decision.allowed);

    let records = sink.records.records();
    let denied: Vec<_> = records
        .iter()
        .filter(|r| r.event_type == EventType::AccessDenied.as_str())
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].resource.as_deref(), Some("workout"));
    assert_eq!(denied[0].action.as_deref(), Some("delete"));
    assert_eq!(
        records
            .iter()
            .filter(|r| r.event_type == EventType::IdentityCreated.as_str())
            .count(),
        1
    );
}

#[tokio::test]
async fn sink_failure_fails_the_operation() {
    let sink = Arc::new(SwitchableSink::default());
    let core = core_with(sink.clone());
    let alice = core.identities.create(create_command("alice")).await.unwrap();
    sink.failing.store(true, Ordering::SeqCst);

    let err = core
        .authorization
        .check_access(ValidateAccessCommand::new(alice.id, "workout", "delete"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INFRASTRUCTURE_ERROR");

    let err = core.identities.create(create_command("bob")).await.unwrap_err();
    assert_eq!(err.code(), "INFRASTRUCTURE_ERROR");

    let err = core
        .sessions
        .authenticate(login_command("alice", PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INFRASTRUCTURE_ERROR");

    let err = core.seed_default_roles().await.unwrap_err();
    assert_eq!(err.code(), "INFRASTRUCTURE_ERROR");

    // Nothing reached the bus for the failed writes.
    assert!(!core
        .events
        .history()
        .iter()
        .any(|e| e.event_type == EventType::AccessDenied));
}
