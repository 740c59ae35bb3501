#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use iam_service::clock::ManualClock;
use iam_service::config::IamConfig;
use iam_service::dtos::{CreateIdentityCommand, LoginCommand};
use iam_service::models::{AuthenticationMethod, Identity};
use iam_service::repositories::Repositories;
use iam_service::services::{
    GovernorRateLimitStore, InMemoryRevocationStore, MemoryAuditSink, SessionGrant,
};
use iam_service::utils::Password;
use iam_service::IamCore;

pub const PASSWORD: &str = "Passw0rd!";

pub struct TestContext {
    pub core: IamCore,
    pub clock: ManualClock,
    pub repos: Repositories,
    pub audit: Arc<MemoryAuditSink>,
}

/// Monday 2025-01-06 10:00 UTC.
pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap()
}

pub fn test_config() -> IamConfig {
    let mut config = IamConfig::default();
    config.token.hmac_secret = Some("integration-test-secret-at-least-32-bytes".to_string());
    config
}

pub fn setup() -> TestContext {
    setup_with(test_config())
}

pub fn setup_with(config: IamConfig) -> TestContext {
    let clock = ManualClock::new(start_time());
    let repos = Repositories::in_memory();
    let audit = Arc::new(MemoryAuditSink::default());
    let rate_limiter = Arc::new(GovernorRateLimitStore::new(&config.rate_limit).unwrap());
    let core = IamCore::new(
        config,
        repos.clone(),
        Arc::new(clock.clone()),
        Arc::new(InMemoryRevocationStore::default()),
        rate_limiter,
        audit.clone(),
    )
    .unwrap();
    TestContext {
        core,
        clock,
        repos,
        audit,
    }
}

impl TestContext {
    pub async fn create_identity(&self, username: &str) -> Identity {
        self.core
            .identities
            .create(CreateIdentityCommand {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password: Password::new(PASSWORD),
                attributes: Default::default(),
            })
            .await
            .unwrap()
    }

    pub async fn login(&self, identifier: &str) -> SessionGrant {
        self.core
            .sessions
            .authenticate(login_command(identifier, PASSWORD))
            .await
            .unwrap()
    }
}

pub fn login_command(identifier: &str, password: &str) -> LoginCommand {
    LoginCommand {
        identifier: identifier.to_string(),
        password: Password::new(password),
        ip_address: "10.0.0.1".to_string(),
        user_agent: "integration-tests/1.0".to_string(),
        device_fingerprint: Some("device-1".to_string()),
        authentication_method: AuthenticationMethod::Password,
    }
}
