use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::audit::AuditSeverity;
use super::event_bus::EventHandler;
use crate::models::{EventType, SecurityEvent};

const MAX_ALERTS: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub severity: AuditSeverity,
    pub subject: Option<String>,
    pub summary: String,
    pub raised_at: DateTime<Utc>,
}

/// Raises operator-facing alerts for threat signals.
#[derive(Default)]
pub struct SecurityAlertHandler {
    alerts: Mutex<VecDeque<SecurityAlert>>,
}

impl SecurityAlertHandler {
    pub const NAME: &'static str = "security_alerts";

    pub fn recent_alerts(&self) -> Vec<SecurityAlert> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn classify(event: &SecurityEvent) -> (AuditSeverity, String) {
        match event.event_type {
            EventType::AccountLocked => (
                AuditSeverity::Critical,
                "Account locked after repeated failed logins".to_string(),
            ),
            EventType::SuspiciousSession => (
                AuditSeverity::Critical,
                format!(
                    "High-risk session created (risk score {})",
                    event.payload.get("risk_score").cloned().unwrap_or_default()
                ),
            ),
            EventType::RateLimitExceeded => (
                AuditSeverity::Warning,
                "Login rate limit exceeded".to_string(),
            ),
            EventType::AccessDenied => (
                AuditSeverity::Warning,
                format!(
                    "Access denied to {}:{}",
                    event.payload_str("resource").unwrap_or("?"),
                    event.payload_str("action").unwrap_or("?")
                ),
            ),
            _ => (AuditSeverity::Info, "Failed login".to_string()),
        }
    }
}

#[async_trait]
impl EventHandler for SecurityAlertHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::AccountLocked
                | EventType::SuspiciousSession
                | EventType::LoginFailed
                | EventType::RateLimitExceeded
                | EventType::AccessDenied
        )
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn handle(&self, event: &SecurityEvent) -> anyhow::Result<()> {
        let (severity, summary) = Self::classify(event);
        let subject = event
            .origin_user_id
            .map(|id| id.to_string())
            .or_else(|| event.payload_str("identifier").map(str::to_string));

        match severity {
            AuditSeverity::Critical => tracing::warn!(
                event_type = event.event_type.as_str(),
                subject = subject.as_deref().unwrap_or("-"),
                severity = severity.as_str(),
                "{}",
                summary
            ),
            _ => tracing::info!(
                event_type = event.event_type.as_str(),
                subject = subject.as_deref().unwrap_or("-"),
                severity = severity.as_str(),
                "{}",
                summary
            ),
        }

        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        if alerts.len() >= MAX_ALERTS {
            alerts.pop_front();
        }
        alerts.push_back(SecurityAlert {
            event_id: event.id,
            event_type: event.event_type,
            severity,
            subject,
            summary,
            raised_at: event.timestamp,
        });
        Ok(())
    }
}
