//! Audit trail for security-relevant operations.
//!
//! Records are denormalised so a reader never needs to join against the
//! repositories to understand what happened.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::event_bus::{EventBus, EventHandler};
use super::IamError;
use crate::clock::SharedClock;
use crate::models::{EventType, SecurityEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub event_type: String,
    pub severity: AuditSeverity,
    pub subject: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub reason: Option<String>,
    pub session_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub trace_id: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl AuditRecord {
    fn new(
        event_type: impl Into<String>,
        outcome: AuditOutcome,
        severity: AuditSeverity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            outcome,
            event_type: event_type.into(),
            severity,
            subject: None,
            resource: None,
            action: None,
            reason: None,
            session_id: None,
            ip_address: None,
            trace_id: None,
            details: Value::Null,
        }
    }

    fn from_event(event: &SecurityEvent) -> Self {
        let (outcome, severity) = match event.event_type {
            EventType::AccountLocked | EventType::SuspiciousSession => {
                (AuditOutcome::Failure, AuditSeverity::Critical)
            }
            t if t.is_failure() => (AuditOutcome::Failure, AuditSeverity::Warning),
            _ => (AuditOutcome::Success, AuditSeverity::Info),
        };
        let mut record = Self::new(event.event_type.as_str(), outcome, severity, event.timestamp);
        record.subject = event
            .origin_user_id
            .map(|id| id.to_string())
            .or_else(|| event.payload_str("identifier").map(str::to_string));
        record.resource = event.payload_str("resource").map(str::to_string);
        record.action = event.payload_str("action").map(str::to_string);
        record.reason = event.payload_str("reason").map(str::to_string);
        record.ip_address = event.payload_str("ip_address").map(str::to_string);
        record.session_id = event.session_id;
        record.trace_id = event.trace_id.clone();
        record.details = event.payload.clone();
        record
    }
}

/// Metadata key carrying the id of the audit record already written for an
/// event.
pub const AUDIT_RECORD_KEY: &str = "audit_record_id";

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> Result<(), anyhow::Error>;
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), anyhow::Error> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// One JSON object per line, flushed after every write.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open audit log {}: {}", path.display(), e))?;
        tracing::info!(path = %path.display(), "Audit log opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), anyhow::Error> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Writes the audit trail, both from bus events and from direct calls.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    clock: SharedClock,
}

impl AuditLogger {
    pub const NAME: &'static str = "audit_logger";

    pub fn new(sink: Arc<dyn AuditSink>, clock: SharedClock) -> Self {
        Self { sink, clock }
    }

    async fn persist(&self, record: AuditRecord) -> Result<(), IamError> {
        self.sink.write(&record).await.map_err(|e| {
            tracing::error!(error = %e, event_type = %record.event_type, "Failed to write audit record");
            IamError::Infrastructure(e)
        })
    }

    /// Persist the record for an event and tag the event with its id, so
    /// the bus handler does not write it a second time.
    pub async fn record_event(&self, event: SecurityEvent) -> Result<SecurityEvent, IamError> {
        let record = AuditRecord::from_event(&event);
        let record_id = record.id;
        self.persist(record).await?;
        Ok(event.with_metadata(AUDIT_RECORD_KEY, record_id.to_string()))
    }

    pub async fn audit_success(
        &self,
        operation: &str,
        subject: Option<&str>,
        details: Value,
    ) -> Result<(), IamError> {
        let mut record = AuditRecord::new(
            operation,
            AuditOutcome::Success,
            AuditSeverity::Info,
            self.clock.now(),
        );
        record.subject = subject.map(str::to_string);
        record.details = details;
        self.persist(record).await
    }

    pub async fn audit_failure(
        &self,
        operation: &str,
        subject: Option<&str>,
        error: &IamError,
    ) -> Result<(), IamError> {
        let mut record = AuditRecord::new(
            operation,
            AuditOutcome::Failure,
            AuditSeverity::Warning,
            self.clock.now(),
        );
        record.subject = subject.map(str::to_string);
        record.reason = Some(error.code().to_string());
        record.details = json!(error.context());
        self.persist(record).await
    }

    pub async fn audit_security_event(
        &self,
        kind: &str,
        severity: AuditSeverity,
        subject: Option<&str>,
        details: Value,
    ) -> Result<(), IamError> {
        tracing::warn!(
            kind = kind,
            severity = severity.as_str(),
            subject = subject.unwrap_or("-"),
            "Security event"
        );
        let outcome = match severity {
            AuditSeverity::Info => AuditOutcome::Success,
            AuditSeverity::Warning | AuditSeverity::Critical => AuditOutcome::Failure,
        };
        let mut record = AuditRecord::new(kind, outcome, severity, self.clock.now());
        record.subject = subject.map(str::to_string);
        record.details = details;
        self.persist(record).await
    }
}

#[async_trait]
impl EventHandler for AuditLogger {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, _event_type: EventType) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn handle(&self, event: &SecurityEvent) -> anyhow::Result<()> {
        if event.metadata_str(AUDIT_RECORD_KEY).is_some() {
            return Ok(());
        }
        self.sink.write(&AuditRecord::from_event(event)).await
    }
}

/// Audits an event durably, then dispatches it on the bus. A sink failure
/// fails the call and the event is not dispatched.
#[derive(Clone)]
pub struct EventPublisher {
    audit: Arc<AuditLogger>,
    bus: Arc<EventBus>,
}

impl EventPublisher {
    pub fn new(audit: Arc<AuditLogger>, bus: Arc<EventBus>) -> Self {
        Self { audit, bus }
    }

    /// For changes that have no bus event but still need an audit record.
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub async fn publish(&self, event: SecurityEvent) -> Result<(), IamError> {
        let event = self.audit.record_event(event).await?;
        self.bus.emit(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn event_records_are_denormalised() {
        let sink = Arc::new(MemoryAuditSink::default());
        let logger = AuditLogger::new(sink.clone(), Arc::new(SystemClock));
        let session_id = Uuid::new_v4();
        let event = SecurityEvent::new(
            EventType::AccessDenied,
            "authorization",
            json!({ "resource": "workout", "action": "delete", "ip_address": "10.0.0.2" }),
            Utc::now(),
        )
        .with_session(session_id);

        logger.handle(&event).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].resource.as_deref(), Some("workout"));
        assert_eq!(records[0].action.as_deref(), Some("delete"));
        assert_eq!(records[0].session_id, Some(session_id));
    }

    #[tokio::test]
    async fn published_events_are_not_written_twice() {
        let sink = Arc::new(MemoryAuditSink::default());
        let logger = Arc::new(AuditLogger::new(sink.clone(), Arc::new(SystemClock)));
        let bus = Arc::new(EventBus::new(&Default::default()));
        bus.register(logger.clone());
        let publisher = EventPublisher::new(logger, bus.clone());

        publisher
            .publish(SecurityEvent::new(
                EventType::MfaEnabled,
                "identity_service",
                json!({}),
                Utc::now(),
            ))
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let history = bus.history();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].metadata_str(AUDIT_RECORD_KEY),
            Some(records[0].id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn json_lines_sink_appends_readable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = Arc::new(JsonLinesAuditSink::open(&path).await.unwrap());
        let logger = AuditLogger::new(sink, Arc::new(SystemClock));

        logger
            .audit_success("role_created", Some("admin"), json!({ "role": "trainer" }))
            .await
            .unwrap();
        logger
            .audit_failure("login", Some("alice"), &IamError::InvalidCredentials)
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<AuditRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].reason.as_deref(), Some("INVALID_CREDENTIALS"));
    }
}
