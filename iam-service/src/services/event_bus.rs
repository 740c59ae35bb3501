//! In-process security event bus.
//!
//! - Handlers run concurrently, each in its own task with a timeout
//! - A failing, slow or panicking handler never affects the emitter or
//!   the other handlers
//! - Emitted events are kept in a bounded ring for introspection only

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::config::EventBusConfig;
use crate::models::{EventType, SecurityEvent};

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique name; registering a second handler with the same name
    /// replaces the first.
    fn name(&self) -> &str;

    fn supports(&self, event_type: EventType) -> bool;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    async fn handle(&self, event: &SecurityEvent) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Registry {
    handlers: Vec<Arc<dyn EventHandler>>,
    by_type: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
}

impl Registry {
    fn rebuild(&mut self) {
        self.handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
        self.by_type = EventType::ALL
            .iter()
            .map(|t| {
                let supporting = self
                    .handlers
                    .iter()
                    .filter(|h| h.supports(*t))
                    .cloned()
                    .collect();
                (*t, supporting)
            })
            .collect();
    }
}

pub struct EventBus {
    registry: RwLock<Registry>,
    history: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    handler_timeout: Duration,
}

impl EventBus {
    pub fn new(config: &EventBusConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            capacity: config.history_capacity,
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
        }
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.handlers.retain(|h| h.name() != handler.name());
        tracing::info!(handler = handler.name(), priority = handler.priority(), "Event handler registered");
        registry.handlers.push(handler);
        registry.rebuild();
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let before = registry.handlers.len();
        registry.handlers.retain(|h| h.name() != name);
        let removed = registry.handlers.len() != before;
        if removed {
            registry.rebuild();
            tracing::info!(handler = name, "Event handler unregistered");
        }
        removed
    }

    fn handlers_for(&self, event_type: EventType) -> Vec<Arc<dyn EventHandler>> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_type
            .get(&event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Handler names for a type, in dispatch order.
    pub fn handler_names(&self, event_type: EventType) -> Vec<String> {
        self.handlers_for(event_type)
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    /// Dispatch to every supporting handler and wait for all of them.
    /// Never fails.
    pub async fn emit(&self, event: SecurityEvent) {
        let handlers = self.handlers_for(event.event_type);
        let event = Arc::new(event);

        let (names, tasks): (Vec<String>, Vec<_>) = handlers
            .into_iter()
            .map(|handler| {
                let name = handler.name().to_string();
                let event = Arc::clone(&event);
                let timeout = self.handler_timeout;
                let task = tokio::spawn(async move {
                    tokio::time::timeout(timeout, handler.handle(&event)).await
                });
                (name, task)
            })
            .unzip();

        let results = join_all(tasks).await;

        let mut handled_by = Vec::with_capacity(names.len());
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(Ok(()))) => handled_by.push(name),
                Ok(Ok(Err(e))) => tracing::error!(
                    handler = %name,
                    event_type = event.event_type.as_str(),
                    event_id = %event.id,
                    error = %e,
                    "Event handler failed"
                ),
                Ok(Err(_)) => tracing::error!(
                    handler = %name,
                    event_type = event.event_type.as_str(),
                    event_id = %event.id,
                    timeout_ms = self.handler_timeout.as_millis() as u64,
                    "Event handler timed out"
                ),
                Err(e) => tracing::error!(
                    handler = %name,
                    event_type = event.event_type.as_str(),
                    event_id = %event.id,
                    error = %e,
                    "Event handler panicked"
                ),
            }
        }

        let mut record = Arc::unwrap_or_clone(event);
        record.handled_by = handled_by;
        self.remember(record);
    }

    fn remember(&self, event: SecurityEvent) {
        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<SecurityEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Up to `n` most recent events, newest last.
    pub fn recent(&self, n: usize) -> Vec<SecurityEvent> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .iter()
            .skip(history.len().saturating_sub(n))
            .cloned()
            .collect()
    }
}
