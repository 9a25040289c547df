//! Handler sets and the swappable active service.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::info;

use livequeue_core::is_unfinished_streak;

use crate::priority::ServicePriorityProfile;

/// Event type whose handler catches every type without its own handler.
pub const WILDCARD: &str = "*";

/// What a handler did with one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResult {
    Success,
    /// Deliberately not processed; completed without retry.
    Skip(String),
    /// Retried with backoff until attempts are exhausted.
    Failure(String),
}

impl<E: fmt::Display> From<Result<(), E>> for HandlerResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => HandlerResult::Success,
            Err(e) => HandlerResult::Failure(e.to_string()),
        }
    }
}

pub type Handler = Arc<dyn Fn(&Value) -> HandlerResult + Send + Sync>;

/// Decides whether a claimed job is worth handling at all. `Err(reason)`
/// turns the job into a skip.
pub type AdmissionPredicate = Arc<dyn Fn(&str, &Value) -> Result<(), String> + Send + Sync>;

/// Handlers keyed by event type, plus an optional admission predicate.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Handler>,
    admission: Option<AdmissionPredicate>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `event_type`. Use `"*"` for a
    /// catch-all.
    pub fn register<F>(&mut self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(event_type.into(), Arc::new(handler));
    }

    pub fn with_handler<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(event_type, handler);
        self
    }

    pub fn with_admission(mut self, predicate: AdmissionPredicate) -> Self {
        self.admission = Some(predicate);
        self
    }

    pub fn handler_for(&self, event_type: &str) -> Option<&Handler> {
        self.handlers
            .get(event_type)
            .or_else(|| self.handlers.get(WILDCARD))
    }

    pub fn admission(&self) -> Option<&AdmissionPredicate> {
        self.admission.as_ref()
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.event_types().collect();
        types.sort_unstable();
        f.debug_struct("HandlerSet")
            .field("event_types", &types)
            .field("admission", &self.admission.is_some())
            .finish()
    }
}

/// Skip gifts that are mid-streak; only the final event of a repeat
/// sequence is handled.
pub fn streak_final_only() -> AdmissionPredicate {
    Arc::new(|_event_type: &str, payload: &Value| {
        if is_unfinished_streak(payload) {
            Err("gift streak still in progress".to_string())
        } else {
            Ok(())
        }
    })
}

/// The consumer currently bound to the queue. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ActiveService {
    /// Consumer whose priority profile new jobs are resolved against.
    pub consumer_id: Option<String>,
    pub handlers: HandlerSet,
    pub profile: Option<ServicePriorityProfile>,
}

impl ActiveService {
    pub fn new(consumer_id: impl Into<String>, handlers: HandlerSet) -> Self {
        Self {
            consumer_id: Some(consumer_id.into()),
            handlers,
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: ServicePriorityProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}

/// Pointer-swap cell holding the active service.
///
/// Processors take a snapshot at claim time and run the job against it;
/// a swap only affects later claims.
#[derive(Debug, Default)]
pub struct ServiceSlot {
    current: RwLock<Arc<ActiveService>>,
}

impl ServiceSlot {
    pub fn new(service: ActiveService) -> Self {
        Self {
            current: RwLock::new(Arc::new(service)),
        }
    }

    pub fn current(&self) -> Arc<ActiveService> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the service; returns the previous one.
    pub fn swap(&self, service: ActiveService) -> Arc<ActiveService> {
        let next = Arc::new(service);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = std::mem::replace(&mut *guard, next);
        info!(
            from = previous.consumer_id.as_deref().unwrap_or("-"),
            to = guard.consumer_id.as_deref().unwrap_or("-"),
            handlers = guard.handlers.len(),
            "active service swapped"
        );
        previous
    }

    /// Copy-and-swap edit of the current service's handler set.
    pub fn update_handlers(&self, f: impl FnOnce(&mut HandlerSet)) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = ActiveService::clone(&guard);
        f(&mut next.handlers);
        *guard = Arc::new(next);
    }
}
