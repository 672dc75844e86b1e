//! In-memory collaborators for tests. No timers, no logging sink required.

use std::sync::{Arc, Mutex, PoisonError};

use cascade_common::Event;
use serde_json::Value;

use crate::db::AppDb;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::fx::{EffectRegistry, FxDeps};
use crate::scheduler::ManualScheduler;
use crate::traits::{Dispatch, EventHandlers};

/// Records dispatched events instead of processing them.
#[derive(Default)]
pub struct MemoryDispatcher {
    events: Mutex<Vec<Event>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event dispatched so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Dispatch for MemoryDispatcher {
    fn dispatch(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Records diagnostics for assertions.
#[derive(Default)]
pub struct MemoryDiagnostics {
    reports: Mutex<Vec<Diagnostic>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Diagnostic> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn report(&self, diagnostic: &Diagnostic) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
    }
}

/// Records ids removed through [`EventHandlers::remove`].
#[derive(Default)]
pub struct MemoryEventHandlers {
    removed: Mutex<Vec<String>>,
}

impl MemoryEventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EventHandlers for MemoryEventHandlers {
    fn remove(&self, id: &str) {
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());
    }
}

/// A full set of in-memory collaborators plus an effect registry with the
/// built-ins installed. Keep the handles to assert on what effects did.
pub struct MemoryFx {
    pub dispatcher: Arc<MemoryDispatcher>,
    pub scheduler: Arc<ManualScheduler>,
    pub db: Arc<AppDb>,
    pub event_handlers: Arc<MemoryEventHandlers>,
    pub diagnostics: Arc<MemoryDiagnostics>,
    pub effects: Arc<EffectRegistry>,
}

impl MemoryFx {
    pub fn new() -> Self {
        Self::with_db(Value::Object(Default::default()))
    }

    pub fn with_db(initial: Value) -> Self {
        Self {
            dispatcher: Arc::new(MemoryDispatcher::new()),
            scheduler: Arc::new(ManualScheduler::new()),
            db: Arc::new(AppDb::new(initial)),
            event_handlers: Arc::new(MemoryEventHandlers::new()),
            diagnostics: Arc::new(MemoryDiagnostics::new()),
            effects: Arc::new(EffectRegistry::with_builtins()),
        }
    }

    pub fn deps(&self) -> FxDeps {
        FxDeps {
            dispatcher: self.dispatcher.clone(),
            scheduler: self.scheduler.clone(),
            db: self.db.clone(),
            event_handlers: self.event_handlers.clone(),
            diagnostics: self.diagnostics.clone(),
            effects: self.effects.clone(),
        }
    }
}

impl Default for MemoryFx {
    fn default() -> Self {
        Self::new()
    }
}
