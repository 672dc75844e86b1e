//! Keyed handler tables.
//!
//! One `HandlerRegistry` per handler kind (effects, events). A key maps to at
//! most one handler; registering again replaces the previous entry. Lookups
//! hand out an `Arc` so no lock is held while the handler runs, which lets
//! handlers register or remove other handlers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cascade_common::CascadeError;
use tracing::{debug, warn};

pub struct HandlerRegistry<H: ?Sized> {
    kind: &'static str,
    handlers: RwLock<HashMap<String, Arc<H>>>,
    warn_on_overwrite: bool,
}

impl<H: ?Sized> HandlerRegistry<H> {
    /// An empty registry. `kind` names the handler kind in logs and errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            handlers: RwLock::new(HashMap::new()),
            warn_on_overwrite: false,
        }
    }

    pub fn with_overwrite_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_overwrite = enabled;
        self
    }

    pub fn warns_on_overwrite(&self) -> bool {
        self.warn_on_overwrite
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Store `handler` under `key`, replacing any previous handler.
    pub fn register(&self, key: impl Into<String>, handler: Arc<H>) {
        let key = key.into();
        let previous = self.write_lock().insert(key.clone(), handler.clone());
        match previous {
            Some(prev) if Arc::ptr_eq(&prev, &handler) => {}
            Some(_) if self.warn_on_overwrite => {
                warn!(kind = self.kind, key = key.as_str(), "Overwriting handler");
            }
            Some(_) => {
                debug!(kind = self.kind, key = key.as_str(), "Overwriting handler");
            }
            None => {
                debug!(kind = self.kind, key = key.as_str(), "Registered handler");
            }
        }
    }

    /// Optional lookup: `None` when nothing is registered.
    pub fn get(&self, key: &str) -> Option<Arc<H>> {
        self.read_lock().get(key).cloned()
    }

    /// Required lookup: a missing handler is an error for the caller to
    /// log or raise.
    pub fn require(&self, key: &str) -> Result<Arc<H>, CascadeError> {
        self.get(key).ok_or_else(|| CascadeError::MissingHandler {
            kind: self.kind,
            key: key.to_string(),
        })
    }

    /// `require` when `required`, otherwise `get`.
    pub fn lookup(&self, key: &str, required: bool) -> Result<Option<Arc<H>>, CascadeError> {
        if required {
            self.require(key).map(Some)
        } else {
            Ok(self.get(key))
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_lock().contains_key(key)
    }

    /// Remove one handler. Unknown keys are ignored.
    pub fn unregister(&self, key: &str) -> Option<Arc<H>> {
        let removed = self.write_lock().remove(key);
        if removed.is_some() {
            debug!(kind = self.kind, key, "Unregistered handler");
        }
        removed
    }

    pub fn unregister_all(&self) {
        self.write_lock().clear();
        debug!(kind = self.kind, "Cleared all handlers");
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<H>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<H>>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
