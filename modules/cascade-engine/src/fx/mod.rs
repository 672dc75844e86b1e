//! Effect handlers and the registry that maps effect kinds to them.
//!
//! A transition handler describes side effects as an [`EffectMap`]; the
//! [`DoFx`] interceptor resolves every entry against an [`EffectRegistry`]
//! and runs the matching [`EffectHandler`].
//!
//! [`EffectMap`]: cascade_common::EffectMap

pub mod builtins;
pub mod interceptor;

use std::sync::Arc;

use cascade_common::Payload;
use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::registry::HandlerRegistry;
use crate::traits::{Dispatch, EventHandlers, Scheduler, StateStore};

pub use interceptor::DoFx;

/// Built-in effect kinds.
pub mod kinds {
    pub const DB: &str = "db";
    pub const DISPATCH: &str = "dispatch";
    pub const DISPATCH_N: &str = "dispatch-n";
    pub const DISPATCH_LATER: &str = "dispatch-later";
    pub const DEREGISTER_EVENT_HANDLER: &str = "deregister-event-handler";
    pub const FX: &str = "fx";

    pub const BUILTINS: [&str; 6] = [
        DB,
        DISPATCH,
        DISPATCH_N,
        DISPATCH_LATER,
        DEREGISTER_EVENT_HANDLER,
        FX,
    ];
}

/// Outcome of an effect handler that did not complete.
#[derive(Debug, Error)]
pub enum EffectError {
    /// The payload failed validation. Reported as a diagnostic and skipped.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The handler itself broke. Aborts the rest of the effect map.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl EffectError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}

/// Performs one kind of side effect.
pub trait EffectHandler: Send + Sync {
    fn handle(&self, payload: &Payload, deps: &FxDeps) -> Result<(), EffectError>;
}

impl<F> EffectHandler for F
where
    F: Fn(&Payload, &FxDeps) -> Result<(), EffectError> + Send + Sync,
{
    fn handle(&self, payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
        self(payload, deps)
    }
}

pub type EffectRegistry = HandlerRegistry<dyn EffectHandler>;

impl HandlerRegistry<dyn EffectHandler> {
    /// An empty effect registry.
    pub fn empty() -> Self {
        Self::new("effect")
    }

    /// An effect registry with every built-in handler installed.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        builtins::install(&registry);
        registry
    }

    /// Register a closure or function as the handler for `kind`.
    pub fn register_fn<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Payload, &FxDeps) -> Result<(), EffectError> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler));
    }
}

/// Everything an effect handler may touch.
#[derive(Clone)]
pub struct FxDeps {
    pub dispatcher: Arc<dyn Dispatch>,
    pub scheduler: Arc<dyn Scheduler>,
    pub db: Arc<dyn StateStore>,
    pub event_handlers: Arc<dyn EventHandlers>,
    pub diagnostics: Arc<dyn Diagnostics>,
    /// Registry used to resolve nested effects (the `fx` effect).
    pub effects: Arc<EffectRegistry>,
}
