//! Capabilities the engine consumes from its surroundings.
//!
//! Effect handlers never reach for ambient state: everything they touch
//! arrives through one of these traits, bundled in [`FxDeps`](crate::fx::FxDeps).

use std::sync::Arc;
use std::time::Duration;

use cascade_common::{Event, Payload};

/// Work handed to a [`Scheduler`]; runs once.
pub type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// Event-dispatch entry point. Enqueues or processes an event; failures are
/// the implementor's concern.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, event: Event);
}

/// Timer primitive. Runs `thunk` once, no earlier than `delay` from now.
/// Must not block the caller.
pub trait Scheduler: Send + Sync {
    fn after(&self, delay: Duration, thunk: Thunk);
}

/// The shared state container holding the single application snapshot.
pub trait StateStore: Send + Sync {
    fn read(&self) -> Payload;
    fn write(&self, snapshot: Payload);
}

/// The transition-handler registry, as seen by effect handlers.
/// Removing an unknown id is a no-op.
pub trait EventHandlers: Send + Sync {
    fn remove(&self, id: &str);
}

// ---------------------------------------------------------------------------
// Arc<T> blankets, so callers can keep a handle for assertions
// ---------------------------------------------------------------------------

impl<T: Dispatch + ?Sized> Dispatch for Arc<T> {
    fn dispatch(&self, event: Event) {
        (**self).dispatch(event)
    }
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn after(&self, delay: Duration, thunk: Thunk) {
        (**self).after(delay, thunk)
    }
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn read(&self) -> Payload {
        (**self).read()
    }

    fn write(&self, snapshot: Payload) {
        (**self).write(snapshot)
    }
}

impl<T: EventHandlers + ?Sized> EventHandlers for Arc<T> {
    fn remove(&self, id: &str) {
        (**self).remove(id)
    }
}
