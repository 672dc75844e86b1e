//! Effect-execution engine.
//!
//! Transition handlers are pure: they return an effect map describing what
//! should happen. The `do-fx` interceptor looks up each effect kind in an
//! [`EffectRegistry`] and runs the registered handler, which is where state
//! gets written, events get dispatched and timers get scheduled.
//!
//! [`Frame`] wires the registries, the state container and a run-to-completion
//! event queue together. Everything a handler touches comes in through the
//! traits in [`traits`], so each piece can be swapped for an in-memory double.

pub mod db;
pub mod diagnostics;
pub mod frame;
pub mod fx;
pub mod interceptor;
pub mod memory;
pub mod registry;
pub mod scheduler;
pub mod traits;

pub use db::AppDb;
pub use diagnostics::{Diagnostic, Diagnostics, TracingDiagnostics};
pub use frame::{EventRegistry, Frame, FrameBuilder};
pub use fx::{kinds, DoFx, EffectError, EffectHandler, EffectRegistry, FxDeps};
pub use interceptor::{db_handler, fx_handler, Chain, CoEffects, Context, Interceptor};
pub use memory::{MemoryDiagnostics, MemoryDispatcher, MemoryEventHandlers, MemoryFx};
pub use registry::HandlerRegistry;
pub use scheduler::{ManualScheduler, TokioScheduler};
pub use traits::{Dispatch, EventHandlers, Scheduler, StateStore, Thunk};

pub use cascade_common::{CascadeError, EffectKind, EffectMap, Event, Payload};
