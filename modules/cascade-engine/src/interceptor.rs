//! Interceptor chains.
//!
//! Processing one event walks a chain of interceptors: every `before` in
//! order, then every `after` in reverse. The transition handler itself is
//! just an interceptor whose `before` fills in the effect map.

use std::sync::Arc;

use cascade_common::{CascadeError, EffectMap, Event, Payload};

/// Inputs available to a transition handler.
#[derive(Debug, Clone)]
pub struct CoEffects {
    pub event: Event,
    /// Snapshot of the state container when processing started.
    pub db: Payload,
}

/// State threaded through a chain for one event.
#[derive(Debug, Clone)]
pub struct Context {
    pub coeffects: CoEffects,
    pub effects: EffectMap,
}

impl Context {
    pub fn new(event: Event, db: Payload) -> Self {
        Self {
            coeffects: CoEffects { event, db },
            effects: EffectMap::new(),
        }
    }

    pub fn event(&self) -> &Event {
        &self.coeffects.event
    }
}

pub trait Interceptor: Send + Sync {
    /// Stable identifier, so a chain can be searched or patched.
    fn id(&self) -> &str;

    fn before(&self, _ctx: &mut Context) -> Result<(), CascadeError> {
        Ok(())
    }

    fn after(&self, _ctx: &mut Context) -> Result<(), CascadeError> {
        Ok(())
    }
}

/// Run `chain` for `event`. The first error stops the walk.
pub fn execute(
    event: Event,
    db: Payload,
    chain: &[Arc<dyn Interceptor>],
) -> Result<Context, CascadeError> {
    let mut ctx = Context::new(event, db);
    for interceptor in chain {
        interceptor.before(&mut ctx)?;
    }
    for interceptor in chain.iter().rev() {
        interceptor.after(&mut ctx)?;
    }
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// The interceptors registered for one event id.
#[derive(Clone, Default)]
pub struct Chain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Chain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn push(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.interceptors.iter().any(|i| i.id() == id)
    }

    /// Swap the interceptor with the given id. Returns `false` if absent.
    pub fn replace(&mut self, id: &str, interceptor: Arc<dyn Interceptor>) -> bool {
        match self.interceptors.iter_mut().find(|i| i.id() == id) {
            Some(slot) => {
                *slot = interceptor;
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.id()).collect()
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Handler adapters
// ---------------------------------------------------------------------------

/// Wraps a `(db, event) -> db` function. Return the input `Arc` unchanged to
/// signal that nothing changed.
pub struct DbHandler<F> {
    handler: F,
}

pub fn db_handler<F>(handler: F) -> DbHandler<F>
where
    F: Fn(&Payload, &Event) -> Payload + Send + Sync,
{
    DbHandler { handler }
}

impl<F> Interceptor for DbHandler<F>
where
    F: Fn(&Payload, &Event) -> Payload + Send + Sync,
{
    fn id(&self) -> &str {
        "db-handler"
    }

    fn before(&self, ctx: &mut Context) -> Result<(), CascadeError> {
        let db = (self.handler)(&ctx.coeffects.db, &ctx.coeffects.event);
        ctx.effects.insert_shared("db", db);
        Ok(())
    }
}

/// Wraps a `(coeffects, event) -> effects` function.
pub struct FxHandler<F> {
    handler: F,
}

pub fn fx_handler<F>(handler: F) -> FxHandler<F>
where
    F: Fn(&CoEffects, &Event) -> EffectMap + Send + Sync,
{
    FxHandler { handler }
}

impl<F> Interceptor for FxHandler<F>
where
    F: Fn(&CoEffects, &Event) -> EffectMap + Send + Sync,
{
    fn id(&self) -> &str {
        "fx-handler"
    }

    fn before(&self, ctx: &mut Context) -> Result<(), CascadeError> {
        ctx.effects = (self.handler)(&ctx.coeffects, &ctx.coeffects.event);
        Ok(())
    }
}
