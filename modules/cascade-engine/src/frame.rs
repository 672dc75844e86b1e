//! The application frame: registries, state and the event queue.
//!
//! dispatch → queue → chain `[do-fx, ...handler]` → effects → maybe more
//! dispatches, until the queue is empty. Events run to completion one at a
//! time; dispatching from inside a handler only enqueues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cascade_common::{CascadeError, Config, EffectMap, Event, Payload};
use serde_json::Value;
use tracing::{debug, error};

use crate::db::AppDb;
use crate::diagnostics::{Diagnostic, Diagnostics, TracingDiagnostics};
use crate::fx::{DoFx, EffectError, EffectRegistry, FxDeps};
use crate::interceptor::{self, db_handler, fx_handler, Chain, CoEffects, Interceptor};
use crate::registry::HandlerRegistry;
use crate::traits::{Dispatch, EventHandlers, Scheduler, StateStore};

pub type EventRegistry = HandlerRegistry<Chain>;

impl EventHandlers for HandlerRegistry<Chain> {
    fn remove(&self, id: &str) {
        self.unregister(id);
    }
}

#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

struct FrameInner {
    effects: Arc<EffectRegistry>,
    events: Arc<EventRegistry>,
    db: Arc<AppDb>,
    scheduler: Arc<dyn Scheduler>,
    diagnostics: Arc<dyn Diagnostics>,
    queue: Mutex<VecDeque<Event>>,
    draining: AtomicBool,
}

impl Frame {
    pub fn builder(scheduler: impl Scheduler + 'static) -> FrameBuilder {
        FrameBuilder::new(Arc::new(scheduler))
    }

    // -- registration --

    /// Register a handler computing the next state from `(db, event)`.
    pub fn reg_event_db<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(&Payload, &Event) -> Payload + Send + Sync + 'static,
    {
        self.reg_event_chain(id, Chain::default().push(db_handler(handler)));
    }

    /// Register a handler computing an effect map from `(coeffects, event)`.
    pub fn reg_event_fx<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(&CoEffects, &Event) -> EffectMap + Send + Sync + 'static,
    {
        self.reg_event_chain(id, Chain::default().push(fx_handler(handler)));
    }

    /// Register a full interceptor chain. `do-fx` is prepended at processing
    /// time unless the chain already carries an interceptor with its id.
    pub fn reg_event_chain(&self, id: impl Into<String>, chain: Chain) {
        self.inner.events.register(id, Arc::new(chain));
    }

    pub fn clear_event(&self, id: &str) {
        self.inner.events.unregister(id);
    }

    pub fn reg_fx<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Payload, &FxDeps) -> Result<(), EffectError> + Send + Sync + 'static,
    {
        self.inner.effects.register_fn(kind, handler);
    }

    pub fn clear_fx(&self, kind: &str) {
        self.inner.effects.unregister(kind);
    }

    // -- accessors --

    pub fn effects(&self) -> &Arc<EffectRegistry> {
        &self.inner.effects
    }

    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.inner.events
    }

    pub fn db(&self) -> &Arc<AppDb> {
        &self.inner.db
    }

    /// Events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue().len()
    }

    /// The capabilities handed to effect handlers for this frame.
    pub fn fx_deps(&self) -> FxDeps {
        FxDeps {
            dispatcher: Arc::new(self.clone()),
            scheduler: self.inner.scheduler.clone(),
            db: self.inner.db.clone(),
            event_handlers: self.inner.events.clone(),
            diagnostics: self.inner.diagnostics.clone(),
            effects: self.inner.effects.clone(),
        }
    }

    // -- processing --

    /// Queue `event`. The outermost caller drains the queue before
    /// returning; nested callers return immediately.
    ///
    /// A handler failure purges the rest of the queue and is returned to the
    /// caller that was draining.
    pub fn dispatch(&self, event: Event) -> Result<(), CascadeError> {
        self.queue().push_back(event);
        self.drain()
    }

    /// Process `event` now, outside the queue.
    pub fn dispatch_sync(&self, event: Event) -> Result<(), CascadeError> {
        self.process(event)
    }

    fn drain(&self) -> Result<(), CascadeError> {
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Ok(());
            }
            let result = {
                let _guard = DrainGuard(self);
                self.drain_owned()
            };
            // An event may have been queued between the last pop (or the purge
            // after a failure) and the release. Drain it before reporting.
            if self.queue().is_empty() {
                return result;
            }
            if let Err(err) = result {
                if let Err(next) = self.drain() {
                    error!(error = %next, "Event processing failed after an earlier failure");
                }
                return Err(err);
            }
        }
    }

    fn drain_owned(&self) -> Result<(), CascadeError> {
        while let Some(event) = self.next_event() {
            let id = event.id().to_string();
            if let Err(err) = self.process(event) {
                let dropped = self.purge();
                error!(event = id.as_str(), dropped, error = %err, "Event processing failed; queue purged");
                return Err(err);
            }
        }
        Ok(())
    }

    fn process(&self, event: Event) -> Result<(), CascadeError> {
        let Some(chain) = self.inner.events.get(event.id()) else {
            self.inner.diagnostics.report(&Diagnostic::MissingEventHandler {
                id: event.id().to_string(),
            });
            return Ok(());
        };
        debug!(event = %event, "Processing event");

        let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(chain.len() + 1);
        if !chain.contains(DoFx::ID) {
            interceptors.push(Arc::new(DoFx::new(self.fx_deps())));
        }
        interceptors.extend(chain.interceptors().iter().cloned());

        interceptor::execute(event, self.inner.db.read(), &interceptors).map(|_| ())
    }

    fn next_event(&self) -> Option<Event> {
        self.queue().pop_front()
    }

    fn purge(&self) -> usize {
        let mut queue = self.queue();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Dispatch for Frame {
    fn dispatch(&self, event: Event) {
        // Failures are logged by the drain loop; nothing to hand back to a timer.
        let _ = Frame::dispatch(self, event);
    }
}

/// Releases the drain flag, and drops queued events if a handler panicked.
struct DrainGuard<'a>(&'a Frame);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.purge();
        }
        self.0.inner.draining.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// FrameBuilder
// ---------------------------------------------------------------------------

pub struct FrameBuilder {
    scheduler: Arc<dyn Scheduler>,
    diagnostics: Arc<dyn Diagnostics>,
    db: Option<AppDb>,
    warn_on_overwrite: bool,
    builtins: bool,
}

impl FrameBuilder {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            diagnostics: Arc::new(TracingDiagnostics),
            db: None,
            warn_on_overwrite: false,
            builtins: true,
        }
    }

    pub fn config(mut self, config: &Config) -> Self {
        self.warn_on_overwrite = config.warn_on_overwrite;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn initial_db(mut self, db: Value) -> Self {
        self.db = Some(AppDb::new(db));
        self
    }

    /// Start with an empty effect registry instead of the built-ins.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn build(self) -> Frame {
        let effects = if self.builtins {
            EffectRegistry::with_builtins()
        } else {
            EffectRegistry::empty()
        }
        .with_overwrite_warnings(self.warn_on_overwrite);
        let events = EventRegistry::new("event").with_overwrite_warnings(self.warn_on_overwrite);

        Frame {
            inner: Arc::new(FrameInner {
                effects: Arc::new(effects),
                events: Arc::new(events),
                db: Arc::new(self.db.unwrap_or_default()),
                scheduler: self.scheduler,
                diagnostics: self.diagnostics,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::memory::MemoryDiagnostics;
    use crate::scheduler::ManualScheduler;

    fn frame() -> (Frame, Arc<MemoryDiagnostics>) {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let frame = Frame::builder(ManualScheduler::new())
            .diagnostics(diagnostics.clone())
            .initial_db(json!({"n": 0}))
            .build();
        (frame, diagnostics)
    }

    fn inc() -> impl Fn(&Payload, &Event) -> Payload + Send + Sync + 'static {
        |db, _| Arc::new(json!({"n": db["n"].as_i64().unwrap_or(0) + 1}))
    }

    #[test]
    fn dispatch_runs_handler_and_applies_db() {
        let (frame, _) = frame();
        frame.reg_event_db("inc", inc());

        frame.dispatch(Event::new("inc")).unwrap();

        assert_eq!(*frame.db().snapshot(), json!({"n": 1}));
    }

    #[test]
    fn nested_dispatch_is_queued_until_current_event_finishes() {
        let (frame, _) = frame();
        frame.reg_event_db("inc", inc());
        frame.reg_event_fx("twice", |cofx, _| {
            EffectMap::new()
                .with("dispatch-n", json!([["inc"], ["inc"]]))
                .with_db(Arc::new(json!({"n": cofx.db["n"].as_i64().unwrap_or(0) + 10})))
        });

        frame.dispatch(Event::new("twice")).unwrap();

        assert_eq!(*frame.db().snapshot(), json!({"n": 12}));
        assert_eq!(frame.queued(), 0);
    }

    #[test]
    fn unknown_event_is_reported_not_raised() {
        let (frame, diagnostics) = frame();
        frame.dispatch(Event::new("ghost")).unwrap();
        assert_eq!(
            diagnostics.reports(),
            vec![Diagnostic::MissingEventHandler { id: "ghost".into() }]
        );
    }

    #[test]
    fn handler_failure_purges_queue_and_surfaces() {
        let (frame, _) = frame();
        frame.reg_fx("explode", |_, _| Err(EffectError::Failed(anyhow::anyhow!("boom"))));
        frame.reg_event_db("inc", inc());
        frame.reg_event_fx("bad", |_, _| {
            EffectMap::new()
                .with("dispatch", json!(["inc"]))
                .with("explode", true)
        });

        let err = frame.dispatch(Event::new("bad")).unwrap_err();

        assert!(matches!(err, CascadeError::EffectFailed { ref kind, .. } if kind == "explode"));
        assert_eq!(frame.queued(), 0);
        assert_eq!(*frame.db().snapshot(), json!({"n": 0}));

        // The frame keeps working afterwards.
        frame.dispatch(Event::new("inc")).unwrap();
        assert_eq!(*frame.db().snapshot(), json!({"n": 1}));
    }

    #[test]
    fn chain_with_its_own_do_fx_is_not_doubled() {
        let (frame, _) = frame();
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        frame.reg_fx("count", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let chain = Chain::default()
            .push(DoFx::new(frame.fx_deps()))
            .push(fx_handler(|_, _| EffectMap::new().with("count", 1)));
        frame.reg_event_chain("once", chain);

        frame.dispatch(Event::new("once")).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deregister_effect_removes_event_handler() {
        let (frame, diagnostics) = frame();
        frame.reg_event_db("inc", inc());
        frame.reg_event_fx("retire", |_, _| {
            EffectMap::new().with("deregister-event-handler", json!(["inc", "never-registered"]))
        });

        frame.dispatch(Event::new("retire")).unwrap();
        frame.dispatch(Event::new("inc")).unwrap();

        assert!(!frame.events().contains("inc"));
        assert_eq!(*frame.db().snapshot(), json!({"n": 0}));
        assert_eq!(
            diagnostics.reports(),
            vec![Diagnostic::MissingEventHandler { id: "inc".into() }]
        );
    }

    #[test]
    fn builder_config_reaches_both_registries() {
        let config = Config {
            warn_on_overwrite: true,
            ..Config::default()
        };
        let frame = Frame::builder(ManualScheduler::new()).config(&config).build();
        assert!(frame.effects().warns_on_overwrite());
        assert!(frame.events().warns_on_overwrite());

        let (quiet, _) = self::frame();
        assert!(!quiet.effects().warns_on_overwrite());
        assert!(!quiet.events().warns_on_overwrite());
    }

    /// Dispatches `inc` onto the frame the first time an error is logged,
    /// standing in for a timer firing while the failed drain still holds the
    /// flag.
    struct DispatchOnError {
        frame: Frame,
        fired: AtomicBool,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for DispatchOnError {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                Frame::dispatch(&self.frame, Event::new("inc")).unwrap();
            }
        }
    }

    #[test]
    fn event_queued_during_failed_drain_is_still_processed() {
        use tracing_subscriber::layer::SubscriberExt;

        let (frame, _) = frame();
        frame.reg_event_db("inc", inc());
        frame.reg_fx("explode", |_, _| Err(EffectError::Failed(anyhow::anyhow!("boom"))));
        frame.reg_event_fx("bad", |_, _| EffectMap::new().with("explode", true));

        let subscriber = tracing_subscriber::registry().with(DispatchOnError {
            frame: frame.clone(),
            fired: AtomicBool::new(false),
        });
        let result = tracing::subscriber::with_default(subscriber, || {
            frame.dispatch(Event::new("bad"))
        });

        assert!(matches!(result, Err(CascadeError::EffectFailed { ref kind, .. }) if kind == "explode"));
        assert_eq!(frame.queued(), 0);
        assert_eq!(*frame.db().snapshot(), json!({"n": 1}));
    }
}
