//! Built-in effect handlers.
//!
//! Malformed payloads come back as [`EffectError::Malformed`] and are reported
//! by the caller. For collection payloads, a bad element is reported here and
//! skipped so its siblings still run.

use std::sync::Arc;
use std::time::Duration;

use cascade_common::{describe, Event, Payload};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{kinds, EffectError, EffectRegistry, FxDeps};
use crate::diagnostics::Diagnostic;

/// Register every built-in handler into `registry`.
pub fn install(registry: &EffectRegistry) {
    registry.register_fn(kinds::DB, db);
    registry.register_fn(kinds::DISPATCH, dispatch);
    registry.register_fn(kinds::DISPATCH_N, dispatch_n);
    registry.register_fn(kinds::DISPATCH_LATER, dispatch_later);
    registry.register_fn(kinds::DEREGISTER_EVENT_HANDLER, deregister_event_handler);
    registry.register_fn(kinds::FX, fx);
}

// ---------------------------------------------------------------------------
// db
// ---------------------------------------------------------------------------

/// Replace the state snapshot, unless the payload already is the snapshot.
pub fn db(payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
    if !Arc::ptr_eq(&deps.db.read(), payload) {
        deps.db.write(payload.clone());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// dispatch / dispatch-n
// ---------------------------------------------------------------------------

pub fn dispatch(payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
    let event = Event::from_value(payload).map_err(|e| EffectError::malformed(e.to_string()))?;
    deps.dispatcher.dispatch(event);
    Ok(())
}

/// Dispatch each event in order. `null` and `[]` entries are no-ops.
pub fn dispatch_n(payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
    let Value::Array(items) = &**payload else {
        return Err(EffectError::malformed(format!(
            "expected an array of event vectors, got {}",
            describe(payload)
        )));
    };

    for (index, item) in items.iter().enumerate() {
        if is_absent(item) {
            continue;
        }
        match Event::from_value(item) {
            Ok(event) => deps.dispatcher.dispatch(event),
            Err(e) => deps.diagnostics.report(&Diagnostic::malformed(
                kinds::DISPATCH_N,
                format!("entry {index}: {e}"),
            )),
        }
    }
    Ok(())
}

fn is_absent(item: &Value) -> bool {
    match item {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// dispatch-later
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Later {
    ms: f64,
    dispatch: Event,
}

impl Later {
    fn parse(value: &Value) -> Result<(Duration, Event), String> {
        let later = Later::deserialize(value).map_err(|e| e.to_string())?;
        let delay = Duration::try_from_secs_f64(later.ms / 1000.0)
            .map_err(|_| {
                format!(
                    "\"ms\" must be a non-negative number within the timer range, got {}",
                    later.ms
                )
            })?;
        Ok((delay, later.dispatch))
    }
}

/// Schedule dispatches of `{"ms": delay, "dispatch": event}` descriptors.
/// A single descriptor object is accepted in place of an array.
pub fn dispatch_later(payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
    let descriptors: &[Value] = match &**payload {
        Value::Array(items) => items.as_slice(),
        single @ Value::Object(_) => std::slice::from_ref(single),
        other => {
            return Err(EffectError::malformed(format!(
                "expected an array of {{\"ms\", \"dispatch\"}} objects, got {}",
                describe(other)
            )));
        }
    };

    for (index, descriptor) in descriptors.iter().enumerate() {
        if descriptor.is_null() {
            continue;
        }
        match Later::parse(descriptor) {
            Ok((delay, event)) => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(delay_ms, event = %event, "Scheduling dispatch");
                let dispatcher = deps.dispatcher.clone();
                deps.scheduler
                    .after(delay, Box::new(move || dispatcher.dispatch(event)));
            }
            Err(reason) => deps.diagnostics.report(&Diagnostic::malformed(
                kinds::DISPATCH_LATER,
                format!("entry {index}: {reason}"),
            )),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// deregister-event-handler
// ---------------------------------------------------------------------------

/// Remove one transition handler, or each handler in an array of ids.
pub fn deregister_event_handler(payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
    match &**payload {
        Value::String(id) => deps.event_handlers.remove(id),
        Value::Array(ids) => {
            for (index, id) in ids.iter().enumerate() {
                match id {
                    Value::String(id) => deps.event_handlers.remove(id),
                    other => deps.diagnostics.report(&Diagnostic::malformed(
                        kinds::DEREGISTER_EVENT_HANDLER,
                        format!("entry {index}: expected a handler id, got {}", describe(other)),
                    )),
                }
            }
        }
        other => {
            return Err(EffectError::malformed(format!(
                "expected a handler id or an array of ids, got {}",
                describe(other)
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// fx
// ---------------------------------------------------------------------------

/// Run `[kind, payload]` pairs strictly in order.
pub fn fx(payload: &Payload, deps: &FxDeps) -> Result<(), EffectError> {
    let Value::Array(pairs) = &**payload else {
        return Err(EffectError::malformed(format!(
            "expected an array of [kind, payload] pairs, got {}",
            describe(payload)
        )));
    };

    for (index, pair) in pairs.iter().enumerate() {
        if pair.is_null() {
            continue;
        }
        let Some([Value::String(kind), value]) = pair.as_array().map(Vec::as_slice) else {
            deps.diagnostics.report(&Diagnostic::malformed(
                kinds::FX,
                format!("entry {index}: expected a [kind, payload] pair"),
            ));
            continue;
        };

        if kind == kinds::DB {
            deps.diagnostics.report(&Diagnostic::DbInsideFx);
        }

        let Some(handler) = deps.effects.get(kind) else {
            deps.diagnostics.report(&Diagnostic::MissingEffectHandler {
                kind: kind.as_str().into(),
                location: "fx",
            });
            continue;
        };

        match handler.handle(&Arc::new(value.clone()), deps) {
            Ok(()) => {}
            Err(EffectError::Malformed(reason)) => {
                deps.diagnostics.report(&Diagnostic::malformed(kind, reason));
            }
            Err(EffectError::Failed(source)) => {
                return Err(EffectError::Failed(
                    source.context(format!("\"{kind}\" effect inside \"fx\"")),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::memory::MemoryFx;

    fn run(fx: &MemoryFx, kind: &str, payload: Value) -> Result<(), EffectError> {
        let handler = fx.effects.require(kind).unwrap();
        handler.handle(&Arc::new(payload), &fx.deps())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // -- db --

    #[test]
    fn db_replaces_snapshot_with_new_value() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DB, json!({"count": 2})).unwrap();
        assert_eq!(*fx.db.snapshot(), json!({"count": 2}));
        assert_eq!(fx.db.version(), 1);
    }

    #[test]
    fn db_skips_write_for_identical_snapshot() {
        let fx = MemoryFx::new();
        let mut watcher = fx.db.subscribe();
        let current = fx.db.snapshot();

        db(&current, &fx.deps()).unwrap();

        assert_eq!(fx.db.version(), 0);
        assert!(!watcher.has_changed().unwrap());
    }

    #[test]
    fn db_writes_equal_but_distinct_snapshot() {
        let fx = MemoryFx::new();
        let mut watcher = fx.db.subscribe();
        let copy = Arc::new((*fx.db.snapshot()).clone());

        db(&copy, &fx.deps()).unwrap();

        assert!(watcher.has_changed().unwrap());
        assert!(Arc::ptr_eq(&fx.db.snapshot(), &copy));
    }

    // -- dispatch --

    #[test]
    fn dispatch_hands_event_to_dispatcher() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DISPATCH, json!(["event-id", "param"])).unwrap();
        assert_eq!(
            fx.dispatcher.events(),
            vec![Event::new("event-id").with_arg("param")]
        );
    }

    #[test]
    fn dispatch_rejects_non_vector() {
        let fx = MemoryFx::new();
        let err = run(&fx, kinds::DISPATCH, json!("event-id")).unwrap_err();
        assert!(matches!(err, EffectError::Malformed(_)));
        assert!(fx.dispatcher.events().is_empty());
    }

    // -- dispatch-n --

    #[test]
    fn dispatch_n_dispatches_in_order_and_skips_nil() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DISPATCH_N, json!([["a"], null, ["b"], []])).unwrap();
        assert_eq!(fx.dispatcher.events(), vec![Event::new("a"), Event::new("b")]);
        assert!(fx.diagnostics.reports().is_empty());
    }

    #[test]
    fn dispatch_n_rejects_non_collection() {
        let fx = MemoryFx::new();
        let err = run(&fx, kinds::DISPATCH_N, json!({"a": 1})).unwrap_err();
        assert!(matches!(err, EffectError::Malformed(_)));
        assert!(fx.dispatcher.events().is_empty());
    }

    #[test]
    fn dispatch_n_skips_bad_entry_but_keeps_siblings() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DISPATCH_N, json!([["a"], "oops", ["b"]])).unwrap();
        assert_eq!(fx.dispatcher.events(), vec![Event::new("a"), Event::new("b")]);
        assert_eq!(fx.diagnostics.reports().len(), 1);
    }

    // -- dispatch-later --

    #[test]
    fn dispatch_later_schedules_valid_and_reports_invalid() {
        let fx = MemoryFx::new();
        run(
            &fx,
            kinds::DISPATCH_LATER,
            json!([
                {"ms": 200, "dispatch": ["x"]},
                {"ms": "bad", "dispatch": ["y"]},
            ]),
        )
        .unwrap();

        assert_eq!(fx.scheduler.pending(), 1);
        let reports = fx.diagnostics.reports();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            &reports[0],
            Diagnostic::MalformedPayload { kind, .. } if kind.as_str() == kinds::DISPATCH_LATER
        ));

        fx.scheduler.advance(ms(199));
        assert!(fx.dispatcher.events().is_empty());

        fx.scheduler.advance(ms(1));
        assert_eq!(fx.dispatcher.events(), vec![Event::new("x")]);

        fx.scheduler.advance(ms(10_000));
        assert_eq!(fx.dispatcher.events(), vec![Event::new("x")]);
    }

    #[test]
    fn dispatch_later_orders_by_expiry_not_input() {
        let fx = MemoryFx::new();
        run(
            &fx,
            kinds::DISPATCH_LATER,
            json!([
                {"ms": 300, "dispatch": ["slow"]},
                {"ms": 100, "dispatch": ["fast"]},
            ]),
        )
        .unwrap();

        fx.scheduler.advance(ms(300));
        assert_eq!(
            fx.dispatcher.events(),
            vec![Event::new("fast"), Event::new("slow")]
        );
    }

    #[test]
    fn dispatch_later_rejects_empty_event_and_negative_delay() {
        let fx = MemoryFx::new();
        run(
            &fx,
            kinds::DISPATCH_LATER,
            json!([
                {"ms": 10, "dispatch": []},
                {"ms": -5, "dispatch": ["x"]},
                {"dispatch": ["x"]},
                null,
            ]),
        )
        .unwrap();

        assert_eq!(fx.scheduler.pending(), 0);
        assert_eq!(fx.diagnostics.reports().len(), 3);
    }

    #[test]
    fn dispatch_later_rejects_out_of_range_delay() {
        let fx = MemoryFx::new();
        run(
            &fx,
            kinds::DISPATCH_LATER,
            json!([{"ms": 1e300, "dispatch": ["x"]}, {"ms": 5, "dispatch": ["y"]}]),
        )
        .unwrap();

        assert_eq!(fx.scheduler.pending(), 1);
        let reports = fx.diagnostics.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].to_string().contains("within the timer range"));
    }

    #[test]
    fn dispatch_later_schedules_delay_beyond_u64_millis() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DISPATCH_LATER, json!({"ms": 1e22, "dispatch": ["far"]})).unwrap();

        assert_eq!(fx.scheduler.pending(), 1);
        assert!(fx.diagnostics.reports().is_empty());
        fx.scheduler.advance(Duration::from_secs(3600));
        assert!(fx.dispatcher.events().is_empty());
    }

    #[test]
    fn dispatch_later_accepts_single_descriptor() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DISPATCH_LATER, json!({"ms": 0, "dispatch": ["now"]})).unwrap();
        fx.scheduler.advance(Duration::ZERO);
        assert_eq!(fx.dispatcher.events(), vec![Event::new("now")]);
    }

    #[test]
    fn dispatch_later_rejects_scalar_payload() {
        let fx = MemoryFx::new();
        let err = run(&fx, kinds::DISPATCH_LATER, json!(200)).unwrap_err();
        assert!(matches!(err, EffectError::Malformed(_)));
        assert_eq!(fx.scheduler.pending(), 0);
    }

    // -- deregister-event-handler --

    #[test]
    fn deregister_single_id() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DEREGISTER_EVENT_HANDLER, json!("id1")).unwrap();
        assert_eq!(fx.event_handlers.removed(), vec!["id1".to_string()]);
    }

    #[test]
    fn deregister_many_ids() {
        let fx = MemoryFx::new();
        run(&fx, kinds::DEREGISTER_EVENT_HANDLER, json!(["id1", "id2"])).unwrap();
        assert_eq!(
            fx.event_handlers.removed(),
            vec!["id1".to_string(), "id2".to_string()]
        );
    }

    #[test]
    fn deregister_rejects_other_shapes() {
        let fx = MemoryFx::new();
        let err = run(&fx, kinds::DEREGISTER_EVENT_HANDLER, json!(7)).unwrap_err();
        assert!(matches!(err, EffectError::Malformed(_)));

        run(&fx, kinds::DEREGISTER_EVENT_HANDLER, json!(["id1", 3])).unwrap();
        assert_eq!(fx.event_handlers.removed(), vec!["id1".to_string()]);
        assert_eq!(fx.diagnostics.reports().len(), 1);
    }

    // -- fx --

    #[test]
    fn fx_runs_pairs_in_order() {
        let fx = MemoryFx::new();
        run(
            &fx,
            kinds::FX,
            json!([
                ["dispatch", ["first"]],
                null,
                ["dispatch-n", [["second"], ["third"]]],
            ]),
        )
        .unwrap();
        assert_eq!(
            fx.dispatcher.events(),
            vec![Event::new("first"), Event::new("second"), Event::new("third")]
        );
    }

    #[test]
    fn fx_reports_unknown_kind_and_bad_pairs() {
        let fx = MemoryFx::new();
        run(
            &fx,
            kinds::FX,
            json!([["nope", 1], "not-a-pair", ["dispatch", "not-an-event"], ["dispatch", ["ok"]]]),
        )
        .unwrap();

        assert_eq!(fx.dispatcher.events(), vec![Event::new("ok")]);
        let reports = fx.diagnostics.reports();
        assert_eq!(reports.len(), 3);
        assert!(matches!(
            &reports[0],
            Diagnostic::MissingEffectHandler { kind, location: "fx" } if kind.as_str() == "nope"
        ));
    }

    #[test]
    fn fx_warns_about_db_but_applies_it() {
        let fx = MemoryFx::new();
        run(&fx, kinds::FX, json!([["db", {"n": 1}]])).unwrap();
        assert_eq!(*fx.db.snapshot(), json!({"n": 1}));
        assert_eq!(fx.diagnostics.reports(), vec![Diagnostic::DbInsideFx]);
    }

    #[test]
    fn fx_propagates_handler_failure_and_stops() {
        let fx = MemoryFx::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        fx.effects.register_fn("count", move |_: &Payload, _: &FxDeps| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        fx.effects.register_fn("explode", |_: &Payload, _: &FxDeps| {
            Err(EffectError::Failed(anyhow::anyhow!("boom")))
        });

        let err = run(
            &fx,
            kinds::FX,
            json!([["count", null], ["explode", null], ["count", null]]),
        )
        .unwrap_err();

        assert!(matches!(err, EffectError::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fx_rejects_non_array() {
        let fx = MemoryFx::new();
        let err = run(&fx, kinds::FX, json!({"dispatch": ["x"]})).unwrap_err();
        assert!(matches!(err, EffectError::Malformed(_)));
    }
}
