//! Counter demo: batched, delayed and self-deregistering events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cascade_common::Config;
use cascade_engine::{kinds, EffectMap, Event, Frame, Payload, TokioScheduler};

const TICK_MS: u64 = 100;

fn count(db: &Payload, key: &str) -> i64 {
    db[key].as_i64().unwrap_or(0)
}

fn register(frame: &Frame, target: u32) {
    frame.reg_event_db("increment", |db, event| {
        let by = event.arg(0).and_then(|v| v.as_i64()).unwrap_or(1);
        Arc::new(json!({"count": count(db, "count") + by, "ticks": count(db, "ticks")}))
    });

    frame.reg_event_db("reset", |db, _| {
        if count(db, "count") == 0 {
            db.clone()
        } else {
            Arc::new(json!({"count": 0, "ticks": count(db, "ticks")}))
        }
    });

    // The last expected tick retires its own handler; the extra tick that
    // follows is reported as unhandled.
    frame.reg_event_fx("tick", move |cofx, _| {
        let ticks = count(&cofx.db, "ticks") + 1;
        let effects = EffectMap::new().with(
            kinds::DB,
            json!({"count": count(&cofx.db, "count"), "ticks": ticks}),
        );
        if ticks >= i64::from(target) {
            effects.with(kinds::DEREGISTER_EVENT_HANDLER, "tick")
        } else {
            effects
        }
    });

    frame.reg_event_fx("start", move |_, _| {
        let later: Vec<_> = (1..=u64::from(target) + 1)
            .map(|i| json!({"ms": i * TICK_MS, "dispatch": ["tick"]}))
            .collect();
        EffectMap::new()
            .with(kinds::DISPATCH_N, json!([["increment"], null, ["increment", 5]]))
            .with(kinds::DISPATCH_LATER, later)
            .with("log", "counter started")
    });

    frame.reg_fx("log", |payload, _| {
        info!(message = %payload, "log effect");
        Ok(())
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_filter.parse()?))
        .init();

    info!("Cascade demo starting...");
    config.log_summary();

    let frame = Frame::builder(TokioScheduler::new()?)
        .config(&config)
        .initial_db(json!({"count": 0, "ticks": 0}))
        .build();
    register(&frame, config.demo_ticks);

    frame.dispatch(Event::new("start"))?;
    info!(db = %frame.db().snapshot(), "After start");

    let wait = Duration::from_millis(TICK_MS * (u64::from(config.demo_ticks) + 2));
    tokio::time::sleep(wait).await;

    frame.dispatch(Event::new("reset"))?;
    info!(
        db = %frame.db().snapshot(),
        writes = frame.db().version(),
        tick_registered = frame.events().contains("tick"),
        "Final state"
    );
    println!("{}", frame.db().snapshot());

    Ok(())
}
