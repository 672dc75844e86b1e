//! Scheduler implementations.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use cascade_common::CascadeError;
use tokio::runtime::Handle;

use crate::traits::{Scheduler, Thunk};

// ---------------------------------------------------------------------------
// TokioScheduler (production)
// ---------------------------------------------------------------------------

/// Runs each thunk on a tokio task after sleeping for the delay.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Bind to the runtime the caller is running on.
    pub fn new() -> Result<Self, CascadeError> {
        let handle = Handle::try_current()
            .map_err(|e| CascadeError::Scheduler(format!("no tokio runtime available: {e}")))?;
        Ok(Self { handle })
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, thunk: Thunk) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            thunk();
        });
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

/// Virtual clock. Nothing fires until [`ManualScheduler::advance`] moves time
/// past a timer's due point.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<Clock>,
}

#[derive(Default)]
struct Clock {
    now: Duration,
    next_seq: u64,
    timers: Vec<Timer>,
}

struct Timer {
    due: Duration,
    seq: u64,
    thunk: Thunk,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Timers scheduled but not yet fired.
    pub fn pending(&self) -> usize {
        self.lock().timers.len()
    }

    /// Move the clock forward, firing due timers in expiry order (ties in
    /// scheduling order). Timers scheduled by a firing thunk also fire if
    /// they fall due within the window. Returns how many fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now.saturating_add(by);
        let mut fired = 0;
        while let Some(thunk) = self.pop_due(target) {
            thunk();
            fired += 1;
        }
        self.lock().now = target;
        fired
    }

    fn pop_due(&self, target: Duration) -> Option<Thunk> {
        let mut clock = self.lock();
        let index = clock
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        let timer = clock.timers.swap_remove(index);
        clock.now = timer.due;
        Some(timer.thunk)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, thunk: Thunk) {
        let mut clock = self.lock();
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now.saturating_add(delay);
        clock.timers.push(Timer { due, seq, thunk });
    }
}
