//! Compaction quiescence barrier.
//!
//! Engines compact asynchronously and expose no "wait until idle" call. The
//! barrier combines the two signals that are available: a completion
//! notification from the engine's own threads, and the engine's live
//! compaction counters. Counters decide; notifications only cut a wait short.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::error::StoreError;
use crate::store::{CompactionObserver, IntProperty, Store};

/// Default bound on a single wait between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Shared state written by the engine's compaction callback and waited on by
/// the foreground thread. One instance per run.
#[derive(Default)]
pub struct QuiescenceState {
    completions: Mutex<u64>,
    signal: Condvar,
}

impl QuiescenceState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a finished compaction and wake the waiter.
    pub fn notify_compaction_completed(&self) {
        let mut completions = self.completions.lock();
        *completions += 1;
        self.signal.notify_all();
    }

    /// One-shot flag: at least one completion has been observed. Never reset.
    pub fn compaction_complete(&self) -> bool {
        *self.completions.lock() > 0
    }

    pub fn completions(&self) -> u64 {
        *self.completions.lock()
    }

    /// Observer to hand to [`Store::register_compaction_observer`].
    pub fn observer(self: &Arc<Self>) -> CompactionObserver {
        let state = Arc::clone(self);
        Arc::new(move || state.notify_compaction_completed())
    }

    /// Block until a completion newer than `seen` arrives or `timeout`
    /// elapses. Returns the completion count on wakeup.
    fn wait_for_completion(&self, seen: u64, timeout: Duration) -> u64 {
        let mut completions = self.completions.lock();
        if *completions == seen {
            let _ = self
                .signal
                .wait_while_for(&mut completions, |c| *c == seen, timeout);
        }
        *completions
    }
}

/// What the barrier saw before the store went idle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BarrierOutcome {
    /// Number of counter polls, including the final idle one.
    pub polls: u32,
    /// Completion notifications received during the whole run.
    pub notifications: u64,
    pub waited: Duration,
}

/// Observer-plus-poll barrier bound to one store for one run.
pub struct CompactionBarrier {
    state: Arc<QuiescenceState>,
}

impl CompactionBarrier {
    /// Create fresh state and register its observer with `store`.
    pub fn attach<S: Store>(store: &S) -> Self {
        let state = QuiescenceState::new();
        store.register_compaction_observer(state.observer());
        Self { state }
    }

    pub fn state(&self) -> &Arc<QuiescenceState> {
        &self.state
    }

    /// Block until the store reports no running compactions, no pending
    /// compaction bytes and no pending compactions.
    ///
    /// Each round polls the three counters and returns the moment all read
    /// zero. Otherwise it waits up to `poll_interval` for a completion
    /// notification and polls again. A store that never compacts returns on
    /// the first poll without blocking.
    pub fn wait_until_idle<S: Store>(
        &self,
        store: &S,
        poll_interval: Duration,
    ) -> Result<BarrierOutcome, StoreError> {
        let started = Instant::now();
        let mut polls = 0u32;
        let mut seen = self.state.completions();
        loop {
            polls += 1;
            let running = store.int_property(IntProperty::RunningCompactions)?;
            let pending_bytes = store.int_property(IntProperty::PendingCompactionBytes)?;
            let pending = store.int_property(IntProperty::PendingCompactionCount)?;
            if running == 0 && pending_bytes == 0 && pending == 0 {
                break;
            }
            tracing::debug!(
                running,
                pending_bytes,
                pending,
                poll = polls,
                "waiting for background compaction"
            );
            seen = self.state.wait_for_completion(seen, poll_interval);
        }
        let outcome = BarrierOutcome {
            polls,
            notifications: self.state.completions(),
            waited: started.elapsed(),
        };
        tracing::info!(
            polls = outcome.polls,
            notifications = outcome.notifications,
            waited_ms = outcome.waited.as_millis() as u64,
            "store is quiescent"
        );
        Ok(outcome)
    }
}
