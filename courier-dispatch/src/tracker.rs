//! Completion tracking between the generator and the workers.
//!
//! The tracker counts messages that have been handed to the channel but not
//! yet settled by a worker. [`CompletionTracker::wait`] only returns once
//! the generator has declared production finished *and* that count is back
//! to zero, which is the one moment the channel can be closed safely.

use std::sync::Arc;

use tokio::sync::watch;

/// Counters behind a [`CompletionTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    /// Messages added but not yet settled
    pub in_flight: usize,
    /// Whether the generator may still add messages
    pub producing: bool,
    /// Total messages added
    pub enqueued: usize,
    /// Total messages settled, sent or abandoned
    pub settled: usize,
}

impl TrackerSnapshot {
    const fn is_complete(&self) -> bool {
        !self.producing && self.in_flight == 0
    }
}

/// A wait-group shared by the generator, the workers and the driver.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    state: Arc<watch::Sender<TrackerSnapshot>>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TrackerSnapshot {
            in_flight: 0,
            producing: true,
            enqueued: 0,
            settled: 0,
        });

        Self {
            state: Arc::new(state),
        }
    }

    /// Record a message about to be enqueued.
    pub fn add(&self) {
        self.state.send_modify(|state| {
            state.in_flight += 1;
            state.enqueued += 1;
        });
    }

    /// Record a message leaving the pool, delivered or not.
    pub fn done(&self) {
        self.state.send_modify(|state| {
            debug_assert!(state.in_flight > 0, "done() called without add()");
            state.in_flight = state.in_flight.saturating_sub(1);
            state.settled += 1;
        });
    }

    /// Declare that no further messages will be added.
    pub fn finish_production(&self) {
        self.state.send_modify(|state| state.producing = false);
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        *self.state.borrow()
    }

    /// Wait until production has finished and every message has settled.
    pub async fn wait(&self) -> TrackerSnapshot {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so this can't observe a closed channel
        receiver
            .wait_for(TrackerSnapshot::is_complete)
            .await
            .map_or_else(|_| self.snapshot(), |state| *state)
    }
}
