//! Single-flight flush scheduling.
//!
//! The scheduler only decides; the client owns the timers. At most one timer
//! is armed and at most one round runs at any time. A request that arrives
//! during a round is parked and armed when the round ends.

use serde::Serialize;
use std::time::Duration;

/// Where the scheduler currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushState {
    /// No timer armed
    #[default]
    Idle,
    /// One timer pending
    Armed,
    /// A send round is in progress
    Flushing,
}

#[derive(Debug, Default)]
pub struct FlushScheduler {
    state: FlushState,
    parked: Option<Duration>,
    timers_armed: u64,
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Total timers armed since creation.
    pub fn timers_armed(&self) -> u64 {
        self.timers_armed
    }

    /// Ask for a flush after `after`.
    ///
    /// Returns the delay to arm a timer with, or `None` when one is already
    /// pending or a round is running.
    pub fn request(&mut self, after: Duration) -> Option<Duration> {
        match self.state {
            FlushState::Idle => {
                self.state = FlushState::Armed;
                self.timers_armed += 1;
                Some(after)
            }
            FlushState::Armed => None,
            FlushState::Flushing => {
                self.parked.get_or_insert(after);
                None
            }
        }
    }

    /// The armed timer fired. False if nothing was armed.
    pub fn begin_round(&mut self) -> bool {
        if self.state != FlushState::Armed {
            return false;
        }
        self.state = FlushState::Flushing;
        true
    }

    /// The round is over; returns a request parked while it ran.
    pub fn finish_round(&mut self) -> Option<Duration> {
        self.state = FlushState::Idle;
        self.parked.take()
    }
}
