use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use super::{DeviceStream, StreamError};

#[derive(Debug, Default, Clone)]
enum EventState {
    #[default]
    Pending,
    Signaled(Instant),
    Poisoned(StreamError),
}

#[derive(Debug, Default)]
struct EventInner {
    state: Mutex<EventState>,
    cond: Condvar,
}

/// A one-shot barrier carried between streams.
///
/// The state machine is `pending → signaled`: once signaled, waits return
/// immediately and idempotently. Recording an already-signaled event resets
/// it to pending first. An event recorded on a failed stream is poisoned so
/// that waiters surface the original failure instead of timing out.
#[derive(Debug, Default, Clone)]
pub struct StreamEvent(Arc<EventInner>);

impl StreamEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the signal closure has run.
    pub fn occurred(&self) -> bool {
        matches!(*self.0.state.lock(), EventState::Signaled(_))
    }

    /// The instant the event signaled, if it has.
    pub fn recorded_time(&self) -> Option<Instant> {
        match *self.0.state.lock() {
            EventState::Signaled(time) => Some(time),
            _ => None,
        }
    }

    /// Interval between this event's signal time and another's. `None`
    /// unless both have signaled.
    pub fn elapsed_since(&self, other: &StreamEvent) -> Option<Duration> {
        let this = self.recorded_time()?;
        let that = other.recorded_time()?;
        Some(this.saturating_duration_since(that))
    }

    /// Appends a signal closure to `stream`; resets the event first so a
    /// signaled event can be legally re-recorded.
    pub fn record_on(&self, stream: &DeviceStream) -> StreamEvent {
        stream.record(self.clone())
    }

    /// Blocks until signaled. `None` waits forever; exceeding a deadline
    /// fails with [`StreamError::TimedOut`]. Waiting on an event that has
    /// never been recorded blocks until it is recorded elsewhere or the
    /// deadline passes.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), StreamError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.0.state.lock();
        loop {
            match &*state {
                EventState::Signaled(_) => return Ok(()),
                EventState::Poisoned(err) => return Err(err.clone()),
                EventState::Pending => match deadline {
                    None => self.0.cond.wait(&mut state),
                    Some(deadline) => {
                        if self.0.cond.wait_until(&mut state, deadline).timed_out() {
                            // a signal racing the deadline still wins
                            if matches!(*state, EventState::Pending) {
                                return Err(StreamError::TimedOut(
                                    timeout.unwrap_or_default(),
                                ));
                            }
                        }
                    }
                },
            }
        }
    }

    pub(crate) fn signal(&self) {
        let mut state = self.0.state.lock();
        if matches!(*state, EventState::Pending) {
            *state = EventState::Signaled(Instant::now());
        }
        self.0.cond.notify_all();
    }

    pub(crate) fn poison(&self, err: StreamError) {
        let mut state = self.0.state.lock();
        if matches!(*state, EventState::Pending) {
            *state = EventState::Poisoned(err);
        }
        self.0.cond.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.0.state.lock() = EventState::Pending;
    }
}
