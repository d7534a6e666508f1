//! Completion events
//!
//! An [`Event`] leaves the pending state exactly once, either signaled or
//! failed. Any number of threads may wait on it and every waiter wakes on
//! either outcome. Only a signaled event means the work's output is ready:
//! a failed one carries the [`EventFailure`] that stopped it. Waits never
//! time out.

use crate::error::{Result, RuntimeError};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Who is responsible for signaling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Signaled by whoever created it, through [`Event::set`]
    User,
    /// Signaled by a stream once the enqueued work completes
    Queued,
}

/// Why an event completed without its work succeeding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    /// Whoever's work failed, usually an operator instance id
    pub owner: String,
    pub reason: String,
}

impl EventFailure {
    pub fn new(owner: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for EventFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.owner, self.reason)
    }
}

enum State {
    Pending,
    Signaled(Instant),
    Failed(EventFailure),
}

struct EventInner {
    id: u64,
    kind: EventKind,
    created_at: Instant,
    state: Mutex<State>,
    cond: Condvar,
}

/// Shared handle to an asynchronous completion signal
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(kind: EventKind, signaled: bool) -> Self {
        let now = Instant::now();
        let state = if signaled { State::Signaled(now) } else { State::Pending };
        Self {
            inner: Arc::new(EventInner {
                id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                created_at: now,
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> EventKind {
        self.inner.kind
    }

    /// Signaled successfully
    pub fn is_set(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Signaled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Failed(_))
    }

    /// No longer pending, whatever the outcome
    pub fn is_complete(&self) -> bool {
        !matches!(*self.inner.state.lock(), State::Pending)
    }

    pub fn failure(&self) -> Option<EventFailure> {
        match &*self.inner.state.lock() {
            State::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Block the calling thread until the event leaves the pending state
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while matches!(*state, State::Pending) {
            self.inner.cond.wait(&mut state);
        }
    }

    /// Wait, then report a failed event as an error
    pub fn wait_checked(&self) -> Result<()> {
        self.wait();
        match self.failure() {
            Some(failure) => Err(RuntimeError::EventFailed {
                event: self.id(),
                owner: failure.owner,
                reason: failure.reason,
            }),
            None => Ok(()),
        }
    }

    /// Wait on every event in order
    pub fn wait_all(events: &[Event]) {
        for event in events {
            event.wait();
        }
    }

    /// Wait on every event, then return the first failure in order
    pub fn wait_all_checked(events: &[Event]) -> Result<()> {
        Event::wait_all(events);
        events.iter().try_for_each(Event::wait_checked)
    }

    /// Signal a user event. Signaling twice is a usage error.
    pub fn set(&self) {
        debug_assert_eq!(
            self.inner.kind,
            EventKind::User,
            "event {} is signaled by its stream, not by the caller",
            self.inner.id
        );
        self.signal();
    }

    /// Complete a user event as failed; waiters wake but the output is not ready
    pub fn set_failed(&self, failure: EventFailure) {
        debug_assert_eq!(
            self.inner.kind,
            EventKind::User,
            "event {} is completed by its stream, not by the caller",
            self.inner.id
        );
        self.fail(failure);
    }

    pub(crate) fn signal(&self) {
        self.complete(State::Signaled(Instant::now()));
    }

    pub(crate) fn fail(&self, failure: EventFailure) {
        self.complete(State::Failed(failure));
    }

    fn complete(&self, outcome: State) {
        let mut state = self.inner.state.lock();
        debug_assert!(matches!(*state, State::Pending), "event {} signaled twice", self.inner.id);
        if matches!(*state, State::Pending) {
            *state = outcome;
            self.inner.cond.notify_all();
        }
    }

    /// Instant the event was signaled, if it completed successfully
    pub fn signaled_at(&self) -> Option<Instant> {
        match *self.inner.state.lock() {
            State::Signaled(at) => Some(at),
            _ => None,
        }
    }

    /// Time between creation and signaling
    pub fn elapsed_since_created(&self) -> Option<Duration> {
        self.signaled_at().map(|at| at.duration_since(self.inner.created_at))
    }

    /// Whether two handles refer to the same event
    pub fn same_as(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending => "pending",
            State::Signaled(_) => "signaled",
            State::Failed(_) => "failed",
        };
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &state)
            .finish()
    }
}
