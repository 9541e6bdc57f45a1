//! Virtual-time scheduler shared by every test dispatcher of one test context.
//!
//! The scheduler owns a virtual clock and a queue of pending work ordered by
//! `(scheduled time, submission sequence)`. Nothing runs until test code drains it with
//! [`TestScheduler::run_current`], [`TestScheduler::advance_time_by`] or
//! [`TestScheduler::advance_until_idle`].
//!
//! Drains are reentrant: a drain started from inside a unit of work that is itself being
//! drained runs the queue with the same rules and returns, after which the outer drain
//! continues with whatever is left.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::trace;

use crate::dispatcher::Runnable;
use crate::sync::lock;

struct ScheduledEvent {
    time: Duration,
    seq: u64,
    runnable: Runnable,
}

impl Eq for ScheduledEvent {}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest time first, then lowest sequence.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct State {
    now: Duration,
    next_seq: u64,
    queue: BinaryHeap<ScheduledEvent>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    activity: Condvar,
}

/// How far a drain may look ahead in virtual time.
#[derive(Clone, Copy)]
enum Horizon {
    Now,
    Until(Duration),
    Unbounded,
}

/// Shared logical clock plus pending-work queue.
///
/// Clones share the same clock; equality is identity.
#[derive(Clone, Default)]
pub struct TestScheduler {
    inner: Arc<Inner>,
}

impl TestScheduler {
    /// Create a scheduler at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, measured from the scheduler's creation.
    pub fn current_time(&self) -> Duration {
        lock(&self.inner.state).now
    }

    /// Number of queued units of work, ready or not.
    pub fn pending_tasks(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_idle(&self) -> bool {
        lock(&self.inner.state).queue.is_empty()
    }

    /// Queue `runnable` to run once virtual time reaches `now + delay`.
    pub fn register_event(&self, delay: Duration, runnable: Runnable) {
        {
            let mut state = lock(&self.inner.state);
            let time = state.now.saturating_add(delay);
            let seq = state.next_seq;
            state.next_seq += 1;
            trace!(?time, seq, "scheduler: event registered");
            state.queue.push(ScheduledEvent {
                time,
                seq,
                runnable,
            });
        }
        self.inner.activity.notify_all();
    }

    /// Run every unit of work scheduled at or before the current virtual time, including
    /// work those units enqueue for the current time. Returns the number of units run.
    pub fn run_current(&self) -> usize {
        self.drain(Horizon::Now)
    }

    /// Advance virtual time by `delta`, running every unit of work scheduled at or before
    /// the new time in `(time, sequence)` order. Returns the number of units run.
    pub fn advance_time_by(&self, delta: Duration) -> usize {
        let target = self.current_time().saturating_add(delta);
        trace!(?delta, ?target, "scheduler: advancing");
        let ran = self.drain(Horizon::Until(target));
        let mut state = lock(&self.inner.state);
        state.now = state.now.max(target);
        ran
    }

    /// Run queued work until the queue is empty, jumping virtual time forward to each
    /// unit's scheduled time. Returns the number of units run.
    pub fn advance_until_idle(&self) -> usize {
        self.drain(Horizon::Unbounded)
    }

    /// Run the earliest queued unit of work, jumping virtual time forward to its scheduled
    /// time. Returns whether a unit ran.
    pub fn run_next(&self) -> bool {
        match self.pop_due(Horizon::Unbounded) {
            Some(runnable) => {
                runnable();
                true
            }
            None => false,
        }
    }

    /// Block the calling thread until work is queued or `timeout` elapses. Returns whether
    /// work is queued.
    pub(crate) fn wait_for_activity(&self, timeout: Duration) -> bool {
        let state = lock(&self.inner.state);
        if !state.queue.is_empty() {
            return true;
        }
        let (state, _) = self
            .inner
            .activity
            .wait_timeout(state, timeout)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        !state.queue.is_empty()
    }

    fn drain(&self, horizon: Horizon) -> usize {
        let mut ran = 0;
        while let Some(runnable) = self.pop_due(horizon) {
            runnable();
            ran += 1;
        }
        ran
    }

    fn pop_due(&self, horizon: Horizon) -> Option<Runnable> {
        let mut state = lock(&self.inner.state);
        let next = state.queue.peek()?.time;
        let due = match horizon {
            Horizon::Now => next <= state.now,
            Horizon::Until(target) => next <= target,
            Horizon::Unbounded => true,
        };
        if !due {
            return None;
        }
        let event = state.queue.pop()?;
        state.now = state.now.max(event.time);
        Some(event.runnable)
    }
}

impl PartialEq for TestScheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TestScheduler {}

impl fmt::Debug for TestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("TestScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}
