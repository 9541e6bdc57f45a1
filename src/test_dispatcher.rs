//! Dispatchers bound to a [`TestScheduler`].

use std::time::Duration;

use tracing::trace;

use crate::dispatcher::{Dispatch, Dispatcher, Runnable};
use crate::scheduler::TestScheduler;

/// Queued test dispatcher: every submission waits for a scheduler drain.
#[derive(Debug, Clone)]
pub struct StandardTestDispatcher {
    scheduler: TestScheduler,
}

impl StandardTestDispatcher {
    /// Bind a queued dispatcher to `scheduler`.
    pub fn new(scheduler: &TestScheduler) -> Self {
        Self {
            scheduler: scheduler.clone(),
        }
    }
}

impl Dispatch for StandardTestDispatcher {
    fn name(&self) -> &str {
        "StandardTestDispatcher"
    }

    fn dispatch(&self, runnable: Runnable) {
        trace!("standard test dispatcher: queued");
        self.scheduler.register_event(Duration::ZERO, runnable);
    }

    fn scheduler(&self) -> Option<&TestScheduler> {
        Some(&self.scheduler)
    }
}

impl From<StandardTestDispatcher> for Dispatcher {
    fn from(dispatcher: StandardTestDispatcher) -> Self {
        Dispatcher::new(dispatcher)
    }
}

/// Eager test dispatcher: work runs before the submitting call returns.
///
/// Timed waits started on this dispatcher still follow the bound scheduler's virtual time.
#[derive(Debug, Clone)]
pub struct UnconfinedTestDispatcher {
    scheduler: TestScheduler,
}

impl UnconfinedTestDispatcher {
    /// Bind an eager dispatcher to `scheduler`.
    pub fn new(scheduler: &TestScheduler) -> Self {
        Self {
            scheduler: scheduler.clone(),
        }
    }
}

impl Dispatch for UnconfinedTestDispatcher {
    fn name(&self) -> &str {
        "UnconfinedTestDispatcher"
    }

    fn is_dispatch_needed(&self) -> bool {
        false
    }

    fn dispatch(&self, runnable: Runnable) {
        runnable();
    }

    fn scheduler(&self) -> Option<&TestScheduler> {
        Some(&self.scheduler)
    }
}

impl From<UnconfinedTestDispatcher> for Dispatcher {
    fn from(dispatcher: UnconfinedTestDispatcher) -> Self {
        Dispatcher::new(dispatcher)
    }
}

/// Factory for a queued dispatcher, usable with [`crate::provider::TestDispatchers::set`].
pub fn standard_test_dispatcher(scheduler: &TestScheduler) -> Dispatcher {
    StandardTestDispatcher::new(scheduler).into()
}

/// Factory for an eager dispatcher, usable with [`crate::provider::TestDispatchers::set`].
pub fn unconfined_test_dispatcher(scheduler: &TestScheduler) -> Dispatcher {
    UnconfinedTestDispatcher::new(scheduler).into()
}
