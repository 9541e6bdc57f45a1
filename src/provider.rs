//! Dispatcher providers: one execution context per [`Role`].
//!
//! [`DispatcherProvider::Production`] forwards to [`Dispatchers`]. [`DispatcherProvider::Test`]
//! wraps a [`TestDispatchers`] that lazily creates one test dispatcher per role, all bound
//! to the same [`TestScheduler`].

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::dispatcher::Dispatcher;
use crate::dispatchers::Dispatchers;
use crate::error::DispatchError;
use crate::role::Role;
use crate::scheduler::TestScheduler;
use crate::sync::lock;
use crate::test_dispatcher::{standard_test_dispatcher, unconfined_test_dispatcher};

/// Capability resolving a [`Role`] to a [`Dispatcher`].
#[derive(Clone)]
pub enum DispatcherProvider {
    /// Process-wide production dispatchers.
    Production,
    /// Memoizing test dispatchers over one logical clock.
    Test(TestDispatchers),
}

impl DispatcherProvider {
    /// Dispatcher for `role`.
    pub fn get(&self, role: Role) -> Dispatcher {
        match self {
            DispatcherProvider::Production => Dispatchers::get(role),
            DispatcherProvider::Test(dispatchers) => dispatchers.get(role),
        }
    }

    /// CPU-bound work.
    pub fn default(&self) -> Dispatcher {
        self.get(Role::Cpu)
    }

    /// Disk and network IO.
    pub fn io(&self) -> Dispatcher {
        self.get(Role::Io)
    }

    /// Main-thread work, always dispatched.
    pub fn main(&self) -> Dispatcher {
        self.get(Role::Main)
    }

    /// Main-thread work, inline when already on the main thread.
    pub fn main_immediate(&self) -> Dispatcher {
        self.get(Role::MainImmediate)
    }

    /// Work not confined to any thread.
    pub fn unconfined(&self) -> Dispatcher {
        self.get(Role::Unconfined)
    }

    /// The test variant, if this is one.
    pub fn as_test(&self) -> Option<&TestDispatchers> {
        match self {
            DispatcherProvider::Production => None,
            DispatcherProvider::Test(dispatchers) => Some(dispatchers),
        }
    }

    /// Whether this is the test variant.
    pub fn is_test(&self) -> bool {
        self.as_test().is_some()
    }

    /// Replace the dispatcher for one role. Fails on the production provider.
    pub fn set<F>(&self, role: Role, factory: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&TestScheduler) -> Dispatcher,
    {
        let dispatchers = self.as_test().ok_or(DispatchError::NotTestDispatchers)?;
        dispatchers.set(role, factory);
        Ok(())
    }

    /// Replace every role with one shared dispatcher. Fails on the production provider.
    pub fn set_all<F>(&self, factory: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&TestScheduler) -> Dispatcher,
    {
        let dispatchers = self.as_test().ok_or(DispatchError::NotTestDispatchers)?;
        dispatchers.set_all(factory);
        Ok(())
    }

    /// Identity comparison: both production, or the same test provider.
    pub fn same(&self, other: &DispatcherProvider) -> bool {
        match (self, other) {
            (DispatcherProvider::Production, DispatcherProvider::Production) => true,
            (DispatcherProvider::Test(left), DispatcherProvider::Test(right)) => left == right,
            _ => false,
        }
    }
}

impl From<TestDispatchers> for DispatcherProvider {
    fn from(dispatchers: TestDispatchers) -> Self {
        DispatcherProvider::Test(dispatchers)
    }
}

impl fmt::Debug for DispatcherProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherProvider::Production => f.write_str("Production"),
            DispatcherProvider::Test(dispatchers) => {
                f.debug_tuple("Test").field(dispatchers).finish()
            }
        }
    }
}

struct TestDispatchersInner {
    scheduler: TestScheduler,
    // Written during test setup only; the lock makes the handle shareable across the
    // threads a test may touch, not a coordination point.
    slots: Mutex<[Option<Dispatcher>; Role::COUNT]>,
}

/// Test provider: one lazily created, memoized dispatcher per role over one scheduler.
///
/// Clones share the same memo table; equality is identity.
#[derive(Clone)]
pub struct TestDispatchers {
    inner: Arc<TestDispatchersInner>,
}

impl TestDispatchers {
    /// Create a provider bound to `scheduler`.
    pub fn new(scheduler: TestScheduler) -> Self {
        Self {
            inner: Arc::new(TestDispatchersInner {
                scheduler,
                slots: Mutex::new(Default::default()),
            }),
        }
    }

    /// Logical clock shared by every dispatcher this provider creates.
    pub fn scheduler(&self) -> &TestScheduler {
        &self.inner.scheduler
    }

    /// Dispatcher for `role`, created on first access: eager for roles that are unconfined
    /// by default, queued otherwise.
    pub fn get(&self, role: Role) -> Dispatcher {
        let mut slots = lock(&self.inner.slots);
        slots[role.index()]
            .get_or_insert_with(|| {
                trace!(%role, "test dispatcher created");
                if role.is_unconfined_by_default() {
                    unconfined_test_dispatcher(&self.inner.scheduler)
                } else {
                    standard_test_dispatcher(&self.inner.scheduler)
                }
            })
            .clone()
    }

    /// Replace the dispatcher for `role`, discarding any memoized one.
    pub fn set<F>(&self, role: Role, factory: F)
    where
        F: FnOnce(&TestScheduler) -> Dispatcher,
    {
        let dispatcher = factory(&self.inner.scheduler);
        trace!(%role, dispatcher = dispatcher.name(), "test dispatcher replaced");
        lock(&self.inner.slots)[role.index()] = Some(dispatcher);
    }

    /// Build one dispatcher and install it for every role.
    pub fn set_all<F>(&self, factory: F)
    where
        F: FnOnce(&TestScheduler) -> Dispatcher,
    {
        let dispatcher = factory(&self.inner.scheduler);
        trace!(dispatcher = dispatcher.name(), "test dispatcher installed for all roles");
        let mut slots = lock(&self.inner.slots);
        for slot in slots.iter_mut() {
            *slot = Some(dispatcher.clone());
        }
    }
}

impl PartialEq for TestDispatchers {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TestDispatchers {}

impl fmt::Debug for TestDispatchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDispatchers")
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}
