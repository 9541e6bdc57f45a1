//! Test entry points.
//!
//! [`create_test_context`] installs a [`TestDispatchers`] provider and its scheduler into a
//! context. [`run_test`] and [`run_test_with`] run an async test body against such a context
//! on the calling thread, driving the shared virtual clock and bounding the whole run by a
//! wall-clock timeout. [`test_scope`] builds a reusable [`TestScope`] for tests that keep
//! issuing work across several statements.
//!
//! ```rust,ignore
//! use kitchensink_dispatchers::prelude::*;
//!
//! run_test(|scope| async move {
//!     let io = scope.launch_on(&scope.dispatchers().io(), async {});
//!     assert!(!io.is_completed());
//!     scope.run_current();
//!     assert!(io.is_completed());
//! })
//! .expect("test body should finish in time");
//! ```

use std::future::Future;
use std::panic::resume_unwind;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RunTestConfig;
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::job::{self, Deferred, Job};
use crate::provider::{DispatcherProvider, TestDispatchers};
use crate::scheduler::TestScheduler;
use crate::test_dispatcher::standard_test_dispatcher;

/// Longest single wait for external progress before the run loop re-checks the body.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Extend `context` with a test provider and the scheduler that provider uses.
///
/// A provider already installed in `context` is reused together with its scheduler.
/// Otherwise the scheduler is taken from the context, then from a test dispatcher in the
/// context, and only then freshly created.
pub fn create_test_context(context: &Context) -> Context {
    let dispatchers = match context.dispatcher_provider().and_then(DispatcherProvider::as_test) {
        Some(existing) => existing.clone(),
        None => {
            let scheduler = context
                .scheduler()
                .cloned()
                .or_else(|| context.dispatcher().and_then(Dispatcher::scheduler))
                .unwrap_or_default();
            TestDispatchers::new(scheduler)
        }
    };
    context
        .with_scheduler(dispatchers.scheduler().clone())
        .with_dispatchers(dispatchers)
}

/// Run `body` in a fresh test context with the default configuration.
pub fn run_test<B, Fut>(body: B) -> Result<(), DispatchError>
where
    B: FnOnce(TestScope) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    run_test_with(&Context::new(), RunTestConfig::default(), body)
}

/// Run `body` in the test context built from `context`.
///
/// # Panics
///
/// Re-raises a panic from the body or any of its children once the run has been torn down.
pub fn run_test_with<B, Fut>(
    context: &Context,
    config: RunTestConfig,
    body: B,
) -> Result<(), DispatchError>
where
    B: FnOnce(TestScope) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    test_scope(context).run_test(config, body)
}

/// Build a reusable scope over the test context built from `context`.
pub fn test_scope(context: &Context) -> TestScope {
    TestScope::from_context(&create_test_context(context))
}

/// Scope bound to one virtual clock, driving work launched in it.
#[derive(Debug, Clone)]
pub struct TestScope {
    context: Context,
    scheduler: TestScheduler,
    dispatcher: Dispatcher,
    job: Job,
}

impl TestScope {
    /// Build a scope over `context` as given, without installing a test provider.
    ///
    /// Prefer [`test_scope`]: a scope built here from a context without a provider resolves
    /// roles to production dispatchers, and [`TestScope::run_test`] refuses to run it.
    pub fn from_context(context: &Context) -> TestScope {
        let scheduler = context
            .scheduler()
            .cloned()
            .or_else(|| context.dispatcher().and_then(Dispatcher::scheduler))
            .unwrap_or_default();
        let dispatcher = match context.dispatcher() {
            Some(dispatcher) if dispatcher.scheduler().as_ref() == Some(&scheduler) => {
                dispatcher.clone()
            }
            _ => standard_test_dispatcher(&scheduler),
        };
        let job = Job::new(context.job());
        let context = context
            .with_scheduler(scheduler.clone())
            .with_dispatcher(dispatcher.clone())
            .with_job(job.clone());
        TestScope {
            context,
            scheduler,
            dispatcher,
            job,
        }
    }

    /// Context work launched in this scope inherits.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Active provider for this scope.
    pub fn dispatchers(&self) -> DispatcherProvider {
        self.context.dispatchers()
    }

    /// Logical clock driving this scope.
    pub fn scheduler(&self) -> &TestScheduler {
        &self.scheduler
    }

    /// Dispatcher [`TestScope::launch`] uses.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Job owning all work launched in this scope.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Launch `future` on the scope's dispatcher.
    pub fn launch<F>(&self, future: F) -> Job
    where
        F: Future<Output = ()> + Send + 'static,
    {
        job::launch(&self.context, future)
    }

    /// Launch `future` on `dispatcher`, still owned by this scope.
    pub fn launch_on<F>(&self, dispatcher: &Dispatcher, future: F) -> Job
    where
        F: Future<Output = ()> + Send + 'static,
    {
        job::launch(&self.context.with_dispatcher(dispatcher.clone()), future)
    }

    /// Launch `future` on the scope's dispatcher and keep its output.
    pub fn async_with<F>(&self, future: F) -> Deferred<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        job::async_with(&self.context, future)
    }

    /// See [`TestScheduler::current_time`].
    pub fn current_time(&self) -> Duration {
        self.scheduler.current_time()
    }

    /// See [`TestScheduler::run_current`].
    pub fn run_current(&self) -> usize {
        self.scheduler.run_current()
    }

    /// See [`TestScheduler::advance_time_by`].
    pub fn advance_time_by(&self, delta: Duration) -> usize {
        self.scheduler.advance_time_by(delta)
    }

    /// See [`TestScheduler::advance_until_idle`].
    pub fn advance_until_idle(&self) -> usize {
        self.scheduler.advance_until_idle()
    }

    /// Cancel every job launched in this scope, on every role.
    pub fn cancel(&self) {
        self.job.cancel();
    }

    /// Run `body` as a child of this scope and drive the clock until it and all of its
    /// children complete, or until `config.timeout` of wall-clock time has passed.
    ///
    /// # Errors
    ///
    /// [`DispatchError::MissingTestDispatchers`] when the scope's context has no test
    /// provider, [`DispatchError::ScopeCancelled`] when the scope was cancelled before, and
    /// [`DispatchError::Timeout`] when the deadline passes first.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the body or any of its children once the run has been torn down.
    pub fn run_test<B, Fut>(&self, config: RunTestConfig, body: B) -> Result<(), DispatchError>
    where
        B: FnOnce(TestScope) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self
            .context
            .dispatcher_provider()
            .is_some_and(DispatcherProvider::is_test)
        {
            return Err(DispatchError::MissingTestDispatchers);
        }
        if !self.job.is_active() {
            return Err(DispatchError::ScopeCancelled);
        }

        let deadline = Instant::now() + config.timeout;
        let root = Job::new(Some(&self.job));
        let body_scope = TestScope {
            context: self.context.with_job(root.clone()),
            scheduler: self.scheduler.clone(),
            dispatcher: self.dispatcher.clone(),
            job: root.clone(),
        };
        debug!(job = root.id(), timeout = ?config.timeout, "test body started");
        job::start(
            &self.context,
            self.dispatcher.clone(),
            root.clone(),
            Box::pin(body(body_scope)),
        );

        // Drain one unit per step and re-check the deadline between units.
        let outcome = loop {
            if root.is_completed() {
                break Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break Err(DispatchError::Timeout {
                    timeout: config.timeout,
                });
            }
            if !self.scheduler.run_next() {
                self.scheduler.wait_for_activity((deadline - now).min(IDLE_POLL));
            }
        };

        if outcome.is_err() {
            debug!(job = root.id(), "test body timed out; cancelling scope");
            self.job.cancel();
            self.scheduler.advance_until_idle();
        }
        if let Some(payload) = self.job.take_failure() {
            resume_unwind(payload);
        }
        debug!(
            job = root.id(),
            virtual_time = ?self.scheduler.current_time(),
            "test body finished"
        );
        outcome
    }
}
