//! Propagated execution context.
//!
//! A [`Context`] is an immutable bag of optional elements: the dispatcher provider cell, a
//! test scheduler, the dispatcher work runs on and the parent job. Builders return new
//! values and clones share the elements, so a context can be handed down call chains and
//! captured by launched work without any global state.
//!
//! While a job is being polled its context is also reachable through [`current`], which
//! is how code deep inside a task resolves [`current_dispatchers`].

use std::cell::RefCell;
use std::fmt;
use std::ops::Add;

use crate::dispatcher::Dispatcher;
use crate::job::Job;
use crate::provider::DispatcherProvider;
use crate::scheduler::TestScheduler;

/// Immutable, structurally shared execution context.
#[derive(Clone, Default)]
pub struct Context {
    dispatchers: Option<DispatcherProvider>,
    scheduler: Option<TestScheduler>,
    dispatcher: Option<Dispatcher>,
    job: Option<Job>,
}

impl Context {
    /// Empty context; resolves to production dispatchers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with `provider` installed in the dispatcher provider cell.
    pub fn with_dispatchers(&self, provider: impl Into<DispatcherProvider>) -> Self {
        Self {
            dispatchers: Some(provider.into()),
            ..self.clone()
        }
    }

    /// Context with the dispatcher provider cell cleared.
    pub fn without_dispatchers(&self) -> Self {
        Self {
            dispatchers: None,
            ..self.clone()
        }
    }

    /// Context carrying `scheduler` directly.
    pub fn with_scheduler(&self, scheduler: TestScheduler) -> Self {
        Self {
            scheduler: Some(scheduler),
            ..self.clone()
        }
    }

    /// Context whose work runs on `dispatcher`.
    pub fn with_dispatcher(&self, dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            ..self.clone()
        }
    }

    pub(crate) fn with_job(&self, job: Job) -> Self {
        Self {
            job: Some(job),
            ..self.clone()
        }
    }

    /// Combine two contexts; elements present in `other` win.
    pub fn merge(&self, other: &Context) -> Self {
        Self {
            dispatchers: other.dispatchers.clone().or_else(|| self.dispatchers.clone()),
            scheduler: other.scheduler.clone().or_else(|| self.scheduler.clone()),
            dispatcher: other.dispatcher.clone().or_else(|| self.dispatcher.clone()),
            job: other.job.clone().or_else(|| self.job.clone()),
        }
    }

    /// Active provider: the cell's value, or production when the cell is empty.
    pub fn dispatchers(&self) -> DispatcherProvider {
        self.dispatchers
            .clone()
            .unwrap_or(DispatcherProvider::Production)
    }

    /// Raw content of the dispatcher provider cell.
    pub fn dispatcher_provider(&self) -> Option<&DispatcherProvider> {
        self.dispatchers.as_ref()
    }

    /// Scheduler carried directly by this context.
    pub fn scheduler(&self) -> Option<&TestScheduler> {
        self.scheduler.as_ref()
    }

    /// Dispatcher work launched in this context runs on.
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    /// Job that work launched in this context becomes a child of.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Scheduler timed waits in this context follow: the dispatcher's, else the context's.
    pub(crate) fn time_source(&self) -> Option<TestScheduler> {
        self.dispatcher
            .as_ref()
            .and_then(Dispatcher::scheduler)
            .or_else(|| self.scheduler.clone())
    }
}

impl Add for Context {
    type Output = Context;

    fn add(self, rhs: Context) -> Context {
        self.merge(&rhs)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dispatchers", &self.dispatchers)
            .field("scheduler", &self.scheduler)
            .field("dispatcher", &self.dispatcher)
            .field("job", &self.job.as_ref().map(Job::id))
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Context of the job being polled on this thread; empty outside any job.
pub fn current() -> Context {
    CURRENT.with(|current| current.borrow().clone().unwrap_or_default())
}

/// Active provider for the calling job.
pub fn current_dispatchers() -> DispatcherProvider {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map_or(DispatcherProvider::Production, Context::dispatchers)
    })
}

/// Restores the previously entered context on drop.
pub(crate) struct EnterGuard {
    previous: Option<Context>,
}

/// Make `context` the [`current`] context until the guard drops.
pub(crate) fn enter(context: Context) -> EnterGuard {
    let previous = CURRENT.with(|current| current.replace(Some(context)));
    EnterGuard { previous }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
    }
}
