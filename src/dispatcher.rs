//! Schedulable execution contexts.
//!
//! A [`Dispatcher`] accepts [`Runnable`] units and decides where they run. Production
//! dispatchers hand them to tokio; test dispatchers queue them on a [`TestScheduler`] or
//! run them inline.

use std::fmt;
use std::sync::Arc;

use crate::scheduler::TestScheduler;

/// Unit of work handed to a dispatcher.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Execution context capable of accepting work.
pub trait Dispatch: Send + Sync + 'static {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// Whether work must go through [`Dispatch::dispatch`]. When `false`, callers run the
    /// work inline at the point of submission.
    fn is_dispatch_needed(&self) -> bool {
        true
    }

    /// Accept one unit of work.
    fn dispatch(&self, runnable: Runnable);

    /// Logical clock this context is bound to, if any.
    fn scheduler(&self) -> Option<&TestScheduler> {
        None
    }
}

/// Shared handle to a [`Dispatch`] implementation.
///
/// Equality is identity: two handles are equal only when they point at the same context.
#[derive(Clone)]
pub struct Dispatcher(Arc<dyn Dispatch>);

impl Dispatcher {
    /// Wrap a dispatch implementation.
    pub fn new<D>(dispatch: D) -> Self
    where
        D: Dispatch,
    {
        Self(Arc::new(dispatch))
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// See [`Dispatch::is_dispatch_needed`].
    pub fn is_dispatch_needed(&self) -> bool {
        self.0.is_dispatch_needed()
    }

    /// Submit one unit of work.
    pub fn dispatch(&self, runnable: Runnable) {
        self.0.dispatch(runnable);
    }

    /// Logical clock this context is bound to, if any.
    pub fn scheduler(&self) -> Option<TestScheduler> {
        self.0.scheduler().cloned()
    }

    /// Whether this context is driven by a logical clock.
    pub fn is_test(&self) -> bool {
        self.0.scheduler().is_some()
    }
}

impl PartialEq for Dispatcher {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for Dispatcher {}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dispatcher").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Inline(Arc<AtomicUsize>);

    impl Dispatch for Inline {
        fn name(&self) -> &str {
            "inline"
        }

        fn dispatch(&self, runnable: Runnable) {
            self.0.fetch_add(1, Ordering::SeqCst);
            runnable();
        }
    }

    #[test]
    fn equality_is_identity() {
        let count = Arc::new(AtomicUsize::new(0));
        let first = Dispatcher::new(Inline(Arc::clone(&count)));
        let second = Dispatcher::new(Inline(Arc::clone(&count)));

        assert_eq!(first, first.clone());
        assert_ne!(first, second);
        assert!(!first.is_test());
        assert_eq!(format!("{first:?}"), "Dispatcher(\"inline\")");
    }

    #[test]
    fn dispatch_forwards_to_implementation() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Inline(Arc::clone(&count)));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_task = Arc::clone(&ran);

        dispatcher.dispatch(Box::new(move || {
            ran_in_task.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
