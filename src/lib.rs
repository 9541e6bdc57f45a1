//! # kitchensink-dispatchers
//!
//! `kitchensink-dispatchers` selects execution contexts by logical role at runtime and lets
//! tests swap them for deterministic, virtual-time ones without touching application code:
//! - `provider`: [`DispatcherProvider`] resolving a [`Role`] to a [`Dispatcher`]
//! - `context`: the propagated [`Context`] carrying the active provider
//! - `scheduler` / `test_dispatcher`: the shared virtual clock and the dispatchers bound to it
//! - `harness`: [`run_test`], [`test_scope`] and [`create_test_context`]
//! - `advisory`: call-site checks for code that bypasses the provider (feature `advisory`)
//!
//! Application code asks for `current_dispatchers().io()` instead of naming
//! `Dispatchers::io()`. Outside a test context that resolves to the production singleton;
//! inside one it resolves to a dispatcher driven by the test's clock.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod dispatchers;
pub mod error;
pub mod harness;
pub mod job;
pub mod prelude;
pub mod provider;
pub mod role;
pub mod scheduler;
mod sync;
pub mod test_dispatcher;

#[cfg(feature = "advisory")]
#[cfg_attr(docsrs, doc(cfg(feature = "advisory")))]
pub mod advisory;

pub use config::RunTestConfig;
pub use context::{Context, current, current_dispatchers};
pub use dispatcher::{Dispatch, Dispatcher, Runnable};
pub use dispatchers::Dispatchers;
pub use error::DispatchError;
pub use harness::{TestScope, create_test_context, run_test, run_test_with, test_scope};
pub use job::{Deferred, Job, async_with, delay, launch, with_dispatcher, yield_now};
pub use provider::{DispatcherProvider, TestDispatchers};
pub use role::Role;
pub use scheduler::TestScheduler;
pub use test_dispatcher::{
    StandardTestDispatcher, UnconfinedTestDispatcher, standard_test_dispatcher,
    unconfined_test_dispatcher,
};
