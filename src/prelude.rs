//! Prelude module for convenient imports.
//!
//! # Example
//!
//! ```rust,ignore
//! use kitchensink_dispatchers::prelude::*;
//! ```

pub use crate::config::RunTestConfig;
pub use crate::context::{Context, current_dispatchers};
pub use crate::dispatcher::Dispatcher;
pub use crate::dispatchers::Dispatchers;
pub use crate::error::DispatchError;
pub use crate::harness::{TestScope, create_test_context, run_test, run_test_with, test_scope};
pub use crate::job::{Deferred, Job, delay, launch, with_dispatcher, yield_now};
pub use crate::provider::{DispatcherProvider, TestDispatchers};
pub use crate::role::Role;
pub use crate::scheduler::TestScheduler;
pub use crate::test_dispatcher::{standard_test_dispatcher, unconfined_test_dispatcher};

#[cfg(feature = "advisory")]
pub use crate::advisory::{AdvisoryConfig, CallKind, CallSite, Finding, check};
