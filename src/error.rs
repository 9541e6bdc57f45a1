//! Error types surfaced by providers and the test harness.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by dispatcher providers and test entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A test-only mutator was invoked on the production provider.
    #[error("dispatchers must be a TestDispatchers instance")]
    NotTestDispatchers,
    /// A test scope was run without a test provider in its context.
    #[error(
        "test scope does not contain a TestDispatchers provider, which is required to use dispatcher injection"
    )]
    MissingTestDispatchers,
    /// A test scope was run after it had been cancelled, timed out or failed.
    #[error("test scope was already cancelled")]
    ScopeCancelled,
    /// The test body did not complete within the wall-clock bound.
    #[error("test body did not complete within {timeout:?}")]
    Timeout {
        /// Configured wall-clock bound.
        timeout: Duration,
    },
}
