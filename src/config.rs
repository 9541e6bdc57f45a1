//! Test harness configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wall-clock bound for a test body.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`crate::harness::run_test_with`] and [`crate::harness::TestScope::run_test`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunTestConfig {
    /// Wall-clock bound on the body and its children. Virtual time does not count against it.
    pub timeout: Duration,
}

impl Default for RunTestConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RunTestConfig {
    /// Set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_and_builder_override_work() {
        assert_eq!(RunTestConfig::default().timeout, Duration::from_secs(10));

        let cfg = RunTestConfig::default().with_timeout(Duration::from_millis(250));
        assert_eq!(cfg.timeout, Duration::from_millis(250));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: RunTestConfig = serde_json::from_str("{}").expect("empty config should parse");
        assert_eq!(cfg, RunTestConfig::default());

        let cfg: RunTestConfig = serde_json::from_str(r#"{"timeout":{"secs":2,"nanos":0}}"#)
            .expect("explicit timeout should parse");
        assert_eq!(cfg.timeout, Duration::from_secs(2));
    }
}
