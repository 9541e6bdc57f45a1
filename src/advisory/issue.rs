//! Issue registry.

use serde::Serialize;

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Must be fixed.
    Error,
    /// Should be fixed.
    Warning,
}

impl Severity {
    /// Display label.
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        }
    }
}

/// Issue category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Behavior is wrong or nondeterministic.
    Correctness,
}

/// Registered issue with a stable identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Stable identifier.
    pub id: &'static str,
    /// One-line summary.
    pub brief: &'static str,
    /// Longer explanation.
    pub explanation: &'static str,
    /// Category.
    pub category: Category,
    /// Priority from 1 (lowest) to 10.
    pub priority: u8,
    /// Severity.
    pub severity: Severity,
}

/// A test entry point or scope constructor runs without a test dispatcher provider.
pub const USE_TEST_CONTEXT: Issue = Issue {
    id: "UseTestContextIssue",
    brief: "Use kitchensink_dispatchers::run_test or pass a test context.",
    explanation: "Use kitchensink_dispatchers::run_test or pass a context built by \
                  create_test_context to ensure that dispatchers are properly replaced.",
    category: Category::Correctness,
    priority: 5,
    severity: Severity::Error,
};

/// Code references a production dispatcher singleton directly.
pub const USE_DISPATCHER_PROVIDER: Issue = Issue {
    id: "UseDispatcherProvider",
    brief: "Using Dispatchers directly is not recommended because it can lead to slow and/or \
            flaky tests.",
    explanation: "Resolve dispatchers through current_dispatchers() so that tests can \
                  substitute virtual-time dispatchers.",
    category: Category::Correctness,
    priority: 5,
    severity: Severity::Error,
};

/// Every registered issue.
pub const ISSUES: [Issue; 2] = [USE_TEST_CONTEXT, USE_DISPATCHER_PROVIDER];
