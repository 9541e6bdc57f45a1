//! Advisory checks for code that bypasses dispatcher injection.
//!
//! The checker works on call-site shapes extracted by an external source scanner. It
//! reports direct references to production dispatcher singletons and host test entry
//! points used without a test context, each with an optional mechanical rewrite. It never
//! touches runtime dispatcher state.

pub mod check;
pub mod issue;
pub mod report;

pub use check::{AdvisoryConfig, CallKind, CallSite, Finding, Fix, SourceLocation, check, check_all};
pub use issue::{Category, ISSUES, Issue, Severity, USE_DISPATCHER_PROVIDER, USE_TEST_CONTEXT};
pub use report::{ReportFormat, render_findings};
