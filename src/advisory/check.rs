//! Call-site checks.

use serde::{Deserialize, Serialize};

use super::issue::{Issue, Severity, USE_DISPATCHER_PROVIDER, USE_TEST_CONTEXT};
use crate::role::Role;

/// Checker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// Path prefixes of host test entry points that know nothing about dispatcher providers.
    pub host_run_test_paths: Vec<String>,
    /// Path prefixes of scope constructors that do not install a test provider.
    pub host_scope_paths: Vec<String>,
    /// Replacement for flagged test entry points.
    pub run_test_replacement: String,
    /// Replacement for flagged scope constructors.
    pub scope_replacement: String,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            host_run_test_paths: vec!["tokio::test".to_string()],
            host_scope_paths: vec![
                "kitchensink_dispatchers::TestScope::from_context".to_string(),
                "kitchensink_dispatchers::harness::TestScope::from_context".to_string(),
            ],
            run_test_replacement: "kitchensink_dispatchers::run_test".to_string(),
            scope_replacement: "kitchensink_dispatchers::test_scope".to_string(),
        }
    }
}

/// Position of a call site in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file path.
    pub file: String,
    /// 1-based line.
    pub line: u32,
}

/// Shape of a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallKind {
    /// Call to a test entry point.
    RunTest {
        /// Fully qualified callee path.
        path: String,
        /// Whether a context argument was passed.
        has_context_arg: bool,
    },
    /// Call to a test scope constructor.
    ScopeConstructor {
        /// Fully qualified callee path.
        path: String,
    },
    /// Direct reference to a production dispatcher singleton.
    GlobalDispatcher {
        /// Role of the referenced singleton.
        role: Role,
        /// Whether the reference sits inside an async fn.
        in_async_fn: bool,
    },
}

/// Call site handed over by a source scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Where the call sits, when known.
    #[serde(default)]
    pub location: Option<SourceLocation>,
    /// Source text of the flagged expression, exactly as written.
    pub text: String,
    /// Call shape.
    #[serde(flatten)]
    pub kind: CallKind,
}

/// Mechanical rewrite of one expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fix {
    /// Short label.
    pub name: String,
    /// Text to replace.
    pub old: String,
    /// Replacement text.
    pub new: String,
}

impl Fix {
    /// Apply the rewrite to the first occurrence in `source`.
    pub fn apply(&self, source: &str) -> String {
        source.replacen(&self.old, &self.new, 1)
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Stable issue identifier.
    pub issue: &'static str,
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Where the call sits, when known.
    pub location: Option<SourceLocation>,
    /// Flagged source text.
    pub text: String,
    /// Suggested rewrite, if one is safe.
    pub fix: Option<Fix>,
}

fn matches_any(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Callee of a call expression; `None` for attributes and bare paths.
fn call_callee(text: &str) -> Option<&str> {
    let text = text.trim();
    if text.starts_with("#[") {
        return None;
    }
    let (callee, _) = text.split_once('(')?;
    let callee = callee.trim_end();
    (!callee.is_empty()).then_some(callee)
}

fn provider_accessor(role: Role) -> &'static str {
    match role {
        Role::Cpu => "default",
        Role::Io => "io",
        Role::Main => "main",
        Role::MainImmediate => "main_immediate",
        Role::Unconfined => "unconfined",
    }
}

fn finding(issue: &Issue, site: &CallSite, message: String, fix: Option<Fix>) -> Finding {
    Finding {
        issue: issue.id,
        severity: issue.severity,
        message,
        location: site.location.clone(),
        text: site.text.clone(),
        fix,
    }
}

/// Check one call site.
pub fn check(config: &AdvisoryConfig, site: &CallSite) -> Option<Finding> {
    match &site.kind {
        CallKind::RunTest {
            path,
            has_context_arg,
        } => {
            if *has_context_arg || !matches_any(path, &config.host_run_test_paths) {
                return None;
            }
            // Attribute entry points have no call-equivalent replacement.
            let fix = call_callee(&site.text).map(|callee| Fix {
                name: format!("Use {}", config.run_test_replacement),
                old: callee.to_string(),
                new: config.run_test_replacement.clone(),
            });
            Some(finding(
                &USE_TEST_CONTEXT,
                site,
                USE_TEST_CONTEXT.explanation.to_string(),
                fix,
            ))
        }
        CallKind::ScopeConstructor { path } => {
            if !matches_any(path, &config.host_scope_paths) {
                return None;
            }
            let fix = Fix {
                name: format!("Use {}", config.scope_replacement),
                old: site.text.clone(),
                new: config.scope_replacement.clone(),
            };
            Some(finding(
                &USE_TEST_CONTEXT,
                site,
                format!(
                    "Use {}() to ensure test dispatcher replacement.",
                    config.scope_replacement
                ),
                Some(fix),
            ))
        }
        CallKind::GlobalDispatcher { role, in_async_fn } => {
            // Outside async code there is no ambient job to resolve a provider from.
            let fix = in_async_fn.then(|| Fix {
                name: "Use current_dispatchers()".to_string(),
                old: site.text.clone(),
                new: format!("current_dispatchers().{}()", provider_accessor(*role)),
            });
            Some(finding(
                &USE_DISPATCHER_PROVIDER,
                site,
                "Dispatchers should not be used directly. Use the DispatcherProvider instead."
                    .to_string(),
                fix,
            ))
        }
    }
}

/// Check every call site, keeping findings in input order.
pub fn check_all(config: &AdvisoryConfig, sites: &[CallSite]) -> Vec<Finding> {
    sites.iter().filter_map(|site| check(config, site)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(role: Role, text: &str, in_async_fn: bool) -> CallSite {
        CallSite {
            location: Some(SourceLocation {
                file: "src/sync.rs".to_string(),
                line: 7,
            }),
            text: text.to_string(),
            kind: CallKind::GlobalDispatcher { role, in_async_fn },
        }
    }

    #[test]
    fn global_dispatcher_in_async_fn_gets_a_fix() {
        let config = AdvisoryConfig::default();
        let site = global(Role::MainImmediate, "Dispatchers::main_immediate()", true);

        let finding = check(&config, &site).expect("direct reference is flagged");
        assert_eq!(finding.issue, "UseDispatcherProvider");
        let fix = finding.fix.expect("async fn gets a fix");
        assert_eq!(fix.new, "current_dispatchers().main_immediate()");
        assert_eq!(
            fix.apply("with_dispatcher(Dispatchers::main_immediate(), work).await"),
            "with_dispatcher(current_dispatchers().main_immediate(), work).await"
        );
    }

    #[test]
    fn global_dispatcher_outside_async_fn_has_no_fix() {
        let finding = check(
            &AdvisoryConfig::default(),
            &global(Role::Io, "Dispatchers::io()", false),
        )
        .expect("direct reference is flagged");
        assert!(finding.fix.is_none());
    }

    #[test]
    fn host_run_test_without_context_is_flagged() {
        let config = AdvisoryConfig::default();
        let site = CallSite {
            location: None,
            text: "tokio::test".to_string(),
            kind: CallKind::RunTest {
                path: "tokio::test".to_string(),
                has_context_arg: false,
            },
        };
        let finding = check(&config, &site).expect("host entry point is flagged");
        assert_eq!(finding.issue, "UseTestContextIssue");
        assert!(finding.fix.is_none());

        let with_context = CallSite {
            kind: CallKind::RunTest {
                path: "tokio::test".to_string(),
                has_context_arg: true,
            },
            ..site.clone()
        };
        assert!(check(&config, &with_context).is_none());

        let own = CallSite {
            kind: CallKind::RunTest {
                path: "kitchensink_dispatchers::run_test".to_string(),
                has_context_arg: false,
            },
            ..site
        };
        assert!(check(&config, &own).is_none());
    }

    #[test]
    fn attribute_entry_points_get_no_rewrite() {
        let site = CallSite {
            location: None,
            text: "#[tokio::test(flavor = \"current_thread\")]".to_string(),
            kind: CallKind::RunTest {
                path: "tokio::test".to_string(),
                has_context_arg: false,
            },
        };
        let finding = check(&AdvisoryConfig::default(), &site).expect("attribute is flagged");
        assert!(finding.fix.is_none());
    }

    #[test]
    fn host_run_test_call_rewrites_only_the_callee() {
        let config = AdvisoryConfig {
            host_run_test_paths: vec!["host_harness::run_test".to_string()],
            ..AdvisoryConfig::default()
        };
        let site = CallSite {
            location: None,
            text: "host_harness::run_test(|scope| async move { flow(scope).await })".to_string(),
            kind: CallKind::RunTest {
                path: "host_harness::run_test".to_string(),
                has_context_arg: false,
            },
        };

        let fix = check(&config, &site)
            .and_then(|finding| finding.fix)
            .expect("call sites get a rewrite");
        assert_eq!(fix.old, "host_harness::run_test");
        assert_eq!(
            fix.apply("    host_harness::run_test(|scope| async move { flow(scope).await })\n"),
            "    kitchensink_dispatchers::run_test(|scope| async move { flow(scope).await })\n"
        );
    }

    #[test]
    fn raw_scope_constructor_is_flagged() {
        let config = AdvisoryConfig::default();
        let site = CallSite {
            location: None,
            text: "TestScope::from_context".to_string(),
            kind: CallKind::ScopeConstructor {
                path: "kitchensink_dispatchers::harness::TestScope::from_context".to_string(),
            },
        };
        let finding = check(&config, &site).expect("raw constructor is flagged");
        assert_eq!(
            finding.message,
            "Use kitchensink_dispatchers::test_scope() to ensure test dispatcher replacement."
        );

        let wrapped = CallSite {
            kind: CallKind::ScopeConstructor {
                path: "kitchensink_dispatchers::test_scope".to_string(),
            },
            ..site
        };
        assert!(check(&config, &wrapped).is_none());
    }

    #[test]
    fn call_sites_parse_from_scanner_json() {
        let sites: Vec<CallSite> = serde_json::from_str(
            r#"[
                {"kind":"global_dispatcher","text":"Dispatchers::default()","role":"cpu","in_async_fn":true},
                {"kind":"run_test","text":"tokio::test","path":"tokio::test","has_context_arg":false,
                 "location":{"file":"tests/flow.rs","line":3}}
            ]"#,
        )
        .expect("scanner output should parse");

        let findings = check_all(&AdvisoryConfig::default(), &sites);
        assert_eq!(findings.len(), 2);
        assert_eq!(
            findings[0].fix.as_ref().map(|fix| fix.new.as_str()),
            Some("current_dispatchers().default()")
        );
        assert_eq!(findings[1].location.as_ref().map(|loc| loc.line), Some(3));
    }
}
