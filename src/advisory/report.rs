//! Text and JSON rendering of findings.

use serde::Serialize;

use super::check::Finding;
use super::issue::Severity;

/// Supported output formats for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Compiler-style text, one block per finding.
    Text,
    /// JSON with all findings inline.
    Json,
}

#[derive(Debug, Serialize)]
struct Summary {
    errors: usize,
    warnings: usize,
}

fn summarize(findings: &[Finding]) -> Summary {
    let errors = findings
        .iter()
        .filter(|finding| finding.severity == Severity::Error)
        .count();
    Summary {
        errors,
        warnings: findings.len() - errors,
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Render findings in the selected format.
pub fn render_findings(findings: &[Finding], format: ReportFormat) -> String {
    let summary = summarize(findings);
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "findings": findings,
        }))
        .expect("findings JSON should serialize"),
        ReportFormat::Text => {
            if findings.is_empty() {
                return "No issues found.\n".to_string();
            }
            let mut out = String::new();
            for finding in findings {
                let location = finding
                    .location
                    .as_ref()
                    .map(|loc| format!("{}:{}: ", loc.file, loc.line))
                    .unwrap_or_default();
                out.push_str(&format!(
                    "{location}{}: {} [{}]\n  {}\n",
                    finding.severity.label(),
                    finding.message,
                    finding.issue,
                    finding.text
                ));
                if let Some(fix) = &finding.fix {
                    out.push_str(&format!("  fix: {}: -{} +{}\n", fix.name, fix.old, fix.new));
                }
            }
            out.push_str(&format!(
                "{}, {}\n",
                plural(summary.errors, "error"),
                plural(summary.warnings, "warning")
            ));
            out
        }
    }
}
