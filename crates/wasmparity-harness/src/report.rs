//! Human-readable renderings of a finished run.

use crate::discovery::TestMode;
use crate::outcome::{ErrorKind, Status};
use crate::results::{ModeResults, ResultSnapshot};

/// Per-test output shown in reports is cut to this many characters.
pub const OUTPUT_PREVIEW_CHARS: usize = 500;

/// A run report over a sealed result snapshot.
#[derive(Debug, Clone)]
pub struct RunReport<'a> {
    pub title: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    pub results: &'a ResultSnapshot,
}

impl<'a> RunReport<'a> {
    #[must_use]
    pub fn new(title: impl Into<String>, timestamp: impl Into<String>, results: &'a ResultSnapshot) -> Self {
        Self {
            title: title.into(),
            timestamp: timestamp.into(),
            results,
        }
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("- Timestamp: {}\n", self.timestamp));
        out.push_str(&format!("- Total: {}\n", self.results.total()));
        out.push_str(&format!("- Passed: {}\n", self.results.success_count()));
        out.push_str(&format!("- Failed: {}\n\n", self.results.failure_count()));

        for (mode, results) in self.results.modes() {
            if results.total() == 0 {
                continue;
            }
            out.push_str(&format!("## {}\n\n", mode_title(mode)));
            out.push_str(&format!(
                "{} total, {} passed, {} failed\n\n",
                results.total(),
                results.successes().len(),
                results.failures().len()
            ));
            let breakdown = failure_breakdown(results);
            if !breakdown.is_empty() {
                out.push_str("| Error | Count |\n");
                out.push_str("|-------|-------|\n");
                for (kind, count) in breakdown {
                    out.push_str(&format!("| {} | {} |\n", kind.description(), count));
                }
                out.push('\n');
            }
            out.push_str("| Test | Status | Error |\n");
            out.push_str("|------|--------|-------|\n");
            for (test, record) in results.test_cases() {
                let status = match record.status {
                    Status::Success => "PASS",
                    Status::Failure => "FAIL",
                };
                out.push_str(&format!(
                    "| {} | {} | {} |\n",
                    test,
                    status,
                    record.error_type.as_deref().unwrap_or("")
                ));
            }
            out.push('\n');
        }
        out
    }

    /// Render a standalone HTML page.
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        out.push_str(&format!("<title>{}</title>\n", escape_html(&self.title)));
        out.push_str(
            "<style>\n\
             body { font-family: sans-serif; margin: 2em; }\n\
             table { border-collapse: collapse; margin-bottom: 2em; }\n\
             th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; vertical-align: top; }\n\
             .pass { color: #176317; }\n\
             .fail { color: #a31515; }\n\
             pre { margin: 0; white-space: pre-wrap; max-width: 80em; }\n\
             </style>\n</head>\n<body>\n",
        );
        out.push_str(&format!("<h1>{}</h1>\n", escape_html(&self.title)));
        out.push_str(&format!(
            "<p>Generated {}: {} total, {} passed, {} failed</p>\n",
            escape_html(&self.timestamp),
            self.results.total(),
            self.results.success_count(),
            self.results.failure_count()
        ));

        out.push_str("<table>\n<tr><th>Mode</th><th>Total</th><th>Passed</th><th>Failed</th></tr>\n");
        for (mode, results) in self.results.modes() {
            out.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                mode_title(mode),
                results.total(),
                results.successes().len(),
                results.failures().len()
            ));
        }
        out.push_str("</table>\n");

        for (mode, results) in self.results.modes() {
            if results.total() == 0 {
                continue;
            }
            out.push_str(&format!("<h2>{}</h2>\n", mode_title(mode)));
            let breakdown = failure_breakdown(results);
            if !breakdown.is_empty() {
                out.push_str("<table>\n<tr><th>Error</th><th>Count</th></tr>\n");
                for (kind, count) in breakdown {
                    out.push_str(&format!(
                        "<tr><td>{}</td><td>{}</td></tr>\n",
                        escape_html(kind.description()),
                        count
                    ));
                }
                out.push_str("</table>\n");
            }
            out.push_str(
                "<table>\n<tr><th>Test</th><th>Status</th><th>Error</th>\
                 <th>Nat Comp</th><th>Nat Run</th><th>WASM Comp</th><th>WASM Run</th>\
                 <th>Output</th></tr>\n",
            );
            for (test, record) in results.test_cases() {
                let (class, status) = match record.status {
                    Status::Success => ("pass", "Success"),
                    Status::Failure => ("fail", "Failure"),
                };
                let t = &record.timings;
                out.push_str(&format!(
                    "<tr><td>{}</td><td class=\"{class}\">{status}</td><td>{}</td>\
                     <td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td>\
                     <td><pre>{}</pre></td></tr>\n",
                    escape_html(test),
                    escape_html(record.error_type.as_deref().unwrap_or("")),
                    t.native_compile_time,
                    t.native_run_time,
                    t.wasm_compile_time,
                    t.wasm_run_time,
                    escape_html(&preview(&record.output)),
                ));
            }
            out.push_str("</table>\n");
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}

fn mode_title(mode: TestMode) -> &'static str {
    match mode {
        TestMode::Deterministic => "Deterministic",
        TestMode::NonDeterministic => "Non-deterministic",
        TestMode::Fail => "Fail",
    }
}

/// Non-empty buckets in taxonomy order.
fn failure_breakdown(results: &ModeResults) -> Vec<(&'static ErrorKind, usize)> {
    const KINDS: &[ErrorKind] = &ErrorKind::TAXONOMY;
    KINDS
        .iter()
        .map(|kind| (kind, results.bucket(kind).len()))
        .filter(|(_, count)| *count > 0)
        .collect()
}

/// First [`OUTPUT_PREVIEW_CHARS`] characters, marked when cut.
#[must_use]
pub fn preview(output: &str) -> String {
    match output.char_indices().nth(OUTPUT_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &output[..cut]),
        None => output.to_string(),
    }
}

#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
