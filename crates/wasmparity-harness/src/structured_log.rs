//! Structured run log for wasmparity runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL log record with required + optional fields.
//! - [`RunLog`]: writes JSONL lines to a file, an in-memory buffer, or nowhere.
//! - [`ArtifactIndex`]: links the run log to report artifacts with SHA-256 integrity.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::discovery::TestMode;
use crate::outcome::ExecutionOutcome;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Per-test outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Timeout,
}

/// Toolchain phase a log line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Staging,
    NativeCompile,
    NativeRun,
    WasmCompile,
    WasmRun,
    Compare,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Test identity (absolute source path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Error kind label for failed tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            mode: None,
            test_id: None,
            phase: None,
            outcome: None,
            error_kind: None,
            exit_code: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    /// Set test identity and mode.
    #[must_use]
    pub fn with_test(mut self, test_id: impl Into<String>, mode: TestMode) -> Self {
        self.test_id = Some(test_id.into());
        self.mode = Some(mode.result_key().to_string());
        self
    }

    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Fill outcome, error kind, exit code and duration from a verdict.
    #[must_use]
    pub fn with_verdict(self, verdict: &ExecutionOutcome) -> Self {
        let timed_out = verdict.exit == Some(wasmparity_exec::ExitIndicator::Timeout);
        let mut entry = self
            .with_outcome(match (verdict.is_success(), timed_out) {
                (true, _) => Outcome::Pass,
                (false, true) => Outcome::Timeout,
                (false, false) => Outcome::Fail,
            })
            .with_duration_ms(u64::try_from(verdict.elapsed.as_millis()).unwrap_or(u64::MAX));
        if let Some(kind) = &verdict.error_kind {
            entry = entry.with_error_kind(kind.label());
        }
        if let Some(code) = verdict.exit.and_then(|exit| exit.code()) {
            entry = entry.with_exit_code(code);
        }
        entry
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Index of files produced by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Hash `path` and add it.
    pub fn add_file(&mut self, path: &Path, kind: impl Into<String>) -> io::Result<&mut Self> {
        let bytes = std::fs::read(path)?;
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.into(),
            sha256: sha256_hex(&bytes),
            size_bytes: Some(bytes.len() as u64),
        });
        Ok(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

/// Shared in-memory sink, readable while the log is still open.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes structured JSONL log entries for one run.
pub struct RunLog {
    writer: Box<dyn Write>,
    seq: u64,
    run_label: String,
    run_id: String,
    dropped: u64,
}

impl RunLog {
    /// Create a log that writes to a file.
    pub fn to_file(path: &Path, run_label: &str, run_id: &str) -> io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::with_writer(
            Box::new(io::BufWriter::new(file)),
            run_label,
            run_id,
        ))
    }

    /// Create a log backed by a [`LogBuffer`] (for testing).
    #[must_use]
    pub fn to_buffer(run_label: &str, run_id: &str) -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        let log = Self::with_writer(Box::new(buffer.clone()), run_label, run_id);
        (log, buffer)
    }

    /// A log that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_writer(Box::new(io::sink()), "wasmparity", "none")
    }

    fn with_writer(writer: Box<dyn Write>, run_label: &str, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_label: run_label.to_string(),
            run_id: run_id.to_string(),
            dropped: 0,
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.run_label, self.run_id, self.seq)
    }

    /// Emit a log entry with an auto-generated trace_id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(&trace_id, level, event);
        let line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Emit without failing the caller; write errors are counted.
    pub fn note(&mut self, entry: LogEntry) {
        if self.emit_entry(entry).is_err() {
            self.dropped += 1;
        }
    }

    /// Lines that could not be written.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

fn check_vocab(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &str,
    allowed: &[&str],
    line_number: usize,
    errors: &mut Vec<LogValidationError>,
) {
    if let Some(value) = obj.get(field).and_then(|v| v.as_str())
        && !allowed.contains(&value)
    {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message: format!("invalid {field}: '{value}'"),
        });
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<json>".to_string(),
                message: format!("invalid JSON: {e}"),
            });
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError {
            line_number,
            field: "<root>".to_string(),
            message: "expected JSON object".to_string(),
        });
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }

    check_vocab(obj, "level", &["debug", "info", "warn", "error"], line_number, &mut errors);
    check_vocab(obj, "mode", &["deterministic", "non_deterministic", "fail"], line_number, &mut errors);
    check_vocab(obj, "outcome", &["pass", "fail", "skip", "timeout"], line_number, &mut errors);
    check_vocab(
        obj,
        "phase",
        &["staging", "native_compile", "native_run", "wasm_compile", "wasm_run", "compare"],
        line_number,
        &mut errors,
    );

    // Per-test verdict lines must say which test they describe.
    if obj.contains_key("outcome") && !obj.get("test_id").is_some_and(serde_json::Value::is_string) {
        errors.push(LogValidationError {
            line_number,
            field: "test_id".to_string(),
            message: "outcome events must include test_id".to_string(),
        });
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(LogValidationError {
            line_number,
            field: "trace_id".to_string(),
            message: format!(
                "trace_id should follow <run_label>::<run_id>::<seq> format, got: '{trace_id}'"
            ),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<deserialization>".to_string(),
                message: format!("failed to deserialize: {e}"),
            });
            Err(errors)
        }
    }
}

/// Validate an entire JSONL file.
///
/// Returns the total line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ErrorKind;
    use std::time::Duration;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("wasmparity::run-1::001", LogLevel::Info, "run_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(parsed["trace_id"], "wasmparity::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "run_start");
        assert!(parsed.get("mode").is_none());
        assert!(parsed.get("test_id").is_none());
    }

    #[test]
    fn verdict_fields_are_copied() {
        let verdict = ExecutionOutcome::failure(ErrorKind::WasmTimeout, "Timed Out (timeout: 5s)")
            .with_exit(wasmparity_exec::ExitIndicator::Timeout)
            .with_elapsed(Duration::from_millis(5012));
        let entry = LogEntry::new("wasmparity::r::002", LogLevel::Warn, "test_outcome")
            .with_test("/s/a/deterministic/t.c", TestMode::Deterministic)
            .with_phase(Phase::WasmRun)
            .with_verdict(&verdict);
        let parsed: serde_json::Value = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(parsed["outcome"], "timeout");
        assert_eq!(parsed["error_kind"], "Lind_wasm_Timeout");
        assert_eq!(parsed["mode"], "deterministic");
        assert_eq!(parsed["phase"], "wasm_run");
        assert_eq!(parsed["duration_ms"], 5012);
        assert!(parsed.get("exit_code").is_none());
        assert!(validate_log_line(&entry.to_jsonl().unwrap(), 1).is_ok());
    }

    #[test]
    fn failed_verdict_records_its_exit_code() {
        let verdict = ExecutionOutcome::failure(ErrorKind::NativeSegfault, "")
            .with_exit(wasmparity_exec::ExitIndicator::Code(139));
        let entry = LogEntry::new("wasmparity::r::003", LogLevel::Warn, "test_outcome")
            .with_test("/s/a/fail/t.c", TestMode::Fail)
            .with_verdict(&verdict);
        assert_eq!(entry.outcome, Some(Outcome::Fail));
        assert_eq!(entry.exit_code, Some(139));
        assert_eq!(entry.error_kind.as_deref(), Some("Native_Segmentation_Fault"));
        assert_eq!(entry.duration_ms, Some(0));
    }

    #[test]
    fn validate_rejects_bad_vocab_and_missing_fields() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"critical","event":"x","mode":"strict"}"#;
        let errors = validate_log_line(json, 3).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
        assert!(errors.iter().any(|e| e.field == "level"));
        assert!(errors.iter().any(|e| e.field == "mode"));
        assert!(errors.iter().all(|e| e.line_number == 3));

        let trace = r#"{"timestamp":"t","trace_id":"a::b::001","level":"trace","event":"x"}"#;
        assert!(validate_log_line(trace, 1).is_err());
    }

    #[test]
    fn validate_requires_test_id_on_outcomes() {
        let json = r#"{"timestamp":"t","trace_id":"a::b::001","level":"info","event":"test_outcome","outcome":"pass"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "test_id"));
    }

    #[test]
    fn validate_invalid_json() {
        let errors = validate_log_line("not json at all", 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "<json>"));
    }

    #[test]
    fn run_log_generates_sequential_trace_ids() {
        let (mut log, buffer) = RunLog::to_buffer("wasmparity", "run-42");
        let e1 = log.emit(LogLevel::Info, "start").unwrap();
        let e2 = log.emit(LogLevel::Info, "end").unwrap();
        assert!(e1.trace_id.ends_with("::001"));
        assert!(e2.trace_id.ends_with("::002"));
        assert!(e1.trace_id.starts_with("wasmparity::run-42::"));
        assert_eq!(buffer.contents().lines().count(), 2);
        for (i, line) in buffer.contents().lines().enumerate() {
            assert!(validate_log_line(line, i + 1).is_ok());
        }
    }

    #[test]
    fn artifact_index_hashes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "abc").unwrap();
        let mut idx = ArtifactIndex::new("run-001");
        idx.add_file(&path, "results_json").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&idx.to_json().unwrap()).unwrap();
        assert_eq!(parsed["index_version"], 1);
        assert_eq!(
            parsed["artifacts"][0]["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(parsed["artifacts"][0]["size_bytes"], 3);
    }
}
