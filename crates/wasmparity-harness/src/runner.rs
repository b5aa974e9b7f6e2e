//! Sequential run loop.
//!
//! For each test: read and scan the source, stage it, stage fixtures and
//! exec'd dependencies, classify, record. Staging guards are scoped to the
//! test so a failure at any step still restores the filesystem before the
//! next test starts.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::json;

use crate::classify::{Classifier, Toolchain};
use crate::config::RunConfig;
use crate::deps::DependencyScanner;
use crate::discovery::TestCase;
use crate::error::HarnessError;
use crate::outcome::{ErrorKind, ExecutionOutcome};
use crate::results::ResultSet;
use crate::staging::{ArtifactStager, StagingError};
use crate::structured_log::{LogEntry, LogLevel, Outcome, Phase, RunLog};

/// Log phase a verdict's kind points at.
#[must_use]
pub fn phase_for(kind: &ErrorKind) -> Phase {
    match kind {
        ErrorKind::NativeCompileFailure | ErrorKind::FailModeNativeCompile => Phase::NativeCompile,
        ErrorKind::NativeRuntimeFailure | ErrorKind::NativeSegfault | ErrorKind::NativeTimeout => {
            Phase::NativeRun
        }
        ErrorKind::WasmCompileFailure | ErrorKind::FailModeWasmCompile => Phase::WasmCompile,
        ErrorKind::WasmRuntimeFailure | ErrorKind::WasmSegfault | ErrorKind::WasmTimeout => {
            Phase::WasmRun
        }
        ErrorKind::DependencyStaging => Phase::Staging,
        ErrorKind::OutputMismatch
        | ErrorKind::FailModeBothSucceeded
        | ErrorKind::FailModeNativeOnlySucceeded
        | ErrorKind::FailModeWasmOnlySucceeded
        | ErrorKind::UnknownFailure
        | ErrorKind::Unrecognized(_) => Phase::Compare,
    }
}

/// Runs a list of tests against one toolchain.
pub struct TestRunner<'a, T: Toolchain + ?Sized> {
    config: &'a RunConfig,
    toolchain: &'a T,
    stager: ArtifactStager,
    scanner: DependencyScanner,
}

impl<'a, T: Toolchain + ?Sized> TestRunner<'a, T> {
    pub fn new(config: &'a RunConfig, toolchain: &'a T) -> Result<Self, HarnessError> {
        Ok(Self {
            config,
            toolchain,
            stager: ArtifactStager::new(config),
            scanner: DependencyScanner::new()?,
        })
    }

    /// Run `tests` in order. `interrupt` is checked between tests; once set,
    /// the remaining tests are skipped and the partial set is returned.
    /// A test already recorded in this run is logged and skipped.
    pub fn run(
        &self,
        tests: &[TestCase],
        log: &mut RunLog,
        interrupt: &AtomicBool,
    ) -> Result<ResultSet, HarnessError> {
        let _fixtures = self
            .stager
            .reset_fixtures_root()
            .map_err(HarnessError::Setup)?;
        let mut results = ResultSet::new();
        let total = tests.len();

        log.note(
            LogEntry::new("", LogLevel::Info, "run_start").with_details(json!({
                "tests": total,
                "timeout_secs": self.config.timeout.as_secs(),
                "suite_root": self.config.suite_root.display().to_string(),
                "fs_root": self.config.fs_root.display().to_string(),
            })),
        );

        for (index, test) in tests.iter().enumerate() {
            if interrupt.load(Ordering::SeqCst) {
                eprintln!("Interrupted; skipping {} remaining test(s)", total - index);
                log.note(
                    LogEntry::new("", LogLevel::Warn, "run_interrupted")
                        .with_details(json!({ "completed": index, "remaining": total - index })),
                );
                break;
            }

            if results.mode(test.mode()).test_case(&test.id()).is_some() {
                eprintln!("Skipping {}: already ran", test.id());
                log.note(
                    LogEntry::new("", LogLevel::Warn, "test_duplicate")
                        .with_test(test.id(), test.mode())
                        .with_outcome(Outcome::Skip),
                );
                continue;
            }

            eprintln!(
                "[{}/{}] {}",
                index + 1,
                total,
                test.relative_to(&self.config.suite_root).display()
            );
            log.note(
                LogEntry::new("", LogLevel::Info, "test_start").with_test(test.id(), test.mode()),
            );

            let outcome = self.run_one(test, log)?;
            match &outcome.error_kind {
                None => eprintln!("SUCCESS"),
                Some(kind) => eprintln!("FAILURE: {}", kind.description()),
            }

            let mut entry = LogEntry::new(
                "",
                if outcome.is_success() {
                    LogLevel::Info
                } else {
                    LogLevel::Warn
                },
                "test_outcome",
            )
            .with_test(test.id(), test.mode())
            .with_verdict(&outcome);
            if let Some(kind) = &outcome.error_kind {
                entry = entry.with_phase(phase_for(kind));
            }
            log.note(entry);

            results.record(test.mode(), &test.id(), outcome)?;
        }

        log.note(LogEntry::new("", LogLevel::Info, "run_complete"));
        Ok(results)
    }

    /// One test, staging included. Only contract violations are errors.
    pub fn run_one(&self, test: &TestCase, log: &mut RunLog) -> Result<ExecutionOutcome, HarnessError> {
        let started = Instant::now();
        let staging_failure = |err: StagingError| -> Result<ExecutionOutcome, HarnessError> {
            if err.is_contract_violation() {
                return Err(HarnessError::Contract(err.to_string()));
            }
            Ok(ExecutionOutcome::failure(ErrorKind::DependencyStaging, err.to_string())
                .with_elapsed(started.elapsed()))
        };

        let text = match fs::read_to_string(test.source()) {
            Ok(text) => text,
            Err(err) => {
                return Ok(ExecutionOutcome::failure(
                    ErrorKind::DependencyStaging,
                    format!("Failed to read {}: {err}", test.source().display()),
                )
                .with_elapsed(started.elapsed()));
            }
        };
        let deps = self.scanner.analyze(&text, test.dir());

        let staged = match self.stager.stage_source(test) {
            Ok(staged) => staged,
            Err(err) => return staging_failure(err),
        };
        if let Err(err) = self.stager.prepare_fixtures(test, &deps, log) {
            return staging_failure(err);
        }
        let _slots = match self.stager.prepare_executables(
            test,
            &deps,
            &staged,
            |source| self.toolchain.compile_wasm(source),
            log,
        ) {
            Ok(slots) => slots,
            Err(err) => return staging_failure(err),
        };

        let classifier = Classifier::new(self.toolchain, self.config.timeout, &self.config.fs_root);
        let outcome = classifier.classify(test, &staged);
        Ok(outcome.with_elapsed(started.elapsed()))
    }
}
