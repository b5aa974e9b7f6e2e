//! Verdict procedures for the three test modes.
//!
//! | mode              | oracle                                  | pass condition                         |
//! |-------------------|-----------------------------------------|----------------------------------------|
//! | deterministic     | expected-output file, else native run   | trimmed outputs equal                  |
//! | non-deterministic | comparison script, when present         | wasm exits 0 (and script exits 0)      |
//! | fail              | none                                    | both native and wasm exit non-zero     |
//!
//! In fail mode an abort (134/139) is a non-zero exit like any other.
//!
//! Every toolchain failure is mapped onto an [`ErrorKind`]; classification
//! never returns an error.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use wasmparity_exec::{
    BuildMirror, CompileOutcome, ExitIndicator, NativeToolchain, ProgramRun, WasmToolchain,
    is_segfault_code, run_with_timeout, strip_invocation_echo,
};

use crate::config::RunConfig;

use crate::discovery::{TestCase, TestMode};
use crate::outcome::{ErrorKind, ExecutionOutcome, PhaseTimings};
use crate::staging::StagedSource;

/// Label for a comparison script that could not be run to completion.
pub const COMPARE_SCRIPT_FAILURE: &str = "Compare_script_failure";

/// The operations the classifier needs from the outside world.
pub trait Toolchain {
    fn compile_native(&self, source: &Path) -> CompileOutcome;
    fn run_native(&self, binary: &Path, cwd: &Path, timeout: Duration) -> ProgramRun;
    fn compile_wasm(&self, source: &Path) -> CompileOutcome;
    fn run_wasm(&self, artifact: &Path, cwd: &Path, timeout: Duration) -> ProgramRun;
    /// Execute `script` with the wasm output then the native output as
    /// arguments. The script must be executable.
    fn run_compare_script(
        &self,
        script: &Path,
        wasm_output: &str,
        native_output: &str,
        timeout: Duration,
    ) -> ProgramRun;
}

/// Real toolchains: the host compiler and the wasm compile/run wrappers.
#[derive(Debug, Clone)]
pub struct ExternalToolchain {
    pub native: NativeToolchain,
    pub wasm: WasmToolchain,
}

impl ExternalToolchain {
    #[must_use]
    pub fn new(native: NativeToolchain, wasm: WasmToolchain) -> Self {
        Self { native, wasm }
    }

    /// Toolchains named by `config`, with the compile deadline applied and
    /// wasm artifacts resolved through the build-root mirror of the stage.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            NativeToolchain::new(config.native_compiler.clone())
                .with_compile_timeout(config.compile_timeout),
            WasmToolchain::new(&config.wasm_compile, &config.wasm_run)
                .with_compile_timeout(config.compile_timeout)
                .with_build_mirror(BuildMirror {
                    source_root: config.stage_root(),
                    build_root: config.build_root(),
                }),
        )
    }
}

impl Toolchain for ExternalToolchain {
    fn compile_native(&self, source: &Path) -> CompileOutcome {
        self.native.compile(source)
    }

    fn run_native(&self, binary: &Path, cwd: &Path, timeout: Duration) -> ProgramRun {
        self.native.run(binary, cwd, timeout)
    }

    fn compile_wasm(&self, source: &Path) -> CompileOutcome {
        self.wasm.compile(source)
    }

    fn run_wasm(&self, artifact: &Path, cwd: &Path, timeout: Duration) -> ProgramRun {
        self.wasm.run(artifact, cwd, timeout)
    }

    fn run_compare_script(
        &self,
        script: &Path,
        wasm_output: &str,
        native_output: &str,
        timeout: Duration,
    ) -> ProgramRun {
        let mut cmd = Command::new(script);
        cmd.arg(wasm_output).arg(native_output);
        if let Some(dir) = script.parent() {
            cmd.current_dir(dir);
        }
        match run_with_timeout(&mut cmd, timeout) {
            Ok(run) if run.exit == ExitIndicator::Timeout => {
                ProgramRun::timed_out(timeout, run.elapsed)
            }
            Ok(run) => ProgramRun {
                exit: run.exit,
                output: run.combined_output(),
                signal: run.signal,
                elapsed: run.elapsed,
            },
            Err(err) => ProgramRun::unknown_error(format!("Exception during compare script: {err}")),
        }
    }
}

/// Kind for a native run that did not exit cleanly; `None` for exit 0.
#[must_use]
pub fn native_exit_kind(exit: ExitIndicator) -> Option<ErrorKind> {
    match exit {
        ExitIndicator::Code(0) => None,
        ExitIndicator::Timeout => Some(ErrorKind::NativeTimeout),
        exit if exit.is_segfault() => Some(ErrorKind::NativeSegfault),
        ExitIndicator::Code(_) | ExitIndicator::UnknownError => {
            Some(ErrorKind::NativeRuntimeFailure)
        }
    }
}

/// Kind for a wasm run that did not exit cleanly; `None` for exit 0.
#[must_use]
pub fn wasm_exit_kind(exit: ExitIndicator) -> Option<ErrorKind> {
    match exit {
        ExitIndicator::Code(0) => None,
        ExitIndicator::Timeout => Some(ErrorKind::WasmTimeout),
        exit if exit.is_segfault() => Some(ErrorKind::WasmSegfault),
        ExitIndicator::Code(_) | ExitIndicator::UnknownError => Some(ErrorKind::WasmRuntimeFailure),
    }
}

/// Four-way verdict for fail mode once both sides ran to an exit code.
/// Every verdict carries both outputs below its headline.
#[must_use]
pub fn fail_mode_verdict(
    native_code: i32,
    native_output: &str,
    wasm_code: i32,
    wasm_output: &str,
) -> ExecutionOutcome {
    let (kind, headline) = match (native_code == 0, wasm_code == 0) {
        (false, false) => (
            None,
            format!(
                "Both native and wasm failed as expected (native exit {native_code}, wasm exit {wasm_code})"
            ),
        ),
        (true, true) => (
            Some(ErrorKind::FailModeBothSucceeded),
            "Expected both builds to fail, but both native and wasm succeeded".to_string(),
        ),
        (true, false) => (
            Some(ErrorKind::FailModeNativeOnlySucceeded),
            format!(
                "Expected both builds to fail, but native succeeded (exit 0) while wasm failed (exit {wasm_code})"
            ),
        ),
        (false, true) => (
            Some(ErrorKind::FailModeWasmOnlySucceeded),
            format!(
                "Expected both builds to fail, but wasm succeeded (exit 0) while native failed (exit {native_code})"
            ),
        ),
    };
    let output = format!("{headline}\n\n{}", mismatch_report(native_output, wasm_output));
    match kind {
        None => ExecutionOutcome::success(output),
        Some(kind) => ExecutionOutcome::failure(kind, output),
    }
}

/// Side-by-side message for an output mismatch.
#[must_use]
pub fn mismatch_report(native_output: &str, wasm_output: &str) -> String {
    format!("=== Native Output ===\n{native_output}\n\n=== WASM Output ===\n{wasm_output}")
}

/// Outputs match when equal after trimming surrounding whitespace.
#[must_use]
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    expected.trim() == actual.trim()
}

fn secs(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64()
}

/// Runs one staged test through its mode's procedure.
pub struct Classifier<'a, T: Toolchain + ?Sized> {
    toolchain: &'a T,
    timeout: Duration,
    run_cwd: &'a Path,
}

impl<'a, T: Toolchain + ?Sized> Classifier<'a, T> {
    #[must_use]
    pub fn new(toolchain: &'a T, timeout: Duration, run_cwd: &'a Path) -> Self {
        Self {
            toolchain,
            timeout,
            run_cwd,
        }
    }

    #[must_use]
    pub fn classify(&self, test: &TestCase, staged: &StagedSource) -> ExecutionOutcome {
        let mut timings = PhaseTimings::default();
        let outcome = match test.mode() {
            TestMode::Deterministic => self.deterministic(staged, &mut timings),
            TestMode::NonDeterministic => self.non_deterministic(staged, &mut timings),
            TestMode::Fail => self.fail(staged, &mut timings),
        };
        outcome.with_timings(timings)
    }

    fn deterministic(&self, staged: &StagedSource, timings: &mut PhaseTimings) -> ExecutionOutcome {
        let expected = match self.oracle_output(staged, timings) {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };
        let actual = match self.wasm_output(staged.source(), timings) {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };
        if outputs_match(&expected, &actual) {
            ExecutionOutcome::success(actual).with_exit(ExitIndicator::Code(0))
        } else {
            ExecutionOutcome::failure(ErrorKind::OutputMismatch, mismatch_report(&expected, &actual))
                .with_exit(ExitIndicator::Code(0))
        }
    }

    fn non_deterministic(
        &self,
        staged: &StagedSource,
        timings: &mut PhaseTimings,
    ) -> ExecutionOutcome {
        let Some(script) = staged.compare_script() else {
            return match self.wasm_output(staged.source(), timings) {
                Ok(output) => ExecutionOutcome::success(output).with_exit(ExitIndicator::Code(0)),
                Err(outcome) => outcome,
            };
        };

        let native = match self.oracle_output(staged, timings) {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };
        let wasm = match self.wasm_output(staged.source(), timings) {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };

        let verdict = self
            .toolchain
            .run_compare_script(script, wasm.trim(), native.trim(), self.timeout);
        let report = mismatch_report(&native, &wasm);
        match verdict.exit {
            ExitIndicator::Code(0) => {
                ExecutionOutcome::success(report).with_exit(ExitIndicator::Code(0))
            }
            ExitIndicator::Code(_) => ExecutionOutcome::failure(
                ErrorKind::OutputMismatch,
                format!("{report}\n{}", strip_invocation_echo(&verdict.output)),
            )
            .with_exit(verdict.exit),
            ExitIndicator::Timeout | ExitIndicator::UnknownError => ExecutionOutcome::failure(
                ErrorKind::from_label(COMPARE_SCRIPT_FAILURE),
                verdict.output,
            )
            .with_exit(verdict.exit),
        }
    }

    fn fail(&self, staged: &StagedSource, timings: &mut PhaseTimings) -> ExecutionOutcome {
        let source = staged.source();

        let compiled = self.toolchain.compile_native(source);
        timings.native_compile_time = secs(compiled.elapsed);
        let Some(binary) = compiled.artifact else {
            return ExecutionOutcome::failure(ErrorKind::FailModeNativeCompile, compiled.output);
        };
        let native = self.toolchain.run_native(&binary, self.run_cwd, self.timeout);
        timings.native_run_time = secs(native.elapsed);
        let native_code = match native.exit {
            ExitIndicator::Code(code) => code,
            exit => {
                let kind = native_exit_kind(exit).unwrap_or(ErrorKind::NativeRuntimeFailure);
                return ExecutionOutcome::failure(kind, native.output).with_exit(exit);
            }
        };

        let compiled = self.toolchain.compile_wasm(source);
        timings.wasm_compile_time = secs(compiled.elapsed);
        let Some(artifact) = compiled.artifact else {
            return ExecutionOutcome::failure(ErrorKind::FailModeWasmCompile, compiled.output);
        };
        let wasm = self.toolchain.run_wasm(&artifact, self.run_cwd, self.timeout);
        timings.wasm_run_time = secs(wasm.elapsed);
        let wasm_code = match wasm.exit {
            ExitIndicator::Code(code) => code,
            exit => {
                let kind = wasm_exit_kind(exit).unwrap_or(ErrorKind::WasmRuntimeFailure);
                return ExecutionOutcome::failure(kind, wasm.output).with_exit(exit);
            }
        };

        // Aborting counts as failing; the segfault kind only names a side
        // when the pair is already a defect.
        let mut verdict = fail_mode_verdict(native_code, &native.output, wasm_code, &wasm.output);
        let mut exit = ExitIndicator::Code(wasm_code);
        if verdict.error_kind.is_some() {
            if is_segfault_code(native_code) {
                verdict.error_kind = Some(ErrorKind::NativeSegfault);
                exit = ExitIndicator::Code(native_code);
            } else if is_segfault_code(wasm_code) {
                verdict.error_kind = Some(ErrorKind::WasmSegfault);
            }
        }
        verdict.with_exit(exit)
    }

    /// Expected-output file when staged, otherwise a native compile + run.
    fn oracle_output(
        &self,
        staged: &StagedSource,
        timings: &mut PhaseTimings,
    ) -> Result<String, ExecutionOutcome> {
        if let Some(path) = staged.expected_output() {
            return fs::read_to_string(path).map_err(|err| {
                ExecutionOutcome::failure(
                    ErrorKind::from_label("Failure_reading_expected_file"),
                    format!("Failed to read expected output {}: {err}", path.display()),
                )
            });
        }

        let compiled = self.toolchain.compile_native(staged.source());
        timings.native_compile_time = secs(compiled.elapsed);
        let Some(binary) = compiled.artifact else {
            return Err(ExecutionOutcome::failure(
                ErrorKind::NativeCompileFailure,
                compiled.output,
            ));
        };
        let run = self.toolchain.run_native(&binary, self.run_cwd, self.timeout);
        timings.native_run_time = secs(run.elapsed);
        match native_exit_kind(run.exit) {
            None => Ok(run.output),
            Some(kind) => Err(ExecutionOutcome::failure(kind, run.output).with_exit(run.exit)),
        }
    }

    /// Wasm compile + run; any non-clean exit is a classified failure.
    fn wasm_output(
        &self,
        source: &Path,
        timings: &mut PhaseTimings,
    ) -> Result<String, ExecutionOutcome> {
        let compiled = self.toolchain.compile_wasm(source);
        timings.wasm_compile_time = secs(compiled.elapsed);
        let Some(artifact) = compiled.artifact else {
            return Err(ExecutionOutcome::failure(
                ErrorKind::WasmCompileFailure,
                compiled.output,
            ));
        };
        let run = self.toolchain.run_wasm(&artifact, self.run_cwd, self.timeout);
        timings.wasm_run_time = secs(run.elapsed);
        match wasm_exit_kind(run.exit) {
            None => Ok(run.output),
            Some(kind) => Err(ExecutionOutcome::failure(kind, run.output).with_exit(run.exit)),
        }
    }
}
