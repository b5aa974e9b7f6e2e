//! Host C toolchain: the reference build.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::process::{ExitIndicator, run_with_timeout};
use crate::{CompileOutcome, DEFAULT_COMPILE_TIMEOUT, ProgramRun};

/// Extension of the native executable written beside the source.
pub const NATIVE_BINARY_EXTENSION: &str = "native";

/// Compiles and runs C sources with the host compiler.
#[derive(Debug, Clone)]
pub struct NativeToolchain {
    compiler: String,
    compile_timeout: Duration,
}

impl NativeToolchain {
    #[must_use]
    pub fn new(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    #[must_use]
    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    /// `<dir>/<stem>.native` for `<dir>/<stem>.c`.
    #[must_use]
    pub fn binary_path(source: &Path) -> PathBuf {
        source.with_extension(NATIVE_BINARY_EXTENSION)
    }

    /// `<cc> <source> -o <binary>`, killed after the compile timeout.
    pub fn compile(&self, source: &Path) -> CompileOutcome {
        let binary = Self::binary_path(source);
        let mut cmd = Command::new(&self.compiler);
        cmd.arg(source).arg("-o").arg(&binary);
        if let Some(dir) = source.parent() {
            cmd.current_dir(dir);
        }

        match run_with_timeout(&mut cmd, self.compile_timeout) {
            Ok(run) if run.exit == ExitIndicator::Timeout => {
                CompileOutcome::timed_out(self.compile_timeout, run.elapsed, &run.combined_output())
            }
            Ok(run) if run.exit.is_clean() => CompileOutcome {
                artifact: Some(binary),
                output: run.combined_output(),
                elapsed: run.elapsed,
            },
            Ok(run) => CompileOutcome {
                artifact: None,
                output: run.combined_output(),
                elapsed: run.elapsed,
            },
            Err(err) => CompileOutcome {
                artifact: None,
                output: format!("Exception during native compilation: {err}"),
                elapsed: Duration::ZERO,
            },
        }
    }

    /// Execute `binary` from `cwd`, killing it after `timeout`.
    pub fn run(&self, binary: &Path, cwd: &Path, timeout: Duration) -> ProgramRun {
        let mut cmd = Command::new(binary);
        cmd.current_dir(cwd);
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
            Err(err) => ProgramRun::unknown_error(format!("Exception during native run: {err}")),
        }
    }
}

impl Default for NativeToolchain {
    fn default() -> Self {
        Self::new("gcc")
    }
}
