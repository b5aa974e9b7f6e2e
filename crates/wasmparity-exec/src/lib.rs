//! Toolchain execution adapter for the wasmparity harness.
//!
//! This crate is the seam between the harness and the outside world: it
//! compiles and runs the native reference build and the wasm build, always
//! under an explicit wall-clock deadline, and reports every process failure as
//! data ([`ExitIndicator`]) instead of an error the caller has to unwind.

#![forbid(unsafe_code)]

pub mod native;
pub mod process;
pub mod wasm;

use std::path::PathBuf;
use std::time::Duration;

pub use native::NativeToolchain;
pub use process::{
    ExitIndicator, ProcessError, ProcessRun, SEGFAULT_EXIT_CODES, is_segfault_code,
    run_with_timeout, signal_name,
};
pub use wasm::{BuildMirror, WasmToolchain, resolve_wasm_artifact, strip_invocation_echo};

/// Deadline for a single compiler invocation unless overridden.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a compile step.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    /// Produced binary; `None` on failure.
    pub artifact: Option<PathBuf>,
    /// Compiler diagnostics (or the spawn error).
    pub output: String,
    pub elapsed: Duration,
}

impl CompileOutcome {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.artifact.is_some()
    }

    /// A compiler killed at its deadline; counts as a failed compile.
    #[must_use]
    pub fn timed_out(timeout: Duration, elapsed: Duration, partial_output: &str) -> Self {
        let mut output = format!("Compilation Timed Out (timeout: {}s)", timeout.as_secs());
        if !partial_output.is_empty() {
            output.push('\n');
            output.push_str(partial_output);
        }
        Self {
            artifact: None,
            output,
            elapsed,
        }
    }
}

/// Result of running a compiled program.
#[derive(Debug, Clone)]
pub struct ProgramRun {
    pub exit: ExitIndicator,
    /// Combined stdout + stderr.
    pub output: String,
    pub signal: Option<i32>,
    pub elapsed: Duration,
}

impl ProgramRun {
    #[must_use]
    pub fn timed_out(timeout: Duration, elapsed: Duration) -> Self {
        Self {
            exit: ExitIndicator::Timeout,
            output: format!("Timed Out (timeout: {}s)", timeout.as_secs()),
            signal: None,
            elapsed,
        }
    }

    #[must_use]
    pub fn unknown_error(message: impl Into<String>) -> Self {
        Self {
            exit: ExitIndicator::UnknownError,
            output: message.into(),
            signal: None,
            elapsed: Duration::ZERO,
        }
    }
}
