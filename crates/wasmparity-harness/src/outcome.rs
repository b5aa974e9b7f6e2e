//! Per-test verdicts and the failure taxonomy.
//!
//! Every [`ErrorKind`] has a stable label (the key used in the result JSON)
//! and a human description (used in progress lines and reports). Labels that
//! are not part of the taxonomy survive as [`ErrorKind::Unrecognized`] and are
//! bucketed under [`ErrorKind::UnknownFailure`] by the aggregator.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use wasmparity_exec::ExitIndicator;

/// Classified reason a test did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NativeCompileFailure,
    NativeRuntimeFailure,
    NativeSegfault,
    NativeTimeout,
    WasmCompileFailure,
    WasmRuntimeFailure,
    WasmSegfault,
    WasmTimeout,
    OutputMismatch,
    FailModeBothSucceeded,
    FailModeNativeOnlySucceeded,
    FailModeWasmOnlySucceeded,
    FailModeNativeCompile,
    FailModeWasmCompile,
    DependencyStaging,
    UnknownFailure,
    /// A label outside the taxonomy, kept verbatim.
    Unrecognized(String),
}

impl ErrorKind {
    /// Every bucket the aggregator pre-populates, in report order.
    pub const TAXONOMY: [ErrorKind; 16] = [
        ErrorKind::NativeCompileFailure,
        ErrorKind::NativeRuntimeFailure,
        ErrorKind::NativeSegfault,
        ErrorKind::NativeTimeout,
        ErrorKind::WasmCompileFailure,
        ErrorKind::WasmRuntimeFailure,
        ErrorKind::WasmSegfault,
        ErrorKind::WasmTimeout,
        ErrorKind::OutputMismatch,
        ErrorKind::FailModeBothSucceeded,
        ErrorKind::FailModeNativeOnlySucceeded,
        ErrorKind::FailModeWasmOnlySucceeded,
        ErrorKind::FailModeNativeCompile,
        ErrorKind::FailModeWasmCompile,
        ErrorKind::DependencyStaging,
        ErrorKind::UnknownFailure,
    ];

    /// Stable key used in the result JSON.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::NativeCompileFailure => "Failure_native_compiling",
            Self::NativeRuntimeFailure => "Failure_native_running",
            Self::NativeSegfault => "Native_Segmentation_Fault",
            Self::NativeTimeout => "Native_Timeout",
            Self::WasmCompileFailure => "Lind_wasm_compiling",
            Self::WasmRuntimeFailure => "Lind_wasm_runtime",
            Self::WasmSegfault => "Lind_wasm_Segmentation_Fault",
            Self::WasmTimeout => "Lind_wasm_Timeout",
            Self::OutputMismatch => "Output_mismatch",
            Self::FailModeBothSucceeded => "Fail_both_succeeded",
            Self::FailModeNativeOnlySucceeded => "Fail_native_only_succeeded",
            Self::FailModeWasmOnlySucceeded => "Fail_wasm_only_succeeded",
            Self::FailModeNativeCompile => "Fail_native_compiling",
            Self::FailModeWasmCompile => "Fail_wasm_compiling",
            Self::DependencyStaging => "Dependency_staging",
            Self::UnknownFailure => "Unknown_Failure",
            Self::Unrecognized(label) => label,
        }
    }

    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::NativeCompileFailure => "Compilation Failure Native",
            Self::NativeRuntimeFailure => "Runtime Failure Native",
            Self::NativeSegfault => "Segmentation Fault Native",
            Self::NativeTimeout => "Timeout During Native",
            Self::WasmCompileFailure => "Lind Wasm Compile Failure",
            Self::WasmRuntimeFailure => "Lind Wasm Runtime Failure",
            Self::WasmSegfault => "Lind Wasm Segmentation Failure",
            Self::WasmTimeout => "Timeout During Lind Wasm run",
            Self::OutputMismatch => "GCC and Wasm Output mismatch",
            Self::FailModeBothSucceeded => "Fail Mode: Both Native and Wasm Succeeded",
            Self::FailModeNativeOnlySucceeded => "Fail Mode: Only Native Succeeded",
            Self::FailModeWasmOnlySucceeded => "Fail Mode: Only Wasm Succeeded",
            Self::FailModeNativeCompile => "Fail Mode: Native Compile Failure",
            Self::FailModeWasmCompile => "Fail Mode: Wasm Compile Failure",
            Self::DependencyStaging => "Dependency Staging Failure",
            Self::UnknownFailure => "Unknown Failure",
            Self::Unrecognized(label) => label,
        }
    }

    /// Parse a label; anything outside the taxonomy becomes `Unrecognized`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        Self::TAXONOMY
            .iter()
            .find(|kind| kind.label() == label)
            .cloned()
            .unwrap_or_else(|| Self::Unrecognized(label.to_string()))
    }

    /// The aggregator bucket this kind is counted under.
    #[must_use]
    pub fn bucket(&self) -> &ErrorKind {
        match self {
            Self::Unrecognized(_) => &Self::UnknownFailure,
            known => known,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Success,
    Failure,
}

/// Seconds spent in each toolchain phase; zero for phases that never ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub native_compile_time: f64,
    pub native_run_time: f64,
    pub wasm_compile_time: f64,
    pub wasm_run_time: f64,
}

/// Verdict for one test.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: Status,
    /// Present exactly when `status` is `Failure`.
    pub error_kind: Option<ErrorKind>,
    /// Program output on success, diagnostic text on failure.
    pub output: String,
    /// Exit indicator of the run that decided the verdict, when one did.
    pub exit: Option<ExitIndicator>,
    pub timings: PhaseTimings,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            error_kind: None,
            output: output.into(),
            exit: None,
            timings: PhaseTimings::default(),
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn failure(kind: ErrorKind, output: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            error_kind: Some(kind),
            output: output.into(),
            exit: None,
            timings: PhaseTimings::default(),
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_exit(mut self, exit: ExitIndicator) -> Self {
        self.exit = Some(exit);
        self
    }

    #[must_use]
    pub fn with_timings(mut self, timings: PhaseTimings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Description for progress lines: the kind's description on failure.
    #[must_use]
    pub fn headline(&self) -> &str {
        match &self.error_kind {
            Some(kind) => kind.description(),
            None => "Success",
        }
    }
}
