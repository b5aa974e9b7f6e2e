//! Wasm toolchain: external compile front-end plus runtime wrapper.
//!
//! The compile front-end is invoked as `<compile_cmd> <source.c>`. Depending on
//! the tooling version the `.wasm` lands beside the source or under a build
//! root that mirrors the source tree; [`resolve_wasm_artifact`] checks both.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::process::{ExitIndicator, run_with_timeout};
use crate::{CompileOutcome, DEFAULT_COMPILE_TIMEOUT, ProgramRun};

/// Canonical artifact extension.
pub const WASM_ARTIFACT_EXTENSION: &str = "wasm";

/// A build root that mirrors `source_root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMirror {
    pub source_root: PathBuf,
    pub build_root: PathBuf,
}

impl BuildMirror {
    /// Where the tooling would place the artifact for `source`, if `source`
    /// lives under the mirrored root.
    #[must_use]
    pub fn artifact_for(&self, source: &Path) -> Option<PathBuf> {
        let rel = source.strip_prefix(&self.source_root).ok()?;
        Some(
            self.build_root
                .join(rel)
                .with_extension(WASM_ARTIFACT_EXTENSION),
        )
    }
}

/// Pick the produced artifact: beside-source first, then the build mirror.
/// When neither exists the beside-source path is returned so error messages
/// name the conventional location.
#[must_use]
pub fn resolve_wasm_artifact(source: &Path, mirror: Option<&BuildMirror>) -> PathBuf {
    let beside_source = source.with_extension(WASM_ARTIFACT_EXTENSION);
    if beside_source.exists() {
        return beside_source;
    }
    if let Some(mirrored) = mirror.and_then(|m| m.artifact_for(source))
        && mirrored.exists()
    {
        return mirrored;
    }
    beside_source
}

/// Drop the wrapper's echo of its own command line.
#[must_use]
pub fn strip_invocation_echo(output: &str) -> String {
    output.lines().skip(1).collect::<Vec<_>>().join("\n")
}

#[derive(Debug, Clone)]
pub struct WasmToolchain {
    compile_cmd: PathBuf,
    run_cmd: PathBuf,
    mirror: Option<BuildMirror>,
    compile_timeout: Duration,
}

impl WasmToolchain {
    #[must_use]
    pub fn new(compile_cmd: impl Into<PathBuf>, run_cmd: impl Into<PathBuf>) -> Self {
        Self {
            compile_cmd: compile_cmd.into(),
            run_cmd: run_cmd.into(),
            mirror: None,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_build_mirror(mut self, mirror: BuildMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    #[must_use]
    pub fn mirror(&self) -> Option<&BuildMirror> {
        self.mirror.as_ref()
    }

    /// Every location the artifact for `source` may occupy after a compile.
    #[must_use]
    pub fn artifact_candidates(&self, source: &Path) -> Vec<PathBuf> {
        let mut out = vec![source.with_extension(WASM_ARTIFACT_EXTENSION)];
        if let Some(mirrored) = self.mirror.as_ref().and_then(|m| m.artifact_for(source)) {
            out.push(mirrored);
        }
        out
    }

    pub fn compile(&self, source: &Path) -> CompileOutcome {
        let mut cmd = Command::new(&self.compile_cmd);
        cmd.arg(source);
        if let Some(dir) = source.parent() {
            cmd.current_dir(dir);
        }

        let run = match run_with_timeout(&mut cmd, self.compile_timeout) {
            Ok(run) if run.exit == ExitIndicator::Timeout => {
                return CompileOutcome::timed_out(
                    self.compile_timeout,
                    run.elapsed,
                    &run.combined_output(),
                );
            }
            Ok(run) => run,
            Err(err) => {
                return CompileOutcome {
                    artifact: None,
                    output: format!("Exception during compilation: {err}"),
                    elapsed: Duration::ZERO,
                };
            }
        };

        if !run.exit.is_clean() {
            return CompileOutcome {
                artifact: None,
                output: format!("{}\n{}", run.stdout, run.stderr),
                elapsed: run.elapsed,
            };
        }

        let artifact = resolve_wasm_artifact(source, self.mirror.as_ref());
        if !artifact.exists() {
            return CompileOutcome {
                artifact: None,
                output: format!(
                    "Compilation completed but expected wasm output was not found: {}\n{}",
                    artifact.display(),
                    run.combined_output()
                ),
                elapsed: run.elapsed,
            };
        }

        CompileOutcome {
            artifact: Some(artifact),
            output: String::new(),
            elapsed: run.elapsed,
        }
    }

    /// `<run_cmd> <artifact>` from `cwd`; the first output line is the
    /// wrapper's echo and is stripped.
    pub fn run(&self, artifact: &Path, cwd: &Path, timeout: Duration) -> ProgramRun {
        let mut cmd = Command::new(&self.run_cmd);
        cmd.arg(artifact).current_dir(cwd);
        match run_with_timeout(&mut cmd, timeout) {
            Ok(run) if run.exit == ExitIndicator::Timeout => {
                ProgramRun::timed_out(timeout, run.elapsed)
            }
            Ok(run) => ProgramRun {
                exit: run.exit,
                output: strip_invocation_echo(&run.combined_output()),
                signal: run.signal,
                elapsed: run.elapsed,
            },
            Err(err) => ProgramRun::unknown_error(format!("Exception during wasm run: {err}")),
        }
    }
}
