//! Run configuration.
//!
//! Built once per invocation from CLI flags and environment, then passed by
//! reference. All paths are absolute by construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::deps::FIXTURES_DIR;

/// Default per-run deadline, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
/// Default per-compile deadline, in seconds.
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BASE_DIR: &str = "/home/lind/lind-wasm";
pub const DEFAULT_COMPILER: &str = "gcc";
pub const DEFAULT_SKIP_LIST: &str = "skip_test_cases.txt";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive number of seconds, got {secs}")]
    NonPositiveTimeout { name: &'static str, secs: u64 },
    #[error("{name} must be an absolute path, got {path}")]
    RelativePath { name: &'static str, path: PathBuf },
}

/// Everything a run needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub base_dir: PathBuf,
    /// Root searched for tests.
    pub suite_root: PathBuf,
    /// Where fixtures are copied from.
    pub fixtures_source: PathBuf,
    /// Root the wasm runtime presents as `/`; programs run from here.
    pub fs_root: PathBuf,
    /// Staged sources and build byproducts.
    pub artifacts_dir: PathBuf,
    pub timeout: Duration,
    /// Deadline for each compiler invocation.
    pub compile_timeout: Duration,
    pub native_compiler: String,
    pub wasm_compile: PathBuf,
    pub wasm_run: PathBuf,
    pub keep_artifacts: bool,
}

impl RunConfig {
    #[must_use]
    pub fn builder(base_dir: impl Into<PathBuf>) -> RunConfigBuilder {
        RunConfigBuilder::new(base_dir.into())
    }

    /// `<fs_root>/testfiles`
    #[must_use]
    pub fn fixtures_dest(&self) -> PathBuf {
        self.fs_root.join(FIXTURES_DIR)
    }

    /// `<artifacts>/stage`
    #[must_use]
    pub fn stage_root(&self) -> PathBuf {
        self.artifacts_dir.join("stage")
    }

    /// `<artifacts>/build`
    #[must_use]
    pub fn build_root(&self) -> PathBuf {
        self.artifacts_dir.join("build")
    }
}

/// Fills defaults derived from the base directory.
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    base_dir: PathBuf,
    suite_root: Option<PathBuf>,
    fixtures_source: Option<PathBuf>,
    fs_root: Option<PathBuf>,
    artifacts_dir: Option<PathBuf>,
    timeout_secs: u64,
    compile_timeout_secs: u64,
    native_compiler: String,
    wasm_compile: Option<PathBuf>,
    wasm_run: Option<PathBuf>,
    keep_artifacts: bool,
}

impl RunConfigBuilder {
    fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            suite_root: None,
            fixtures_source: None,
            fs_root: None,
            artifacts_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            compile_timeout_secs: DEFAULT_COMPILE_TIMEOUT_SECS,
            native_compiler: DEFAULT_COMPILER.to_string(),
            wasm_compile: None,
            wasm_run: None,
            keep_artifacts: false,
        }
    }

    #[must_use]
    pub fn suite_root(mut self, path: Option<PathBuf>) -> Self {
        self.suite_root = path;
        self
    }

    #[must_use]
    pub fn fixtures_source(mut self, path: Option<PathBuf>) -> Self {
        self.fixtures_source = path;
        self
    }

    #[must_use]
    pub fn fs_root(mut self, path: Option<PathBuf>) -> Self {
        self.fs_root = path;
        self
    }

    #[must_use]
    pub fn artifacts_dir(mut self, path: Option<PathBuf>) -> Self {
        self.artifacts_dir = path;
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.compile_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn native_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.native_compiler = compiler.into();
        self
    }

    #[must_use]
    pub fn wasm_compile(mut self, path: Option<PathBuf>) -> Self {
        self.wasm_compile = path;
        self
    }

    #[must_use]
    pub fn wasm_run(mut self, path: Option<PathBuf>) -> Self {
        self.wasm_run = path;
        self
    }

    #[must_use]
    pub fn keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        for (name, secs) in [
            ("timeout", self.timeout_secs),
            ("compile timeout", self.compile_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::NonPositiveTimeout { name, secs });
            }
        }
        let base = require_absolute("LIND_WASM_BASE", self.base_dir)?;
        let tests = base.join("tests");
        let scripts = base.join("scripts");

        let suite_root = self.suite_root.unwrap_or_else(|| tests.join("unit-tests"));
        let fixtures_source = self.fixtures_source.unwrap_or_else(|| tests.join(FIXTURES_DIR));
        let fs_root = self
            .fs_root
            .unwrap_or_else(|| base.join("src").join("RawPOSIX").join("tmp"));
        let artifacts_dir = self
            .artifacts_dir
            .unwrap_or_else(|| base.join("target").join("wasmparity"));
        let wasm_compile = self
            .wasm_compile
            .unwrap_or_else(|| scripts.join("lind_compile"));
        let wasm_run = self.wasm_run.unwrap_or_else(|| scripts.join("lind_run"));

        Ok(RunConfig {
            suite_root: require_absolute("suite root", suite_root)?,
            fixtures_source: require_absolute("fixtures source", fixtures_source)?,
            fs_root: require_absolute("LIND_FS_ROOT", fs_root)?,
            artifacts_dir: require_absolute("artifacts dir", artifacts_dir)?,
            wasm_compile: require_absolute("LIND_WASM_COMPILE", wasm_compile)?,
            wasm_run: require_absolute("LIND_WASM_RUN", wasm_run)?,
            timeout: Duration::from_secs(self.timeout_secs),
            compile_timeout: Duration::from_secs(self.compile_timeout_secs),
            native_compiler: self.native_compiler,
            keep_artifacts: self.keep_artifacts,
            base_dir: base,
        })
    }
}

fn require_absolute(name: &'static str, path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(ConfigError::RelativePath { name, path })
    }
}

/// Make `path` absolute against `cwd`, for CLI inputs.
#[must_use]
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// clap value parser for `--timeout`.
pub fn parse_timeout(raw: &str) -> Result<u64, String> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err("timeout must be greater than zero".to_string()),
        Ok(secs) => Ok(secs),
        Err(err) => Err(format!("invalid timeout '{raw}': {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_from_base() {
        let config = RunConfig::builder("/opt/lind").build().unwrap();
        assert_eq!(config.suite_root, PathBuf::from("/opt/lind/tests/unit-tests"));
        assert_eq!(config.fixtures_source, PathBuf::from("/opt/lind/tests/testfiles"));
        assert_eq!(config.fs_root, PathBuf::from("/opt/lind/src/RawPOSIX/tmp"));
        assert_eq!(config.fixtures_dest(), PathBuf::from("/opt/lind/src/RawPOSIX/tmp/testfiles"));
        assert_eq!(config.wasm_compile, PathBuf::from("/opt/lind/scripts/lind_compile"));
        assert_eq!(config.wasm_run, PathBuf::from("/opt/lind/scripts/lind_run"));
        assert_eq!(config.stage_root(), PathBuf::from("/opt/lind/target/wasmparity/stage"));
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.compile_timeout, Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SECS));
        assert_eq!(config.native_compiler, "gcc");
        assert!(!config.keep_artifacts);
    }

    #[test]
    fn overrides_win() {
        let config = RunConfig::builder("/opt/lind")
            .fs_root(Some(PathBuf::from("/tmp/fsroot")))
            .timeout_secs(30)
            .native_compiler("clang")
            .keep_artifacts(true)
            .build()
            .unwrap();
        assert_eq!(config.fs_root, PathBuf::from("/tmp/fsroot"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.native_compiler, "clang");
        assert!(config.keep_artifacts);
    }

    #[test]
    fn rejects_zero_timeout_and_relative_paths() {
        assert_eq!(
            RunConfig::builder("/opt/lind").timeout_secs(0).build(),
            Err(ConfigError::NonPositiveTimeout { name: "timeout", secs: 0 })
        );
        assert_eq!(
            RunConfig::builder("/opt/lind").compile_timeout_secs(0).build(),
            Err(ConfigError::NonPositiveTimeout { name: "compile timeout", secs: 0 })
        );
        assert!(matches!(
            RunConfig::builder("relative/base").build(),
            Err(ConfigError::RelativePath { name: "LIND_WASM_BASE", .. })
        ));
        assert!(matches!(
            RunConfig::builder("/opt/lind")
                .fs_root(Some(PathBuf::from("tmp")))
                .build(),
            Err(ConfigError::RelativePath { name: "LIND_FS_ROOT", .. })
        ));
    }

    #[test]
    fn timeout_parser() {
        assert_eq!(parse_timeout("10"), Ok(10));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("abc").is_err());
    }
}
