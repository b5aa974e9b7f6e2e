//! Staging of sources, fixtures and exec'd dependencies.
//!
//! Everything staged for a test is owned by a guard whose `Drop` undoes it,
//! so cleanup happens on every exit path including early returns:
//!
//! - [`StagedSource`]: the per-test staging directory and build byproducts
//! - [`DependencySlot`]: a dependency executable placed into the fs root,
//!   with any pre-existing file backed up and restored on release
//! - [`FixturesRoot`]: the fixtures directory for the whole run

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde_json::json;
use thiserror::Error;
use walkdir::WalkDir;
use wasmparity_exec::CompileOutcome;
use wasmparity_exec::native::NATIVE_BINARY_EXTENSION;
use wasmparity_exec::wasm::WASM_ARTIFACT_EXTENSION;

use crate::config::RunConfig;
use crate::deps::{DependencySet, READLINK_LINK, READLINK_TARGET};
use crate::discovery::{COMPARE_SCRIPT_EXTENSION, EXPECTED_DIR, TestCase};
use crate::structured_log::{LogEntry, LogLevel, Phase, RunLog};

/// Suffix of the backup kept while a dependency slot is occupied.
pub const BACKUP_SUFFIX: &str = ".wasmparity-bak";
const HEADER_EXTENSION: &str = "h";

#[derive(Debug, Error)]
pub enum StagingError {
    /// Caller broke a precondition; not a test verdict.
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to compile dependency {source_path}:\n{output}")]
    DependencyCompile { source_path: PathBuf, output: String },
}

impl StagingError {
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> StagingError + 'a {
    move |source| StagingError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Dependency slot
// ---------------------------------------------------------------------------

/// A dependency executable installed at a path inside the fs root.
///
/// On acquire, a backup left behind by an earlier run is first moved back
/// over `dest`. Then anything at `dest` is moved to `dest` +
/// [`BACKUP_SUFFIX`]. On release (explicit or via `Drop`) the installed file
/// is removed, the backup is moved back, and any parent directories created
/// for the slot are removed again.
#[derive(Debug)]
pub struct DependencySlot {
    dest: PathBuf,
    backup: Option<PathBuf>,
    created_dirs: Vec<PathBuf>,
    released: bool,
}

impl DependencySlot {
    pub fn acquire(dest: &Path) -> io::Result<Self> {
        let mut created_dirs = Vec::new();
        if let Some(parent) = dest.parent() {
            let mut missing = parent;
            while !missing.exists() {
                created_dirs.push(missing.to_path_buf());
                match missing.parent() {
                    Some(up) => missing = up,
                    None => break,
                }
            }
            fs::create_dir_all(parent)?;
        }

        // A backup left by an interrupted run holds the original file.
        let backup = backup_path(dest);
        if fs::symlink_metadata(&backup).is_ok() {
            fs::rename(&backup, dest)?;
        }

        let backup = if fs::symlink_metadata(dest).is_ok() {
            fs::rename(dest, &backup)?;
            Some(backup)
        } else {
            None
        };

        Ok(Self {
            dest: dest.to_path_buf(),
            backup,
            created_dirs,
            released: false,
        })
    }

    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    #[must_use]
    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Copy `artifact` into the slot.
    pub fn install(&self, artifact: &Path) -> io::Result<()> {
        fs::copy(artifact, &self.dest).map(|_| ())
    }

    /// Restore the previous state. Idempotent.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.dest) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        if let Some(backup) = self.backup.take() {
            fs::rename(&backup, &self.dest)?;
        }
        // Deepest first; a directory that gained other entries stays.
        for dir in &self.created_dirs {
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }
}

impl Drop for DependencySlot {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn backup_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// The run-wide fixtures directory; removed when dropped.
#[derive(Debug)]
pub struct FixturesRoot {
    path: PathBuf,
}

impl FixturesRoot {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FixturesRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// A test source staged outside the suite tree.
#[derive(Debug)]
pub struct StagedSource {
    dir: PathBuf,
    build_dir: PathBuf,
    source: PathBuf,
    expected_output: Option<PathBuf>,
    compare_script: Option<PathBuf>,
    keep: bool,
}

impl StagedSource {
    /// Staging directory (mirrors the test's directory under the suite root).
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The staged `.c` file handed to the toolchains.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn expected_output(&self) -> Option<&Path> {
        self.expected_output.as_deref()
    }

    #[must_use]
    pub fn compare_script(&self) -> Option<&Path> {
        self.compare_script.as_deref()
    }
}

impl Drop for StagedSource {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        let _ = fs::remove_dir_all(&self.dir);
        let _ = fs::remove_dir_all(&self.build_dir);
    }
}

/// Which fixtures a test got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureReport {
    pub staged: Vec<String>,
    pub missing: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stager
// ---------------------------------------------------------------------------

/// Performs all filesystem staging for a run.
#[derive(Debug, Clone)]
pub struct ArtifactStager {
    suite_root: PathBuf,
    fixtures_source: PathBuf,
    fixtures_dest: PathBuf,
    fs_root: PathBuf,
    stage_root: PathBuf,
    build_root: PathBuf,
    keep_artifacts: bool,
}

impl ArtifactStager {
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        Self {
            suite_root: fs::canonicalize(&config.suite_root)
                .unwrap_or_else(|_| config.suite_root.clone()),
            fixtures_source: config.fixtures_source.clone(),
            fixtures_dest: config.fixtures_dest(),
            fs_root: config.fs_root.clone(),
            stage_root: config.stage_root(),
            build_root: config.build_root(),
            keep_artifacts: config.keep_artifacts,
        }
    }

    #[must_use]
    pub fn fixtures_dest(&self) -> &Path {
        &self.fixtures_dest
    }

    /// Clear and recreate the fixtures directory for a run.
    pub fn reset_fixtures_root(&self) -> Result<FixturesRoot, StagingError> {
        self.clean_fixtures()?;
        fs::create_dir_all(&self.fixtures_dest)
            .map_err(io_err("create", &self.fixtures_dest))?;
        Ok(FixturesRoot {
            path: self.fixtures_dest.clone(),
        })
    }

    /// Remove the fixtures directory. Returns whether anything was removed.
    pub fn clean_fixtures(&self) -> Result<bool, StagingError> {
        match fs::remove_dir_all(&self.fixtures_dest) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StagingError::Io {
                action: "remove",
                path: self.fixtures_dest.clone(),
                source,
            }),
        }
    }

    /// Copy every fixture (pre-test mode). Returns the number of top-level
    /// entries copied.
    pub fn stage_all_fixtures(&self) -> Result<usize, StagingError> {
        self.clean_fixtures()?;
        fs::create_dir_all(&self.fixtures_dest)
            .map_err(io_err("create", &self.fixtures_dest))?;
        let mut count = 0;
        if self.fixtures_source.is_dir() {
            let entries = fs::read_dir(&self.fixtures_source)
                .map_err(io_err("read", &self.fixtures_source))?;
            for entry in entries {
                let entry = entry.map_err(io_err("read", &self.fixtures_source))?;
                copy_tree(&entry.path(), &self.fixtures_dest.join(entry.file_name()))?;
                count += 1;
            }
        }
        self.stage_readlink_baseline()?;
        Ok(count)
    }

    /// Repopulate the fixtures directory with exactly what `deps` names,
    /// including the readlink baseline when it asks for one. Missing fixtures
    /// are logged, not fatal.
    pub fn prepare_fixtures(
        &self,
        test: &TestCase,
        deps: &DependencySet,
        log: &mut RunLog,
    ) -> Result<FixtureReport, StagingError> {
        if !self.fixtures_dest.starts_with(&self.fs_root) {
            return Err(StagingError::Contract(format!(
                "fixtures dir {} is outside fs root {}",
                self.fixtures_dest.display(),
                self.fs_root.display()
            )));
        }
        self.clean_fixtures()?;
        fs::create_dir_all(&self.fixtures_dest)
            .map_err(io_err("create", &self.fixtures_dest))?;

        let mut report = FixtureReport::default();
        for name in &deps.data_files {
            let src = self.fixtures_source.join(name);
            if !is_plain_relative(name) || !src.exists() {
                log.note(
                    LogEntry::new("", LogLevel::Warn, "fixture_missing")
                        .with_test(test.id(), test.mode())
                        .with_phase(Phase::Staging)
                        .with_details(json!({ "fixture": name })),
                );
                report.missing.push(name.clone());
                continue;
            }
            copy_tree(&src, &self.fixtures_dest.join(name))?;
            report.staged.push(name.clone());
        }
        if deps.readlink_baseline {
            self.stage_readlink_baseline()?;
        }
        Ok(report)
    }

    fn stage_readlink_baseline(&self) -> Result<(), StagingError> {
        let target = self.fixtures_dest.join(READLINK_TARGET);
        if !target.exists() {
            let seeded = self.fixtures_source.join(READLINK_TARGET);
            if seeded.is_file() {
                fs::copy(&seeded, &target).map_err(io_err("copy", &seeded))?;
            } else {
                fs::File::create(&target).map_err(io_err("create", &target))?;
            }
        }
        let link = self.fixtures_dest.join(READLINK_LINK);
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link).map_err(io_err("remove", &link))?;
        }
        link_or_copy(&target, &link).map_err(io_err("link", &link))
    }

    /// Compile each exec'd dependency and install it where the test expects
    /// it, relative to the fs root. Slots restore prior state when dropped.
    pub fn prepare_executables<F>(
        &self,
        test: &TestCase,
        deps: &DependencySet,
        staged: &StagedSource,
        compile: F,
        log: &mut RunLog,
    ) -> Result<Vec<DependencySlot>, StagingError>
    where
        F: Fn(&Path) -> CompileOutcome,
    {
        let mut slots = Vec::with_capacity(deps.executables.len());
        for (referenced, candidate) in &deps.executables {
            if !candidate.is_file() {
                log.note(
                    LogEntry::new("", LogLevel::Warn, "dependency_source_missing")
                        .with_test(test.id(), test.mode())
                        .with_phase(Phase::Staging)
                        .with_details(json!({
                            "referenced": referenced,
                            "candidate": candidate.display().to_string(),
                        })),
                );
                continue;
            }

            let staged_candidate = staged.dir.join(candidate.file_name().unwrap_or_default());
            if fs::symlink_metadata(&staged_candidate).is_err() {
                link_or_copy(candidate, &staged_candidate)
                    .map_err(io_err("stage", &staged_candidate))?;
            }

            let outcome = compile(&staged_candidate);
            let Some(artifact) = outcome.artifact else {
                return Err(StagingError::DependencyCompile {
                    source_path: candidate.clone(),
                    output: outcome.output,
                });
            };

            let dest = self.resolve_in_fs_root(referenced)?;
            let slot = DependencySlot::acquire(&dest).map_err(io_err("prepare", &dest))?;
            slot.install(&artifact).map_err(io_err("install", &dest))?;
            log.note(
                LogEntry::new("", LogLevel::Info, "dependency_injected")
                    .with_test(test.id(), test.mode())
                    .with_phase(Phase::Staging)
                    .with_artifacts(vec![dest.display().to_string()])
                    .with_details(json!({
                        "referenced": referenced,
                        "backed_up": slot.backup().is_some(),
                    })),
            );
            slots.push(slot);
        }
        Ok(slots)
    }

    fn resolve_in_fs_root(&self, referenced: &str) -> Result<PathBuf, StagingError> {
        let mut dest = self.fs_root.clone();
        for component in Path::new(referenced).components() {
            match component {
                Component::Normal(part) => dest.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(StagingError::Contract(format!(
                        "dependency path escapes the fs root: {referenced}"
                    )));
                }
            }
        }
        Ok(dest)
    }

    /// Stage `test` (plus its `expected/` directory, comparison script and
    /// local headers) under the stage root.
    pub fn stage_source(&self, test: &TestCase) -> Result<StagedSource, StagingError> {
        let original = test.source();
        if !original.is_absolute() {
            return Err(StagingError::Contract(format!(
                "test source must be absolute: {}",
                original.display()
            )));
        }
        let rel_dir = test
            .dir()
            .strip_prefix(&self.suite_root)
            .or_else(|_| test.dir().strip_prefix("/"))
            .map(Path::to_path_buf)
            .map_err(|_| StagingError::Contract(format!("cannot stage {}", original.display())))?;

        let dir = self.stage_root.join(&rel_dir);
        let build_dir = self.build_root.join(&rel_dir);
        fs::create_dir_all(&dir).map_err(io_err("create", &dir))?;

        let source = dir.join(test.file_name());
        for stale in [
            source.clone(),
            source.with_extension(NATIVE_BINARY_EXTENSION),
            source.with_extension(WASM_ARTIFACT_EXTENSION),
            build_dir.join(test.file_name()).with_extension(WASM_ARTIFACT_EXTENSION),
        ] {
            remove_if_present(&stale)?;
        }
        link_or_copy(original, &source).map_err(io_err("stage", &source))?;

        // Quoted includes resolve against the staged file's directory.
        let headers = fs::read_dir(test.dir()).map_err(io_err("read", test.dir()))?;
        for entry in headers.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(HEADER_EXTENSION) {
                let staged_header = dir.join(entry.file_name());
                remove_if_present(&staged_header)?;
                link_or_copy(&path, &staged_header).map_err(io_err("stage", &staged_header))?;
            }
        }

        // Tests may read any file under `expected/`, not only their own.
        let expected_src = test.dir().join(EXPECTED_DIR);
        if expected_src.is_dir() {
            let expected_dir = dir.join(EXPECTED_DIR);
            fs::create_dir_all(&expected_dir).map_err(io_err("create", &expected_dir))?;
            let entries = fs::read_dir(&expected_src).map_err(io_err("read", &expected_src))?;
            for entry in entries.flatten() {
                let staged_entry = expected_dir.join(entry.file_name());
                remove_if_present(&staged_entry)?;
                link_or_copy(&entry.path(), &staged_entry)
                    .map_err(io_err("stage", &staged_entry))?;
            }
        }
        let expected_path = test.expected_output_path();
        let expected_output = match expected_path.file_name() {
            Some(name) if expected_path.is_file() => Some(dir.join(EXPECTED_DIR).join(name)),
            _ => None,
        };

        let compare_script = match test.compare_script_path() {
            path if path.is_file() => {
                let staged_script = source.with_extension(COMPARE_SCRIPT_EXTENSION);
                remove_if_present(&staged_script)?;
                link_or_copy(&path, &staged_script).map_err(io_err("stage", &staged_script))?;
                Some(staged_script)
            }
            _ => None,
        };

        Ok(StagedSource {
            dir,
            build_dir,
            source,
            expected_output,
            compare_script,
            keep: self.keep_artifacts,
        })
    }
}

fn is_plain_relative(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fn remove_if_present(path: &Path) -> Result<(), StagingError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StagingError::Io {
            action: "remove",
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Symlink `src` at `dst`, falling back to a copy where links are unavailable.
fn link_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(src, dst).is_ok() {
            return Ok(());
        }
    }
    fs::copy(src, dst).map(|_| ())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), StagingError> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(io_err("create", parent))?;
        }
        fs::copy(src, dst).map_err(io_err("copy", src))?;
        return Ok(());
    }
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|err| StagingError::Io {
            action: "walk",
            path: src.to_path_buf(),
            source: err.into(),
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(Path::new(""));
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_err("create", &target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_err("copy", entry.path()))?;
        }
    }
    Ok(())
}
