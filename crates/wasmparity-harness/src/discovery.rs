//! Test discovery and selection.
//!
//! A test is any `*.c` file whose parent directory is named after a mode:
//! `deterministic`, `non-deterministic` or `fail`. Files elsewhere are not
//! tests (they are typically helper programs exec'd by other tests).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

/// Directory holding expected-output files beside each test group.
pub const EXPECTED_DIR: &str = "expected";
/// Extension of expected-output files.
pub const EXPECTED_EXTENSION: &str = "output";
/// Extension of per-test comparison scripts.
pub const COMPARE_SCRIPT_EXTENSION: &str = "py";
const SOURCE_EXTENSION: &str = "c";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Deterministic,
    NonDeterministic,
    Fail,
}

impl TestMode {
    pub const ALL: [TestMode; 3] = [Self::Deterministic, Self::NonDeterministic, Self::Fail];

    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.dir_name() == name)
    }

    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::NonDeterministic => "non-deterministic",
            Self::Fail => "fail",
        }
    }

    /// Key under which this mode's results are stored.
    #[must_use]
    pub fn result_key(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::NonDeterministic => "non_deterministic",
            Self::Fail => "fail",
        }
    }

    /// Mode implied by the directory containing `source`.
    #[must_use]
    pub fn for_source(source: &Path) -> Option<Self> {
        source
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .and_then(Self::from_dir_name)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("test path must be absolute: {0}")]
    NotAbsolute(PathBuf),
    #[error("{0} is not inside a deterministic, non-deterministic or fail directory")]
    UnknownMode(PathBuf),
    #[error("test file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read skip list {path}: {source}")]
    SkipList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One C test program. Identity is its resolved absolute source path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestCase {
    source: PathBuf,
    mode: TestMode,
}

impl TestCase {
    pub fn new(source: impl Into<PathBuf>, mode: TestMode) -> Result<Self, DiscoveryError> {
        let source = source.into();
        if !source.is_absolute() {
            return Err(DiscoveryError::NotAbsolute(source));
        }
        Ok(Self { source, mode })
    }

    /// Build from a path, inferring the mode from its directory.
    pub fn from_source(source: impl Into<PathBuf>) -> Result<Self, DiscoveryError> {
        let source = source.into();
        match TestMode::for_source(&source) {
            Some(mode) => Self::new(source, mode),
            None => Err(DiscoveryError::UnknownMode(source)),
        }
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn mode(&self) -> TestMode {
        self.mode
    }

    /// Identity string used as the result key.
    #[must_use]
    pub fn id(&self) -> String {
        self.source.display().to_string()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.source.parent().unwrap_or(Path::new("/"))
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        self.source
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stem(&self) -> &str {
        self.source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
    }

    /// `<dir>/expected/<stem>.output`
    #[must_use]
    pub fn expected_output_path(&self) -> PathBuf {
        self.dir()
            .join(EXPECTED_DIR)
            .join(format!("{}.{EXPECTED_EXTENSION}", self.stem()))
    }

    /// `<dir>/<stem>.py`
    #[must_use]
    pub fn compare_script_path(&self) -> PathBuf {
        self.source.with_extension(COMPARE_SCRIPT_EXTENSION)
    }

    /// Path relative to `root`, or the absolute path when outside it.
    #[must_use]
    pub fn relative_to(&self, root: &Path) -> PathBuf {
        self.source
            .strip_prefix(root)
            .map_or_else(|_| self.source.clone(), Path::to_path_buf)
    }
}

/// Every test under `suite_root`, sorted by path.
pub fn discover(suite_root: &Path) -> Result<Vec<TestCase>, DiscoveryError> {
    let root = resolve(suite_root);
    let mut tests = Vec::new();
    for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            root: root.clone(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXTENSION) {
            continue;
        }
        if let Some(mode) = TestMode::for_source(path) {
            tests.push(TestCase::new(path, mode)?);
        }
    }
    tests.sort();
    tests.dedup();
    Ok(tests)
}

/// Resolve explicitly named test files (relative paths resolve against `cwd`).
/// Order is kept; a file named twice runs once.
pub fn explicit_tests(paths: &[PathBuf], cwd: &Path) -> Result<Vec<TestCase>, DiscoveryError> {
    let mut seen = BTreeSet::new();
    let mut tests = Vec::with_capacity(paths.len());
    for path in paths {
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(path)
        };
        if !absolute.is_file() {
            return Err(DiscoveryError::NotFound(absolute));
        }
        let test = TestCase::from_source(resolve(&absolute))?;
        if seen.insert(test.source().to_path_buf()) {
            tests.push(test);
        }
    }
    Ok(tests)
}

/// Folder-level and per-file selection.
///
/// A test runs when it is inside at least one run folder (or no run folders
/// were given), inside no skip folder, and not named in the skip list. Skip
/// always wins over run.
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    run_folders: Vec<PathBuf>,
    skip_folders: Vec<PathBuf>,
    skip_list: BTreeSet<PathBuf>,
}

impl TestFilter {
    /// Folders resolve against `suite_root` when relative.
    #[must_use]
    pub fn new(
        suite_root: &Path,
        run_folders: &[PathBuf],
        skip_folders: &[PathBuf],
        skip_list: BTreeSet<PathBuf>,
    ) -> Self {
        let anchor = |folder: &PathBuf| resolve(&suite_root.join(folder));
        Self {
            run_folders: run_folders.iter().map(anchor).collect(),
            skip_folders: skip_folders.iter().map(anchor).collect(),
            skip_list: skip_list.iter().map(|p| resolve(&suite_root.join(p))).collect(),
        }
    }

    #[must_use]
    pub fn should_run(&self, test: &TestCase) -> bool {
        let source = test.source();
        if self.skip_list.contains(source) {
            return false;
        }
        if self.skip_folders.iter().any(|dir| source.starts_with(dir)) {
            return false;
        }
        self.run_folders.is_empty() || self.run_folders.iter().any(|dir| source.starts_with(dir))
    }

    #[must_use]
    pub fn apply(&self, tests: Vec<TestCase>) -> Vec<TestCase> {
        tests.into_iter().filter(|t| self.should_run(t)).collect()
    }
}

/// Read a skip list: one suite-relative path per line; blank lines and `#`
/// comments ignored. A missing file means "skip nothing".
pub fn load_skip_list(path: &Path) -> Result<BTreeSet<PathBuf>, DiscoveryError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(source) => {
            return Err(DiscoveryError::SkipList {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "int main(void) { return 0; }\n").unwrap();
    }

    #[test]
    fn mode_comes_from_parent_directory() {
        assert_eq!(
            TestMode::for_source(Path::new("/s/file_tests/deterministic/a.c")),
            Some(TestMode::Deterministic)
        );
        assert_eq!(
            TestMode::for_source(Path::new("/s/x/non-deterministic/a.c")),
            Some(TestMode::NonDeterministic)
        );
        assert_eq!(TestMode::for_source(Path::new("/s/x/fail/a.c")), Some(TestMode::Fail));
        assert_eq!(TestMode::for_source(Path::new("/s/x/automated_tests/a.c")), None);
    }

    #[test]
    fn relative_sources_are_rejected() {
        let err = TestCase::new("file_tests/deterministic/a.c", TestMode::Deterministic)
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotAbsolute(_)));
    }

    #[test]
    fn derived_paths() {
        let test = TestCase::from_source("/s/file_tests/deterministic/open.c").unwrap();
        assert_eq!(
            test.expected_output_path(),
            PathBuf::from("/s/file_tests/deterministic/expected/open.output")
        );
        assert_eq!(
            test.compare_script_path(),
            PathBuf::from("/s/file_tests/deterministic/open.py")
        );
        assert_eq!(test.stem(), "open");
        assert_eq!(
            test.relative_to(Path::new("/s")),
            PathBuf::from("file_tests/deterministic/open.c")
        );
    }

    #[test]
    fn discovery_is_sorted_and_ignores_non_mode_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b_tests/deterministic/z.c"));
        touch(&root.join("a_tests/fail/y.c"));
        touch(&root.join("a_tests/non-deterministic/x.c"));
        touch(&root.join("a_tests/automated_tests/helper.c"));
        fs::write(root.join("a_tests/fail/notes.txt"), "x").unwrap();

        let tests = discover(root).unwrap();
        let rel: Vec<_> = tests.iter().map(|t| t.relative_to(&resolve(root))).collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a_tests/fail/y.c"),
                PathBuf::from("a_tests/non-deterministic/x.c"),
                PathBuf::from("b_tests/deterministic/z.c"),
            ]
        );
        assert_eq!(tests[0].mode(), TestMode::Fail);
    }

    #[test]
    fn skip_wins_over_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = resolve(dir.path());
        touch(&root.join("file_tests/deterministic/a.c"));
        touch(&root.join("file_tests/deterministic/b.c"));
        touch(&root.join("memory_tests/deterministic/c.c"));
        let tests = discover(&root).unwrap();

        let filter = TestFilter::new(
            &root,
            &[PathBuf::from("file_tests")],
            &[],
            BTreeSet::from([PathBuf::from("file_tests/deterministic/b.c")]),
        );
        let kept: Vec<_> = filter.apply(tests.clone()).iter().map(|t| t.stem().to_string()).collect();
        assert_eq!(kept, vec!["a".to_string()]);

        let filter = TestFilter::new(
            &root,
            &[PathBuf::from("file_tests")],
            &[PathBuf::from("file_tests")],
            BTreeSet::new(),
        );
        assert!(filter.apply(tests).is_empty());
    }

    #[test]
    fn skip_list_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skip_test_cases.txt");
        fs::write(&path, "# flaky\nfile_tests/deterministic/a.c\n\n  memory_tests/fail/b.c  \n").unwrap();
        let list = load_skip_list(&path).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains(Path::new("memory_tests/fail/b.c")));
        assert!(load_skip_list(&dir.path().join("missing.txt")).unwrap().is_empty());
    }

    #[test]
    fn explicit_tests_require_a_mode_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("t/deterministic/a.c"));
        touch(&root.join("t/helpers/b.c"));
        let ok = explicit_tests(&[PathBuf::from("t/deterministic/a.c")], root).unwrap();
        assert_eq!(ok[0].mode(), TestMode::Deterministic);
        assert!(matches!(
            explicit_tests(&[PathBuf::from("t/helpers/b.c")], root),
            Err(DiscoveryError::UnknownMode(_))
        ));
        assert!(matches!(
            explicit_tests(&[PathBuf::from("t/deterministic/zz.c")], root),
            Err(DiscoveryError::NotFound(_))
        ));
    }

    #[test]
    fn explicit_tests_drop_repeated_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("t/deterministic/a.c"));
        touch(&root.join("t/fail/b.c"));
        let tests = explicit_tests(
            &[
                PathBuf::from("t/fail/b.c"),
                PathBuf::from("t/deterministic/a.c"),
                root.join("t/fail/b.c"),
                PathBuf::from("t/./deterministic/a.c"),
            ],
            root,
        )
        .unwrap();
        let stems: Vec<_> = tests.iter().map(|t| t.stem().to_string()).collect();
        assert_eq!(stems, vec!["b".to_string(), "a".to_string()]);
    }
}
