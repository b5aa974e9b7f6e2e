//! Source-level dependency analysis.
//!
//! Best-effort scan of a C test for the two kinds of runtime dependency the
//! suite relies on:
//!
//! - data files, referenced as string literals of the form `"testfiles/<name>"`
//! - executables, referenced as the path literal passed to the `exec*` family
//!   (`execl`, `execlp`, `execle`, `execv`, `execvp`, `execve`, `execvpe`)
//!
//! Only literal references are seen. Paths built at runtime (`sprintf`, string
//! concatenation, paths held in variables or argv arrays declared elsewhere)
//! are missed, so a miss shows up as a runtime failure of the test rather than
//! as a staging error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use regex::Regex;

/// Fixture directory name as seen from inside a test.
pub const FIXTURES_DIR: &str = "testfiles";
/// Baseline fixture present for every test.
pub const READLINK_TARGET: &str = "readlinkfile.txt";
/// Baseline symlink pointing at [`READLINK_TARGET`].
pub const READLINK_LINK: &str = "readlinkfile";

/// What a test needs staged before it can run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    /// Names relative to the fixtures directory.
    pub data_files: BTreeSet<String>,
    /// Referenced executable path (as written in the source) to the sibling
    /// source that produces it.
    pub executables: BTreeMap<String, PathBuf>,
    /// [`READLINK_TARGET`] plus the [`READLINK_LINK`] symlink to it.
    pub readlink_baseline: bool,
}

impl DependencySet {
    /// Nothing referenced by the source itself.
    #[must_use]
    pub fn has_no_references(&self) -> bool {
        self.data_files.is_empty() && self.executables.is_empty()
    }
}

const DATA_FILE_PATTERN: &str = r#""testfiles/([^"\\\n]*)""#;
const EXEC_PATTERN: &str = r#"\bexec(?:l|lp|le|v|vp|ve|vpe)\s*\(\s*"([^"\\\n]+)""#;

/// Compiled reference patterns; build once per run.
#[derive(Debug, Clone)]
pub struct DependencyScanner {
    data_file: Regex,
    exec: Regex,
}

impl DependencyScanner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            data_file: Regex::new(DATA_FILE_PATTERN)?,
            exec: Regex::new(EXEC_PATTERN)?,
        })
    }

    /// Scan `source_text` (a test living in `source_dir`).
    ///
    /// Deterministic and side-effect free: the same text always yields the
    /// same set. Every set includes the readlink baseline.
    #[must_use]
    pub fn analyze(&self, source_text: &str, source_dir: &Path) -> DependencySet {
        let mut deps = DependencySet {
            readlink_baseline: true,
            ..DependencySet::default()
        };

        for caps in self.data_file.captures_iter(source_text) {
            let name = caps[1].trim_end_matches('/');
            if !name.is_empty() {
                deps.data_files.insert(name.to_string());
            }
        }

        for caps in self.exec.captures_iter(source_text) {
            let referenced = &caps[1];
            if let Some(candidate) = sibling_source(referenced, source_dir) {
                deps.executables.insert(referenced.to_string(), candidate);
            }
        }

        deps
    }
}

/// `automated_tests/getuid` -> `<source_dir>/getuid.c`.
fn sibling_source(referenced: &str, source_dir: &Path) -> Option<PathBuf> {
    let name = Path::new(referenced).file_name()?.to_str()?;
    let stem = name.strip_suffix(".wasm").unwrap_or(name);
    if stem.is_empty() || stem.contains('.') {
        return None;
    }
    Some(source_dir.join(format!("{stem}.c")))
}
