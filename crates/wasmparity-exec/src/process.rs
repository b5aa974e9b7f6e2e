//! Wall-clock bounded subprocess execution.
//!
//! Output is captured into anonymous temp files rather than pipes, so a chatty
//! child (or a grandchild that inherits the handles) can never block on a full
//! pipe while the parent is polling for the deadline.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shell convention for "terminated by signal N".
const SIGNAL_EXIT_BASE: i32 = 128;

/// Exit codes that mean the program aborted or faulted (SIGABRT, SIGSEGV).
pub const SEGFAULT_EXIT_CODES: [i32; 2] = [SIGNAL_EXIT_BASE + libc::SIGABRT, SIGNAL_EXIT_BASE + libc::SIGSEGV];

/// How a program run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitIndicator {
    /// The process exited (or was killed by a signal, reported as `128 + signo`).
    Code(i32),
    /// The wall-clock deadline expired and the process was killed.
    Timeout,
    /// The process could not be spawned or waited on.
    UnknownError,
}

impl ExitIndicator {
    /// Exit code 0.
    #[must_use]
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Code(0))
    }

    #[must_use]
    pub fn is_segfault(self) -> bool {
        matches!(self, Self::Code(code) if is_segfault_code(code))
    }

    #[must_use]
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(code),
            Self::Timeout | Self::UnknownError => None,
        }
    }
}

impl fmt::Display for ExitIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Timeout => f.write_str("timeout"),
            Self::UnknownError => f.write_str("unknown_error"),
        }
    }
}

impl Serialize for ExitIndicator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Code(code) => serializer.serialize_i32(*code),
            Self::Timeout => serializer.serialize_str("timeout"),
            Self::UnknownError => serializer.serialize_str("unknown_error"),
        }
    }
}

/// True for 134 (SIGABRT) and 139 (SIGSEGV).
#[must_use]
pub fn is_segfault_code(code: i32) -> bool {
    SEGFAULT_EXIT_CODES.contains(&code)
}

/// Short signal name for diagnostics.
#[must_use]
pub fn signal_name(signo: i32) -> &'static str {
    match signo {
        libc::SIGABRT => "SIGABRT",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGKILL => "SIGKILL",
        libc::SIGTERM => "SIGTERM",
        libc::SIGINT => "SIGINT",
        _ => "signal",
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait on `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to capture output of `{program}`: {source}")]
    Capture {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raw result of one bounded subprocess invocation.
#[derive(Debug, Clone)]
pub struct ProcessRun {
    pub exit: ExitIndicator,
    /// Terminating signal, when the process did not exit normally.
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessRun {
    /// stdout followed by stderr.
    #[must_use]
    pub fn combined_output(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

/// Run `command` to completion, killing it once `timeout` elapses.
/// stdin is always closed.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<ProcessRun, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let capture_err = |source| ProcessError::Capture {
        program: program.clone(),
        source,
    };

    let mut stdout_file = tempfile::tempfile().map_err(capture_err)?;
    let mut stderr_file = tempfile::tempfile().map_err(capture_err)?;

    let started_at = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file.try_clone().map_err(capture_err)?))
        .stderr(Stdio::from(stderr_file.try_clone().map_err(capture_err)?))
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    let wait_err = |source| ProcessError::Wait {
        program: program.clone(),
        source,
    };

    let (status, timed_out) = loop {
        if let Some(status) = child.try_wait().map_err(wait_err)? {
            break (status, false);
        }
        if started_at.elapsed() >= timeout {
            // The child may exit between try_wait and kill; wait() settles either way.
            let _ = child.kill();
            let status = child.wait().map_err(wait_err)?;
            break (status, true);
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed = started_at.elapsed();

    let stdout = read_capture(&mut stdout_file).map_err(capture_err)?;
    let stderr = read_capture(&mut stderr_file).map_err(capture_err)?;
    let (code, signal) = decode_status(status);

    Ok(ProcessRun {
        exit: if timed_out {
            ExitIndicator::Timeout
        } else {
            ExitIndicator::Code(code)
        },
        signal,
        stdout,
        stderr,
        elapsed,
    })
}

fn read_capture(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn decode_status(status: ExitStatus) -> (i32, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => (code, None),
        (None, Some(signo)) => (SIGNAL_EXIT_BASE + signo, Some(signo)),
        (None, None) => (-1, None),
    }
}

#[cfg(not(unix))]
fn decode_status(status: ExitStatus) -> (i32, Option<i32>) {
    (status.code().unwrap_or(-1), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segfault_codes_are_abort_and_segv() {
        assert_eq!(SEGFAULT_EXIT_CODES, [134, 139]);
        assert!(is_segfault_code(134));
        assert!(is_segfault_code(139));
        assert!(!is_segfault_code(1));
        assert!(!is_segfault_code(0));
    }

    #[test]
    fn exit_indicator_predicates() {
        assert!(ExitIndicator::Code(0).is_clean());
        assert!(!ExitIndicator::Code(1).is_clean());
        assert!(!ExitIndicator::Timeout.is_clean());
        assert!(ExitIndicator::Code(139).is_segfault());
        assert!(!ExitIndicator::Timeout.is_segfault());
        assert_eq!(ExitIndicator::UnknownError.code(), None);
        assert_eq!(ExitIndicator::Code(3).code(), Some(3));
    }

    #[test]
    fn exit_indicator_serializes_as_code_or_label() {
        assert_eq!(serde_json::to_string(&ExitIndicator::Code(2)).unwrap(), "2");
        assert_eq!(
            serde_json::to_string(&ExitIndicator::Timeout).unwrap(),
            "\"timeout\""
        );
        assert_eq!(ExitIndicator::UnknownError.to_string(), "unknown_error");
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_stderr_separately() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let run = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(run.exit, ExitIndicator::Code(3));
        assert_eq!(run.stdout, "out\n");
        assert_eq!(run.stderr, "err\n");
        assert_eq!(run.combined_output(), "out\nerr\n");
        assert_eq!(run.signal, None);
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_the_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let run = run_with_timeout(&mut cmd, Duration::from_millis(200)).unwrap();
        assert_eq!(run.exit, ExitIndicator::Timeout);
        assert!(run.elapsed < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn signal_death_maps_to_shell_convention() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "kill -SEGV $$"]);
        let run = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(run.exit, ExitIndicator::Code(139));
        assert_eq!(run.signal, Some(libc::SIGSEGV));
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut cmd = Command::new("/nonexistent/wasmparity/definitely-missing");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-missing"));
    }
}
