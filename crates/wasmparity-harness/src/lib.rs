//! Differential test oracle: native reference build vs. wasm build.
//!
//! This crate provides:
//! - Discovery: find C tests and their mode (deterministic, non-deterministic, fail)
//! - Dependency analysis: data fixtures and exec'd helper programs a test references
//! - Staging: per-test fixtures and dependency executables, always restored afterwards
//! - Classification: run both builds under a deadline and map the result onto the error taxonomy
//! - Aggregation + reporting: per-mode JSON results, markdown and HTML summaries
//! - Structured logging: JSONL run log and an artifact index

#![forbid(unsafe_code)]

pub mod classify;
pub mod config;
pub mod deps;
pub mod discovery;
pub mod error;
pub mod outcome;
pub mod report;
pub mod results;
pub mod runner;
pub mod staging;
pub mod structured_log;

pub use classify::{Classifier, ExternalToolchain, Toolchain};
pub use config::{ConfigError, RunConfig};
pub use discovery::{TestCase, TestFilter, TestMode};
pub use error::HarnessError;
pub use outcome::{ErrorKind, ExecutionOutcome, Status};
pub use report::RunReport;
pub use results::{ResultSet, ResultSnapshot};
pub use runner::TestRunner;
pub use structured_log::RunLog;
