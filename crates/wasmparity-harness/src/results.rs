//! Result aggregation.
//!
//! [`ResultSet`] accumulates one [`ExecutionOutcome`] per test identity,
//! partitioned by [`TestMode`]. Once the run ends it is sealed into a
//! [`ResultSnapshot`], which is what gets serialized and rendered.
//!
//! Per mode the following always hold:
//! - `total_test_cases == success.len() + failures.len()`
//! - every failure appears in exactly one error bucket
//! - a test identity is recorded at most once

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;
use wasmparity_exec::ExitIndicator;

use crate::discovery::TestMode;
use crate::outcome::{ErrorKind, ExecutionOutcome, PhaseTimings, Status};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("test `{test}` already recorded under {mode}")]
    DuplicateTest { test: String, mode: &'static str },
}

/// Stored per-test record, as it appears under `test_cases`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseRecord {
    pub status: Status,
    pub error_type: Option<String>,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitIndicator>,
    #[serde(flatten)]
    pub timings: PhaseTimings,
    /// Seconds, wall clock, staging included.
    pub elapsed: f64,
}

impl From<ExecutionOutcome> for TestCaseRecord {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            status: outcome.status,
            error_type: outcome.error_kind.map(|kind| kind.label().to_string()),
            output: outcome.output,
            exit: outcome.exit,
            timings: outcome.timings,
            elapsed: outcome.elapsed.as_secs_f64(),
        }
    }
}

/// Aggregate for one test mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeResults {
    total_test_cases: usize,
    success: Vec<String>,
    failures: Vec<String>,
    buckets: BTreeMap<usize, Vec<String>>,
    test_cases: BTreeMap<String, TestCaseRecord>,
}

impl Default for ModeResults {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeResults {
    /// Empty aggregate with every taxonomy bucket present.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_test_cases: 0,
            success: Vec::new(),
            failures: Vec::new(),
            buckets: (0..ErrorKind::TAXONOMY.len()).map(|i| (i, Vec::new())).collect(),
            test_cases: BTreeMap::new(),
        }
    }

    fn record(
        &mut self,
        mode: TestMode,
        test: &str,
        outcome: ExecutionOutcome,
    ) -> Result<(), AggregateError> {
        if self.test_cases.contains_key(test) {
            return Err(AggregateError::DuplicateTest {
                test: test.to_string(),
                mode: mode.result_key(),
            });
        }

        self.total_test_cases += 1;
        match (&outcome.status, &outcome.error_kind) {
            (Status::Success, _) => self.success.push(test.to_string()),
            (Status::Failure, kind) => {
                self.failures.push(test.to_string());
                let bucket = kind.as_ref().map_or(&ErrorKind::UnknownFailure, ErrorKind::bucket);
                let slot = bucket_index(bucket);
                self.buckets.entry(slot).or_default().push(test.to_string());
            }
        }
        self.test_cases
            .insert(test.to_string(), TestCaseRecord::from(outcome));
        Ok(())
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total_test_cases
    }

    #[must_use]
    pub fn successes(&self) -> &[String] {
        &self.success
    }

    #[must_use]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Tests bucketed under `kind` (unrecognized kinds map to `UnknownFailure`).
    #[must_use]
    pub fn bucket(&self, kind: &ErrorKind) -> &[String] {
        self.buckets
            .get(&bucket_index(kind.bucket()))
            .map_or(&[][..], Vec::as_slice)
    }

    #[must_use]
    pub fn test_case(&self, test: &str) -> Option<&TestCaseRecord> {
        self.test_cases.get(test)
    }

    pub fn test_cases(&self) -> impl Iterator<Item = (&String, &TestCaseRecord)> {
        self.test_cases.iter()
    }

    /// Checks the counting invariants; used by tests and before persisting.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let bucketed: usize = self.buckets.values().map(Vec::len).sum();
        self.total_test_cases == self.success.len() + self.failures.len()
            && bucketed == self.failures.len()
            && self.test_cases.len() == self.total_test_cases
    }
}

fn bucket_index(kind: &ErrorKind) -> usize {
    ErrorKind::TAXONOMY
        .iter()
        .position(|known| known == kind)
        .unwrap_or(ErrorKind::TAXONOMY.len() - 1)
}

impl Serialize for ModeResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("total_test_cases", &self.total_test_cases)?;
        map.serialize_entry("number_of_success", &self.success.len())?;
        map.serialize_entry("success", &self.success)?;
        map.serialize_entry("number_of_failures", &self.failures.len())?;
        map.serialize_entry("failures", &self.failures)?;
        for (i, kind) in ErrorKind::TAXONOMY.iter().enumerate() {
            let tests = self.buckets.get(&i).map_or(&[][..], Vec::as_slice);
            map.serialize_entry(&format!("number_of_{}", kind.label()), &tests.len())?;
            map.serialize_entry(kind.label(), tests)?;
        }
        map.serialize_entry("test_cases", &self.test_cases)?;
        map.end()
    }
}

/// Mutable accumulator for one run.
#[derive(Debug, Default)]
pub struct ResultSet {
    deterministic: ModeResults,
    non_deterministic: ModeResults,
    fail: ModeResults,
}

impl ResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one verdict. A second record for the same identity is rejected
    /// and leaves the set untouched.
    pub fn record(
        &mut self,
        mode: TestMode,
        test: &str,
        outcome: ExecutionOutcome,
    ) -> Result<(), AggregateError> {
        self.mode_mut(mode).record(mode, test, outcome)
    }

    #[must_use]
    pub fn mode(&self, mode: TestMode) -> &ModeResults {
        match mode {
            TestMode::Deterministic => &self.deterministic,
            TestMode::NonDeterministic => &self.non_deterministic,
            TestMode::Fail => &self.fail,
        }
    }

    fn mode_mut(&mut self, mode: TestMode) -> &mut ModeResults {
        match mode {
            TestMode::Deterministic => &mut self.deterministic,
            TestMode::NonDeterministic => &mut self.non_deterministic,
            TestMode::Fail => &mut self.fail,
        }
    }

    /// Seal the run.
    #[must_use]
    pub fn seal(self) -> ResultSnapshot {
        ResultSnapshot {
            deterministic: self.deterministic,
            non_deterministic: self.non_deterministic,
            fail: self.fail,
        }
    }
}

/// Immutable view of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSnapshot {
    deterministic: ModeResults,
    non_deterministic: ModeResults,
    fail: ModeResults,
}

impl ResultSnapshot {
    #[must_use]
    pub fn mode(&self, mode: TestMode) -> &ModeResults {
        match mode {
            TestMode::Deterministic => &self.deterministic,
            TestMode::NonDeterministic => &self.non_deterministic,
            TestMode::Fail => &self.fail,
        }
    }

    pub fn modes(&self) -> impl Iterator<Item = (TestMode, &ModeResults)> {
        TestMode::ALL.into_iter().map(|mode| (mode, self.mode(mode)))
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.modes().map(|(_, m)| m.total()).sum()
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.modes().map(|(_, m)| m.successes().len()).sum()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.modes().map(|(_, m)| m.failures().len()).sum()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.modes().all(|(_, m)| m.is_consistent())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
