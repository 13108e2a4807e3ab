//! Per-directory outcomes and the run summary built from them.

use std::time::Duration;

/// Terminal result of processing one test directory.
///
/// Produced exactly once per directory per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The build-only `check` invocation exited non-zero; the test was not run.
    BuildFailed,
    /// The build succeeded but the real `check` invocation exited non-zero.
    TestFailed,
    /// The real `check` invocation (or the build alone, in build-only mode) exited zero.
    TestPassed,
    /// The directory needs a capability the current build lacks.
    Skipped(String),
}

impl Outcome {
    /// Short machine-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::BuildFailed => "build_failed",
            Outcome::TestFailed => "failed",
            Outcome::TestPassed => "passed",
            Outcome::Skipped(_) => "skipped",
        }
    }
}

/// Counts of outcomes over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub build_failed: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::BuildFailed => self.build_failed += 1,
            Outcome::TestFailed => self.failed += 1,
            Outcome::TestPassed => self.passed += 1,
            Outcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.build_failed + self.skipped
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.build_failed > 0
    }
}
