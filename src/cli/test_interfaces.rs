//! Test runner I/O boundary interfaces
//!
//! This module defines trait-based abstractions for the two operations that touch the outside
//! world:
//! - Test discovery (filesystem walk for `validate.sh` drivers)
//! - Check execution (build tool invocation with output captured into a trace file)
//!
//! The runner itself only sees these traits, so tests can substitute fakes that record
//! invocations instead of spawning `make`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use walkdir::WalkDir;

/// Name of the per-directory driver script.
pub const DRIVER_SCRIPT: &str = "validate.sh";

/// Errors that occur during test operations
#[derive(Debug, Error)]
pub enum TestError {
    #[error("failed to create trace file {}: {source}", .path.display())]
    Trace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{program}` in {}: {source}", .dir.display())]
    Spawn {
        program: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Test Discovery Interface
// ============================================================================

/// Find test directories under a set of base directories.
pub trait TestDiscovery {
    /// Return every directory (recursively) under `bases` that contains a driver script, in walk
    /// order: base by base, parents before children, siblings sorted by name.
    fn discover(&self, bases: &[PathBuf]) -> Vec<PathBuf>;
}

/// Filesystem-based discovery using `walkdir`.
#[derive(Debug, Default)]
pub struct WalkDiscovery;

impl TestDiscovery for WalkDiscovery {
    fn discover(&self, bases: &[PathBuf]) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for base in bases {
            for entry in WalkDir::new(base).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::warn!(base = %base.display(), error = %err, "skipping unreadable path");
                        continue;
                    }
                };
                if entry.file_type().is_dir() && entry.path().join(DRIVER_SCRIPT).is_file() {
                    dirs.push(entry.into_path());
                }
            }
        }
        dirs
    }
}

// ============================================================================
// Build Tool Interface
// ============================================================================

/// Which variant of the `check` target to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckMode {
    /// Compile and link only; the test-execution step is forced to a no-op.
    BuildOnly,
    /// Build if needed, then run the driver.
    Run,
}

/// Exit status of one build tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStatus {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl PhaseStatus {
    pub const SUCCESS: PhaseStatus = PhaseStatus { code: Some(0) };

    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run a directory's `check` target and wait for it.
///
/// Implementations must send both stdout and stderr of whatever they run into `trace`, in
/// order, and must not return before the invocation has finished.
pub trait BuildTool: Sync {
    fn check(&self, dir: &Path, mode: CheckMode, trace: &File) -> Result<PhaseStatus, TestError>;
}

/// `make check` with reduced verbosity.
#[derive(Debug, Clone)]
pub struct Make {
    program: String,
}

impl Default for Make {
    fn default() -> Self {
        Self::new("make")
    }
}

impl Make {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed to the build tool for `mode`.
    pub fn check_args(mode: CheckMode) -> Vec<&'static str> {
        let mut args = vec!["check", "--silent", "LIBTOOLFLAGS=--silent"];
        if mode == CheckMode::BuildOnly {
            // `true` replaces the test driver, so the check target builds and "passes" trivially.
            args.push("TESTS_ENVIRONMENT=true");
        }
        args
    }
}

impl BuildTool for Make {
    fn check(&self, dir: &Path, mode: CheckMode, trace: &File) -> Result<PhaseStatus, TestError> {
        let stdout = trace.try_clone()?;
        let stderr = trace.try_clone()?;
        let status = Command::new(&self.program)
            .args(Self::check_args(mode))
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|source| TestError::Spawn {
                program: self.program.clone(),
                dir: dir.to_path_buf(),
                source,
            })?;
        Ok(PhaseStatus { code: status.code() })
    }
}
