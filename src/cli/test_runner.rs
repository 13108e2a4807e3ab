//! Test runner implementation (dispatch, build/run state machine, worker pool)
//!
//! ## TestReporter Trait
//!
//! The runner uses a `TestReporter` trait to separate reporting from execution. Reporters are
//! shared by every worker, so methods take `&self` and each call writes whole lines only.
//!
//! ## Per-directory flow
//!
//! 1. [`dispatch`] consults the capability registry. A directory that needs a missing capability
//!    is skipped without touching the filesystem.
//! 2. [`execute`] runs the build-only `check`, then (unless building only) the real `check`,
//!    with all output captured in `<dir>/make_check_output`.
//! 3. The trace file is moved into `<dir>/Validation/` when that directory exists.
//!
//! ## I/O Boundaries
//!
//! Discovery and build tool invocation live behind the traits in `test_interfaces.rs`.

use std::fs::{self, File};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use oomph_selftest_core::{CapabilityRegistry, Outcome, RunSummary};

use super::test_interfaces::{BuildTool, CheckMode, PhaseStatus, TestError};

/// Name of the trace file written into each test directory.
pub const TRACE_FILE_NAME: &str = "make_check_output";

/// Results directory the trace file is moved into once the run has finished.
pub const RESULTS_DIR_NAME: &str = "Validation";

const BUILD_HEADER: &str = "Building WITH FAKE TEST PASS CONDITION:\n";
const RUN_HEADER: &str = "\nRunning self test properly:\n";
const JUST_BUILD_NOTE: &str = "\nNot running self test because you set the 'just_build' option\n";

// ============================================================================
// Colours
// ============================================================================

/// Escape sequences used by the console reporter.
///
/// Passed to the reporter at construction; `PLAIN` disables colour entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub header: &'static str,
    pub ok: &'static str,
    pub build_fail: &'static str,
    pub test_fail: &'static str,
    pub reset: &'static str,
}

impl Palette {
    pub const ANSI: Palette = Palette {
        header: "\x1b[96m",
        ok: "\x1b[92m",
        build_fail: "\x1b[93m",
        test_fail: "\x1b[91m",
        reset: "\x1b[0m",
    };

    pub const PLAIN: Palette = Palette {
        header: "",
        ok: "",
        build_fail: "",
        test_fail: "",
        reset: "",
    };

    pub fn new(colour: bool) -> Self {
        if colour { Self::ANSI } else { Self::PLAIN }
    }

    /// Render `dir` with its last component highlighted.
    pub fn highlight(&self, dir: &Path) -> String {
        let parent = dir.parent().map(|p| p.display().to_string()).unwrap_or_default();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}{}{}", parent, self.header, name, self.reset)
    }

    /// The single console line reported for a finished directory.
    pub fn status_line(&self, dir: &Path, outcome: &Outcome) -> String {
        let (colour, tag) = match outcome {
            Outcome::BuildFailed => (self.build_fail, "[BUILD FAIL] ".to_string()),
            Outcome::TestFailed => (self.test_fail, "[FAILED]     ".to_string()),
            Outcome::TestPassed => (self.ok, "[OK]         ".to_string()),
            Outcome::Skipped(name) => (self.ok, format!("[NO {}]     ", name.to_uppercase())),
        };
        format!("{}{}{}{}", colour, tag, self.highlight(dir), self.reset)
    }
}

// ============================================================================
// Test Reporter Trait
// ============================================================================

/// Trait for reporting per-directory results.
///
/// Implement this trait to customize output format. Called concurrently from pool workers.
pub trait TestReporter: Sync {
    /// Called once discovery has produced the directory list
    fn on_discovery_complete(&self, _dirs: &[PathBuf]) {}

    /// Called exactly once per directory
    fn on_outcome(&self, dir: &Path, outcome: &Outcome);

    /// Called before `on_outcome` when the trace file could not be moved into the results directory
    fn on_relocation_warning(&self, dir: &Path, relocation: &Relocation);

    /// Called when all directories have been processed
    fn on_run_complete(&self, summary: &RunSummary);
}

/// Default console reporter: one coloured line per directory on stdout, warnings on stderr.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    palette: Palette,
}

impl ConsoleReporter {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }
}

impl TestReporter for ConsoleReporter {
    fn on_discovery_complete(&self, dirs: &[PathBuf]) {
        if dirs.is_empty() {
            eprintln!("No validate.sh scripts found");
        }
    }

    fn on_outcome(&self, dir: &Path, outcome: &Outcome) {
        println!("{}", self.palette.status_line(dir, outcome));
    }

    fn on_relocation_warning(&self, dir: &Path, relocation: &Relocation) {
        if let Some(message) = relocation.warning(dir) {
            eprintln!("{}", message);
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        println!();
        println!("{}", summary_line(summary));
    }
}

/// Machine-readable reporter: one JSON object per line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReporter;

impl TestReporter for JsonReporter {
    fn on_outcome(&self, dir: &Path, outcome: &Outcome) {
        let capability = match outcome {
            Outcome::Skipped(name) => serde_json::Value::String(name.clone()),
            _ => serde_json::Value::Null,
        };
        let record = serde_json::json!({
            "dir": dir.display().to_string(),
            "outcome": outcome.label(),
            "capability": capability,
        });
        println!("{}", record);
    }

    fn on_relocation_warning(&self, dir: &Path, relocation: &Relocation) {
        if let Some(message) = relocation.warning(dir) {
            eprintln!("{}", message);
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        let record = serde_json::json!({
            "summary": {
                "total": summary.total(),
                "passed": summary.passed,
                "failed": summary.failed,
                "build_failed": summary.build_failed,
                "skipped": summary.skipped,
                "duration_secs": summary.duration.as_secs_f64(),
            }
        });
        println!("{}", record);
    }
}

/// Human-readable run summary.
pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} passed, {} failed, {} build failed, {} skipped in {:.2}s",
        summary.passed,
        summary.failed,
        summary.build_failed,
        summary.skipped,
        summary.duration.as_secs_f64()
    )
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one run of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Pool size in parallel mode
    pub workers: usize,
    /// Process directories one at a time on the calling thread
    pub serial: bool,
    /// Build only, never run the drivers
    pub just_build: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            serial: false,
            just_build: false,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_just_build(mut self, just_build: bool) -> Self {
        self.just_build = just_build;
        self
    }
}

/// Detected CPU count, or 1 when it cannot be determined.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

// ============================================================================
// Dispatch and execution
// ============================================================================

/// What happened to the trace file after a directory finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    /// Skipped directories have no trace file; failed builds keep it where it was written.
    NotAttempted,
    Moved,
    /// No results directory; the trace file stays at the top of the test directory.
    ResultsDirMissing,
    /// The results directory exists but the rename failed.
    Failed(String),
}

impl Relocation {
    /// Warning text for relocations that did not happen, `None` otherwise.
    pub fn warning(&self, dir: &Path) -> Option<String> {
        match self {
            Relocation::ResultsDirMissing => Some(format!(
                "Warning: no {} directory in {} so I couldn't put {} in there",
                RESULTS_DIR_NAME,
                dir.display(),
                TRACE_FILE_NAME
            )),
            Relocation::Failed(reason) => Some(format!(
                "Warning: couldn't move {} into {}: {}",
                TRACE_FILE_NAME,
                dir.join(RESULTS_DIR_NAME).display(),
                reason
            )),
            Relocation::NotAttempted | Relocation::Moved => None,
        }
    }
}

/// Result of dispatching one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    /// Final location of the trace file; `None` when nothing was written.
    pub trace_path: Option<PathBuf>,
    pub relocation: Relocation,
}

impl Execution {
    fn skipped(capability: &str) -> Self {
        Self {
            outcome: Outcome::Skipped(capability.to_string()),
            trace_path: None,
            relocation: Relocation::NotAttempted,
        }
    }
}

/// Skip `dir` if it needs a missing capability, otherwise build and run it.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn dispatch(
    dir: &Path,
    capabilities: &CapabilityRegistry,
    tool: &dyn BuildTool,
    just_build: bool,
) -> Result<Execution, TestError> {
    if let Some(capability) = capabilities.first_missing(&dir.to_string_lossy()) {
        tracing::debug!(capability = capability.name(), "missing capability, skipping");
        return Ok(Execution::skipped(capability.name()));
    }
    execute(dir, tool, just_build)
}

/// Build, optionally run, and relocate the trace file for one directory.
///
/// The trace file is truncated on every call, so repeated runs never accumulate output.
pub fn execute(dir: &Path, tool: &dyn BuildTool, just_build: bool) -> Result<Execution, TestError> {
    let trace_path = dir.join(TRACE_FILE_NAME);
    let mut trace = File::create(&trace_path).map_err(|source| TestError::Trace {
        path: trace_path.clone(),
        source,
    })?;

    trace.write_all(BUILD_HEADER.as_bytes())?;
    tracing::debug!("building");
    let build = run_phase(tool, dir, CheckMode::BuildOnly, &mut trace)?;
    if !build.success() {
        tracing::debug!(code = ?build.code, "build failed");
        return Ok(Execution {
            outcome: Outcome::BuildFailed,
            trace_path: Some(trace_path),
            relocation: Relocation::NotAttempted,
        });
    }

    // Past a successful build, errors fail the test rather than the build.
    let passed = match finish_after_build(tool, dir, just_build, &mut trace) {
        Ok(passed) => passed,
        Err(err) => {
            tracing::error!(error = %err, "test phase failed after a successful build");
            false
        }
    };
    drop(trace);

    let (trace_path, relocation) = relocate_trace(dir, trace_path);
    let outcome = if passed {
        Outcome::TestPassed
    } else {
        Outcome::TestFailed
    };
    Ok(Execution {
        outcome,
        trace_path: Some(trace_path),
        relocation,
    })
}

fn finish_after_build(
    tool: &dyn BuildTool,
    dir: &Path,
    just_build: bool,
    trace: &mut File,
) -> Result<bool, TestError> {
    if just_build {
        trace.write_all(JUST_BUILD_NOTE.as_bytes())?;
        return Ok(true);
    }
    trace.write_all(RUN_HEADER.as_bytes())?;
    tracing::debug!("running");
    let run = run_phase(tool, dir, CheckMode::Run, trace)?;
    tracing::debug!(code = ?run.code, "run finished");
    Ok(run.success())
}

fn run_phase(
    tool: &dyn BuildTool,
    dir: &Path,
    mode: CheckMode,
    trace: &mut File,
) -> Result<PhaseStatus, TestError> {
    tool.check(dir, mode, trace).inspect_err(|err| {
        // Leave the reason next to whatever output the phase produced.
        let _ = writeln!(trace, "\n{}", err);
    })
}

fn relocate_trace(dir: &Path, trace_path: PathBuf) -> (PathBuf, Relocation) {
    let results_dir = dir.join(RESULTS_DIR_NAME);
    if !results_dir.is_dir() {
        return (trace_path, Relocation::ResultsDirMissing);
    }
    let dest = results_dir.join(TRACE_FILE_NAME);
    match fs::rename(&trace_path, &dest) {
        Ok(()) => (dest, Relocation::Moved),
        Err(err) => {
            tracing::warn!(dest = %dest.display(), error = %err, "trace relocation failed");
            (trace_path, Relocation::Failed(err.to_string()))
        }
    }
}

// ============================================================================
// Worker pool
// ============================================================================

/// Apply `worker` to every directory.
///
/// In parallel mode each directory is its own job on a pool of `n_workers` threads, queued in
/// discovery order, so one slow directory never holds up work queued behind it. Serial mode runs
/// everything on the calling thread in order.
///
/// There is no cancellation: a hung child process hangs its worker until the process group is
/// killed.
pub fn run_all<F>(dirs: &[PathBuf], worker: F, n_workers: usize, serial: bool) -> Result<(), TestError>
where
    F: Fn(&Path) + Sync,
{
    if serial {
        for dir in dirs {
            worker(dir);
        }
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_workers.max(1))
        .thread_name(|index| format!("selftest-worker-{}", index))
        .build()?;
    let worker = &worker;
    pool.scope_fifo(|scope| {
        for dir in dirs {
            scope.spawn_fifo(move |_| worker(dir));
        }
    });
    Ok(())
}

/// Everything a worker needs to process a directory; shared read-only across the pool.
pub struct Runner<'a> {
    pub capabilities: &'a CapabilityRegistry,
    pub tool: &'a dyn BuildTool,
    pub config: RunnerConfig,
}

impl<'a> Runner<'a> {
    pub fn new(capabilities: &'a CapabilityRegistry, tool: &'a dyn BuildTool, config: RunnerConfig) -> Self {
        Self {
            capabilities,
            tool,
            config,
        }
    }

    /// Dispatch one directory and report its outcome.
    ///
    /// Errors stay inside the directory. Errors raised before the build finished are logged and
    /// reported as a build failure; later ones already surface from [`execute`] as a test failure.
    pub fn process(&self, dir: &Path, reporter: &dyn TestReporter) -> Outcome {
        let execution = match dispatch(dir, self.capabilities, self.tool, self.config.just_build) {
            Ok(execution) => execution,
            Err(err) => {
                tracing::error!(dir = %dir.display(), error = %err, "could not process directory");
                let trace_path = dir.join(TRACE_FILE_NAME);
                Execution {
                    outcome: Outcome::BuildFailed,
                    trace_path: trace_path.is_file().then_some(trace_path),
                    relocation: Relocation::NotAttempted,
                }
            }
        };
        if matches!(
            execution.relocation,
            Relocation::ResultsDirMissing | Relocation::Failed(_)
        ) {
            reporter.on_relocation_warning(dir, &execution.relocation);
        }
        reporter.on_outcome(dir, &execution.outcome);
        execution.outcome
    }

    /// Process every directory on the pool and return the aggregated summary.
    pub fn run(&self, dirs: &[PathBuf], reporter: &dyn TestReporter) -> Result<RunSummary, TestError> {
        let start = Instant::now();
        reporter.on_discovery_complete(dirs);

        let summary = Mutex::new(RunSummary::default());
        run_all(
            dirs,
            |dir| {
                let outcome = self.process(dir, reporter);
                summary
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&outcome);
            },
            self.config.workers,
            self.config.serial,
        )?;

        let mut summary = summary.into_inner().unwrap_or_else(PoisonError::into_inner);
        summary.duration = start.elapsed();
        reporter.on_run_complete(&summary);
        Ok(summary)
    }
}
