//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use oomph_selftest_core::capabilities::{self, CAPABILITIES};
use oomph_selftest_core::{CapabilityError, CapabilityId, CapabilityRegistry};
use regex::Regex;
use walkdir::WalkDir;

use crate::makefile::{MakefileVariables, VariableError, VariableSource};

use super::test_interfaces::{DRIVER_SCRIPT, Make, TestDiscovery, WalkDiscovery};
use super::test_runner::{
    ConsoleReporter, JsonReporter, Palette, Runner, RunnerConfig, TestReporter, default_workers,
};
use super::{Cli, CliError, CliResult, ExitCode, OutputFormat};

/// Base directories searched when none are given.
pub const DEFAULT_BASE_DIRS: &[&str] = &["demo_drivers", "self_test"];

/// Makefile variable holding the preprocessor flags the library was configured with.
const CPPFLAGS_VARIABLE: &str = "AM_CPPFLAGS";

/// A `validate.sh` that sets its exit status has a line starting with one of these.
const EXIT_STATUS_PATTERN: &str = r"(?im)^(exit |set -o errexit)";

// ============================================================================
// Preamble output
// ============================================================================

/// Where informational lines printed before the run go.
///
/// In JSON mode stdout carries only result records, so everything else moves to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Preamble {
    to_stderr: bool,
}

impl Preamble {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            to_stderr: format == OutputFormat::Json,
        }
    }

    pub fn line(&self, text: impl Display) {
        if self.to_stderr {
            eprintln!("{}", text);
        } else {
            println!("{}", text);
        }
    }
}

// ============================================================================
// Root directory
// ============================================================================

/// Use `explicit` if given, otherwise read `abs_top_srcdir` from `./Makefile`.
pub fn resolve_root(explicit: Option<PathBuf>, make: &str, out: &Preamble) -> CliResult<PathBuf> {
    match explicit {
        Some(root) => Ok(root),
        None => root_from_makefile(&MakefileVariables::new("Makefile").with_program(make), out),
    }
}

/// Extract the library root from a build directory's Makefile.
pub fn root_from_makefile(source: &dyn VariableSource, out: &Preamble) -> CliResult<PathBuf> {
    out.line("Trying to extract the root dir from a Makefile in the pwd.");
    match source.variable("abs_top_srcdir") {
        Ok(root) if !root.is_empty() => {
            out.line(format!("Extracted oomph_root = {}", root));
            Ok(PathBuf::from(root))
        }
        Ok(_) => Err(root_required(None)),
        Err(err @ VariableError::NotFound(_)) => Err(root_required(Some(&err))),
        Err(err) => Err(CliError::failure(format!("Error reading abs_top_srcdir: {}", err))),
    }
}

fn root_required(cause: Option<&VariableError>) -> CliError {
    let mut lines = Vec::new();
    if let Some(cause) = cause {
        lines.push(cause.to_string());
    }
    lines.push(
        "You must either run this script from within an oomph-lib directory or specify the path to oomph_root using -C."
            .to_string(),
    );
    CliError::config(lines)
}

// ============================================================================
// Capability detection
// ============================================================================

/// Decide which optional capabilities the build has.
///
/// Explicit overrides win; otherwise a capability is available when its build flag appears in
/// `AM_CPPFLAGS`. Capabilities without a build flag default to unavailable. The Makefile is only
/// consulted when some capability is left to detection.
pub fn detect_capabilities(
    source: &dyn VariableSource,
    with: &[String],
    without: &[String],
) -> CliResult<CapabilityRegistry> {
    let mut overrides: HashMap<CapabilityId, bool> = HashMap::new();
    for name in with {
        overrides.insert(parse_capability(name)?, true);
    }
    for name in without {
        let id = parse_capability(name)?;
        if overrides.get(&id) == Some(&true) {
            return Err(CliError::config([format!(
                "feature '{}' given to both --with-feature and --without-feature",
                capabilities::as_str(id)
            )]));
        }
        overrides.insert(id, false);
    }

    let needs_detection = CAPABILITIES
        .iter()
        .any(|info| info.build_flag.is_some() && !overrides.contains_key(&info.id));
    let flags = if needs_detection {
        source.variable(CPPFLAGS_VARIABLE).map_err(|err| match err {
            VariableError::NotFound(_) => CliError::config([
                err.to_string(),
                "Cannot detect features without the root Makefile; configure the library first or use --with-feature/--without-feature.".to_string(),
            ]),
            other => CliError::failure(format!("Error reading {}: {}", CPPFLAGS_VARIABLE, other)),
        })?
    } else {
        String::new()
    };
    tracing::debug!(flags = %flags, "detecting capabilities");

    Ok(CapabilityRegistry::standard(|id| {
        if let Some(&forced) = overrides.get(&id) {
            return forced;
        }
        capabilities::info_for(id)
            .build_flag
            .is_some_and(|flag| flags.contains(flag))
    }))
}

fn parse_capability(name: &str) -> CliResult<CapabilityId> {
    capabilities::from_str(name)
        .ok_or_else(|| CliError::config([CapabilityError::Unknown(name.to_string()).to_string()]))
}

/// Lines describing detected capabilities, one per capability.
pub fn feature_report(registry: &CapabilityRegistry) -> Vec<String> {
    registry
        .iter()
        .map(|capability| format!("     {} : {}", capability.name(), capability.available()))
        .collect()
}

// ============================================================================
// Base directories
// ============================================================================

/// Collect base directories from flags and listing files, apply defaults, and make them absolute
/// against `root`.
pub fn resolve_base_dirs(root: &Path, base_dirs: &[PathBuf], base_dirs_files: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = base_dirs.to_vec();
    for file in base_dirs_files {
        let contents = fs::read_to_string(file)
            .map_err(|e| CliError::failure(format!("Error reading base dirs file '{}': {}", file.display(), e)))?;
        dirs.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from),
        );
    }

    if dirs.is_empty() {
        dirs = DEFAULT_BASE_DIRS.iter().map(PathBuf::from).collect();
    }

    dirs.iter()
        .map(|dir| {
            absolute_clean(&root.join(dir))
                .map_err(|e| CliError::failure(format!("Cannot resolve '{}': {}", dir.display(), e)))
        })
        .collect()
}

/// Make `path` absolute and drop `.` and `..` components lexically.
fn absolute_clean(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    Ok(clean)
}

/// Run `make clean` in every base directory, discarding its stdout.
pub fn make_clean(make: &str, dirs: &[PathBuf], jobs: usize) -> CliResult<()> {
    let jobs = jobs.to_string();
    for dir in dirs {
        tracing::debug!(dir = %dir.display(), "make clean");
        let status = Command::new(make)
            .args(["clean", "-k", "-j", jobs.as_str()])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|e| CliError::failure(format!("Error running `{} clean` in {}: {}", make, dir.display(), e)))?;
        if !status.success() {
            return Err(CliError::failure(format!(
                "`{} clean` failed in {} ({})",
                make,
                dir.display(),
                status
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Driver script check
// ============================================================================

/// Whether a driver script sets its exit status.
pub fn sets_exit_status(script: &str, pattern: &Regex) -> bool {
    pattern.is_match(script)
}

/// Driver scripts under `root` that never set an exit status, relative to `root`, in walk order.
pub fn noncompliant_scripts(root: &Path) -> CliResult<Vec<PathBuf>> {
    let pattern =
        Regex::new(EXIT_STATUS_PATTERN).map_err(|e| CliError::failure(format!("Invalid script pattern: {}", e)))?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != DRIVER_SCRIPT {
            continue;
        }
        let script = match fs::read(entry.path()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "cannot read driver script");
                continue;
            }
        };
        if !sets_exit_status(&script, &pattern) {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            found.push(relative.to_path_buf());
        }
    }
    Ok(found)
}

/// Print every driver script that does not set an exit status.
pub fn check_scripts(root: &Path) -> CliResult<ExitCode> {
    println!(
        "Checking validate.sh scripts. Any scripts printed below do not set\n\
         their exit status properly and so the results cannot be correctly\n\
         reported by this script."
    );
    println!("Look in other validate scripts to see how to fix this.");
    for script in noncompliant_scripts(root)? {
        println!("./{}", script.display());
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Self-test run
// ============================================================================

/// Detect capabilities, discover test directories, and run them all.
pub fn run_self_tests(cli: &Cli, root: &Path, out: &Preamble) -> CliResult<ExitCode> {
    let variables = MakefileVariables::new(root.join("Makefile")).with_program(cli.make.clone());
    let registry = detect_capabilities(&variables, &cli.with_features, &cli.without_features)?;

    out.line("\nChecked for the following features:");
    for line in feature_report(&registry) {
        out.line(line);
    }

    let base_dirs = resolve_base_dirs(root, &cli.base_dirs, &cli.base_dirs_files)?;
    out.line("\nLooking for validate.sh scripts in directories:");
    for dir in &base_dirs {
        out.line(format!("    {}", dir.display()));
    }
    out.line("");

    let workers = cli.jobs.map(|n| n.get()).unwrap_or_else(default_workers);

    if cli.make_clean {
        let listed: Vec<String> = base_dirs.iter().map(|d| d.display().to_string()).collect();
        out.line(format!("Running (recursive) make clean in {}", listed.join(" ")));
        make_clean(&cli.make, &base_dirs, workers)?;
    }

    let dirs = WalkDiscovery.discover(&base_dirs);
    tracing::info!(count = dirs.len(), workers, serial = cli.serial_mode, "dispatching test directories");

    let tool = Make::new(cli.make.clone());
    let config = RunnerConfig::new()
        .with_workers(workers)
        .with_serial(cli.serial_mode)
        .with_just_build(cli.just_build);
    let runner = Runner::new(&registry, &tool, config);

    let reporter: Box<dyn TestReporter> = match cli.format {
        OutputFormat::Console => Box::new(ConsoleReporter::new(Palette::new(!cli.no_colour))),
        OutputFormat::Json => Box::new(JsonReporter),
    };

    let summary = runner
        .run(&dirs, reporter.as_ref())
        .map_err(|e| CliError::failure(format!("Error running self tests: {}", e)))?;

    if cli.strict && summary.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
