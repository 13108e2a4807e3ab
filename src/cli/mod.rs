//! CLI module for the parallel self-test runner
//!
//! This module provides the command-line interface: one flat set of flags, no subcommands.
//!
//! ## Modules
//!
//! - `commands` - Command implementations (root resolution, feature detection, script check)
//! - `test_interfaces` - Discovery and build tool boundaries
//! - `test_runner` - Dispatch, execution and the worker pool
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod test_interfaces;
pub mod test_runner;

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    /// Invalid configuration detected before any directory was dispatched.
    pub const CONFIG: ExitCode = ExitCode(2);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Create a configuration error (exit code 2) rendered as an `ERROR:` block.
    pub fn config<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let body: Vec<String> = lines.into_iter().map(|l| l.as_ref().to_string()).collect();
        Self::new(format!("\nERROR:\n{}", body.join("\n")), ExitCode::CONFIG)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const ABOUT: &str = "Run oomph-lib self tests in parallel.";

const LONG_ABOUT: &str = "Run oomph-lib self tests in parallel.

Typical usage is just

    parallel-self-test

from within an oomph-lib build directory, or

    parallel-self-test -C /abs/path/to/oomph/root

from anywhere.

For results to be reported correctly every validate.sh script must set an exit status.
Use --check-scripts to find the ones that don't.";

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Output format for per-directory results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
}

/// Parallel self-test runner for oomph-lib validation drivers
#[derive(Parser, Debug)]
#[command(name = "parallel-self-test")]
#[command(version = VERSION)]
#[command(about = ABOUT, long_about = LONG_ABOUT)]
pub struct Cli {
    /// Root directory of oomph-lib; by default extracted from a Makefile in the current directory
    #[arg(short = 'C', value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Run make clean on test folders before starting
    #[arg(short = 'a')]
    pub make_clean: bool,

    /// Directory relative to the root to (recursively) look for tests in [default: demo_drivers, self_test]
    #[arg(short = 'l', long = "base-dir", value_name = "DIR")]
    pub base_dirs: Vec<PathBuf>,

    /// File listing directories relative to the root to look for tests in, one per line
    #[arg(short = 'L', long = "base-dirs-file", value_name = "FILE")]
    pub base_dirs_files: Vec<PathBuf>,

    /// How many tests to build and run at once [default: number of CPUs]
    #[arg(short = 'j', short_alias = 'n', value_name = "N")]
    pub jobs: Option<NonZeroUsize>,

    /// Disable colours in output
    #[arg(long = "no-colour")]
    pub no_colour: bool,

    /// List validate.sh scripts that do not set an exit status, then exit
    #[arg(long = "check-scripts")]
    pub check_scripts: bool,

    /// Only build the tests, don't run them
    #[arg(long = "just-build")]
    pub just_build: bool,

    /// Run without parallelism (for debugging)
    #[arg(long = "serial-mode")]
    pub serial_mode: bool,

    /// Treat a feature as available regardless of detection
    #[arg(long = "with-feature", value_name = "NAME")]
    pub with_features: Vec<String>,

    /// Treat a feature as unavailable regardless of detection
    #[arg(long = "without-feature", value_name = "NAME")]
    pub without_features: Vec<String>,

    /// Build tool to invoke
    #[arg(long = "make", value_name = "PROGRAM", default_value = "make")]
    pub make: String,

    /// Result output format
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Console)]
    pub format: OutputFormat,

    /// Exit with status 1 if any test failed to build or run
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let out = commands::Preamble::new(cli.format);
    let root = commands::resolve_root(cli.root.clone(), &cli.make, &out)?;

    if cli.check_scripts {
        return commands::check_scripts(&root);
    }

    commands::run_self_tests(&cli, &root, &out)
}

// ============================================================================
// Tests
// ============================================================================
