#![forbid(unsafe_code)]
//! Parallel self-test runner for oomph-lib validation drivers
//!
//! Finds every directory under the configured base directories that holds a `validate.sh`,
//! skips the ones needing a capability the current build lacks, and runs `make check` in the rest
//! on a fixed-size worker pool, printing one status line per directory.
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module
//!   enforces `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod makefile;

pub use cli::test_interfaces::{BuildTool, CheckMode, Make, TestDiscovery, TestError, WalkDiscovery};
pub use cli::test_runner::{Palette, Runner, RunnerConfig, TestReporter};
pub use makefile::{MakefileVariables, VariableError, VariableSource};
pub use oomph_selftest_core::{Capability, CapabilityId, CapabilityRegistry, Outcome, RunSummary};
