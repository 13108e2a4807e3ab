//! Provide the pure vocabulary shared by the self-test runner: optional library capabilities and
//! per-directory outcomes.
//!
//! ## Notes
//!
//! - This is a "semantic core" crate: **no IO**, no global state, no process handling.
//! - Capability requirements are inferred from path text only, so every decision made here is a
//!   deterministic function of a string and a few booleans.

pub mod capabilities;
pub mod outcome;

pub use capabilities::{Capability, CapabilityError, CapabilityId, CapabilityRegistry, PathPattern};
pub use outcome::{Outcome, RunSummary};
