//! Optional library capability registry.
//!
//! Some validation drivers need parts of the library that a given build may lack (MPI, the ARPACK
//! eigensolver, the HLib dense-matrix helpers). No structured metadata says which driver needs
//! what, so requirements are inferred from substrings of the driver's directory path.
//!
//! ## Notes
//! - The default predicates must match the directory naming conventions of the validation tree
//!   exactly. They are stored as [`PathPattern`] data so a tree with other conventions can build
//!   its own registry.
//! - Registry order matters only when two unavailable capabilities match the same path: the first
//!   one wins.
//!
//! ## Examples
//! ```rust
//! use oomph_selftest_core::capabilities::{CapabilityId, CapabilityRegistry};
//!
//! let registry = CapabilityRegistry::standard(|id| id != CapabilityId::Mpi);
//! let missing = registry.first_missing("/oomph/demo_drivers/mpi/distribution");
//! assert_eq!(missing.map(|c| c.name()), Some("mpi"));
//! assert!(registry.first_missing("/oomph/demo_drivers/poisson/one_d").is_none());
//! ```

use std::borrow::Cow;
use std::fmt;

/// Stable identifier for the capabilities the runner knows how to detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityId {
    Arpack,
    Mpi,
    Hlib,
}

/// Decide from path text whether a driver directory needs a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// The path contains `needle`.
    Contains(Cow<'static, str>),
    /// The path contains `needle` once every occurrence of `mask` has been removed.
    ///
    /// `hlib` is a substring of `oomphlib`, so the hlib rule masks `oomphlib` first.
    ContainsUnmasked {
        needle: Cow<'static, str>,
        mask: Cow<'static, str>,
    },
}

impl PathPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Contains(needle) => path.contains(needle.as_ref()),
            PathPattern::ContainsUnmasked { needle, mask } => {
                if mask.is_empty() {
                    return path.contains(needle.as_ref());
                }
                path.replace(mask.as_ref(), "").contains(needle.as_ref())
            }
        }
    }
}

/// Static description of a known capability.
#[derive(Debug, Clone)]
pub struct CapabilityInfo {
    pub id: CapabilityId,
    /// Name used on the command line and in `[NO <NAME>]` status lines.
    pub canonical: &'static str,
    pub pattern: PathPattern,
    /// Preprocessor flag that appears in `AM_CPPFLAGS` when the build has the capability.
    ///
    /// `None` means availability cannot be detected and defaults to unavailable.
    pub build_flag: Option<&'static str>,
}

/// Registry of known capabilities, in evaluation order.
pub const CAPABILITIES: &[CapabilityInfo] = &[
    CapabilityInfo {
        id: CapabilityId::Arpack,
        canonical: "arpack",
        pattern: PathPattern::Contains(Cow::Borrowed("eigenproblems")),
        build_flag: None,
    },
    CapabilityInfo {
        id: CapabilityId::Mpi,
        canonical: "mpi",
        pattern: PathPattern::Contains(Cow::Borrowed("mpi")),
        build_flag: Some("OOMPH_HAS_MPI"),
    },
    CapabilityInfo {
        id: CapabilityId::Hlib,
        canonical: "hlib",
        pattern: PathPattern::ContainsUnmasked {
            needle: Cow::Borrowed("hlib"),
            mask: Cow::Borrowed("oomphlib"),
        },
        build_flag: Some("OOMPH_HAS_HLIB"),
    },
];

/// Resolve a capability name to its stable id.
pub fn from_str(name: &str) -> Option<CapabilityId> {
    CAPABILITIES
        .iter()
        .find(|info| info.canonical.eq_ignore_ascii_case(name))
        .map(|info| info.id)
}

/// Return the canonical spelling for a capability.
pub fn as_str(id: CapabilityId) -> &'static str {
    info_for(id).canonical
}

/// Return the metadata entry for a capability.
pub fn info_for(id: CapabilityId) -> &'static CapabilityInfo {
    match id {
        CapabilityId::Arpack => &CAPABILITIES[0],
        CapabilityId::Mpi => &CAPABILITIES[1],
        CapabilityId::Hlib => &CAPABILITIES[2],
    }
}

/// Error raised when a capability name on the command line is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    Unknown(String),
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::Unknown(name) => {
                let known: Vec<&str> = CAPABILITIES.iter().map(|info| info.canonical).collect();
                write!(f, "unknown feature '{}' (known features: {})", name, known.join(", "))
            }
        }
    }
}

impl std::error::Error for CapabilityError {}

/// An optional capability together with whether the current build has it.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    name: Cow<'static, str>,
    pattern: PathPattern,
    available: bool,
}

impl Capability {
    pub fn new(name: impl Into<Cow<'static, str>>, pattern: PathPattern, available: bool) -> Self {
        Self {
            name: name.into(),
            pattern,
            available,
        }
    }

    /// Build a capability from a registry entry.
    pub fn from_info(info: &CapabilityInfo, available: bool) -> Self {
        Self::new(info.canonical, info.pattern.clone(), available)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a driver at `path` needs this capability.
    pub fn requires(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }

    pub fn available(&self) -> bool {
        self.available
    }
}

/// Ordered sequence of capabilities consulted before each directory is run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
}

impl CapabilityRegistry {
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }

    /// Build the default registry, asking `available` about each known capability in order.
    pub fn standard(mut available: impl FnMut(CapabilityId) -> bool) -> Self {
        let capabilities = CAPABILITIES
            .iter()
            .map(|info| Capability::from_info(info, available(info.id)))
            .collect();
        Self { capabilities }
    }

    /// Return the first capability that is unavailable and required by `path`.
    ///
    /// Available capabilities are never consulted, so their predicates cannot cause a skip.
    pub fn first_missing(&self, path: &str) -> Option<&Capability> {
        self.capabilities
            .iter()
            .filter(|capability| !capability.available())
            .find(|capability| capability.requires(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing_available() -> CapabilityRegistry {
        CapabilityRegistry::standard(|_| false)
    }

    #[test]
    fn test_mpi_matches_any_mpi_substring() {
        let mpi = Capability::from_info(info_for(CapabilityId::Mpi), false);
        assert!(mpi.requires("/oomph/self_test/mpi/matrix_addition"));
        assert!(mpi.requires("/oomph/demo_drivers/navier_stokes/mpi_channel"));
        assert!(!mpi.requires("/oomph/demo_drivers/poisson/one_d_poisson"));
    }

    #[test]
    fn test_arpack_requires_plural_eigenproblems() {
        let arpack = Capability::from_info(info_for(CapabilityId::Arpack), false);
        assert!(arpack.requires("/oomph/demo_drivers/eigenproblems/harmonic"));
        assert!(!arpack.requires("/oomph/demo_drivers/eigenproblem/harmonic"));
    }

    #[test]
    fn test_hlib_ignores_oomphlib() {
        let hlib = Capability::from_info(info_for(CapabilityId::Hlib), false);
        assert!(!hlib.requires("/home/user/oomphlib/demo_drivers/poisson"));
        assert!(hlib.requires("/home/user/oomph-lib/demo_drivers/hlib/dense"));
        assert!(hlib.requires("/home/user/oomphlib/demo_drivers/hlib_test"));
        // `oomph-lib` is not masked, and does not contain `hlib` anyway.
        assert!(!hlib.requires("/home/user/oomph-lib/demo_drivers/poisson"));
    }

    #[test]
    fn test_first_missing_skips_available_capabilities() {
        let registry = CapabilityRegistry::standard(|id| id == CapabilityId::Mpi);
        assert!(registry.first_missing("/root/demo_drivers/mpi/foo").is_none());
        assert_eq!(
            registry.first_missing("/root/demo_drivers/hlib/foo").map(Capability::name),
            Some("hlib")
        );
    }

    #[test]
    fn test_first_missing_respects_registry_order() {
        let registry = nothing_available();
        let path = "/root/demo_drivers/eigenproblems/mpi/hlib";
        assert_eq!(registry.first_missing(path).map(Capability::name), Some("arpack"));
    }

    #[test]
    fn test_standard_registry_order() {
        let registry = nothing_available();
        let names: Vec<&str> = registry.iter().map(Capability::name).collect();
        assert_eq!(names, vec!["arpack", "mpi", "hlib"]);
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!(from_str("MPI"), Some(CapabilityId::Mpi));
        assert_eq!(from_str("arpack"), Some(CapabilityId::Arpack));
        assert_eq!(from_str("petsc"), None);
        assert_eq!(as_str(CapabilityId::Hlib), "hlib");
    }

    #[test]
    fn test_custom_pattern_registry() {
        let registry = CapabilityRegistry::new(vec![Capability::new(
            "gpu",
            PathPattern::Contains(Cow::Borrowed("cuda")),
            false,
        )]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.first_missing("/x/cuda_solver").map(Capability::name), Some("gpu"));
        assert!(registry.first_missing("/x/mpi").is_none());
    }

    #[test]
    fn test_unknown_capability_message_lists_known_names() {
        let err = CapabilityError::Unknown("petsc".to_string());
        assert_eq!(
            err.to_string(),
            "unknown feature 'petsc' (known features: arpack, mpi, hlib)"
        );
    }
}
