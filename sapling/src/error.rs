//! Error and warning types.

use facet::Facet;

/// Errors produced while building trees, matching, or generating edit scripts.
///
/// None of these are retried: the engine is a pure function of its inputs, so
/// the same pair with the same configuration always fails the same way.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum DiffError {
    /// malformed tree: {reason}
    Structure { reason: String },

    /// mapping invariant violated: {detail}
    InvariantViolation { detail: String },

    /// edit script cannot be applied: {reason}
    Apply { reason: String },

    /// invalid matching configuration: {reason}
    InvalidConfig { reason: String },
}

impl DiffError {
    pub(crate) fn structure(reason: impl Into<String>) -> Self {
        DiffError::Structure {
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        DiffError::InvariantViolation {
            detail: detail.into(),
        }
    }

    pub(crate) fn apply(reason: impl Into<String>) -> Self {
        DiffError::Apply {
            reason: reason.into(),
        }
    }
}

/// Recoverable degradations recorded alongside a successful diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffWarning {
    /// The pair is larger than `max_tree_size_for_full_matching`: only top-down
    /// matching ran, everything else is expressed as subtree delete + insert.
    SizeLimitExceeded {
        /// Total node count of both trees
        nodes: usize,
        /// The configured cap
        limit: usize,
    },
}

impl core::fmt::Display for DiffWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DiffWarning::SizeLimitExceeded { nodes, limit } => write!(
                f,
                "pair has {nodes} nodes (limit {limit}), fell back to top-down matching only"
            ),
        }
    }
}
