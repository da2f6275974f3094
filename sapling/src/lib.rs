//! # Sapling
//!
//! Structural diffing of syntax trees: GumTree-style node matching with
//! Chawathe edit script generation.
//!
//! ## Algorithm Overview
//!
//! Sapling implements a tree diff algorithm based on:
//! - **GumTree** (Falleri et al., ASE 2014) for node matching
//! - **Chawathe algorithm** (1996) for edit script generation
//!
//! The algorithm works in phases:
//!
//! 1. **Top-down matching**: Match identical subtrees by hash, tallest first
//! 2. **Bottom-up matching**: Match containers by the Dice coefficient of their matched descendants
//! 3. **Recovery matching**: Match leftover children of matched containers by value and shape similarity
//! 4. **Edit script generation**: Produce INSERT, DELETE, UPDATE, MOVE actions
//!
//! The matching is heuristic. It aims for scripts a reviewer would write, not
//! for the minimum tree edit distance.
//!
//! ## Usage
//!
//! ```
//! use sapling::{MatchingConfig, SyntaxNode, Tree, diff_trees};
//!
//! let old = Tree::from_syntax(&SyntaxNode::new("Block").with_children([
//!     SyntaxNode::new("IfStmt").with_child(SyntaxNode::leaf("Cond", "x>0")),
//!     SyntaxNode::new("Return").with_child(SyntaxNode::leaf("token", "x")),
//! ]));
//! let new = Tree::from_syntax(&SyntaxNode::new("Block").with_children([
//!     SyntaxNode::new("Return").with_child(SyntaxNode::leaf("token", "x")),
//!     SyntaxNode::new("IfStmt").with_child(SyntaxNode::leaf("Cond", "x>=0")),
//! ]));
//!
//! let diff = diff_trees(&old, &new, &MatchingConfig::default()).unwrap();
//! let counts = diff.counts();
//! assert_eq!((counts.moves, counts.updates), (1, 1));
//! assert_eq!(counts.inserts + counts.deletes, 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::std_instead_of_core)]

pub use indextree;

mod tracing_macros;
pub(crate) use tracing_macros::{debug, trace, warning};

mod apply;
mod chawathe;
mod error;
pub mod matching;
pub mod signature;
pub mod similarity;
pub mod tree;

pub use apply::apply_edit_script;
pub use chawathe::{Action, ActionCounts, generate_edit_script};
pub use error::{DiffError, DiffWarning};
pub use matching::{Matching, MatchingConfig, compute_matching};
pub use tree::{FlatNode, Kind, NodeData, NodeHash, Span, SyntaxNode, Tree};

/// Result of diffing two trees.
#[derive(Debug, Clone)]
pub struct Diff {
    /// Edit script turning the source into the destination
    pub actions: Vec<Action>,
    /// The node mapping the script was derived from
    pub matching: Matching,
    /// Degradations that did not prevent the diff
    pub warnings: Vec<DiffWarning>,
}

impl Diff {
    /// Number of actions of each type.
    pub fn counts(&self) -> ActionCounts {
        ActionCounts::of(&self.actions)
    }

    /// Whether the two trees were identical.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Compute a diff between two trees.
///
/// This is the main entry point for tree diffing. It:
/// 1. Computes a matching between nodes with the three matching stages
/// 2. Generates an edit script using Chawathe's algorithm
pub fn diff_trees(src: &Tree, dst: &Tree, config: &MatchingConfig) -> Result<Diff, DiffError> {
    let (matching, warnings) = compute_matching(src, dst, config)?;
    let actions = generate_edit_script(src, dst, &matching)?;
    debug!(
        actions = actions.len(),
        matched = matching.len(),
        warnings = warnings.len(),
        "diff_trees done"
    );
    Ok(Diff {
        actions,
        matching,
        warnings,
    })
}
