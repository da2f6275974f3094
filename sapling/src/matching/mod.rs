//! GumTree node matching.
//!
//! Three stages run in order, each only adding pairs:
//! 1. [Top-down](top_down): isomorphic subtrees by hash, tallest first
//! 2. [Bottom-up](bottom_up): containers by Dice coefficient over matched descendants
//! 3. [Recovery](recovery): remaining children of matched containers by
//!    value and structure similarity

pub mod bottom_up;
pub mod recovery;
pub mod top_down;

use crate::{debug, warning};

use indextree::NodeId;

use crate::error::{DiffError, DiffWarning};
use crate::tree::Tree;

pub use bottom_up::bottom_up_phase;
pub use recovery::recovery_phase;
pub use top_down::top_down_phase;

/// A partial one-to-one mapping between the nodes of two trees.
/// Uses Vec for O(1) lookups indexed by NodeId.
#[derive(Debug, Clone, Default)]
pub struct Matching {
    /// Map from source node to destination node (indexed by source NodeId)
    a_to_b: Vec<Option<NodeId>>,
    /// Map from destination node to source node (indexed by destination NodeId)
    b_to_a: Vec<Option<NodeId>>,
    /// All matched pairs in insertion order
    pairs: Vec<(NodeId, NodeId)>,
}

impl Matching {
    /// Create a new empty matching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty matching with lookup tables sized for two trees.
    pub fn for_trees(src: &Tree, dst: &Tree) -> Self {
        // NodeId indices are 1-based.
        Self {
            a_to_b: vec![None; src.node_count() + 1],
            b_to_a: vec![None; dst.node_count() + 1],
            pairs: Vec::new(),
        }
    }

    /// Add a pair. Fails if either node is already mapped.
    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<(), DiffError> {
        if let Some(existing) = self.get_b(a) {
            return Err(DiffError::invariant(format!(
                "source node {} is already mapped to {}, cannot also map it to {}",
                usize::from(a),
                usize::from(existing),
                usize::from(b)
            )));
        }
        if let Some(existing) = self.get_a(b) {
            return Err(DiffError::invariant(format!(
                "destination node {} is already mapped from {}, cannot also map it from {}",
                usize::from(b),
                usize::from(existing),
                usize::from(a)
            )));
        }

        let a_idx = usize::from(a);
        let b_idx = usize::from(b);
        if a_idx >= self.a_to_b.len() {
            self.a_to_b.resize(a_idx + 1, None);
        }
        if b_idx >= self.b_to_a.len() {
            self.b_to_a.resize(b_idx + 1, None);
        }

        self.a_to_b[a_idx] = Some(b);
        self.b_to_a[b_idx] = Some(a);
        self.pairs.push((a, b));
        Ok(())
    }

    /// Check if a source node is matched.
    #[inline(always)]
    pub fn contains_a(&self, a: NodeId) -> bool {
        self.get_b(a).is_some()
    }

    /// Check if a destination node is matched.
    #[inline(always)]
    pub fn contains_b(&self, b: NodeId) -> bool {
        self.get_a(b).is_some()
    }

    /// Partner of a source node.
    #[inline(always)]
    pub fn get_b(&self, a: NodeId) -> Option<NodeId> {
        self.a_to_b.get(usize::from(a)).copied().flatten()
    }

    /// Partner of a destination node.
    #[inline(always)]
    pub fn get_a(&self, b: NodeId) -> Option<NodeId> {
        self.b_to_a.get(usize::from(b)).copied().flatten()
    }

    /// All matched pairs, in the order they were added.
    pub fn pairs(&self) -> impl ExactSizeIterator<Item = (NodeId, NodeId)> + '_ {
        self.pairs.iter().copied()
    }

    /// Number of matched pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Check if there are no matches.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether every pair of `other` is also a pair of `self`.
    pub fn is_superset_of(&self, other: &Matching) -> bool {
        other.pairs().all(|(a, b)| self.get_b(a) == Some(b))
    }

    /// Check that the mapping is injective, that both lookup tables agree with
    /// the pair list, that every node exists in its tree, and that paired
    /// nodes share a kind.
    pub fn validate(&self, src: &Tree, dst: &Tree) -> Result<(), DiffError> {
        let forward = self.a_to_b.iter().filter(|b| b.is_some()).count();
        let backward = self.b_to_a.iter().filter(|a| a.is_some()).count();
        if forward != self.pairs.len() || backward != self.pairs.len() {
            return Err(DiffError::invariant(format!(
                "lookup tables disagree with pair list: {forward} forward, {backward} backward, {} pairs",
                self.pairs.len()
            )));
        }

        for &(a, b) in &self.pairs {
            if self.get_b(a) != Some(b) || self.get_a(b) != Some(a) {
                return Err(DiffError::invariant(format!(
                    "pair ({}, {}) is not reflected in both lookup tables",
                    usize::from(a),
                    usize::from(b)
                )));
            }
            if !src.contains(a) {
                return Err(DiffError::invariant(format!(
                    "source node {} does not exist",
                    usize::from(a)
                )));
            }
            if !dst.contains(b) {
                return Err(DiffError::invariant(format!(
                    "destination node {} does not exist",
                    usize::from(b)
                )));
            }
            if src.kind(a) != dst.kind(b) {
                return Err(DiffError::invariant(format!(
                    "pair ({}, {}) maps kind {} to kind {}",
                    usize::from(a),
                    usize::from(b),
                    src.kind(a),
                    dst.kind(b)
                )));
            }
        }
        Ok(())
    }
}

/// Tunable thresholds for the matching stages.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Minimum height for a subtree to be matched top-down. With the default
    /// of 2, lone leaves are left to the later stages.
    pub min_height_for_top_down: usize,

    /// Minimum Dice coefficient for bottom-up container matching.
    pub dice_threshold: f64,

    /// Minimum similarity score for recovery matching.
    pub recovery_similarity_threshold: f64,

    /// Above this combined node count only top-down matching runs.
    pub max_tree_size_for_full_matching: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_height_for_top_down: 2,
            dice_threshold: 0.5,
            recovery_similarity_threshold: 0.6,
            max_tree_size_for_full_matching: 100_000,
        }
    }
}

impl MatchingConfig {
    /// Reject thresholds outside [0, 1] and a zero size cap.
    pub fn validate(&self) -> Result<(), DiffError> {
        for (name, value) in [
            ("dice_threshold", self.dice_threshold),
            (
                "recovery_similarity_threshold",
                self.recovery_similarity_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DiffError::InvalidConfig {
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        if self.max_tree_size_for_full_matching == 0 {
            return Err(DiffError::InvalidConfig {
                reason: "max_tree_size_for_full_matching must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Compute the mapping between two trees by running every matching stage.
///
/// Pairs larger than `max_tree_size_for_full_matching` only get the top-down
/// stage; a [`DiffWarning::SizeLimitExceeded`] records the degradation.
pub fn compute_matching(
    src: &Tree,
    dst: &Tree,
    config: &MatchingConfig,
) -> Result<(Matching, Vec<DiffWarning>), DiffError> {
    config.validate()?;
    debug!(
        nodes_a = src.node_count(),
        nodes_b = dst.node_count(),
        "compute_matching start"
    );

    let mut matching = Matching::for_trees(src, dst);
    let mut warnings = Vec::new();

    top_down_phase(src, dst, &mut matching, config)?;
    debug!(matched = matching.len(), "after top_down_phase");

    let nodes = src.node_count() + dst.node_count();
    if nodes > config.max_tree_size_for_full_matching {
        let warning = DiffWarning::SizeLimitExceeded {
            nodes,
            limit: config.max_tree_size_for_full_matching,
        };
        warning!(%warning, "skipping bottom-up and recovery matching");
        warnings.push(warning);
        return Ok((matching, warnings));
    }

    bottom_up_phase(src, dst, &mut matching, config)?;
    debug!(matched = matching.len(), "after bottom_up_phase");

    recovery_phase(src, dst, &mut matching, config)?;
    debug!(matched = matching.len(), "after recovery_phase");

    Ok((matching, warnings))
}

/// Check if `b` is a valid partner for `a` given the pairs made so far.
///
/// If a's parent is matched to some node P, then b must lie below P, and
/// symmetrically for b's parent.
pub(crate) fn ancestry_compatible(
    src: &Tree,
    dst: &Tree,
    a: NodeId,
    b: NodeId,
    matching: &Matching,
) -> bool {
    if let Some(a_parent) = src.parent(a)
        && let Some(partner) = matching.get_b(a_parent)
        && !dst.is_descendant(partner, b)
    {
        return false;
    }

    if let Some(b_parent) = dst.parent(b)
        && let Some(partner) = matching.get_a(b_parent)
        && !src.is_descendant(partner, a)
    {
        return false;
    }

    true
}

/// Match two isomorphic subtrees node for node.
///
/// Pre-order sequences of isomorphic subtrees line up exactly, so zipping
/// them pairs every node with its counterpart.
pub(crate) fn match_isomorphic_subtrees(
    src: &Tree,
    dst: &Tree,
    a: NodeId,
    b: NodeId,
    matching: &mut Matching,
) -> Result<(), DiffError> {
    for (&x, &y) in src.subtree(a).iter().zip(dst.subtree(b)) {
        matching.add(x, y)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{leaf, node};
    use facet_testhelpers::test;

    #[test]
    fn add_rejects_double_mapping() {
        let a = Tree::from_syntax(&node("p", vec![leaf("x", "1"), leaf("x", "2")]));
        let b = Tree::from_syntax(&node("p", vec![leaf("x", "1"), leaf("x", "2")]));
        let a_kids: Vec<_> = a.children(a.root()).collect();
        let b_kids: Vec<_> = b.children(b.root()).collect();

        let mut matching = Matching::for_trees(&a, &b);
        matching.add(a_kids[0], b_kids[0]).unwrap();
        assert!(matches!(
            matching.add(a_kids[0], b_kids[1]),
            Err(DiffError::InvariantViolation { .. })
        ));
        assert!(matches!(
            matching.add(a_kids[1], b_kids[0]),
            Err(DiffError::InvariantViolation { .. })
        ));
        assert_eq!(matching.len(), 1);
        assert_eq!(matching.get_b(a_kids[0]), Some(b_kids[0]));
        assert_eq!(matching.get_a(b_kids[0]), Some(a_kids[0]));
        assert!(!matching.contains_a(a_kids[1]));
        matching.validate(&a, &b).unwrap();
    }

    #[test]
    fn validate_rejects_kind_mismatch() {
        let a = Tree::from_syntax(&leaf("x", "1"));
        let b = Tree::from_syntax(&leaf("y", "1"));
        let mut matching = Matching::for_trees(&a, &b);
        matching.add(a.root(), b.root()).unwrap();
        assert!(matches!(
            matching.validate(&a, &b),
            Err(DiffError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn config_validation() {
        MatchingConfig::default().validate().unwrap();
        let bad = MatchingConfig {
            dice_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(DiffError::InvalidConfig { .. })
        ));
        let bad = MatchingConfig {
            recovery_similarity_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = MatchingConfig {
            max_tree_size_for_full_matching: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn stages_only_add_pairs() {
        let a = Tree::from_syntax(&node(
            "block",
            vec![
                node("if", vec![leaf("cond", "x>0")]),
                node("return", vec![leaf("token", "x")]),
            ],
        ));
        let b = Tree::from_syntax(&node(
            "block",
            vec![
                node("return", vec![leaf("token", "x")]),
                node("if", vec![leaf("cond", "x>=0")]),
            ],
        ));
        let config = MatchingConfig::default();

        let mut matching = Matching::for_trees(&a, &b);
        top_down_phase(&a, &b, &mut matching, &config).unwrap();
        let after_top_down = matching.clone();
        bottom_up_phase(&a, &b, &mut matching, &config).unwrap();
        let after_bottom_up = matching.clone();
        recovery_phase(&a, &b, &mut matching, &config).unwrap();

        assert!(after_bottom_up.is_superset_of(&after_top_down));
        assert!(matching.is_superset_of(&after_bottom_up));
        assert_eq!(after_top_down.len(), 2);
        assert_eq!(matching.len(), a.node_count());
        matching.validate(&a, &b).unwrap();
    }

    #[test]
    fn size_cap_skips_later_stages() {
        let a = Tree::from_syntax(&node("p", vec![leaf("x", "1"), leaf("y", "2")]));
        let b = Tree::from_syntax(&node("p", vec![leaf("x", "1"), leaf("y", "3")]));
        let config = MatchingConfig {
            max_tree_size_for_full_matching: 4,
            ..Default::default()
        };
        let (matching, warnings) = compute_matching(&a, &b, &config).unwrap();
        assert!(matching.is_empty());
        assert_eq!(
            warnings,
            vec![DiffWarning::SizeLimitExceeded { nodes: 6, limit: 4 }]
        );
    }
}
