//! Recovery matching of leftover children.
//!
//! For every matched pair of containers, the children still unmatched on
//! both sides are aligned in order and scored by value and structure
//! similarity. Good-enough pairs are accepted greedily, and accepted
//! containers are revisited in turn, so renamed identifiers and edited
//! literals under a matched parent end up mapped instead of becoming a
//! delete plus insert.
//!
//! A last pass pairs whole subtrees that are still unmatched on both sides
//! when their hash is unique among the leftovers of each tree. This catches
//! subtrees too small for the top-down stage that changed parent.

use crate::trace;

use std::collections::VecDeque;

use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;
use smallvec::SmallVec;

use super::{Matching, MatchingConfig, match_isomorphic_subtrees};
use crate::error::DiffError;
use crate::signature::isomorphic;
use crate::similarity::{LCS_CELL_BUDGET, kind_dice, lcs, mapping_dice, value_similarity};
use crate::tree::{NodeHash, Tree};

const VALUE_WEIGHT: f64 = 0.4;
const STRUCTURE_WEIGHT: f64 = 0.4;
const ALIGNMENT_WEIGHT: f64 = 0.2;

/// Scores within this distance of the threshold count as reaching it.
const SCORE_EPSILON: f64 = 1e-9;

type Children = SmallVec<[NodeId; 8]>;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    left: usize,
    right: usize,
    score: f64,
    aligned: bool,
    distance: usize,
}

/// Stage 3: match the remaining children of every matched container pair.
pub fn recovery_phase(
    src: &Tree,
    dst: &Tree,
    matching: &mut Matching,
    config: &MatchingConfig,
) -> Result<(), DiffError> {
    let mut worklist: VecDeque<(NodeId, NodeId)> = src
        .pre_order()
        .filter(|&a| !src.is_leaf(a))
        .filter_map(|a| matching.get_b(a).map(|b| (a, b)))
        .filter(|&(_, b)| !dst.is_leaf(b))
        .collect();
    trace!(seeds = worklist.len(), "recovery_phase start");

    while let Some((a, b)) = worklist.pop_front() {
        let left: Children = src.children(a).filter(|&x| !matching.contains_a(x)).collect();
        let right: Children = dst.children(b).filter(|&y| !matching.contains_b(y)).collect();
        if left.is_empty() || right.is_empty() {
            continue;
        }

        let alignment = align(src, dst, &left, &right);
        // Wide containers only score aligned pairs.
        let exhaustive = left.len().saturating_mul(right.len()) <= LCS_CELL_BUDGET;
        let mut candidates = Vec::new();
        for (i, &x) in left.iter().enumerate() {
            let partners = match alignment[i] {
                _ if exhaustive => 0..right.len(),
                Some(j) => j..j + 1,
                None => 0..0,
            };
            for j in partners {
                let y = right[j];
                if src.kind(x) != dst.kind(y) {
                    continue;
                }
                let aligned = alignment[i] == Some(j);
                let score = similarity(src, x, dst, y, matching, aligned);
                if score + SCORE_EPSILON >= config.recovery_similarity_threshold {
                    candidates.push(Candidate {
                        left: i,
                        right: j,
                        score,
                        aligned,
                        distance: src.position(x).abs_diff(dst.position(y)),
                    });
                }
            }
        }

        candidates.sort_by(|p, q| {
            q.score
                .total_cmp(&p.score)
                .then(q.aligned.cmp(&p.aligned))
                .then(p.distance.cmp(&q.distance))
                .then(p.left.cmp(&q.left))
                .then(p.right.cmp(&q.right))
        });

        let mut used_left = vec![false; left.len()];
        let mut used_right = vec![false; right.len()];
        for candidate in candidates {
            if used_left[candidate.left] || used_right[candidate.right] {
                continue;
            }
            used_left[candidate.left] = true;
            used_right[candidate.right] = true;

            let (x, y) = (left[candidate.left], right[candidate.right]);
            trace!(
                a = usize::from(x),
                a_kind = %src.kind(x),
                b = usize::from(y),
                score = candidate.score,
                aligned = candidate.aligned,
                "recovery: match"
            );
            if isomorphic(src, x, dst, y) && subtrees_free(src, dst, x, y, matching) {
                match_isomorphic_subtrees(src, dst, x, y, matching)?;
            } else {
                matching.add(x, y)?;
                if !src.is_leaf(x) && !dst.is_leaf(y) {
                    worklist.push_back((x, y));
                }
            }
        }
    }

    match_unique_leftovers(src, dst, matching)
}

/// Pair unmatched subtrees whose hash occurs exactly once among the unmatched
/// subtrees of each tree, wherever they sit.
fn match_unique_leftovers(
    src: &Tree,
    dst: &Tree,
    matching: &mut Matching,
) -> Result<(), DiffError> {
    let left = free_subtrees(src, |a| matching.contains_a(a));
    let right = free_subtrees(dst, |b| matching.contains_b(b));

    let mut pairs: Vec<(NodeId, NodeId)> = left
        .iter()
        .filter_map(|(hash, xs)| match (xs.as_slice(), right.get(hash)?.as_slice()) {
            ([x], [y]) => Some((*x, *y)),
            _ => None,
        })
        .collect();
    // ancestors first, so a matched subtree takes its descendants along
    pairs.sort_by_key(|&(x, _)| src.pre_order_index(x));

    for (x, y) in pairs {
        if matching.contains_a(x)
            || !isomorphic(src, x, dst, y)
            || !subtrees_free(src, dst, x, y, matching)
        {
            continue;
        }
        trace!(
            a = usize::from(x),
            a_kind = %src.kind(x),
            b = usize::from(y),
            "recovery: unique leftover"
        );
        match_isomorphic_subtrees(src, dst, x, y, matching)?;
    }
    Ok(())
}

/// Roots of subtrees with no matched node, grouped by hash.
fn free_subtrees(
    tree: &Tree,
    matched: impl Fn(NodeId) -> bool,
) -> HashMap<NodeHash, SmallVec<[NodeId; 2]>> {
    let mut free = vec![false; tree.node_count() + 1];
    let mut groups: HashMap<NodeHash, SmallVec<[NodeId; 2]>> = HashMap::default();
    for id in tree.post_order() {
        let is_free = !matched(id) && tree.children(id).all(|c| free[usize::from(c)]);
        free[usize::from(id)] = is_free;
        if is_free {
            groups.entry(tree.hash(id)).or_default().push(id);
        }
    }
    groups
}

/// Similarity of two same-kind children of a matched pair, in [0, 1].
///
/// The value term only counts when at least one side carries a value.
fn similarity(
    src: &Tree,
    x: NodeId,
    dst: &Tree,
    y: NodeId,
    matching: &Matching,
    aligned: bool,
) -> f64 {
    let (value_weight, value) = match (src.value(x), dst.value(y)) {
        (None, None) => (0.0, 0.0),
        (a, b) => (VALUE_WEIGHT, value_similarity(a, b)),
    };
    let structure = match (src.is_leaf(x), dst.is_leaf(y)) {
        (true, true) => 1.0,
        (false, false) => {
            mapping_dice(src, x, dst, y, matching).max(kind_dice(src, x, dst, y))
        }
        _ => 0.0,
    };
    let alignment = if aligned { 1.0 } else { 0.0 };
    (value_weight * value + STRUCTURE_WEIGHT * structure + ALIGNMENT_WEIGHT * alignment)
        / (value_weight + STRUCTURE_WEIGHT + ALIGNMENT_WEIGHT)
}

/// Align two child sequences: isomorphic children anchor the alignment,
/// the gaps between anchors are aligned by kind.
///
/// Returns, for each left child, the index of its aligned right child.
fn align(src: &Tree, dst: &Tree, left: &[NodeId], right: &[NodeId]) -> Vec<Option<usize>> {
    let mut alignment = vec![None; left.len()];
    let anchors = lcs(left, right, |&x, &y| isomorphic(src, x, dst, y));

    let mut gap_start = (0, 0);
    for gap_end in anchors
        .iter()
        .copied()
        .chain(core::iter::once((left.len(), right.len())))
    {
        let gap_left = &left[gap_start.0..gap_end.0];
        let gap_right = &right[gap_start.1..gap_end.1];
        for (i, j) in lcs(gap_left, gap_right, |&x, &y| src.kind(x) == dst.kind(y)) {
            alignment[gap_start.0 + i] = Some(gap_start.1 + j);
        }
        if gap_end.0 < left.len() {
            alignment[gap_end.0] = Some(gap_end.1);
        }
        gap_start = (gap_end.0 + 1, gap_end.1 + 1);
    }
    alignment
}

fn subtrees_free(src: &Tree, dst: &Tree, x: NodeId, y: NodeId, matching: &Matching) -> bool {
    src.subtree(x).iter().all(|&n| !matching.contains_a(n))
        && dst.subtree(y).iter().all(|&n| !matching.contains_b(n))
}
