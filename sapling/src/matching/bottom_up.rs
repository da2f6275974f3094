//! Bottom-up matching of containers.
//!
//! A container whose descendants were (partly) matched by the top-down stage
//! is paired with the same-kind destination ancestor that holds most of
//! their partners, measured by the Dice coefficient.

use crate::trace;

use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;

use super::{Matching, MatchingConfig, ancestry_compatible};
use crate::error::DiffError;
use crate::similarity::mapping_dice;
use crate::tree::Tree;

/// Stage 2: pair unmatched containers in source post-order.
pub fn bottom_up_phase(
    src: &Tree,
    dst: &Tree,
    matching: &mut Matching,
    config: &MatchingConfig,
) -> Result<(), DiffError> {
    let order: Vec<NodeId> = src.post_order().collect();

    for a in order {
        if matching.contains_a(a) || src.is_leaf(a) {
            continue;
        }

        if let Some((b, score)) = best_container_candidate(src, dst, a, matching)
            && score >= config.dice_threshold
        {
            trace!(
                a = usize::from(a),
                a_kind = %src.kind(a),
                b = usize::from(b),
                score,
                "bottom_up: dice match"
            );
            matching.add(a, b)?;
        }
    }

    let (root_a, root_b) = (src.root(), dst.root());
    if !matching.contains_a(root_a)
        && !matching.contains_b(root_b)
        && src.kind(root_a) == dst.kind(root_b)
    {
        trace!(kind = %src.kind(root_a), "bottom_up: root kind match (fallback)");
        matching.add(root_a, root_b)?;
    }
    Ok(())
}

/// Best destination container for `a` with its Dice score.
///
/// Candidates are the unmatched same-kind ancestors of the partners of a's
/// matched descendants. Ties go to the candidate holding more partners, then
/// to the earlier one in pre-order.
fn best_container_candidate(
    src: &Tree,
    dst: &Tree,
    a: NodeId,
    matching: &Matching,
) -> Option<(NodeId, f64)> {
    let kind = src.kind(a);
    let mut votes: HashMap<NodeId, usize> = HashMap::default();
    for &d in src.descendants(a) {
        let Some(partner) = matching.get_b(d) else {
            continue;
        };
        for ancestor in dst.ancestors(partner) {
            if !matching.contains_b(ancestor) && dst.kind(ancestor) == kind {
                *votes.entry(ancestor).or_default() += 1;
            }
        }
    }

    let mut best: Option<(NodeId, f64, usize)> = None;
    for (b, vote) in votes {
        if !ancestry_compatible(src, dst, a, b, matching) {
            continue;
        }
        let score = mapping_dice(src, a, dst, b, matching);
        trace!(
            a = usize::from(a),
            b = usize::from(b),
            score,
            vote,
            "bottom_up: candidate"
        );
        let better = match best {
            None => true,
            Some((current, current_score, current_vote)) => {
                score > current_score
                    || (score == current_score
                        && (vote > current_vote
                            || (vote == current_vote
                                && dst.pre_order_index(b) < dst.pre_order_index(current))))
            }
        };
        if better {
            best = Some((b, score, vote));
        }
    }
    best.map(|(b, score, _)| (b, score))
}
