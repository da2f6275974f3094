//! Top-down matching of isomorphic subtrees.
//!
//! Heights are swept tallest first. Within a height, source nodes with a
//! single unambiguous partner are paired immediately; the remaining ones are
//! resolved afterwards, most constrained first, using the surrounding pairs
//! as tie-breakers.

use crate::trace;

use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;
use smallvec::SmallVec;

use super::{Matching, MatchingConfig, match_isomorphic_subtrees};
use crate::error::DiffError;
use crate::signature::{SignatureIndex, isomorphic};
use crate::tree::Tree;

type Candidates = SmallVec<[NodeId; 4]>;

/// Stage 1: map every isomorphic subtree of height >= `min_height_for_top_down`.
pub fn top_down_phase(
    src: &Tree,
    dst: &Tree,
    matching: &mut Matching,
    config: &MatchingConfig,
) -> Result<(), DiffError> {
    let src_index = SignatureIndex::build(src);
    let dst_index = SignatureIndex::build(dst);
    let min_height = config.min_height_for_top_down;
    trace!(
        max_height_a = src_index.max_height(),
        max_height_b = dst_index.max_height(),
        min_height,
        "top_down_phase start"
    );

    loop {
        let before = matching.len();
        for height in src_index.heights().take_while(|&h| h >= min_height) {
            match_height(src, dst, &src_index, &dst_index, height, matching)?;
        }
        if matching.len() == before {
            break;
        }
    }
    Ok(())
}

fn match_height(
    src: &Tree,
    dst: &Tree,
    src_index: &SignatureIndex,
    dst_index: &SignatureIndex,
    height: usize,
    matching: &mut Matching,
) -> Result<(), DiffError> {
    let mut contenders: Vec<(NodeId, Candidates)> = Vec::new();
    for &a in src_index.nodes_at_height(height) {
        if !subtree_unmatched_a(src, a, matching) {
            continue;
        }
        let candidates: Candidates = dst_index
            .candidates(height, src.hash(a))
            .iter()
            .copied()
            .filter(|&b| subtree_unmatched_b(dst, b, matching) && isomorphic(src, a, dst, b))
            .collect();
        if !candidates.is_empty() {
            contenders.push((a, candidates));
        }
    }
    if contenders.is_empty() {
        return Ok(());
    }

    let mut demand: HashMap<NodeId, usize> = HashMap::default();
    for (_, candidates) in &contenders {
        for &b in candidates {
            *demand.entry(b).or_default() += 1;
        }
    }

    let mut ambiguous = Vec::new();
    for (a, candidates) in contenders {
        if candidates.len() == 1 && demand.get(&candidates[0]) == Some(&1) {
            let b = candidates[0];
            trace!(
                a = usize::from(a),
                a_kind = %src.kind(a),
                b = usize::from(b),
                height,
                "top_down: unique match"
            );
            match_isomorphic_subtrees(src, dst, a, b, matching)?;
        } else {
            ambiguous.push((a, candidates));
        }
    }

    // Most constrained first; pre-order keeps the result deterministic.
    ambiguous.sort_by_key(|(a, candidates)| (candidates.len(), src.pre_order_index(*a)));

    for (a, candidates) in ambiguous {
        if !subtree_unmatched_a(src, a, matching) {
            continue;
        }
        let best = candidates
            .iter()
            .copied()
            .filter(|&b| subtree_unmatched_b(dst, b, matching))
            .min_by_key(|&b| tie_break_key(src, dst, a, b, matching));
        if let Some(b) = best {
            trace!(
                a = usize::from(a),
                a_kind = %src.kind(a),
                b = usize::from(b),
                contenders = candidates.len(),
                height,
                "top_down: ambiguous match resolved"
            );
            match_isomorphic_subtrees(src, dst, a, b, matching)?;
        }
    }
    Ok(())
}

/// Lower is better: parent is the partner of a's parent, then parent already
/// matched, then closest source offset, then destination pre-order.
fn tie_break_key(
    src: &Tree,
    dst: &Tree,
    a: NodeId,
    b: NodeId,
    matching: &Matching,
) -> (bool, bool, usize, usize) {
    let b_parent = dst.parent(b);
    let parent_partner = src.parent(a).and_then(|p| matching.get_b(p));
    let same_parent = parent_partner.is_some() && parent_partner == b_parent;
    let parent_matched = b_parent.is_some_and(|p| matching.contains_b(p));
    let distance = src.span(a).start.abs_diff(dst.span(b).start);
    (
        !same_parent,
        !parent_matched,
        distance,
        dst.pre_order_index(b),
    )
}

fn subtree_unmatched_a(src: &Tree, a: NodeId, matching: &Matching) -> bool {
    src.subtree(a).iter().all(|&x| !matching.contains_a(x))
}

fn subtree_unmatched_b(dst: &Tree, b: NodeId, matching: &Matching) -> bool {
    dst.subtree(b).iter().all(|&y| !matching.contains_b(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{leaf, node};
    use crate::tree::{Span, SyntaxNode};
    use facet_testhelpers::test;

    fn call(name: &str) -> SyntaxNode {
        node("call", vec![leaf("ident", name)])
    }

    #[test]
    fn identical_trees_match_completely() {
        let syntax = node("module", vec![call("f"), call("g"), call("f")]);
        let a = Tree::from_syntax(&syntax);
        let b = Tree::from_syntax(&syntax);
        let mut matching = Matching::for_trees(&a, &b);
        top_down_phase(&a, &b, &mut matching, &MatchingConfig::default()).unwrap();

        assert_eq!(matching.len(), a.node_count());
        for (x, y) in a.pre_order().zip(b.pre_order()) {
            assert_eq!(matching.get_b(x), Some(y));
        }
    }

    #[test]
    fn leaves_are_left_for_later_stages() {
        let a = Tree::from_syntax(&node("p", vec![leaf("x", "1")]));
        let b = Tree::from_syntax(&node("q", vec![leaf("x", "1")]));
        let mut matching = Matching::for_trees(&a, &b);
        top_down_phase(&a, &b, &mut matching, &MatchingConfig::default()).unwrap();
        assert!(matching.is_empty());

        let config = MatchingConfig {
            min_height_for_top_down: 1,
            ..Default::default()
        };
        top_down_phase(&a, &b, &mut matching, &config).unwrap();
        assert_eq!(matching.len(), 1);
    }

    #[test]
    fn ambiguous_candidates_prefer_the_partner_of_the_parent() {
        let a = Tree::from_syntax(&node(
            "module",
            vec![
                node("fn", vec![leaf("name", "one"), call("f")]),
                node("fn", vec![leaf("name", "two"), call("f")]),
            ],
        ));
        let b = Tree::from_syntax(&node(
            "module",
            vec![
                node("fn", vec![leaf("name", "uno"), call("f")]),
                node("fn", vec![leaf("name", "dos"), call("f")]),
            ],
        ));
        let a_fns: Vec<_> = a.children(a.root()).collect();
        let b_fns: Vec<_> = b.children(b.root()).collect();

        // Cross the parents so pre-order alone would pick the wrong call.
        let mut matching = Matching::for_trees(&a, &b);
        matching.add(a_fns[0], b_fns[1]).unwrap();
        matching.add(a_fns[1], b_fns[0]).unwrap();
        top_down_phase(&a, &b, &mut matching, &MatchingConfig::default()).unwrap();

        let a_call = |f| a.children(f).nth(1).unwrap();
        let b_call = |f| b.children(f).nth(1).unwrap();
        assert_eq!(matching.get_b(a_call(a_fns[0])), Some(b_call(b_fns[1])));
        assert_eq!(matching.get_b(a_call(a_fns[1])), Some(b_call(b_fns[0])));
        matching.validate(&a, &b).unwrap();
    }

    #[test]
    fn ambiguous_candidates_fall_back_to_closest_offset() {
        let at = |start: usize, name: &str| call(name).with_span(Span::new(start, start + 4));
        let a = Tree::from_syntax(&node("module", vec![at(40, "f"), at(0, "f")]));
        let b = Tree::from_syntax(&node(
            "block",
            vec![at(2, "f"), leaf("pad", "x"), at(41, "f")],
        ));
        let mut matching = Matching::for_trees(&a, &b);
        top_down_phase(&a, &b, &mut matching, &MatchingConfig::default()).unwrap();

        let a_calls: Vec<_> = a.children(a.root()).collect();
        let b_kids: Vec<_> = b.children(b.root()).collect();
        assert_eq!(matching.get_b(a_calls[0]), Some(b_kids[2]));
        assert_eq!(matching.get_b(a_calls[1]), Some(b_kids[0]));
    }
}
