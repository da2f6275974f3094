//! Property-based tests over random tree pairs.
//!
//! Every generated pair must diff without error, the script must replay to
//! the destination, the mapping must stay one-to-one and kind-preserving,
//! and each matching stage may only add pairs. A subtree relocated to
//! another parent must come out as a single move.

use std::collections::HashSet;

use proptest::prelude::*;
use sapling::matching::{bottom_up_phase, recovery_phase, top_down_phase};
use sapling::{
    Action, Matching, MatchingConfig, SyntaxNode, Tree, apply_edit_script, diff_trees,
};

fn kind() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["block", "stmt", "expr", "ident", "lit"])
}

fn leaf() -> impl Strategy<Value = SyntaxNode> {
    (kind(), prop::option::of("[a-c]{0,3}")).prop_map(|(kind, value)| {
        let node = SyntaxNode::new(kind);
        match value {
            Some(value) => node.with_value(value),
            None => node,
        }
    })
}

fn syntax_tree() -> impl Strategy<Value = SyntaxNode> {
    leaf().prop_recursive(4, 48, 5, |inner| {
        (kind(), prop::collection::vec(inner, 0..5))
            .prop_map(|(kind, children)| SyntaxNode::new(kind).with_children(children))
    })
}

/// Unrelated random pairs, plus pairs that share subtrees in a different order
/// so that moves show up.
fn tree_pair() -> impl Strategy<Value = (SyntaxNode, SyntaxNode)> {
    prop_oneof![
        (syntax_tree(), syntax_tree()),
        (syntax_tree(), syntax_tree(), syntax_tree(), syntax_tree()).prop_map(|(a, b, c, d)| {
            let src = SyntaxNode::new("module").with_children([a.clone(), b.clone(), c.clone()]);
            let dst = SyntaxNode::new("module")
                .with_children([c, SyntaxNode::new("block").with_child(a), d, b]);
            (src, dst)
        }),
    ]
}

/// The same pair of parents before and after one subtree, leaf or not, moved
/// from the end of the first parent to the end of the second.
fn relocation() -> impl Strategy<Value = (SyntaxNode, SyntaxNode)> {
    let moved = (
        prop::option::of("[a-c]{0,3}"),
        prop::collection::vec(syntax_tree(), 0..3),
    )
        .prop_map(|(value, children)| {
            let node = SyntaxNode::new("moved").with_children(children);
            match value {
                Some(value) => node.with_value(value),
                None => node,
            }
        });
    let siblings = || prop::collection::vec(syntax_tree(), 0..4);

    (siblings(), siblings(), moved).prop_map(|(first, second, moved)| {
        let parents = |first: Vec<SyntaxNode>, second: Vec<SyntaxNode>| {
            SyntaxNode::new("root").with_children([
                SyntaxNode::leaf("left", "p1").with_children(first),
                SyntaxNode::leaf("right", "p2").with_children(second),
            ])
        };
        let src = parents(
            first.iter().cloned().chain([moved.clone()]).collect(),
            second.clone(),
        );
        let dst = parents(first, second.into_iter().chain([moved]).collect());
        (src, dst)
    })
}

fn assert_one_to_one(matching: &Matching, src: &Tree, dst: &Tree) {
    matching.validate(src, dst).unwrap();
    let mut seen_a = HashSet::new();
    let mut seen_b = HashSet::new();
    for (a, b) in matching.pairs() {
        assert!(seen_a.insert(a), "source node {a:?} mapped twice");
        assert!(seen_b.insert(b), "destination node {b:?} mapped twice");
    }
}

proptest! {
    #[test]
    fn identical_trees_have_empty_scripts(syntax in syntax_tree()) {
        let a = Tree::from_syntax(&syntax);
        let b = Tree::from_syntax(&syntax);
        let diff = diff_trees(&a, &b, &MatchingConfig::default()).unwrap();

        prop_assert!(diff.is_empty(), "{:?}", diff.actions);
        prop_assert_eq!(diff.matching.len(), a.node_count());
        for (x, y) in diff.matching.pairs() {
            prop_assert_eq!(a.pre_order_index(x), b.pre_order_index(y));
        }
    }

    #[test]
    fn scripts_replay_to_the_destination((src, dst) in tree_pair()) {
        let a = Tree::from_syntax(&src);
        let b = Tree::from_syntax(&dst);
        let diff = diff_trees(&a, &b, &MatchingConfig::default()).unwrap();
        let replayed = apply_edit_script(&a, &diff.matching, &diff.actions).unwrap();
        prop_assert!(
            replayed.structurally_eq(&b),
            "script {:?} replayed to {:?}",
            diff.actions,
            replayed.to_syntax(replayed.root())
        );
    }

    #[test]
    fn mapping_is_one_to_one((src, dst) in tree_pair()) {
        let a = Tree::from_syntax(&src);
        let b = Tree::from_syntax(&dst);
        let diff = diff_trees(&a, &b, &MatchingConfig::default()).unwrap();
        assert_one_to_one(&diff.matching, &a, &b);
    }

    #[test]
    fn stages_only_add_pairs((src, dst) in tree_pair()) {
        let a = Tree::from_syntax(&src);
        let b = Tree::from_syntax(&dst);
        let config = MatchingConfig::default();

        let mut matching = Matching::for_trees(&a, &b);
        top_down_phase(&a, &b, &mut matching, &config).unwrap();
        let after_top_down = matching.clone();
        bottom_up_phase(&a, &b, &mut matching, &config).unwrap();
        let after_bottom_up = matching.clone();
        recovery_phase(&a, &b, &mut matching, &config).unwrap();

        prop_assert!(after_bottom_up.is_superset_of(&after_top_down));
        prop_assert!(matching.is_superset_of(&after_bottom_up));
        assert_one_to_one(&matching, &a, &b);
    }

    #[test]
    fn relocated_subtree_is_a_single_move((src, dst) in relocation()) {
        let a = Tree::from_syntax(&src);
        let b = Tree::from_syntax(&dst);
        let diff = diff_trees(&a, &b, &MatchingConfig::default()).unwrap();

        let moved_a = a.pre_order().find(|&id| a.kind(id).as_str() == "moved").unwrap();
        let moved_b = b.pre_order().find(|&id| b.kind(id).as_str() == "moved").unwrap();
        prop_assert_eq!(diff.actions.len(), 1, "{:?}", diff.actions);
        prop_assert!(
            matches!(
                diff.actions[0],
                Action::Move { node_a, node_b, .. } if node_a == moved_a && node_b == moved_b
            ),
            "{:?}",
            diff.actions
        );
        let replayed = apply_edit_script(&a, &diff.matching, &diff.actions).unwrap();
        prop_assert!(replayed.structurally_eq(&b));
    }

    #[test]
    fn size_capped_diffs_still_replay((src, dst) in tree_pair()) {
        let a = Tree::from_syntax(&src);
        let b = Tree::from_syntax(&dst);
        let config = MatchingConfig {
            max_tree_size_for_full_matching: 1,
            ..Default::default()
        };
        let diff = diff_trees(&a, &b, &config).unwrap();
        prop_assert_eq!(diff.warnings.len(), 1);
        let replayed = apply_edit_script(&a, &diff.matching, &diff.actions).unwrap();
        prop_assert!(replayed.structurally_eq(&b));
    }
}
