//! Replaying an edit script on the source tree.
//!
//! The replay follows the same conventions the generator uses: a virtual root
//! sits above the tree, positions are indices into the parent's current
//! children, and a move detaches before it inserts. Destination nodes named
//! by actions are resolved through the mapping (matched nodes) or through
//! earlier inserts.

use crate::trace;

use compact_str::CompactString;
use indextree::{Arena, NodeId};
use rapidhash::RapidHashMap as HashMap;

use crate::chawathe::Action;
use crate::error::DiffError;
use crate::matching::Matching;
use crate::tree::{FlatNode, Kind, Span, Tree};

#[derive(Debug, Clone)]
struct ReplayNode {
    kind: Kind,
    value: Option<CompactString>,
    span: Span,
}

struct Replay<'a> {
    matching: &'a Matching,
    arena: Arena<ReplayNode>,
    virtual_root: NodeId,
    /// Replay node for each source node, indexed by NodeId
    work_of_src: Vec<Option<NodeId>>,
    /// Replay node for each inserted destination node
    inserted: HashMap<NodeId, NodeId>,
}

/// Apply `actions` to a copy of `source` and return the resulting tree.
///
/// For a script produced by [`generate_edit_script`](crate::generate_edit_script)
/// the result is structurally equal to the destination tree.
pub fn apply_edit_script(
    source: &Tree,
    matching: &Matching,
    actions: &[Action],
) -> Result<Tree, DiffError> {
    let mut replay = Replay::new(source, matching);
    for (index, action) in actions.iter().enumerate() {
        trace!(index, %action, "apply");
        replay
            .apply(action)
            .map_err(|e| DiffError::apply(format!("action #{index} ({action}): {e}")))?;
    }
    replay.finish()
}

impl<'a> Replay<'a> {
    fn new(source: &Tree, matching: &'a Matching) -> Self {
        let mut arena = Arena::with_capacity(source.node_count() + 1);
        let virtual_root = arena.new_node(ReplayNode {
            kind: Kind::new(""),
            value: None,
            span: Span::default(),
        });

        let mut work_of_src = vec![None; source.node_count() + 1];
        for a in source.pre_order() {
            let data = source.get(a);
            let w = arena.new_node(ReplayNode {
                kind: data.kind.clone(),
                value: data.value.clone(),
                span: data.span,
            });
            let parent = source
                .parent(a)
                .and_then(|p| work_of_src[usize::from(p)])
                .unwrap_or(virtual_root);
            parent.append(w, &mut arena);
            work_of_src[usize::from(a)] = Some(w);
        }

        Self {
            matching,
            arena,
            virtual_root,
            work_of_src,
            inserted: HashMap::default(),
        }
    }

    fn apply(&mut self, action: &Action) -> Result<(), String> {
        match action {
            Action::Insert {
                node_b,
                parent_b,
                position,
                kind,
                value,
            } => {
                if self.inserted.contains_key(node_b) || self.matching.contains_b(*node_b) {
                    return Err(format!(
                        "destination node {} already exists",
                        usize::from(*node_b)
                    ));
                }
                let parent = self.resolve_parent(*parent_b)?;
                let w = self.arena.new_node(ReplayNode {
                    kind: kind.clone(),
                    value: value.clone(),
                    span: Span::default(),
                });
                self.insert_child(parent, w, *position)?;
                self.inserted.insert(*node_b, w);
            }
            Action::Delete { node_a } => {
                let w = self.source_node(*node_a)?;
                w.remove_subtree(&mut self.arena);
            }
            Action::Update {
                node_a, new_value, ..
            } => {
                let w = self.source_node(*node_a)?;
                self.arena[w].get_mut().value = new_value.clone();
            }
            Action::Move {
                node_a,
                new_parent_b,
                new_position,
                ..
            } => {
                let w = self.source_node(*node_a)?;
                let parent = self.resolve_parent(*new_parent_b)?;
                if parent == w || parent.ancestors(&self.arena).any(|p| p == w) {
                    return Err("cannot move a node below itself".to_string());
                }
                w.detach(&mut self.arena);
                self.insert_child(parent, w, *new_position)?;
            }
        }
        Ok(())
    }

    /// Live replay node of a source node.
    fn source_node(&self, a: NodeId) -> Result<NodeId, String> {
        let w = self
            .work_of_src
            .get(usize::from(a))
            .copied()
            .flatten()
            .ok_or_else(|| format!("unknown source node {}", usize::from(a)))?;
        if w.is_removed(&self.arena) {
            return Err(format!("source node {} was already deleted", usize::from(a)));
        }
        Ok(w)
    }

    /// Replay node standing for a destination parent.
    fn resolve_parent(&self, parent_b: Option<NodeId>) -> Result<NodeId, String> {
        let Some(b) = parent_b else {
            return Ok(self.virtual_root);
        };
        if let Some(&w) = self.inserted.get(&b) {
            return Ok(w);
        }
        match self.matching.get_a(b) {
            Some(a) => self.source_node(a),
            None => Err(format!(
                "destination node {} is neither matched nor inserted yet",
                usize::from(b)
            )),
        }
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<(), String> {
        let count = parent.children(&self.arena).count();
        if index > count {
            return Err(format!("position {index} out of range, parent has {count} children"));
        }
        let result = if index == 0 {
            parent.checked_prepend(child, &mut self.arena)
        } else {
            match parent.children(&self.arena).nth(index - 1) {
                Some(previous) => previous.checked_insert_after(child, &mut self.arena),
                None => return Err(format!("position {index} out of range")),
            }
        };
        result.map_err(|e| e.to_string())
    }

    fn finish(self) -> Result<Tree, DiffError> {
        let mut roots = self.virtual_root.children(&self.arena);
        let (Some(root), None) = (roots.next(), roots.next()) else {
            let count = self.virtual_root.children(&self.arena).count();
            return Err(DiffError::apply(format!(
                "script leaves {count} roots, expected exactly one"
            )));
        };

        let mut index_of: HashMap<NodeId, usize> = HashMap::default();
        let mut flat = Vec::new();
        for (index, w) in root.descendants(&self.arena).enumerate() {
            index_of.insert(w, index);
            let node = self.arena[w].get();
            flat.push(FlatNode {
                kind: node.kind.clone(),
                value: node.value.clone(),
                span: node.span,
                parent: self.arena[w]
                    .parent()
                    .and_then(|p| index_of.get(&p).copied()),
            });
        }
        Tree::from_flat(&flat).map_err(|e| DiffError::apply(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chawathe::generate_edit_script;
    use crate::matching::{MatchingConfig, compute_matching};
    use crate::tree::SyntaxNode;
    use crate::tree::tests::{leaf, node};
    use facet_testhelpers::test;

    fn round_trip(a: &SyntaxNode, b: &SyntaxNode) {
        let tree_a = Tree::from_syntax(a);
        let tree_b = Tree::from_syntax(b);
        let (matching, _) =
            compute_matching(&tree_a, &tree_b, &MatchingConfig::default()).unwrap();
        let actions = generate_edit_script(&tree_a, &tree_b, &matching).unwrap();
        let result = apply_edit_script(&tree_a, &matching, &actions).unwrap();
        assert!(
            result.structurally_eq(&tree_b),
            "replaying {actions:?} gave {:?}",
            result.to_syntax(result.root())
        );
    }

    #[test]
    fn replays_generated_scripts() {
        round_trip(
            &node(
                "Block",
                vec![
                    node("IfStmt", vec![leaf("Cond", "x>0")]),
                    node("Return", vec![leaf("token", "x")]),
                ],
            ),
            &node(
                "Block",
                vec![
                    node("Return", vec![leaf("token", "x")]),
                    node("IfStmt", vec![leaf("Cond", "x>=0")]),
                ],
            ),
        );
        round_trip(
            &node("old", vec![node("keep", vec![leaf("v", "1")]), leaf("gone", "g")]),
            &node("new", vec![leaf("fresh", "f"), node("keep", vec![leaf("v", "1")])]),
        );
        round_trip(
            &node("a", vec![node("b", vec![node("c", vec![leaf("d", "1")])])]),
            &node("a", vec![leaf("d", "1"), node("c", vec![]), node("b", vec![])]),
        );
    }

    #[test]
    fn empty_script_is_identity() {
        let tree = Tree::from_syntax(&node("p", vec![leaf("x", "1")]));
        let result = apply_edit_script(&tree, &Matching::new(), &[]).unwrap();
        assert!(result.structurally_eq(&tree));
    }

    #[test]
    fn rejects_out_of_range_position() {
        let tree = Tree::from_syntax(&node("p", vec![leaf("x", "1")]));
        let x = tree.children(tree.root()).next().unwrap();
        let err = apply_edit_script(
            &tree,
            &Matching::new(),
            &[Action::Move {
                node_a: x,
                node_b: x,
                new_parent_b: None,
                new_position: 5,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DiffError::Apply { .. }), "{err}");
    }

    #[test]
    fn rejects_unknown_parent_and_dangling_roots() {
        let tree = Tree::from_syntax(&node("p", vec![leaf("x", "1")]));
        let x = tree.children(tree.root()).next().unwrap();

        let unknown_parent = apply_edit_script(
            &tree,
            &Matching::new(),
            &[Action::Insert {
                node_b: tree.root(),
                parent_b: Some(x),
                position: 0,
                kind: Kind::new("y"),
                value: None,
            }],
        );
        assert!(matches!(unknown_parent, Err(DiffError::Apply { .. })));

        let two_roots = apply_edit_script(
            &tree,
            &Matching::new(),
            &[Action::Insert {
                node_b: tree.root(),
                parent_b: None,
                position: 1,
                kind: Kind::new("y"),
                value: None,
            }],
        );
        assert!(matches!(two_roots, Err(DiffError::Apply { .. })));

        let deleted_twice = apply_edit_script(
            &tree,
            &Matching::new(),
            &[Action::Delete { node_a: x }, Action::Delete { node_a: x }],
        );
        assert!(matches!(deleted_twice, Err(DiffError::Apply { .. })));
    }
}
