//! Arena-backed syntax trees with cached structural properties.
//!
//! A [`Tree`] is built once from a parsed form ([`SyntaxNode`] or a flat
//! [`FlatNode`] list) and never mutated afterwards. Building computes, in a
//! single bottom-up pass, every property the matchers need in O(1):
//! height, structural hash, subtree size, sibling position and pre-order index.
//!
//! Because subtrees are contiguous in pre-order, "is `b` below `a`" and
//! "all descendants of `a`" are range operations on [`Tree::pre_order`].

use core::fmt;
use core::hash::{Hash, Hasher};

use compact_str::CompactString;
use indextree::{Arena, NodeEdge, NodeId};
use rapidhash::RapidHasher;
use smallvec::SmallVec;

use crate::error::DiffError;

/// Structural hash of a subtree (kind, value and children, order-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeHash(pub u64);

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Source range a node was parsed from. Carried through for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Byte offset of the first byte
    pub start: usize,
    /// Byte offset one past the last byte
    pub end: usize,
    /// 1-based line of `start` (0 when unknown)
    pub start_line: u32,
    /// 1-based line of `end` (0 when unknown)
    pub end_line: u32,
}

impl Span {
    /// A byte range with unknown lines.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            start_line: 0,
            end_line: 0,
        }
    }

    /// Attach line numbers.
    pub fn with_lines(mut self, start_line: u32, end_line: u32) -> Self {
        self.start_line = start_line;
        self.end_line = end_line;
        self
    }
}

/// Syntactic category of a node, e.g. `if-statement` or `identifier`.
///
/// The engine never interprets kinds, it only compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kind(CompactString);

impl Kind {
    /// Create a kind label.
    pub fn new(label: impl AsRef<str>) -> Self {
        Kind(CompactString::new(label.as_ref()))
    }

    /// The label text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Kind {
    fn from(label: &str) -> Self {
        Kind::new(label)
    }
}

impl From<String> for Kind {
    fn from(label: String) -> Self {
        Kind(CompactString::from(label))
    }
}

/// Per-node data stored in the arena.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Syntactic category
    pub kind: Kind,
    /// Optional textual payload (identifier spelling, literal text, ...)
    pub value: Option<CompactString>,
    /// Source range
    pub span: Span,
    /// Structural hash of the subtree rooted here
    pub hash: NodeHash,
    /// Nodes on the longest downward path; a leaf has height 1
    pub height: usize,
    /// Number of nodes in the subtree, including this one
    pub size: usize,
    /// Index among siblings
    pub position: usize,
    /// Index in the tree's pre-order sequence
    pub pre_order: usize,
}

impl NodeData {
    fn new(kind: Kind, value: Option<CompactString>, span: Span) -> Self {
        Self {
            kind,
            value,
            span,
            hash: NodeHash::default(),
            height: 0,
            size: 0,
            position: 0,
            pre_order: 0,
        }
    }
}

/// Nested parsed form, as produced by a language front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    /// Syntactic category
    pub kind: Kind,
    /// Optional textual payload
    pub value: Option<CompactString>,
    /// Source range
    pub span: Span,
    /// Ordered children
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    /// A node with no value and no children.
    pub fn new(kind: impl Into<Kind>) -> Self {
        Self {
            kind: kind.into(),
            value: None,
            span: Span::default(),
            children: Vec::new(),
        }
    }

    /// A childless node carrying a value.
    pub fn leaf(kind: impl Into<Kind>, value: impl AsRef<str>) -> Self {
        Self::new(kind).with_value(value)
    }

    /// Set the value.
    pub fn with_value(mut self, value: impl AsRef<str>) -> Self {
        self.value = Some(CompactString::new(value.as_ref()));
        self
    }

    /// Set the span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Append one child.
    pub fn with_child(mut self, child: SyntaxNode) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children.
    pub fn with_children(mut self, children: impl IntoIterator<Item = SyntaxNode>) -> Self {
        self.children.extend(children);
        self
    }
}

impl Drop for SyntaxNode {
    fn drop(&mut self) {
        // Detach descendants onto a flat stack so deep nesting does not recurse.
        let mut pending = core::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Flat parsed form: one record per node, linked by parent index.
///
/// Siblings keep the relative order they have in the input slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatNode {
    /// Syntactic category
    pub kind: Kind,
    /// Optional textual payload
    pub value: Option<CompactString>,
    /// Source range
    pub span: Span,
    /// Index of the parent record, `None` for the root
    pub parent: Option<usize>,
}

/// An immutable syntax tree.
#[derive(Debug, Clone)]
pub struct Tree {
    arena: Arena<NodeData>,
    root: NodeId,
    pre_order: Vec<NodeId>,
}

impl Tree {
    /// Build a tree from its nested parsed form.
    pub fn from_syntax(root: &SyntaxNode) -> Self {
        let mut arena = Arena::new();
        let mut stack: Vec<(&SyntaxNode, Option<NodeId>)> = vec![(root, None)];
        let mut root_id = None;

        while let Some((node, parent)) = stack.pop() {
            let id = arena.new_node(NodeData::new(
                node.kind.clone(),
                node.value.clone(),
                node.span,
            ));
            match parent {
                Some(parent) => parent.append(id, &mut arena),
                None => root_id = Some(id),
            }
            // Reverse so siblings are popped (and appended) in order.
            for child in node.children.iter().rev() {
                stack.push((child, Some(id)));
            }
        }

        let root = root_id.unwrap_or_else(|| unreachable!("the root is pushed first"));
        Self::finish(arena, root)
    }

    /// Build a tree from a flat list of nodes linked by parent index.
    ///
    /// Fails with [`DiffError::Structure`] when there is no root, more than
    /// one root, a parent index that does not exist, or a cycle.
    pub fn from_flat(nodes: &[FlatNode]) -> Result<Self, DiffError> {
        if nodes.is_empty() {
            return Err(DiffError::structure("missing root: no nodes"));
        }

        let mut arena = Arena::with_capacity(nodes.len());
        let ids: Vec<NodeId> = nodes
            .iter()
            .map(|n| arena.new_node(NodeData::new(n.kind.clone(), n.value.clone(), n.span)))
            .collect();

        let mut root = None;
        for (index, node) in nodes.iter().enumerate() {
            match node.parent {
                None => {
                    if let Some(previous) = root {
                        return Err(DiffError::structure(format!(
                            "multiple roots: nodes {previous} and {index} have no parent"
                        )));
                    }
                    root = Some(index);
                }
                Some(parent) if parent >= nodes.len() => {
                    return Err(DiffError::structure(format!(
                        "dangling parent reference: node {index} points at {parent}, only {} nodes",
                        nodes.len()
                    )));
                }
                Some(parent) => {
                    ids[parent]
                        .checked_append(ids[index], &mut arena)
                        .map_err(|e| {
                            DiffError::structure(format!(
                                "node {index} cannot be attached under {parent}: {e}"
                            ))
                        })?;
                }
            }
        }

        let Some(root) = root else {
            return Err(DiffError::structure("missing root: every node has a parent"));
        };

        let reachable = ids[root].descendants(&arena).count();
        if reachable != nodes.len() {
            return Err(DiffError::structure(format!(
                "{} of {} nodes are not reachable from the root (cycle)",
                nodes.len() - reachable,
                nodes.len()
            )));
        }

        Ok(Self::finish(arena, ids[root]))
    }

    /// Compute every derived property in one pass over the finished arena.
    fn finish(mut arena: Arena<NodeData>, root: NodeId) -> Self {
        let pre_order: Vec<NodeId> = root.descendants(&arena).collect();

        for (index, &id) in pre_order.iter().enumerate() {
            arena[id].get_mut().pre_order = index;
        }

        // Reverse pre-order visits every child before its parent.
        for &id in pre_order.iter().rev() {
            let children: SmallVec<[NodeId; 8]> = id.children(&arena).collect();

            let mut hasher = RapidHasher::default();
            let data = arena[id].get();
            data.kind.hash(&mut hasher);
            data.value.hash(&mut hasher);
            children.len().hash(&mut hasher);

            let mut size = 1;
            let mut tallest_child = 0;
            for (position, &child) in children.iter().enumerate() {
                let child_data = arena[child].get_mut();
                child_data.position = position;
                child_data.hash.0.hash(&mut hasher);
                size += child_data.size;
                tallest_child = tallest_child.max(child_data.height);
            }

            let data = arena[id].get_mut();
            data.hash = NodeHash(hasher.finish());
            data.size = size;
            data.height = tallest_child + 1;
        }

        Self {
            arena,
            root,
            pre_order,
        }
    }

    /// The root node.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the tree.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.pre_order.len()
    }

    /// Whether `id` names a node of this tree's arena.
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some()
    }

    /// All data of a node.
    #[inline]
    pub fn get(&self, id: NodeId) -> &NodeData {
        self.arena[id].get()
    }

    /// Kind of a node.
    #[inline]
    pub fn kind(&self, id: NodeId) -> &Kind {
        &self.get(id).kind
    }

    /// Value of a node.
    #[inline]
    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.get(id).value.as_deref()
    }

    /// Source span of a node.
    #[inline]
    pub fn span(&self, id: NodeId) -> Span {
        self.get(id).span
    }

    /// Structural hash of the subtree rooted at `id`.
    #[inline]
    pub fn hash(&self, id: NodeId) -> NodeHash {
        self.get(id).hash
    }

    /// Height of the subtree rooted at `id` (leaves are 1).
    #[inline]
    pub fn height(&self, id: NodeId) -> usize {
        self.get(id).height
    }

    /// Number of nodes in the subtree rooted at `id`.
    #[inline]
    pub fn size(&self, id: NodeId) -> usize {
        self.get(id).size
    }

    /// Index of `id` among its siblings.
    #[inline]
    pub fn position(&self, id: NodeId) -> usize {
        self.get(id).position
    }

    /// Index of `id` in pre-order.
    #[inline]
    pub fn pre_order_index(&self, id: NodeId) -> usize {
        self.get(id).pre_order
    }

    /// Parent of a node, `None` for the root.
    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    /// Ordered children of a node.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    /// Number of children.
    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    /// Whether the node has no children.
    #[inline]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.arena[id].first_child().is_none()
    }

    /// Every node, parents before children.
    pub fn pre_order(&self) -> impl DoubleEndedIterator<Item = NodeId> + ExactSizeIterator + '_ {
        self.pre_order.iter().copied()
    }

    /// Every node, children before parents.
    pub fn post_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.root.traverse(&self.arena).filter_map(|edge| match edge {
            NodeEdge::End(id) => Some(id),
            NodeEdge::Start(_) => None,
        })
    }

    /// The subtree rooted at `id` in pre-order, `id` first.
    #[inline]
    pub fn subtree(&self, id: NodeId) -> &[NodeId] {
        let data = self.get(id);
        &self.pre_order[data.pre_order..data.pre_order + data.size]
    }

    /// Strict descendants of `id` in pre-order.
    #[inline]
    pub fn descendants(&self, id: NodeId) -> &[NodeId] {
        &self.subtree(id)[1..]
    }

    /// Whether `node` lies strictly below `ancestor`.
    #[inline]
    pub fn is_descendant(&self, ancestor: NodeId, node: NodeId) -> bool {
        let a = self.get(ancestor);
        let n = self.get(node).pre_order;
        a.pre_order < n && n < a.pre_order + a.size
    }

    /// Ancestors of `id`, nearest first, excluding `id`.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.ancestors(&self.arena).skip(1)
    }

    /// Exact comparison of the subtree at `a` with the subtree at `b` in `other`:
    /// same shape, kinds and values.
    pub fn subtree_eq(&self, a: NodeId, other: &Tree, b: NodeId) -> bool {
        let left = self.subtree(a);
        let right = other.subtree(b);
        left.len() == right.len()
            && left.iter().zip(right).all(|(&x, &y)| {
                let dx = self.get(x);
                let dy = other.get(y);
                dx.kind == dy.kind
                    && dx.value == dy.value
                    && self.child_count(x) == other.child_count(y)
            })
    }

    /// Whether the two trees are identical in shape, kinds and values.
    pub fn structurally_eq(&self, other: &Tree) -> bool {
        self.hash(self.root) == other.hash(other.root)
            && self.subtree_eq(self.root, other, other.root)
    }

    /// Rebuild the nested form of the subtree rooted at `id`.
    pub fn to_syntax(&self, id: NodeId) -> SyntaxNode {
        // Reverse pre-order visits children before parents, last child first,
        // so each node finds its children on top of the stack.
        let mut built: Vec<SyntaxNode> = Vec::new();
        for &n in self.subtree(id).iter().rev() {
            let data = self.get(n);
            let first_child = built.len() - self.child_count(n);
            let children = built.drain(first_child..).rev().collect();
            built.push(SyntaxNode {
                kind: data.kind.clone(),
                value: data.value.clone(),
                span: data.span,
                children,
            });
        }
        built.swap_remove(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facet_testhelpers::test;

    pub(crate) fn node(kind: &str, children: Vec<SyntaxNode>) -> SyntaxNode {
        SyntaxNode::new(kind).with_children(children)
    }

    pub(crate) fn leaf(kind: &str, value: &str) -> SyntaxNode {
        SyntaxNode::leaf(kind, value)
    }

    fn flat(kind: &str, parent: Option<usize>) -> FlatNode {
        FlatNode {
            kind: Kind::new(kind),
            value: None,
            span: Span::default(),
            parent,
        }
    }

    #[test]
    fn derived_properties_are_computed_bottom_up() {
        let tree = Tree::from_syntax(&node(
            "block",
            vec![
                node("if", vec![leaf("cond", "x>0")]),
                leaf("return", "x"),
            ],
        ));

        let root = tree.root();
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.height(root), 3);
        assert_eq!(tree.size(root), 4);

        let children: Vec<_> = tree.children(root).collect();
        assert_eq!(tree.height(children[0]), 2);
        assert_eq!(tree.height(children[1]), 1);
        assert_eq!(tree.position(children[1]), 1);
        assert_eq!(tree.kind(children[0]).as_str(), "if");
        assert_eq!(tree.value(children[1]), Some("x"));
    }

    #[test]
    fn traversal_orders() {
        let tree = Tree::from_syntax(&node(
            "a",
            vec![node("b", vec![leaf("c", "1")]), leaf("d", "2")],
        ));
        let kinds = |ids: Vec<NodeId>| -> Vec<String> {
            ids.into_iter()
                .map(|id| tree.kind(id).to_string())
                .collect()
        };

        assert_eq!(kinds(tree.pre_order().collect()), ["a", "b", "c", "d"]);
        assert_eq!(kinds(tree.post_order().collect()), ["c", "b", "d", "a"]);
        assert_eq!(kinds(tree.descendants(tree.root()).to_vec()), ["b", "c", "d"]);

        let c = tree.pre_order().nth(2).unwrap();
        assert!(tree.is_descendant(tree.root(), c));
        assert!(!tree.is_descendant(c, tree.root()));
        assert!(!tree.is_descendant(c, c));
        assert_eq!(kinds(tree.ancestors(c).collect()), ["b", "a"]);
    }

    #[test]
    fn hash_is_order_and_value_sensitive() {
        let ab = Tree::from_syntax(&node("p", vec![leaf("x", "a"), leaf("x", "b")]));
        let ba = Tree::from_syntax(&node("p", vec![leaf("x", "b"), leaf("x", "a")]));
        let ab2 = Tree::from_syntax(&node("p", vec![leaf("x", "a"), leaf("x", "b")]));
        let ac = Tree::from_syntax(&node("p", vec![leaf("x", "a"), leaf("x", "c")]));

        assert_ne!(ab.hash(ab.root()), ba.hash(ba.root()));
        assert_ne!(ab.hash(ab.root()), ac.hash(ac.root()));
        assert_eq!(ab.hash(ab.root()), ab2.hash(ab2.root()));
        assert!(ab.structurally_eq(&ab2));
        assert!(!ab.structurally_eq(&ba));
    }

    #[test]
    fn from_flat_matches_from_syntax() {
        let flat_tree = Tree::from_flat(&[
            flat("a", None),
            flat("b", Some(0)),
            flat("c", Some(1)),
            flat("d", Some(0)),
        ])
        .unwrap();
        let nested = Tree::from_syntax(&node(
            "a",
            vec![node("b", vec![SyntaxNode::new("c")]), SyntaxNode::new("d")],
        ));
        assert!(flat_tree.structurally_eq(&nested));
    }

    #[test]
    fn from_flat_accepts_children_listed_before_parents() {
        let tree = Tree::from_flat(&[flat("c", Some(1)), flat("b", Some(2)), flat("a", None)])
            .unwrap();
        assert_eq!(tree.kind(tree.root()).as_str(), "a");
        assert_eq!(tree.height(tree.root()), 3);
    }

    #[test]
    fn from_flat_rejects_malformed_input() {
        assert!(matches!(
            Tree::from_flat(&[]),
            Err(DiffError::Structure { .. })
        ));
        assert!(matches!(
            Tree::from_flat(&[flat("a", Some(1)), flat("b", Some(0))]),
            Err(DiffError::Structure { .. })
        ));
        assert!(matches!(
            Tree::from_flat(&[flat("a", None), flat("b", None)]),
            Err(DiffError::Structure { .. })
        ));
        assert!(matches!(
            Tree::from_flat(&[flat("a", None), flat("b", Some(7))]),
            Err(DiffError::Structure { .. })
        ));
        assert!(matches!(
            Tree::from_flat(&[flat("a", None), flat("b", Some(1))]),
            Err(DiffError::Structure { .. })
        ));
    }

    #[test]
    fn deep_chains_convert_to_syntax() {
        let depth: usize = 100_000;
        let nodes: Vec<FlatNode> = (0..depth).map(|i| flat("n", i.checked_sub(1))).collect();
        let tree = Tree::from_flat(&nodes).unwrap();
        assert_eq!(tree.height(tree.root()), depth);

        let syntax = tree.to_syntax(tree.root());
        let mut seen = 1;
        let mut current = &syntax;
        while let [child] = current.children.as_slice() {
            seen += 1;
            current = child;
        }
        assert_eq!(seen, depth);
    }

    #[test]
    fn to_syntax_round_trips() {
        let syntax = node(
            "module",
            vec![node("fn", vec![leaf("ident", "main"), node("body", vec![])])],
        );
        let tree = Tree::from_syntax(&syntax);
        assert_eq!(tree.to_syntax(tree.root()), syntax);
    }
}
