//! Chawathe edit script generation algorithm.
//!
//! Generates an edit script (INSERT, DELETE, UPDATE, MOVE) from a node matching.
//! Based on "Change Detection in Hierarchically Structured Information" (Chawathe et al., 1996).
//!
//! The source tree is copied into a scratch arena under a virtual root, and the
//! destination is walked in pre-order:
//! 1. An unmatched destination node is inserted at `find_pos`
//! 2. A matched node whose value differs is updated
//! 3. A matched node under the wrong parent is detached and moved to `find_pos`
//! 4. The children of the node are aligned: an LCS of the matched children
//!    stays put, everything else is moved into place
//!
//! Finally, source nodes without a partner are deleted, one action per
//! unmatched subtree, and the scratch tree is checked against the destination.

use crate::{debug, trace};
use core::fmt;

use compact_str::CompactString;
use indextree::{Arena, NodeId};
use smallvec::SmallVec;

use crate::error::DiffError;
use crate::matching::Matching;
use crate::similarity::lcs;
use crate::tree::{Kind, Tree};

/// An edit action. Source nodes are `node_a`, destination nodes `node_b`.
///
/// Positions refer to the tree as it is when the action runs: an insert puts
/// the node at `position` among the parent's current children, a move first
/// detaches the node and then inserts it at `new_position` among the new
/// parent's remaining children.
#[derive(Clone, PartialEq, Eq)]
pub enum Action {
    /// Insert a new node.
    Insert {
        /// The new node in the destination tree
        node_b: NodeId,
        /// Parent in the destination tree, `None` for the virtual root
        parent_b: Option<NodeId>,
        /// Position among siblings (0-indexed)
        position: usize,
        /// The node's kind
        kind: Kind,
        /// The node's value
        value: Option<CompactString>,
    },

    /// Delete a source node together with its current subtree.
    Delete {
        /// The node in the source tree being deleted
        node_a: NodeId,
    },

    /// Change the value of a matched node.
    Update {
        /// The node in the source tree
        node_a: NodeId,
        /// The corresponding node in the destination tree
        node_b: NodeId,
        /// Value before
        old_value: Option<CompactString>,
        /// Value after
        new_value: Option<CompactString>,
    },

    /// Move a node (with its subtree) to a new location.
    Move {
        /// The node in the source tree
        node_a: NodeId,
        /// The corresponding node in the destination tree
        node_b: NodeId,
        /// New parent in the destination tree, `None` for the virtual root
        new_parent_b: Option<NodeId>,
        /// New position among siblings
        new_position: usize,
    },
}

struct Parent(Option<NodeId>);

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "b:{}", usize::from(id)),
            None => f.write_str("root"),
        }
    }
}

struct Value<'a>(&'a Option<CompactString>);

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:?}"),
            None => f.write_str("∅"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Insert {
                node_b,
                parent_b,
                position,
                kind,
                value,
            } => {
                write!(f, "Insert(b:{} {}", usize::from(*node_b), kind)?;
                if value.is_some() {
                    write!(f, "={}", Value(value))?;
                }
                write!(f, " @{} under {})", position, Parent(*parent_b))
            }
            Action::Delete { node_a } => write!(f, "Delete(a:{})", usize::from(*node_a)),
            Action::Update {
                node_a,
                node_b,
                old_value,
                new_value,
            } => write!(
                f,
                "Update(a:{} → b:{} {} → {})",
                usize::from(*node_a),
                usize::from(*node_b),
                Value(old_value),
                Value(new_value)
            ),
            Action::Move {
                node_a,
                node_b,
                new_parent_b,
                new_position,
            } => write!(
                f,
                "Move(a:{} → b:{} @{} under {})",
                usize::from(*node_a),
                usize::from(*node_b),
                new_position,
                Parent(*new_parent_b)
            ),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Number of actions of each type in a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionCounts {
    /// Insert actions
    pub inserts: usize,
    /// Delete actions
    pub deletes: usize,
    /// Update actions
    pub updates: usize,
    /// Move actions
    pub moves: usize,
}

impl ActionCounts {
    /// Tally a script.
    pub fn of(actions: &[Action]) -> Self {
        let mut counts = Self::default();
        for action in actions {
            match action {
                Action::Insert { .. } => counts.inserts += 1,
                Action::Delete { .. } => counts.deletes += 1,
                Action::Update { .. } => counts.updates += 1,
                Action::Move { .. } => counts.moves += 1,
            }
        }
        counts
    }

    /// Total number of actions.
    pub fn total(&self) -> usize {
        self.inserts + self.deletes + self.updates + self.moves
    }
}

impl fmt::Display for ActionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserts, {} deletes, {} updates, {} moves",
            self.inserts, self.deletes, self.updates, self.moves
        )
    }
}

/// Wrapper for collecting actions with automatic tracing.
struct Ops {
    inner: Vec<Action>,
}

impl Ops {
    fn new() -> Self {
        Self { inner: Vec::new() }
    }

    fn push(&mut self, op: Action) {
        debug!(%op, "emit");
        self.inner.push(op);
    }

    fn into_inner(self) -> Vec<Action> {
        self.inner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Virtual,
    Source(NodeId),
    Inserted,
}

/// A node of the scratch tree.
#[derive(Debug, Clone)]
struct WorkNode {
    origin: Origin,
    kind: Kind,
    value: Option<CompactString>,
    /// Destination partner
    dst: Option<NodeId>,
}

struct ScriptBuilder<'a> {
    dst: &'a Tree,
    arena: Arena<WorkNode>,
    virtual_root: NodeId,
    /// Scratch node standing for each destination node, indexed by NodeId
    work_of_dst: Vec<Option<NodeId>>,
    /// In-order marks of destination nodes, indexed by NodeId
    dst_in_order: Vec<bool>,
    ops: Ops,
}

/// Generate an edit script from a matching between two trees.
///
/// Fails with [`DiffError::InvariantViolation`] if the matching is not a
/// valid mapping between `src` and `dst`, or if replaying the script on the
/// scratch copy does not reproduce `dst`.
pub fn generate_edit_script(
    src: &Tree,
    dst: &Tree,
    matching: &Matching,
) -> Result<Vec<Action>, DiffError> {
    trace!(matched_pairs = matching.len(), "generate_edit_script start");
    matching.validate(src, dst)?;

    let mut builder = ScriptBuilder::new(src, dst, matching);
    for x in dst.pre_order() {
        builder.visit(x)?;
    }
    builder.delete_unmatched();
    builder.check_against_destination()?;

    let actions = builder.ops.into_inner();
    debug!(total_ops = actions.len(), "generate_edit_script done");
    Ok(actions)
}

impl<'a> ScriptBuilder<'a> {
    fn new(src: &Tree, dst: &'a Tree, matching: &Matching) -> Self {
        let mut arena = Arena::with_capacity(src.node_count() + dst.node_count() + 1);
        let virtual_root = arena.new_node(WorkNode {
            origin: Origin::Virtual,
            kind: Kind::new(""),
            value: None,
            dst: None,
        });

        let mut work_of_src: Vec<Option<NodeId>> = vec![None; src.node_count() + 1];
        let mut work_of_dst: Vec<Option<NodeId>> = vec![None; dst.node_count() + 1];
        for a in src.pre_order() {
            let data = src.get(a);
            let w = arena.new_node(WorkNode {
                origin: Origin::Source(a),
                kind: data.kind.clone(),
                value: data.value.clone(),
                dst: matching.get_b(a),
            });
            let parent = src
                .parent(a)
                .and_then(|p| work_of_src[usize::from(p)])
                .unwrap_or(virtual_root);
            parent.append(w, &mut arena);
            work_of_src[usize::from(a)] = Some(w);
            if let Some(b) = matching.get_b(a) {
                work_of_dst[usize::from(b)] = Some(w);
            }
        }

        Self {
            dst,
            arena,
            virtual_root,
            work_of_dst,
            dst_in_order: vec![false; dst.node_count() + 1],
            ops: Ops::new(),
        }
    }

    fn work_of(&self, b: NodeId) -> Result<NodeId, DiffError> {
        self.work_of_dst[usize::from(b)].ok_or_else(|| {
            DiffError::invariant(format!(
                "destination node {} ({}) has no counterpart in the scratch tree",
                usize::from(b),
                self.dst.kind(b)
            ))
        })
    }

    fn source_of(&self, w: NodeId, b: NodeId) -> Result<NodeId, DiffError> {
        match self.arena[w].get().origin {
            Origin::Source(a) => Ok(a),
            origin => Err(DiffError::invariant(format!(
                "cannot move destination node {} ({}): its scratch node is {origin:?}, not a source node",
                usize::from(b),
                self.dst.kind(b)
            ))),
        }
    }

    fn visit(&mut self, x: NodeId) -> Result<(), DiffError> {
        let dst = self.dst;
        let parent_b = dst.parent(x);
        let z = match parent_b {
            Some(p) => self.work_of(p)?,
            None => self.virtual_root,
        };

        let w = match self.work_of_dst[usize::from(x)] {
            None => {
                let data = dst.get(x);
                let position = self.find_pos(x)?;
                let w = self.arena.new_node(WorkNode {
                    origin: Origin::Inserted,
                    kind: data.kind.clone(),
                    value: data.value.clone(),
                    dst: Some(x),
                });
                self.insert_child(z, w, position)?;
                self.work_of_dst[usize::from(x)] = Some(w);
                self.ops.push(Action::Insert {
                    node_b: x,
                    parent_b,
                    position,
                    kind: data.kind.clone(),
                    value: data.value.clone(),
                });
                w
            }
            Some(w) => {
                let a = self.source_of(w, x)?;
                let new_value = &dst.get(x).value;
                if self.arena[w].get().value != *new_value {
                    let old_value =
                        core::mem::replace(&mut self.arena[w].get_mut().value, new_value.clone());
                    self.ops.push(Action::Update {
                        node_a: a,
                        node_b: x,
                        old_value,
                        new_value: new_value.clone(),
                    });
                }

                if self.arena[w].parent() != Some(z) {
                    w.detach(&mut self.arena);
                    let new_position = self.find_pos(x)?;
                    self.insert_child(z, w, new_position)?;
                    self.ops.push(Action::Move {
                        node_a: a,
                        node_b: x,
                        new_parent_b: parent_b,
                        new_position,
                    });
                }
                w
            }
        };

        self.dst_in_order[usize::from(x)] = true;
        self.align_children(w, x)
    }

    /// Put the matched children of `w` in the order of the children of `x`,
    /// moving as few of them as possible.
    fn align_children(&mut self, w: NodeId, x: NodeId) -> Result<(), DiffError> {
        for b in self.dst.children(x) {
            self.dst_in_order[usize::from(b)] = false;
        }

        let s1: SmallVec<[NodeId; 8]> = w
            .children(&self.arena)
            .filter(|&c| {
                self.arena[c]
                    .get()
                    .dst
                    .is_some_and(|b| self.dst.parent(b) == Some(x))
            })
            .collect();
        let s2: SmallVec<[NodeId; 8]> = self
            .dst
            .children(x)
            .filter(|&b| {
                self.work_of_dst[usize::from(b)].is_some_and(|c| self.arena[c].parent() == Some(w))
            })
            .collect();
        if s2.is_empty() {
            return Ok(());
        }

        let arena = &self.arena;
        let common = lcs(&s1, &s2, |&c, &b| arena[c].get().dst == Some(b));
        let mut kept = vec![false; s2.len()];
        for &(_, j) in &common {
            self.dst_in_order[usize::from(s2[j])] = true;
            kept[j] = true;
        }

        for (j, &b) in s2.iter().enumerate() {
            if kept[j] {
                continue;
            }
            let c = self.work_of(b)?;
            let a = self.source_of(c, b)?;
            c.detach(&mut self.arena);
            let new_position = self.find_pos(b)?;
            self.insert_child(w, c, new_position)?;
            trace!(
                a = usize::from(a),
                b = usize::from(b),
                new_position,
                "align_children: out of order"
            );
            self.ops.push(Action::Move {
                node_a: a,
                node_b: b,
                new_parent_b: Some(x),
                new_position,
            });
            self.dst_in_order[usize::from(b)] = true;
        }
        Ok(())
    }

    /// Index at which the counterpart of `x` goes among its new siblings: one
    /// past the counterpart of the rightmost in-order left sibling of `x`, or 0.
    fn find_pos(&self, x: NodeId) -> Result<usize, DiffError> {
        let Some(parent) = self.dst.parent(x) else {
            return Ok(0);
        };

        let mut rightmost = None;
        for sibling in self.dst.children(parent) {
            if sibling == x {
                break;
            }
            if self.dst_in_order[usize::from(sibling)] {
                rightmost = Some(sibling);
            }
        }

        let Some(v) = rightmost else {
            return Ok(0);
        };
        let u = self.work_of(v)?;
        Ok(u.preceding_siblings(&self.arena).count())
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<(), DiffError> {
        let result = if index == 0 {
            parent.checked_prepend(child, &mut self.arena)
        } else {
            let Some(previous) = parent.children(&self.arena).nth(index - 1) else {
                return Err(DiffError::invariant(format!(
                    "position {index} is past the end of the children of scratch node {}",
                    usize::from(parent)
                )));
            };
            previous.checked_insert_after(child, &mut self.arena)
        };
        result.map_err(|e| DiffError::invariant(format!("scratch tree edit failed: {e}")))
    }

    fn is_unmatched_source(&self, w: NodeId) -> bool {
        let node = self.arena[w].get();
        matches!(node.origin, Origin::Source(_)) && node.dst.is_none()
    }

    /// Delete every unmatched source node. A subtree made only of unmatched
    /// nodes becomes a single delete of its root.
    fn delete_unmatched(&mut self) {
        let order: Vec<NodeId> = self.virtual_root.descendants(&self.arena).collect();
        for &w in order.iter().rev() {
            if !self.is_unmatched_source(w) {
                continue;
            }
            if self.arena[w]
                .parent()
                .is_some_and(|p| self.is_unmatched_source(p))
            {
                continue;
            }
            if let Origin::Source(a) = self.arena[w].get().origin {
                self.ops.push(Action::Delete { node_a: a });
            }
            w.remove_subtree(&mut self.arena);
        }
    }

    fn check_against_destination(&self) -> Result<(), DiffError> {
        let mut roots = self.virtual_root.children(&self.arena);
        let (Some(root), None) = (roots.next(), roots.next()) else {
            return Err(DiffError::invariant(
                "scratch tree does not have exactly one root after the script",
            ));
        };

        let mut stack = vec![(root, self.dst.root())];
        while let Some((w, x)) = stack.pop() {
            let node = self.arena[w].get();
            if node.dst != Some(x)
                || node.kind != *self.dst.kind(x)
                || node.value.as_deref() != self.dst.value(x)
            {
                return Err(DiffError::invariant(format!(
                    "scratch node {} ({}) does not reproduce destination node {} ({})",
                    usize::from(w),
                    node.kind,
                    usize::from(x),
                    self.dst.kind(x)
                )));
            }

            let work_children: SmallVec<[NodeId; 8]> = w.children(&self.arena).collect();
            let dst_children: SmallVec<[NodeId; 8]> = self.dst.children(x).collect();
            if work_children.len() != dst_children.len() {
                return Err(DiffError::invariant(format!(
                    "scratch node {} has {} children, destination node {} has {}",
                    usize::from(w),
                    work_children.len(),
                    usize::from(x),
                    dst_children.len()
                )));
            }
            stack.extend(work_children.into_iter().zip(dst_children));
        }

        trace!(
            nodes = self.dst.node_count(),
            "scratch tree matches destination"
        );
        Ok(())
    }
}
