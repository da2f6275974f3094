//! Height-bucketed index of structural hashes.

use std::collections::BTreeMap;

use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;
use smallvec::SmallVec;

use crate::tree::{NodeHash, Tree};

#[derive(Debug, Default)]
struct HeightBucket {
    /// Every node of this height, in pre-order
    nodes: Vec<NodeId>,
    /// Nodes of this height grouped by hash, each group in pre-order
    by_hash: HashMap<NodeHash, SmallVec<[NodeId; 2]>>,
}

/// Maps (height, hash) to the nodes of one tree carrying that signature.
///
/// Built once per tree and never updated; the matchers only read it.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    by_height: BTreeMap<usize, HeightBucket>,
}

impl SignatureIndex {
    /// Index every node of `tree`.
    pub fn build(tree: &Tree) -> Self {
        let mut by_height: BTreeMap<usize, HeightBucket> = BTreeMap::new();
        for id in tree.pre_order() {
            let bucket = by_height.entry(tree.height(id)).or_default();
            bucket.nodes.push(id);
            bucket.by_hash.entry(tree.hash(id)).or_default().push(id);
        }
        Self { by_height }
    }

    /// Heights present in the tree, tallest first.
    pub fn heights(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_height.keys().rev().copied()
    }

    /// Height of the tallest subtree (the root), 0 for an empty index.
    pub fn max_height(&self) -> usize {
        self.by_height.keys().next_back().copied().unwrap_or(0)
    }

    /// All nodes of the given height, in pre-order.
    pub fn nodes_at_height(&self, height: usize) -> &[NodeId] {
        self.by_height
            .get(&height)
            .map(|bucket| bucket.nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes of the given height and hash, in pre-order.
    pub fn candidates(&self, height: usize, hash: NodeHash) -> &[NodeId] {
        self.by_height
            .get(&height)
            .and_then(|bucket| bucket.by_hash.get(&hash))
            .map(|nodes| nodes.as_slice())
            .unwrap_or(&[])
    }
}

/// Whether the subtree at `a` in `src` and the subtree at `b` in `dst` are
/// identical. The hash is only a filter; equal hashes are confirmed by a full
/// comparison.
#[inline]
pub fn isomorphic(src: &Tree, a: NodeId, dst: &Tree, b: NodeId) -> bool {
    src.hash(a) == dst.hash(b)
        && src.height(a) == dst.height(b)
        && src.size(a) == dst.size(b)
        && src.subtree_eq(a, dst, b)
}
