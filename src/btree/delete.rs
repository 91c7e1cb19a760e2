//! Deletion and rebalancing.
//!
//! The one generic implementation serving every tree variant. A delete
//! removes the entry from its bucket and repacks the leaf's buckets to
//! as few near-half-full buckets as fit. If the leaf's key count then
//! drops below the minimum, the node is rebalanced against an adjacent
//! same-parent sibling (the shared parent separator is the anchor):
//! the combined content is either redistributed across the two pages,
//! or, when it fits one page, merged into the left one with the
//! separator demoted. A merge that leaves the root keyless splices the
//! sole remaining child into page 0 and reduces the tree depth by one.
//!
//! Leaf-level rebalancing works on entries so the bucket bounds hold in
//! the result; internal rebalancing works on keys and child pointers.

use crate::btree::calc;
use crate::btree::tree::Tree;
use crate::buffer::PageCache;
use crate::error::{IndexError, Result};
use crate::page::bucket::{self, BucketRecord};
use crate::page::node::{self, Node, NodeKey};
use crate::types::PageNo;

impl<R: BucketRecord> Tree<R> {
    /// Remove the record stored under `key`, returning it.
    ///
    /// A miss is an ordinary `None`, not an error.
    pub fn delete(&mut self, cache: &mut PageCache, key: &R::Key) -> Result<Option<R>> {
        let path = self.find_path(cache, key)?;
        let leaf_pg = *path.last().expect("path holds at least the root");
        let leaf = node::read_node::<R::Key>(cache, leaf_pg)?;

        let idx = leaf.child_index(key);
        let mut hit = bucket::read_all::<R>(cache, leaf.children[idx])?;
        let Some(at) = hit.iter().position(|e| e.key() == *key) else {
            return Ok(None);
        };
        let removed = hit.remove(at);

        // Repack the whole leaf around the removal
        let mut entries = Vec::new();
        for (i, &head) in leaf.children.iter().enumerate() {
            let mut part = if i == idx {
                std::mem::take(&mut hit)
            } else {
                bucket::read_all::<R>(cache, head)?
            };
            part.sort_by(|a, b| a.key().cmp(&b.key()));
            entries.extend(part);
        }
        let dist = calc::bucket_calc_delete(entries.len(), self.shape());
        self.rewrite_leaf(cache, leaf, &entries, dist)?;

        if path.len() > 1 {
            self.rebalance(cache, &path, path.len() - 1)?;
        }
        Ok(Some(removed))
    }

    /// Restore the minimum-keys invariant for the node at `path[depth]`
    /// after a removal below it.
    fn rebalance(&mut self, cache: &mut PageCache, path: &[PageNo], depth: usize) -> Result<()> {
        let page = path[depth];
        let node_ = node::read_node::<R::Key>(cache, page)?;
        let min = self.shape().min_keys();
        if node_.keys.len() >= min {
            return Ok(());
        }

        let parent_pg = path[depth - 1];
        let mut parent = node::read_node::<R::Key>(cache, parent_pg)?;
        let my_idx = parent
            .children
            .iter()
            .position(|&c| c == page)
            .ok_or_else(|| {
                IndexError::corruption(format!("node {} missing from parent {}", page, parent_pg))
            })?;

        // Partner with the fuller adjacent sibling; a non-root parent
        // always provides at least one
        let left = if my_idx > 0 {
            Some(node::read_node::<R::Key>(cache, parent.children[my_idx - 1])?)
        } else {
            None
        };
        let right = if my_idx + 1 < parent.children.len() {
            Some(node::read_node::<R::Key>(cache, parent.children[my_idx + 1])?)
        } else {
            None
        };
        if left.is_none() && right.is_none() {
            return Err(IndexError::corruption(format!(
                "node {} has no siblings under {}",
                page, parent_pg
            )));
        }

        let left_keys = left.as_ref().map_or(0, |n| n.keys.len());
        let right_keys = right.as_ref().map_or(0, |n| n.keys.len());
        let take_left = left.is_some() && (right.is_none() || left_keys >= right_keys);

        // Order the pair left to right; the anchor separator sits at
        // a_idx in the parent
        let (a, b, a_idx) = if take_left {
            (left.expect("checked"), node_, my_idx - 1)
        } else {
            (node_, right.expect("checked"), my_idx)
        };

        let merged = if depth == self.level() {
            self.rebalance_leaves(cache, &mut parent, a, b, a_idx)?
        } else {
            self.rebalance_internal(cache, &mut parent, a, b, a_idx)?
        };

        if !merged {
            return self.write_tree_node(cache, &mut parent);
        }

        if depth - 1 == 0 {
            if parent.keys.is_empty() {
                return self.collapse_root(cache, parent);
            }
            return self.write_tree_node(cache, &mut parent);
        }
        self.write_tree_node(cache, &mut parent)?;
        if parent.keys.len() < min {
            return self.rebalance(cache, path, depth - 1);
        }
        Ok(())
    }

    /// Merge or redistribute two adjacent leaves. Returns true when the
    /// pair merged (the parent lost a key).
    fn rebalance_leaves(
        &mut self,
        cache: &mut PageCache,
        parent: &mut Node<R::Key>,
        a: Node<R::Key>,
        b: Node<R::Key>,
        a_idx: usize,
    ) -> Result<bool> {
        let mut combined = self.leaf_entries(cache, &a)?;
        combined.extend(self.leaf_entries(cache, &b)?);

        // Merges may use the structural leaf limit; the insert-side
        // reserve does not apply here
        if combined.len() <= self.shape().leaf_limit() {
            // Merge into the left page
            let mut merged = a;
            merged.right = b.right;
            if b.right.is_some() {
                node::set_left(cache, b.right, merged.page)?;
            }
            for &head in &b.children {
                bucket::free(cache, head)?;
            }
            node::free_node(cache, &b)?;
            parent.keys.remove(a_idx);
            parent.children.remove(a_idx + 1);

            let dist = calc::bucket_calc_delete(combined.len(), self.shape());
            self.rewrite_leaf(cache, merged, &combined, dist)?;
            return Ok(true);
        }

        // Redistribute evenly across the two leaves
        let (left_n, _) = calc::split_halves(combined.len());
        let (left_entries, right_entries) = combined.split_at(left_n);
        parent.keys[a_idx] = left_entries.last().expect("non-empty half").key();

        let left_dist = calc::bucket_calc_delete(left_entries.len(), self.shape());
        let right_dist = calc::bucket_calc_delete(right_entries.len(), self.shape());
        let left_entries = left_entries.to_vec();
        let right_entries = right_entries.to_vec();
        self.rewrite_leaf(cache, a, &left_entries, left_dist)?;
        self.rewrite_leaf(cache, b, &right_entries, right_dist)?;
        Ok(false)
    }

    /// Merge or redistribute two adjacent internal nodes. Returns true
    /// when the pair merged.
    fn rebalance_internal(
        &mut self,
        cache: &mut PageCache,
        parent: &mut Node<R::Key>,
        a: Node<R::Key>,
        b: Node<R::Key>,
        a_idx: usize,
    ) -> Result<bool> {
        let sep = parent.keys[a_idx].clone();
        let mut keys = a.keys.clone();
        keys.push(sep);
        keys.extend(b.keys.iter().cloned());
        let mut children = a.children.clone();
        children.extend(b.children.iter().cloned());

        if keys.len() <= self.shape().max_keys() {
            // Merge into the left page, demoting the separator
            let mut merged = a;
            merged.keys = keys;
            merged.children = children;
            for &c in &b.children {
                node::set_parent(cache, c, merged.page)?;
            }
            node::free_node(cache, &b)?;
            parent.keys.remove(a_idx);
            parent.children.remove(a_idx + 1);
            self.write_tree_node(cache, &mut merged)?;
            return Ok(true);
        }

        // Redistribute: promote the middle key as the new separator
        let mid = keys.len() / 2;
        let mut a = a;
        let mut b = b;
        parent.keys[a_idx] = keys[mid].clone();

        b.keys = keys.split_off(mid + 1);
        keys.truncate(mid);
        a.keys = keys;
        b.children = children.split_off(a.keys.len() + 1);
        a.children = children;

        for &c in &a.children {
            node::set_parent(cache, c, a.page)?;
        }
        for &c in &b.children {
            node::set_parent(cache, c, b.page)?;
        }

        self.write_tree_node(cache, &mut a)?;
        self.write_tree_node(cache, &mut b)?;
        Ok(false)
    }

    /// Splice the root's sole remaining child into page 0 and shrink
    /// the tree by one level. The root page never moves.
    fn collapse_root(&mut self, cache: &mut PageCache, root: Node<R::Key>) -> Result<()> {
        let child_pg = root.children[0];
        let child = node::read_node::<R::Key>(cache, child_pg)?;

        let mut new_root = Node::<R::Key>::new(self.root(), R::Key::ROOT);
        new_root.keys = child.keys.clone();
        new_root.children = child.children.clone();
        new_root.chain = root.chain;

        self.dec_level();
        if self.level() >= 1 {
            for &c in &new_root.children {
                node::set_parent(cache, c, self.root())?;
            }
        }

        self.write_tree_node(cache, &mut new_root)?;
        node::free_node(cache, &child)
    }

    /// Retire every page of this tree: nodes, overflow chains, buckets.
    ///
    /// Used when a per-keyword secondary tree loses its last member or
    /// a duplicate tree is torn down with its identifier.
    pub fn destroy(self, cache: &mut PageCache) -> Result<()> {
        self.destroy_rec(cache, self.root(), 0)
    }

    fn destroy_rec(&self, cache: &mut PageCache, page: PageNo, depth: usize) -> Result<()> {
        let n = node::read_node::<R::Key>(cache, page)?;
        if depth == self.level() {
            for &head in &n.children {
                bucket::free(cache, head)?;
            }
        } else {
            for &c in &n.children {
                self.destroy_rec(cache, c, depth + 1)?;
            }
        }
        node::free_node(cache, &n)
    }
}
