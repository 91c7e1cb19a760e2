//! Core B+ tree operations: descent, lookup, insertion.
//!
//! Nodes route by key; leaves reference buckets holding the records.
//! An insert lands in the bucket selected by the same comparison that
//! drives descent. A full bucket is handled, in order, by reordering
//! the leaf's entries across its buckets, shifting entries into an
//! adjacent same-parent sibling leaf with spare capacity, or splitting
//! the leaf and pushing the median key up - recursively through node
//! splits up to a root split, which rewrites page 0 in place and is the
//! only operation that deepens the tree.

use crate::btree::calc;
use crate::buffer::PageCache;
use crate::error::{IndexError, Result};
use crate::page::bucket::{self, BucketRecord};
use crate::page::node::{self, Node, NodeKey};
use crate::types::{max_key_len, PageNo, TreeShape};
use std::marker::PhantomData;

/// A B+ tree over records of type `R`, rooted at a fixed page.
///
/// The struct is a lightweight handle; every operation goes through the
/// page cache passed per call, so trees never hold page references
/// across calls that might evict them.
pub struct Tree<R: BucketRecord> {
    root: PageNo,
    shape: TreeShape,
    level: usize,
    _records: PhantomData<fn() -> R>,
}

impl<R: BucketRecord> Tree<R> {
    /// Create a fresh tree: a root page that is its own leaf with one
    /// empty bucket.
    pub fn create(cache: &mut PageCache, shape: TreeShape) -> Result<Self> {
        let root = cache.allocate()?;
        let head = bucket::create::<R>(cache)?;

        let mut node = Node::<R::Key>::new(root, R::Key::ROOT);
        node.children.push(head);
        node.set_level(0);
        node::write_node(cache, &mut node)?;

        Ok(Self {
            root,
            shape,
            level: 0,
            _records: PhantomData,
        })
    }

    /// Open a tree whose level is known from the parameter sidecar
    pub fn open(root: PageNo, shape: TreeShape, level: usize) -> Self {
        Self {
            root,
            shape,
            level,
            _records: PhantomData,
        }
    }

    /// Open a tree reading its level from the root page header
    pub fn open_rooted(cache: &mut PageCache, root: PageNo, shape: TreeShape) -> Result<Self> {
        let buf = cache.read(root)?;
        let hdr = crate::page::NodeHeader::read(&buf)?;
        if hdr.tag != R::Key::ROOT {
            return Err(IndexError::invalid_page(format!(
                "page {} is not a tree root: {:?}",
                root, hdr.tag
            )));
        }
        Ok(Self {
            root,
            shape,
            level: hdr.prev as usize,
            _records: PhantomData,
        })
    }

    /// Root page of this tree
    pub fn root(&self) -> PageNo {
        self.root
    }

    /// Root-to-leaf depth; 0 means the root is a leaf
    pub fn level(&self) -> usize {
        self.level
    }

    /// Shape this tree was opened with
    pub fn shape(&self) -> TreeShape {
        self.shape
    }

    /// Reduce the depth by one after a root collapse
    pub(crate) fn dec_level(&mut self) {
        self.level -= 1;
    }

    /// Whether the tree holds no records at all
    pub fn is_empty(&self, cache: &mut PageCache) -> Result<bool> {
        if self.level > 0 {
            return Ok(false);
        }
        let root = node::read_node::<R::Key>(cache, self.root)?;
        if !root.keys.is_empty() {
            return Ok(false);
        }
        Ok(bucket::entry_count::<R>(cache, root.children[0])? == 0)
    }

    /// Descend to the leaf whose subtree may contain `key`
    pub(crate) fn find_leaf(&self, cache: &mut PageCache, key: &R::Key) -> Result<Node<R::Key>> {
        let mut node = node::read_node::<R::Key>(cache, self.root)?;
        for _ in 0..self.level {
            let idx = node.child_index(key);
            node = node::read_node::<R::Key>(cache, node.children[idx])?;
        }
        Ok(node)
    }

    /// Descend as [`find_leaf`](Self::find_leaf) while recording the
    /// visited node pages, root first, leaf last.
    pub(crate) fn find_path(&self, cache: &mut PageCache, key: &R::Key) -> Result<Vec<PageNo>> {
        let mut path = vec![self.root];
        let mut node = node::read_node::<R::Key>(cache, self.root)?;
        for _ in 0..self.level {
            let idx = node.child_index(key);
            let next = node.children[idx];
            path.push(next);
            node = node::read_node::<R::Key>(cache, next)?;
        }
        Ok(path)
    }

    /// Exact lookup. Repeated lookups mutate nothing but cache counters.
    pub fn search(&self, cache: &mut PageCache, key: &R::Key) -> Result<Option<R>> {
        let leaf = self.find_leaf(cache, key)?;
        let idx = leaf.child_index(key);
        let entries = bucket::read_all::<R>(cache, leaf.children[idx])?;
        Ok(entries.into_iter().find(|e| e.key() == *key))
    }

    /// Insert a record whose key is not yet present
    pub fn insert(&mut self, cache: &mut PageCache, entry: R) -> Result<()> {
        let key = entry.key();
        let max = max_key_len(cache.page_size());
        if key.encoded_len() > max {
            return Err(IndexError::KeyTooLarge {
                size: key.encoded_len(),
                max,
            });
        }

        let leaf = self.find_leaf(cache, &key)?;
        let idx = leaf.child_index(&key);
        let head = leaf.children[idx];

        let count = bucket::entry_count::<R>(cache, head)?;
        if count < self.shape.fill {
            if !bucket::try_append(cache, head, &entry)? {
                let mut entries = bucket::read_all::<R>(cache, head)?;
                entries.push(entry);
                bucket::write_all(cache, head, &entries)?;
            }
            return Ok(());
        }

        // Bucket at fill: gather the whole leaf and place the entry by
        // reorder, shift or split
        let mut entries = self.leaf_entries(cache, &leaf)?;
        let at = entries.partition_point(|e| e.key() < key);
        entries.insert(at, entry);

        if let Some(dist) = calc::bucket_calc(entries.len(), leaf.children.len(), self.shape) {
            self.rewrite_leaf(cache, leaf, &entries, dist)?;
        } else if self.try_shift(cache, &leaf, &entries)? {
            // Entries rebalanced into a sibling leaf, separator updated
        } else {
            self.split_leaf(cache, leaf, &entries)?;
        }
        Ok(())
    }

    /// Replace the record stored under `key`; the new record must carry
    /// the same key. Returns false if the key is absent.
    pub fn update(&mut self, cache: &mut PageCache, key: &R::Key, entry: R) -> Result<bool> {
        let leaf = self.find_leaf(cache, key)?;
        let idx = leaf.child_index(key);
        let head = leaf.children[idx];

        let mut entries = bucket::read_all::<R>(cache, head)?;
        match entries.iter().position(|e| e.key() == *key) {
            Some(at) => {
                entries[at] = entry;
                bucket::write_all(cache, head, &entries)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All entries of a leaf in key order (buckets are ordered; records
    /// within one bucket are not)
    pub(crate) fn leaf_entries(
        &self,
        cache: &mut PageCache,
        leaf: &Node<R::Key>,
    ) -> Result<Vec<R>> {
        let mut all = Vec::new();
        for &head in &leaf.children {
            let mut entries = bucket::read_all::<R>(cache, head)?;
            entries.sort_by(|a, b| a.key().cmp(&b.key()));
            all.extend(entries);
        }
        Ok(all)
    }

    /// Write a node, keeping the level stored on the root page current
    pub(crate) fn write_tree_node(
        &self,
        cache: &mut PageCache,
        node: &mut Node<R::Key>,
    ) -> Result<()> {
        if node.page == self.root {
            node.set_level(self.level);
        }
        node::write_node(cache, node)
    }

    /// Rebuild a leaf's buckets and keys from sorted entries.
    ///
    /// Existing bucket pages are reused in order; surplus pages are
    /// retired and missing ones allocated.
    pub(crate) fn rewrite_leaf(
        &self,
        cache: &mut PageCache,
        mut leaf: Node<R::Key>,
        entries: &[R],
        dist: calc::BucketDist,
    ) -> Result<()> {
        let mut pool: Vec<PageNo> = std::mem::take(&mut leaf.children);
        self.build_leaf(cache, &mut leaf, entries, dist, &mut pool)?;
        for surplus in pool {
            bucket::free(cache, surplus)?;
        }
        self.write_tree_node(cache, &mut leaf)
    }

    /// Fill a leaf node's keys/children from sorted entries, drawing
    /// bucket pages from `pool` before allocating new ones. The caller
    /// writes the node and retires whatever remains in the pool.
    fn build_leaf(
        &self,
        cache: &mut PageCache,
        leaf: &mut Node<R::Key>,
        entries: &[R],
        dist: calc::BucketDist,
        pool: &mut Vec<PageNo>,
    ) -> Result<()> {
        let chunks = calc::distribute(entries, dist.buckets);

        let mut heads = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let head = if pool.is_empty() {
                bucket::create::<R>(cache)?
            } else {
                pool.remove(0)
            };
            bucket::write_all(cache, head, chunk)?;
            heads.push(head);
        }

        leaf.keys = chunks[..chunks.len() - 1]
            .iter()
            .map(|chunk| chunk.last().expect("non-empty chunk").key())
            .collect();
        leaf.children = heads;
        Ok(())
    }

    /// Rebalance a saturated leaf with an adjacent same-parent sibling
    /// that has spare capacity. Returns false when no such sibling
    /// exists; `entries` already contains the record being inserted.
    fn try_shift(
        &mut self,
        cache: &mut PageCache,
        leaf: &Node<R::Key>,
        entries: &[R],
    ) -> Result<bool> {
        if self.level == 0 {
            return Ok(false);
        }

        let mut parent = node::read_node::<R::Key>(cache, leaf.parent())?;
        let my_idx = parent
            .children
            .iter()
            .position(|&c| c == leaf.page)
            .ok_or_else(|| {
                IndexError::corruption(format!(
                    "leaf {} missing from parent {}",
                    leaf.page, parent.page
                ))
            })?;

        let capacity = self.shape.leaf_capacity();
        let candidates = [
            (my_idx + 1 < parent.children.len()).then(|| my_idx + 1),
            (my_idx > 0).then(|| my_idx - 1),
        ];

        for sib_idx in candidates.into_iter().flatten() {
            let sib = node::read_node::<R::Key>(cache, parent.children[sib_idx])?;
            let sib_entries = self.leaf_entries(cache, &sib)?;
            if sib_entries.len() >= capacity {
                continue;
            }

            // Order the two leaves and their entries left to right
            let (mut left, mut right, combined) = if sib_idx > my_idx {
                let mut combined = entries.to_vec();
                combined.extend(sib_entries);
                (leaf.clone(), sib, combined)
            } else {
                let mut combined = sib_entries;
                combined.extend(entries.iter().cloned());
                (sib, leaf.clone(), combined)
            };

            let (left_n, _) = calc::split_halves(combined.len());
            let (left_entries, right_entries) = combined.split_at(left_n);

            let left_dist = calc::bucket_calc(left_entries.len(), left.children.len(), self.shape)
                .ok_or_else(|| IndexError::corruption("shift half exceeds leaf capacity"))?;
            let right_dist =
                calc::bucket_calc(right_entries.len(), right.children.len(), self.shape)
                    .ok_or_else(|| IndexError::corruption("shift half exceeds leaf capacity"))?;

            let left_entries = left_entries.to_vec();
            let right_entries = right_entries.to_vec();
            self.rewrite_leaf(cache, left, &left_entries, left_dist)?;
            self.rewrite_leaf(cache, right, &right_entries, right_dist)?;

            // New separator between the two leaves
            let sep_idx = my_idx.min(sib_idx);
            parent.keys[sep_idx] = left_entries.last().expect("non-empty half").key();
            self.write_tree_node(cache, &mut parent)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Split a leaf into two, distributing each half independently, and
    /// push the median key into the parent.
    fn split_leaf(
        &mut self,
        cache: &mut PageCache,
        leaf: Node<R::Key>,
        entries: &[R],
    ) -> Result<()> {
        let (left_n, _) = calc::split_halves(entries.len());
        let (left_entries, right_entries) = entries.split_at(left_n);
        let median = left_entries.last().expect("non-empty half").key();

        let left_dist = calc::bucket_calc(left_entries.len(), 0, self.shape)
            .ok_or_else(|| IndexError::corruption("split half exceeds leaf capacity"))?;
        let right_dist = calc::bucket_calc(right_entries.len(), 0, self.shape)
            .ok_or_else(|| IndexError::corruption("split half exceeds leaf capacity"))?;

        if leaf.page == self.root {
            // Root leaf split: the root becomes an internal node over
            // two fresh leaves and the tree gains a level
            let left_pg = cache.allocate()?;
            let right_pg = cache.allocate()?;
            let mut pool = leaf.children.clone();

            let mut left = Node::<R::Key>::new(left_pg, R::Key::LEAF);
            left.set_parent(self.root);
            left.right = right_pg;
            self.build_leaf(cache, &mut left, left_entries, left_dist, &mut pool)?;

            let mut right = Node::<R::Key>::new(right_pg, R::Key::LEAF);
            right.set_parent(self.root);
            right.left = left_pg;
            self.build_leaf(cache, &mut right, right_entries, right_dist, &mut pool)?;

            for surplus in pool {
                bucket::free(cache, surplus)?;
            }

            node::write_node(cache, &mut left)?;
            node::write_node(cache, &mut right)?;

            let mut root = Node::<R::Key>::new(self.root, R::Key::ROOT);
            root.keys = vec![median];
            root.children = vec![left_pg, right_pg];
            root.chain = leaf.chain;
            self.level += 1;
            self.write_tree_node(cache, &mut root)?;
            return Ok(());
        }

        let right_pg = cache.allocate()?;
        let mut pool = leaf.children.clone();
        let parent = leaf.parent();
        let old_right = leaf.right;

        let mut left = leaf;
        self.build_leaf(cache, &mut left, left_entries, left_dist, &mut pool)?;

        let mut right = Node::<R::Key>::new(right_pg, R::Key::LEAF);
        right.set_parent(parent);
        right.left = left.page;
        right.right = old_right;
        self.build_leaf(cache, &mut right, right_entries, right_dist, &mut pool)?;

        for surplus in pool {
            bucket::free(cache, surplus)?;
        }

        left.right = right_pg;
        node::write_node(cache, &mut left)?;
        node::write_node(cache, &mut right)?;
        if old_right.is_some() {
            node::set_left(cache, old_right, right_pg)?;
        }

        self.insert_key(cache, parent, median, right_pg)
    }

    /// Insert a separator and its right child into a node, splitting
    /// upward as needed.
    fn insert_key(
        &mut self,
        cache: &mut PageCache,
        page: PageNo,
        key: R::Key,
        right_child: PageNo,
    ) -> Result<()> {
        let mut node = node::read_node::<R::Key>(cache, page)?;
        let at = node.keys.partition_point(|k| k < &key);
        node.keys.insert(at, key);
        node.children.insert(at + 1, right_child);

        if node.keys.len() <= self.shape.max_keys() {
            return self.write_tree_node(cache, &mut node);
        }

        let mid = node.keys.len() / 2;
        let median = node.keys[mid].clone();

        if page == self.root {
            // Root split: two fresh internal nodes, root rewritten in
            // place so page 0 stays the entry point
            let left_pg = cache.allocate()?;
            let right_pg = cache.allocate()?;

            let mut left = Node::<R::Key>::new(left_pg, R::Key::INTERNAL);
            left.set_parent(self.root);
            left.keys = node.keys[..mid].to_vec();
            left.children = node.children[..=mid].to_vec();

            let mut right = Node::<R::Key>::new(right_pg, R::Key::INTERNAL);
            right.set_parent(self.root);
            right.keys = node.keys[mid + 1..].to_vec();
            right.children = node.children[mid + 1..].to_vec();

            for &child in &left.children {
                node::set_parent(cache, child, left_pg)?;
            }
            for &child in &right.children {
                node::set_parent(cache, child, right_pg)?;
            }
            node::write_node(cache, &mut left)?;
            node::write_node(cache, &mut right)?;

            let mut root = Node::<R::Key>::new(self.root, R::Key::ROOT);
            root.keys = vec![median];
            root.children = vec![left_pg, right_pg];
            root.chain = node.chain;
            self.level += 1;
            return self.write_tree_node(cache, &mut root);
        }

        let right_pg = cache.allocate()?;
        let mut right = Node::<R::Key>::new(right_pg, R::Key::INTERNAL);
        right.set_parent(node.parent());
        right.keys = node.keys[mid + 1..].to_vec();
        right.children = node.children[mid + 1..].to_vec();

        node.keys.truncate(mid);
        node.children.truncate(mid + 1);

        for &child in &right.children {
            node::set_parent(cache, child, right_pg)?;
        }

        let parent = node.parent();
        node::write_node(cache, &mut node)?;
        node::write_node(cache, &mut right)?;

        self.insert_key(cache, parent, median, right_pg)
    }
}
