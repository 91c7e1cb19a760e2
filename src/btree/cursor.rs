//! Entry cursor for leaf-chain traversal.
//!
//! Walks a tree's leaves left to right through their sibling pointers,
//! yielding bucket entries in key order. Backs the full-traversal and
//! wildcard-prefix lookups; the cursor re-fetches pages through the
//! cache on every step and never holds a page across calls.

use crate::btree::tree::Tree;
use crate::buffer::PageCache;
use crate::error::Result;
use crate::page::bucket::{self, BucketRecord};
use crate::page::node::{self, Node};
use std::collections::VecDeque;

/// A cursor over a tree's entries in ascending key order
pub struct Cursor<R: BucketRecord> {
    leaf: Option<Node<R::Key>>,
    /// Next bucket index within the current leaf
    bucket: usize,
    /// Decoded entries of the current bucket, sorted
    pending: VecDeque<R>,
}

impl<R: BucketRecord> Cursor<R> {
    /// Position at the first entry of the tree
    pub fn first(tree: &Tree<R>, cache: &mut PageCache) -> Result<Self> {
        let mut leaf = node::read_node::<R::Key>(cache, tree.root())?;
        for _ in 0..tree.level() {
            leaf = node::read_node::<R::Key>(cache, leaf.children[0])?;
        }
        Ok(Self {
            leaf: Some(leaf),
            bucket: 0,
            pending: VecDeque::new(),
        })
    }

    /// Position at the bucket that may contain `key`. Entries of that
    /// bucket smaller than the key are still yielded; callers filter.
    pub fn seek(tree: &Tree<R>, cache: &mut PageCache, key: &R::Key) -> Result<Self> {
        let leaf = tree.find_leaf(cache, key)?;
        let bucket = leaf.child_index(key);
        Ok(Self {
            leaf: Some(leaf),
            bucket,
            pending: VecDeque::new(),
        })
    }

    /// Advance and return the next entry, or `None` past the end
    pub fn next(&mut self, cache: &mut PageCache) -> Result<Option<R>> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Ok(Some(entry));
            }
            let Some(leaf) = &self.leaf else {
                return Ok(None);
            };

            if self.bucket < leaf.children.len() {
                let mut entries = bucket::read_all::<R>(cache, leaf.children[self.bucket])?;
                entries.sort_by(|a, b| a.key().cmp(&b.key()));
                self.pending = entries.into();
                self.bucket += 1;
            } else if leaf.right.is_some() {
                let next = node::read_node::<R::Key>(cache, leaf.right)?;
                self.leaf = Some(next);
                self.bucket = 0;
            } else {
                self.leaf = None;
            }
        }
    }
}

impl<R: BucketRecord> Tree<R> {
    /// Every entry of the tree in ascending key order
    pub fn entries(&self, cache: &mut PageCache) -> Result<Vec<R>> {
        let mut cursor = Cursor::first(self, cache)?;
        let mut out = Vec::new();
        while let Some(entry) = cursor.next(cache)? {
            out.push(entry);
        }
        Ok(out)
    }
}

impl<R: BucketRecord<Key = Vec<u8>>> Tree<R> {
    /// Wildcard lookup: every entry whose key starts with `prefix`, in
    /// key order.
    pub fn search_prefix(&self, cache: &mut PageCache, prefix: &[u8]) -> Result<Vec<R>> {
        let mut cursor = Cursor::seek(self, cache, &prefix.to_vec())?;
        let mut out = Vec::new();
        while let Some(entry) = cursor.next(cache)? {
            let key = entry.key();
            if key.starts_with(prefix) {
                out.push(entry);
            } else if key.as_slice() > prefix {
                break;
            }
        }
        Ok(out)
    }
}
