//! Tree-of-trees coordination.
//!
//! Two nestings exist. A keyword index keeps one record per distinct
//! keyword in the primary tree; the record points at an independently
//! rooted secondary tree of member ids, created lazily on the first
//! insert under that keyword. An identifier index keeps one record per
//! id; when an id occurs more than once, its record points at a numeric
//! tree of (offset, refoffset, dbno) triples keyed by offset.
//!
//! Secondary roots are pinned in the cache while their tree is mutated,
//! mirroring the permanent pin on the primary root.

use crate::btree::tree::Tree;
use crate::buffer::PageCache;
use crate::error::Result;
use crate::page::bucket::{IdEntry, KeywordEntry, NumEntry, SecEntry};
use crate::types::{PageNo, TreeShape};

/// Runs a secondary-tree mutation with the tree's root pinned
fn with_locked_root<T>(
    cache: &mut PageCache,
    root: PageNo,
    op: impl FnOnce(&mut PageCache) -> Result<T>,
) -> Result<T> {
    cache.lock(root)?;
    let result = op(cache);
    cache.unlock(root);
    result
}

/// Coordinates a primary keyword tree with its per-keyword secondary
/// id trees.
pub struct KeywordTrees {
    secondary_shape: TreeShape,
}

impl KeywordTrees {
    pub fn new(secondary_shape: TreeShape) -> Self {
        Self { secondary_shape }
    }

    /// Add `id` under `keyword`, creating the secondary tree on first
    /// use. Returns false for a duplicate membership (a no-op).
    pub fn insert(
        &self,
        cache: &mut PageCache,
        primary: &mut Tree<KeywordEntry>,
        keyword: &[u8],
        id: &[u8],
    ) -> Result<bool> {
        let kw = keyword.to_vec();
        match primary.search(cache, &kw)? {
            Some(rec) => {
                let mut sec = Tree::<SecEntry>::open_rooted(cache, rec.root, self.secondary_shape)?;
                if sec.search(cache, &id.to_vec())?.is_some() {
                    return Ok(false);
                }
                with_locked_root(cache, rec.root, |cache| {
                    sec.insert(cache, SecEntry { id: id.to_vec() })
                })?;
                Ok(true)
            }
            None => {
                let mut sec = Tree::<SecEntry>::create(cache, self.secondary_shape)?;
                let root = sec.root();
                with_locked_root(cache, root, |cache| {
                    sec.insert(cache, SecEntry { id: id.to_vec() })
                })?;
                primary.insert(
                    cache,
                    KeywordEntry {
                        keyword: kw,
                        root,
                    },
                )?;
                Ok(true)
            }
        }
    }

    /// Remove `id` from under `keyword`. When the secondary tree
    /// empties, the tree is torn down and the keyword leaves the
    /// primary tree. Returns false if the membership did not exist.
    pub fn remove(
        &self,
        cache: &mut PageCache,
        primary: &mut Tree<KeywordEntry>,
        keyword: &[u8],
        id: &[u8],
    ) -> Result<bool> {
        let kw = keyword.to_vec();
        let Some(rec) = primary.search(cache, &kw)? else {
            return Ok(false);
        };

        let mut sec = Tree::<SecEntry>::open_rooted(cache, rec.root, self.secondary_shape)?;
        let removed = with_locked_root(cache, rec.root, |cache| {
            sec.delete(cache, &id.to_vec())
        })?;
        if removed.is_none() {
            return Ok(false);
        }

        if sec.is_empty(cache)? {
            sec.destroy(cache)?;
            primary.delete(cache, &kw)?;
        }
        Ok(true)
    }

    /// Member ids stored under `keyword`, in id order
    pub fn members(
        &self,
        cache: &mut PageCache,
        primary: &Tree<KeywordEntry>,
        keyword: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        match primary.search(cache, &keyword.to_vec())? {
            Some(rec) => {
                let sec = Tree::<SecEntry>::open_rooted(cache, rec.root, self.secondary_shape)?;
                Ok(sec.entries(cache)?.into_iter().map(|e| e.id).collect())
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Coordinates a primary identifier tree with the numeric trees holding
/// duplicate locations.
pub struct DupTrees {
    secondary_shape: TreeShape,
}

impl DupTrees {
    pub fn new(secondary_shape: TreeShape) -> Self {
        Self { secondary_shape }
    }

    /// Add a location for an identifier. The first duplicate migrates
    /// the record's own triple into a fresh numeric tree. Returns false
    /// when the exact location is already stored.
    pub fn insert(
        &self,
        cache: &mut PageCache,
        primary: &mut Tree<IdEntry>,
        entry: IdEntry,
    ) -> Result<bool> {
        let key = entry.id.clone();
        let Some(mut rec) = primary.search(cache, &key)? else {
            primary.insert(cache, IdEntry { dups: 0, ..entry })?;
            return Ok(true);
        };

        if rec.dups == 0 {
            if rec.offset == entry.offset {
                return Ok(false);
            }
            let mut num = Tree::<NumEntry>::create(cache, self.secondary_shape)?;
            let root = num.root();
            with_locked_root(cache, root, |cache| {
                num.insert(
                    cache,
                    NumEntry {
                        offset: rec.offset,
                        refoffset: rec.refoffset,
                        dbno: rec.dbno,
                    },
                )?;
                num.insert(
                    cache,
                    NumEntry {
                        offset: entry.offset,
                        refoffset: entry.refoffset,
                        dbno: entry.dbno,
                    },
                )
            })?;
            rec.dups = 2;
            rec.offset = root.offset();
            rec.refoffset = 0;
            primary.update(cache, &key, rec)?;
            return Ok(true);
        }

        let root = PageNo::new(rec.offset);
        let mut num = Tree::<NumEntry>::open_rooted(cache, root, self.secondary_shape)?;
        if num.search(cache, &entry.offset)?.is_some() {
            return Ok(false);
        }
        with_locked_root(cache, root, |cache| {
            num.insert(
                cache,
                NumEntry {
                    offset: entry.offset,
                    refoffset: entry.refoffset,
                    dbno: entry.dbno,
                },
            )
        })?;
        rec.dups += 1;
        primary.update(cache, &key, rec)?;
        Ok(true)
    }

    /// Every stored location of an identifier, in offset order
    pub fn locations(
        &self,
        cache: &mut PageCache,
        primary: &Tree<IdEntry>,
        id: &[u8],
    ) -> Result<Vec<NumEntry>> {
        match primary.search(cache, &id.to_vec())? {
            None => Ok(Vec::new()),
            Some(rec) if rec.dups == 0 => Ok(vec![NumEntry {
                offset: rec.offset,
                refoffset: rec.refoffset,
                dbno: rec.dbno,
            }]),
            Some(rec) => {
                let num = Tree::<NumEntry>::open_rooted(
                    cache,
                    PageNo::new(rec.offset),
                    self.secondary_shape,
                )?;
                Ok(num.entries(cache)?)
            }
        }
    }

    /// Remove one location of an identifier by offset. A record left
    /// with a single location is demoted back to a plain entry and its
    /// numeric tree torn down; removing the only location removes the
    /// identifier. Returns false if the location was not stored.
    pub fn remove_location(
        &self,
        cache: &mut PageCache,
        primary: &mut Tree<IdEntry>,
        id: &[u8],
        offset: u64,
    ) -> Result<bool> {
        let key = id.to_vec();
        let Some(mut rec) = primary.search(cache, &key)? else {
            return Ok(false);
        };

        if rec.dups == 0 {
            if rec.offset != offset {
                return Ok(false);
            }
            primary.delete(cache, &key)?;
            return Ok(true);
        }

        let root = PageNo::new(rec.offset);
        let mut num = Tree::<NumEntry>::open_rooted(cache, root, self.secondary_shape)?;
        let removed = with_locked_root(cache, root, |cache| num.delete(cache, &offset))?;
        if removed.is_none() {
            return Ok(false);
        }

        rec.dups -= 1;
        if rec.dups == 1 {
            let remaining = num.entries(cache)?;
            let last = remaining
                .first()
                .ok_or_else(|| crate::error::IndexError::corruption("duplicate tree emptied early"))?;
            rec.dups = 0;
            rec.offset = last.offset;
            rec.refoffset = last.refoffset;
            rec.dbno = last.dbno;
            num.destroy(cache)?;
        }
        primary.update(cache, &key, rec)?;
        Ok(true)
    }

    /// Remove an identifier entirely, tearing down its numeric tree.
    /// Returns false if the id is absent.
    pub fn remove_id(
        &self,
        cache: &mut PageCache,
        primary: &mut Tree<IdEntry>,
        id: &[u8],
    ) -> Result<bool> {
        let Some(rec) = primary.delete(cache, &id.to_vec())? else {
            return Ok(false);
        };
        if rec.dups > 0 {
            let num = Tree::<NumEntry>::open_rooted(
                cache,
                PageNo::new(rec.offset),
                self.secondary_shape,
            )?;
            num.destroy(cache)?;
        }
        Ok(true)
    }
}
