//! # bioindex
//!
//! A disk-based B+ tree index engine for flat-file biological sequence
//! databases: it maps textual keys (identifiers, accessions, keywords)
//! to byte offsets in the database files. Indexes hold millions of
//! entries against a bounded in-memory working set, so everything lives
//! on fixed-size pages behind a small cache.
//!
//! ## Architecture
//!
//! - **Page layer** (`page`): on-disk page formats; node and bucket
//!   codecs with overflow chaining
//! - **Storage layer** (`storage`): page-granular file I/O and the
//!   parameter sidecar that carries the tree shape
//! - **Buffer layer** (`buffer`): MRU/LRU page cache with dirty
//!   tracking and eviction pinning
//! - **B+ tree layer** (`btree`): one generic engine for every tree
//!   variant, including the per-keyword and per-duplicate secondary
//!   trees
//! - **Compactor** (`compact`): packs the page file into contiguous
//!   records on close and expands it again on reopen
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bioindex::{Index, IndexKind, IndexOptions};
//!
//! let mut index = Index::create("acnum.idx", IndexOptions::new(IndexKind::Identifier))?;
//! index.insert_id("P12345", 1, 1024, 0)?;
//! let locations = index.lookup_id("P12345")?;
//! index.close()?;
//! ```

pub mod btree;
pub mod buffer;
pub mod compact;
pub mod error;
pub mod page;
pub mod storage;
pub mod types;

pub use buffer::{CacheStats, PageCache};
pub use error::{IndexError, Result};
pub use page::bucket::{IdEntry, KeywordEntry, NumEntry, SecEntry};
pub use storage::IndexParams;
pub use types::{IndexKind, PageNo, TreeShape};

use btree::{DupTrees, KeywordTrees, Tree};
use storage::{sidecar_path, PageFile};
use types::{
    DEFAULT_CACHE_SIZE, DEFAULT_FILL, DEFAULT_KW_LIMIT, DEFAULT_ORDER, DEFAULT_PAGE_SIZE,
    DEFAULT_SECONDARY_FILL, DEFAULT_SECONDARY_ORDER,
};

use std::path::{Path, PathBuf};

/// Creation-time configuration for a new index
#[derive(Debug, Clone)]
pub struct IndexOptions {
    kind: IndexKind,
    page_size: usize,
    order: usize,
    fill: usize,
    order2: usize,
    fill2: usize,
    cache_size: usize,
    kw_limit: usize,
    compress: bool,
}

impl IndexOptions {
    /// Defaults for the given index kind
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            page_size: DEFAULT_PAGE_SIZE,
            order: DEFAULT_ORDER,
            fill: DEFAULT_FILL,
            order2: DEFAULT_SECONDARY_ORDER,
            fill2: DEFAULT_SECONDARY_FILL,
            cache_size: DEFAULT_CACHE_SIZE,
            kw_limit: DEFAULT_KW_LIMIT,
            compress: false,
        }
    }

    /// Set the page size in bytes
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Set the primary tree order
    pub fn order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Set the primary tree bucket fill factor
    pub fn fill(mut self, fill: usize) -> Self {
        self.fill = fill;
        self
    }

    /// Set the secondary tree order
    pub fn secondary_order(mut self, order: usize) -> Self {
        self.order2 = order;
        self
    }

    /// Set the secondary tree bucket fill factor
    pub fn secondary_fill(mut self, fill: usize) -> Self {
        self.fill2 = fill;
        self
    }

    /// Set the resident page count of the cache
    pub fn cache_size(mut self, pages: usize) -> Self {
        self.cache_size = pages;
        self
    }

    /// Set the keyword length limit
    pub fn keyword_limit(mut self, limit: usize) -> Self {
        self.kw_limit = limit;
        self
    }

    /// Compress the index file when it is closed
    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Update,
}

enum Primary {
    Id(Tree<IdEntry>),
    Keyword(Tree<KeywordEntry>),
}

/// An open index: the primary tree rooted at page 0 plus its secondary
/// trees, behind one page cache.
///
/// Single-writer: open an index once for update, or any number of times
/// read-only against a closed file. All lookups take `&mut self`
/// because they move pages through the cache; repeated lookups change
/// nothing but the cache counters.
pub struct Index {
    cache: PageCache,
    params: IndexParams,
    path: PathBuf,
    mode: Mode,
    primary: Primary,
    dups: DupTrees,
    keywords: KeywordTrees,
    compress_on_close: bool,
}

impl Index {
    /// Create a new index, truncating any existing file at `path`
    pub fn create<P: Into<PathBuf>>(path: P, options: IndexOptions) -> Result<Self> {
        let path = path.into();
        let params = IndexParams {
            kind: options.kind,
            compressed: false,
            pages: 0,
            order: options.order as u32,
            fill: options.fill as u32,
            page_size: options.page_size as u32,
            level: 0,
            cache_size: options.cache_size as u32,
            order2: options.order2 as u32,
            fill2: options.fill2 as u32,
            count: 0,
            full_count: 0,
            kw_limit: options.kw_limit as u32,
        };

        let file = PageFile::create(&path, options.page_size)?;
        let mut cache = PageCache::new(file, options.cache_size);

        let shape = params.primary_shape();
        let primary = match options.kind {
            IndexKind::Identifier => Primary::Id(Tree::create(&mut cache, shape)?),
            IndexKind::Keyword => Primary::Keyword(Tree::create(&mut cache, shape)?),
        };
        let root = match &primary {
            Primary::Id(t) => t.root(),
            Primary::Keyword(t) => t.root(),
        };
        if root != PageNo::ROOT {
            return Err(IndexError::corruption("primary root landed off page 0"));
        }
        cache.lock(PageNo::ROOT)?;

        let index = Self {
            cache,
            params,
            path,
            mode: Mode::Update,
            primary,
            dups: DupTrees::new(params.secondary_shape()),
            keywords: KeywordTrees::new(params.secondary_shape()),
            compress_on_close: options.compress,
        };
        index.params.write(&sidecar_path(&index.path))?;
        Ok(index)
    }

    /// Open an index for update, expanding it first if it was closed
    /// compressed
    pub fn open_update<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let sidecar = sidecar_path(&path);
        let mut params = IndexParams::read(&sidecar)?;

        let was_compressed = params.compressed;
        if was_compressed {
            compact::uncompress(&path, &mut params)?;
            params.write(&sidecar)?;
        }

        let mut index = Self::open_with(path, params, Mode::Update)?;
        index.compress_on_close = was_compressed;
        Ok(index)
    }

    /// Open an index read-only. A compressed file is readable in place;
    /// its pointers address the packed records.
    pub fn open_read<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let params = IndexParams::read(&sidecar_path(&path))?;
        Self::open_with(path, params, Mode::Read)
    }

    fn open_with(path: PathBuf, params: IndexParams, mode: Mode) -> Result<Self> {
        let file = PageFile::open(&path, params.page_size as usize, mode == Mode::Update)?;
        let mut cache = PageCache::new(file, params.cache_size as usize);

        let shape = params.primary_shape();
        let level = params.level as usize;
        let primary = match params.kind {
            IndexKind::Identifier => Primary::Id(Tree::open(PageNo::ROOT, shape, level)),
            IndexKind::Keyword => Primary::Keyword(Tree::open(PageNo::ROOT, shape, level)),
        };
        cache.lock(PageNo::ROOT)?;

        Ok(Self {
            cache,
            params,
            path,
            mode,
            primary,
            dups: DupTrees::new(params.secondary_shape()),
            keywords: KeywordTrees::new(params.secondary_shape()),
            compress_on_close: false,
        })
    }

    /// What this index maps
    pub fn kind(&self) -> IndexKind {
        self.params.kind
    }

    /// The parameters as they would be written to the sidecar now
    pub fn params(&self) -> IndexParams {
        let mut params = self.params;
        params.level = self.primary_level() as u32;
        params.pages = self.cache.page_count();
        params
    }

    /// Cache statistics for external reporting
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn primary_level(&self) -> usize {
        match &self.primary {
            Primary::Id(t) => t.level(),
            Primary::Keyword(t) => t.level(),
        }
    }

    fn require_update(&self) -> Result<()> {
        if self.mode != Mode::Update {
            return Err(IndexError::invalid_operation("index is open read-only"));
        }
        Ok(())
    }

    fn clip_keyword(&self, keyword: &str) -> Vec<u8> {
        let bytes = keyword.as_bytes();
        bytes[..bytes.len().min(self.params.kw_limit as usize)].to_vec()
    }

    /// Insert a location for an identifier. Duplicate identifiers
    /// accumulate in a per-id numeric tree; re-inserting an identical
    /// location is a no-op returning false.
    pub fn insert_id(&mut self, id: &str, dbno: u32, offset: u64, refoffset: u64) -> Result<bool> {
        self.require_update()?;
        let Primary::Id(tree) = &mut self.primary else {
            return Err(IndexError::invalid_operation(
                "not an identifier index",
            ));
        };

        let key = id.as_bytes().to_vec();
        let existed = tree.search(&mut self.cache, &key)?.is_some();
        let added = self.dups.insert(
            &mut self.cache,
            tree,
            IdEntry {
                id: key,
                dbno,
                dups: 0,
                offset,
                refoffset,
            },
        )?;
        if added {
            self.params.full_count += 1;
            if !existed {
                self.params.count += 1;
            }
        }
        Ok(added)
    }

    /// Every stored location of an identifier; empty when absent
    pub fn lookup_id(&mut self, id: &str) -> Result<Vec<NumEntry>> {
        let Primary::Id(tree) = &self.primary else {
            return Err(IndexError::invalid_operation(
                "not an identifier index",
            ));
        };
        self.dups.locations(&mut self.cache, tree, id.as_bytes())
    }

    /// Identifier records whose id starts with `prefix`, in id order
    pub fn ids_with_prefix(&mut self, prefix: &str) -> Result<Vec<IdEntry>> {
        let Primary::Id(tree) = &self.primary else {
            return Err(IndexError::invalid_operation(
                "not an identifier index",
            ));
        };
        tree.search_prefix(&mut self.cache, prefix.as_bytes())
    }

    /// Remove an identifier and all its locations. Returns false when
    /// the id is absent.
    pub fn delete_id(&mut self, id: &str) -> Result<bool> {
        self.require_update()?;
        let Primary::Id(tree) = &mut self.primary else {
            return Err(IndexError::invalid_operation(
                "not an identifier index",
            ));
        };

        let locations = self.dups.locations(&mut self.cache, tree, id.as_bytes())?;
        if locations.is_empty() {
            return Ok(false);
        }
        self.dups.remove_id(&mut self.cache, tree, id.as_bytes())?;
        self.params.count -= 1;
        self.params.full_count -= locations.len() as u64;
        Ok(true)
    }

    /// Remove one location of an identifier by offset. Returns false
    /// when that location is not stored.
    pub fn delete_location(&mut self, id: &str, offset: u64) -> Result<bool> {
        self.require_update()?;
        let Primary::Id(tree) = &mut self.primary else {
            return Err(IndexError::invalid_operation(
                "not an identifier index",
            ));
        };

        if !self
            .dups
            .remove_location(&mut self.cache, tree, id.as_bytes(), offset)?
        {
            return Ok(false);
        }
        self.params.full_count -= 1;
        if tree.search(&mut self.cache, &id.as_bytes().to_vec())?.is_none() {
            self.params.count -= 1;
        }
        Ok(true)
    }

    /// Add an id under a keyword, creating the keyword on first use.
    /// The keyword is truncated to the configured limit. Returns false
    /// for an existing membership.
    pub fn insert_keyword(&mut self, keyword: &str, id: &str) -> Result<bool> {
        self.require_update()?;
        let kw = self.clip_keyword(keyword);
        let Primary::Keyword(tree) = &mut self.primary else {
            return Err(IndexError::invalid_operation("not a keyword index"));
        };

        let existed = tree.search(&mut self.cache, &kw)?.is_some();
        let added = self
            .keywords
            .insert(&mut self.cache, tree, &kw, id.as_bytes())?;
        if added {
            self.params.full_count += 1;
            if !existed {
                self.params.count += 1;
            }
        }
        Ok(added)
    }

    /// Member ids of a keyword, in id order; empty when absent
    pub fn lookup_keyword(&mut self, keyword: &str) -> Result<Vec<String>> {
        let Primary::Keyword(tree) = &self.primary else {
            return Err(IndexError::invalid_operation("not a keyword index"));
        };
        let kw = self.clip_keyword(keyword);
        let members = self.keywords.members(&mut self.cache, tree, &kw)?;
        Ok(members
            .into_iter()
            .map(|id| String::from_utf8_lossy(&id).into_owned())
            .collect())
    }

    /// Keywords starting with `prefix`, in keyword order
    pub fn keywords_with_prefix(&mut self, prefix: &str) -> Result<Vec<String>> {
        let Primary::Keyword(tree) = &self.primary else {
            return Err(IndexError::invalid_operation("not a keyword index"));
        };
        let hits = tree.search_prefix(&mut self.cache, prefix.as_bytes())?;
        Ok(hits
            .into_iter()
            .map(|e| String::from_utf8_lossy(&e.keyword).into_owned())
            .collect())
    }

    /// Remove an id from under a keyword. Removing the last member
    /// removes the keyword itself. Returns false when the membership
    /// did not exist.
    pub fn delete_keyword(&mut self, keyword: &str, id: &str) -> Result<bool> {
        self.require_update()?;
        let kw = self.clip_keyword(keyword);
        let Primary::Keyword(tree) = &mut self.primary else {
            return Err(IndexError::invalid_operation("not a keyword index"));
        };

        if !self
            .keywords
            .remove(&mut self.cache, tree, &kw, id.as_bytes())?
        {
            return Ok(false);
        }
        self.params.full_count -= 1;
        if tree.search(&mut self.cache, &kw)?.is_none() {
            self.params.count -= 1;
        }
        Ok(true)
    }

    /// Flush every dirty page; the root stays pinned
    pub fn flush(&mut self) -> Result<()> {
        self.require_update()?;
        self.cache.sync(&[PageNo::ROOT])
    }

    /// Sync, write the sidecar and, when enabled or when the file was
    /// opened compressed, compress the index file. A read-only index
    /// just closes.
    pub fn close(mut self) -> Result<()> {
        if self.mode == Mode::Read {
            return Ok(());
        }
        self.cache.sync(&[])?;
        let mut params = self.params();
        let Self {
            cache,
            path,
            compress_on_close,
            ..
        } = self;
        drop(cache);

        if compress_on_close {
            compact::compress(&path, &mut params)?;
        }
        params.write(&sidecar_path(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Tree;
    use crate::page::bucket::BucketRecord;
    use crate::page::node::{read_node, Node};
    use rand::prelude::*;
    use tempfile::tempdir;

    fn small_id_options() -> IndexOptions {
        IndexOptions::new(IndexKind::Identifier)
            .page_size(512)
            .order(3)
            .fill(2)
            .secondary_order(3)
            .secondary_fill(2)
            .cache_size(32)
    }

    /// Walk a tree checking the order and fill invariants of every node
    /// and bucket.
    fn check_tree<R: BucketRecord>(
        cache: &mut PageCache,
        tree: &Tree<R>,
    ) -> std::result::Result<(), String> {
        fn walk<R: BucketRecord>(
            cache: &mut PageCache,
            tree: &Tree<R>,
            page: PageNo,
            depth: usize,
            lo: Option<&R::Key>,
            hi: Option<&R::Key>,
        ) -> std::result::Result<(), String> {
            let node: Node<R::Key> =
                read_node(cache, page).map_err(|e| format!("read {}: {}", page, e))?;
            let shape = tree.shape();

            for pair in node.keys.windows(2) {
                if pair[0] >= pair[1] {
                    return Err(format!("unordered keys in node {}", page));
                }
            }
            if let (Some(lo), Some(first)) = (lo, node.keys.first()) {
                if first <= lo {
                    return Err(format!("key below subtree bound in node {}", page));
                }
            }
            if let (Some(hi), Some(last)) = (hi, node.keys.last()) {
                if last > hi {
                    return Err(format!("key above subtree bound in node {}", page));
                }
            }
            if page != tree.root() && node.keys.len() < shape.min_keys() {
                return Err(format!("underfull node {}", page));
            }
            if node.keys.len() > shape.max_keys() {
                return Err(format!("overfull node {}", page));
            }

            let sole_leaf = tree.level() == 0;
            for (i, &child) in node.children.iter().enumerate() {
                let child_lo = if i == 0 { lo } else { Some(&node.keys[i - 1]) };
                let child_hi = if i < node.keys.len() {
                    Some(&node.keys[i])
                } else {
                    hi
                };
                if depth == tree.level() {
                    let entries = crate::page::bucket::read_all::<R>(cache, child)
                        .map_err(|e| format!("bucket {}: {}", child, e))?;
                    if entries.is_empty() && !sole_leaf {
                        return Err(format!("empty bucket {} in leaf {}", child, page));
                    }
                    if entries.len() > shape.fill {
                        return Err(format!("overfull bucket {} in leaf {}", child, page));
                    }
                    for e in &entries {
                        let k = e.key();
                        if let Some(lo) = child_lo {
                            if k <= *lo {
                                return Err(format!("entry below bound in bucket {}", child));
                            }
                        }
                        if let Some(hi) = child_hi {
                            if k > *hi {
                                return Err(format!("entry above bound in bucket {}", child));
                            }
                        }
                    }
                } else {
                    walk(cache, tree, child, depth + 1, child_lo, child_hi)?;
                }
            }
            Ok(())
        }
        walk(cache, tree, tree.root(), 0, None, None)
    }

    fn check_index(index: &mut Index) {
        // Split borrows: the walker needs the cache and the tree
        let Index { cache, primary, .. } = index;
        match primary {
            Primary::Id(tree) => check_tree(cache, tree).unwrap(),
            Primary::Keyword(tree) => check_tree(cache, tree).unwrap(),
        }
    }

    #[test]
    fn test_basic_id_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acnum.idx");
        let mut index = Index::create(&path, IndexOptions::new(IndexKind::Identifier))?;

        assert!(index.insert_id("P12345", 1, 1000, 0)?);
        assert_eq!(index.lookup_id("P12345")?.len(), 1);
        assert_eq!(index.lookup_id("P12345")?[0].offset, 1000);
        assert!(index.lookup_id("Q99999")?.is_empty());

        assert!(index.delete_id("P12345")?);
        assert!(index.lookup_id("P12345")?.is_empty());
        assert!(!index.delete_id("P12345")?);

        index.close()
    }

    #[test]
    fn test_root_split_scenario() -> Result<()> {
        // Order 3, fill 2: inserting A..E forces exactly one root split
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, small_id_options())?;

        for (i, id) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            index.insert_id(id, 1, (i as u64 + 1) * 100, 0)?;
        }

        assert_eq!(index.primary_level(), 1, "exactly one root split");
        assert_eq!(index.lookup_id("C")?[0].offset, 300);
        check_index(&mut index);

        index.close()
    }

    #[test]
    fn test_full_bucket_never_overflows_policy() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, small_id_options())?;

        // Far beyond a single bucket's fill; the invariants must hold
        // after every insert
        for i in 0..40u64 {
            index.insert_id(&format!("ID{:03}", i), 1, i * 10, 0)?;
            check_index(&mut index);
        }
        for i in 0..40u64 {
            assert_eq!(index.lookup_id(&format!("ID{:03}", i))?[0].offset, i * 10);
        }

        index.close()
    }

    #[test]
    fn test_keyword_secondary_tree_scenario() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyword.idx");
        let mut index = Index::create(&path, IndexOptions::new(IndexKind::Keyword))?;

        assert!(index.insert_keyword("enzyme", "P1")?);
        assert!(index.insert_keyword("enzyme", "P2")?);
        assert!(!index.insert_keyword("enzyme", "P2")?, "duplicate is a no-op");

        assert!(index.delete_keyword("enzyme", "P1")?);
        assert_eq!(index.lookup_keyword("enzyme")?, vec!["P2".to_string()]);

        assert!(index.delete_keyword("enzyme", "P2")?);
        assert!(index.lookup_keyword("enzyme")?.is_empty());
        assert!(index.keywords_with_prefix("enz")?.is_empty());

        index.close()
    }

    #[test]
    fn test_keyword_truncation() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyword.idx");
        let mut index = Index::create(
            &path,
            IndexOptions::new(IndexKind::Keyword).keyword_limit(6),
        )?;

        index.insert_keyword("glycosyltransferase", "P1")?;
        assert_eq!(index.lookup_keyword("glycos")?, vec!["P1".to_string()]);
        assert_eq!(
            index.lookup_keyword("glycosyl-something-else")?,
            vec!["P1".to_string()]
        );

        index.close()
    }

    #[test]
    fn test_duplicate_identifiers() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, small_id_options())?;

        assert!(index.insert_id("P1", 1, 100, 10)?);
        assert!(index.insert_id("P1", 2, 200, 20)?);
        assert!(index.insert_id("P1", 3, 300, 30)?);
        assert!(!index.insert_id("P1", 3, 300, 30)?, "same location again");

        let mut locations = index.lookup_id("P1")?;
        locations.sort_by_key(|l| l.offset);
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[1].offset, 200);
        assert_eq!(locations[1].dbno, 2);

        // Drop one duplicate; two remain
        assert!(index.delete_location("P1", 200)?);
        assert_eq!(index.lookup_id("P1")?.len(), 2);

        // Down to one demotes back to a plain record
        assert!(index.delete_location("P1", 100)?);
        let locations = index.lookup_id("P1")?;
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].offset, 300);

        // Removing the id tears everything down
        assert!(index.delete_id("P1")?);
        assert!(index.lookup_id("P1")?.is_empty());

        index.close()
    }

    #[test]
    fn test_wildcard_prefix_lookup() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, small_id_options())?;

        for id in ["ABC1", "ABC2", "ABD1", "XYZ9", "AB", "ABC11"] {
            index.insert_id(id, 1, 1, 0)?;
        }

        let hits = index.ids_with_prefix("ABC")?;
        let ids: Vec<String> = hits
            .iter()
            .map(|e| String::from_utf8_lossy(&e.id).into_owned())
            .collect();
        assert_eq!(ids, vec!["ABC1", "ABC11", "ABC2"]);

        assert_eq!(index.ids_with_prefix("AB")?.len(), 5);
        assert!(index.ids_with_prefix("Q")?.is_empty());

        index.close()
    }

    #[test]
    fn test_lookup_is_idempotent() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, small_id_options())?;

        for i in 0..20u64 {
            index.insert_id(&format!("ID{:02}", i), 1, i, 0)?;
        }

        let first = index.lookup_id("ID07")?;
        let params_before = index.params();
        let second = index.lookup_id("ID07")?;
        assert_eq!(first, second);
        assert_eq!(index.params(), params_before);

        index.close()
    }

    #[test]
    fn test_close_reopen_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        {
            let mut index = Index::create(&path, small_id_options())?;
            for i in 0..30u64 {
                index.insert_id(&format!("ID{:02}", i), 1, i * 7, i)?;
            }
            index.close()?;
        }

        {
            let mut index = Index::open_update(&path)?;
            for i in 0..30u64 {
                let locations = index.lookup_id(&format!("ID{:02}", i))?;
                assert_eq!(locations.len(), 1);
                assert_eq!(locations[0].offset, i * 7);
                assert_eq!(locations[0].refoffset, i);
            }
            index.insert_id("ZZ99", 2, 999, 0)?;
            index.close()?;
        }

        let mut index = Index::open_read(&path)?;
        assert_eq!(index.lookup_id("ZZ99")?[0].offset, 999);
        assert_eq!(index.params().count, 31);
        Ok(())
    }

    #[test]
    fn test_compaction_equivalence() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        let before: Vec<(String, Vec<NumEntry>)>;
        {
            let mut index = Index::create(&path, small_id_options().compress(true))?;
            for i in 0..50u64 {
                index.insert_id(&format!("SEQ{:03}", i), (i % 3) as u32, i * 13, i)?;
            }
            // Duplicates force numeric trees whose roots the compactor
            // must translate
            index.insert_id("SEQ007", 9, 7777, 0)?;
            index.insert_id("SEQ007", 9, 8888, 0)?;

            before = (0..50u64)
                .map(|i| format!("SEQ{:03}", i))
                .map(|id| {
                    let mut locations = index.lookup_id(&id).unwrap();
                    locations.sort_by_key(|l| l.offset);
                    (id, locations)
                })
                .collect();
            index.close()?;
        }

        // The file on disk is now compacted
        let compressed_len = std::fs::metadata(&path)?.len();
        assert!(IndexParams::read(&storage::sidecar_path(&path))?.compressed);

        // Reading the compacted file in place
        {
            let mut index = Index::open_read(&path)?;
            for (id, locations) in &before {
                let mut found = index.lookup_id(id)?;
                found.sort_by_key(|l| l.offset);
                assert_eq!(&found, locations, "compressed read of {}", id);
            }
        }

        // Reopening for update expands it again; contents unchanged
        {
            let mut index = Index::open_update(&path)?;
            assert!(std::fs::metadata(&path)?.len() > compressed_len);
            for (id, locations) in &before {
                let mut found = index.lookup_id(id)?;
                found.sort_by_key(|l| l.offset);
                assert_eq!(&found, locations, "expanded read of {}", id);
            }
            check_index(&mut index);
            index.close()?;
        }

        Ok(())
    }

    #[test]
    fn test_keyword_index_compaction() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyword.idx");

        {
            let mut index = Index::create(
                &path,
                IndexOptions::new(IndexKind::Keyword)
                    .page_size(512)
                    .order(3)
                    .fill(2)
                    .secondary_order(3)
                    .secondary_fill(2)
                    .compress(true),
            )?;
            for kw in ["kinase", "enzyme", "membrane", "receptor"] {
                for i in 0..6 {
                    index.insert_keyword(kw, &format!("{}{}", &kw[..2].to_uppercase(), i))?;
                }
            }
            index.close()?;
        }

        let mut index = Index::open_update(&path)?;
        assert_eq!(index.lookup_keyword("kinase")?.len(), 6);
        assert_eq!(index.lookup_keyword("enzyme")?.len(), 6);
        assert!(index.lookup_keyword("absent")?.is_empty());
        index.close()
    }

    #[test]
    fn test_read_only_rejects_mutation() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        {
            let mut index = Index::create(&path, small_id_options())?;
            index.insert_id("A", 1, 1, 0)?;
            index.close()?;
        }

        let mut index = Index::open_read(&path)?;
        assert!(index.insert_id("B", 1, 2, 0).is_err());
        assert!(index.delete_id("A").is_err());
        assert_eq!(index.lookup_id("A")?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_wrong_index_kind_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, IndexOptions::new(IndexKind::Identifier))?;

        assert!(index.insert_keyword("enzyme", "P1").is_err());
        assert!(index.lookup_keyword("enzyme").is_err());
        index.close()
    }

    #[test]
    fn test_randomized_insert_delete_soak() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("soak.idx");
        let mut index = Index::create(&path, small_id_options())?;
        let mut rng = StdRng::seed_from_u64(42);

        let mut ids: Vec<String> = (0..200u32).map(|i| format!("ID{:04}", i)).collect();
        ids.shuffle(&mut rng);
        for (i, id) in ids.iter().enumerate() {
            index.insert_id(id, 1, i as u64, 0)?;
        }
        check_index(&mut index);

        // Delete a random half, checking the invariants as the tree
        // shrinks through merges and root collapses
        ids.shuffle(&mut rng);
        let (gone, kept) = ids.split_at(100);
        for id in gone {
            assert!(index.delete_id(id)?, "delete {}", id);
            check_index(&mut index);
        }
        for id in gone {
            assert!(index.lookup_id(id)?.is_empty());
        }
        for id in kept {
            assert_eq!(index.lookup_id(id)?.len(), 1, "lookup {}", id);
        }

        // Shrink to nothing: the tree must collapse back to a leaf root
        for id in kept {
            assert!(index.delete_id(id)?);
        }
        check_index(&mut index);
        assert_eq!(index.primary_level(), 0);
        assert_eq!(index.params().count, 0);

        index.close()
    }

    #[test]
    fn test_stats_serialize_for_reporting() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let mut index = Index::create(&path, small_id_options())?;
        index.insert_id("A", 1, 1, 0)?;

        let json = serde_json::to_value(index.stats()).unwrap();
        assert!(json.get("hits").is_some());
        assert!(json.get("reads").is_some());
        assert!(json.get("writes").is_some());
        assert!(json.get("resident").is_some());

        index.close()
    }
}
