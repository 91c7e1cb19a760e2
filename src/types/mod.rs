//! Common types used throughout the index engine.

mod page_no;

pub use page_no::PageNo;

use serde::{Deserialize, Serialize};

/// Default page size in bytes
pub const DEFAULT_PAGE_SIZE: usize = 2048;

/// Default order (max children per node) of the primary tree
pub const DEFAULT_ORDER: usize = 71;

/// Default fill factor (max entries per bucket) of the primary tree
pub const DEFAULT_FILL: usize = 46;

/// Default order of secondary (per-keyword / per-duplicate) trees
pub const DEFAULT_SECONDARY_ORDER: usize = 71;

/// Default fill factor of secondary trees
pub const DEFAULT_SECONDARY_FILL: usize = 46;

/// Default resident page count of the cache
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Default keyword length limit; longer keywords are truncated
pub const DEFAULT_KW_LIMIT: usize = 15;

/// Smallest order the engine accepts (a node must be splittable)
pub const MIN_ORDER: usize = 3;

/// Keys longer than a quarter page cannot be stored: at least two node
/// records must fit a page alongside the header and length array
pub const fn max_key_len(page_size: usize) -> usize {
    page_size / 4
}

/// What an index file maps: identifiers or keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Identifier/accession index: id text to file locations
    Identifier,
    /// Keyword index: keyword text to member identifier sets
    Keyword,
}

impl IndexKind {
    /// Sidecar file representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identifier => "Identifier",
            Self::Keyword => "Keyword",
        }
    }

    /// Parse the sidecar file representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Identifier" => Some(Self::Identifier),
            "Keyword" => Some(Self::Keyword),
            _ => None,
        }
    }
}

/// Shape of one B+ tree: order and bucket fill factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeShape {
    /// Maximum children per node; a node holds at most `order - 1` keys
    pub order: usize,
    /// Maximum entries per bucket
    pub fill: usize,
}

impl TreeShape {
    /// Create a shape, clamping to the engine minimum
    pub fn new(order: usize, fill: usize) -> Self {
        Self {
            order: order.max(MIN_ORDER),
            fill: fill.max(1),
        }
    }

    /// Maximum keys a node of this shape may hold
    pub fn max_keys(self) -> usize {
        self.order - 1
    }

    /// Minimum keys a non-root node of this shape must hold
    pub fn min_keys(self) -> usize {
        (self.order - 1) / 2
    }

    /// Entries one leaf holds before an insert must split it: the
    /// insert paths keep a leaf at no more than `order - 1` buckets so
    /// a reorder never produces a node that itself needs splitting.
    pub fn leaf_capacity(self) -> usize {
        (self.order - 1) * self.fill
    }

    /// Structural ceiling of a leaf: `order` buckets of `fill` entries.
    /// Delete-side merges may fill a leaf up to here.
    pub fn leaf_limit(self) -> usize {
        self.order * self.fill
    }
}

impl Default for TreeShape {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            fill: DEFAULT_FILL,
        }
    }
}

/// Page tags
///
/// The tag is the first byte of every page and selects the body layout.
/// Retired pages are overwritten with `Free`; only the compactor
/// physically reclaims them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTag {
    /// Free/retired page
    Free = 0x00,
    /// Root node of a text-keyed tree
    Root = 0x01,
    /// Internal node of a text-keyed tree
    Internal = 0x02,
    /// Leaf node of a text-keyed tree (children are buckets)
    Leaf = 0x03,
    /// Overflow continuation of a text-keyed node
    Overflow = 0x04,
    /// Root node of a numeric tree
    NumRoot = 0x05,
    /// Internal node of a numeric tree
    NumInternal = 0x06,
    /// Leaf node of a numeric tree
    NumLeaf = 0x07,
    /// Overflow continuation of a numeric node
    NumOverflow = 0x08,
    /// Identifier bucket
    IdBucket = 0x10,
    /// Keyword (primary) bucket
    KeywordBucket = 0x11,
    /// Secondary id bucket
    SecBucket = 0x12,
    /// Numeric offset bucket
    NumBucket = 0x13,
}

impl NodeTag {
    /// Check if this tag is any node page (including overflow continuations)
    pub fn is_node(self) -> bool {
        matches!(
            self,
            Self::Root
                | Self::Internal
                | Self::Leaf
                | Self::Overflow
                | Self::NumRoot
                | Self::NumInternal
                | Self::NumLeaf
                | Self::NumOverflow
        )
    }

    /// Check if this tag is a node overflow continuation
    pub fn is_node_overflow(self) -> bool {
        matches!(self, Self::Overflow | Self::NumOverflow)
    }

    /// Check if this tag is any bucket page
    pub fn is_bucket(self) -> bool {
        matches!(
            self,
            Self::IdBucket | Self::KeywordBucket | Self::SecBucket | Self::NumBucket
        )
    }

    /// Check if this tag is a tree root
    pub fn is_root(self) -> bool {
        matches!(self, Self::Root | Self::NumRoot)
    }

    /// Convert from byte value
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Free),
            0x01 => Some(Self::Root),
            0x02 => Some(Self::Internal),
            0x03 => Some(Self::Leaf),
            0x04 => Some(Self::Overflow),
            0x05 => Some(Self::NumRoot),
            0x06 => Some(Self::NumInternal),
            0x07 => Some(Self::NumLeaf),
            0x08 => Some(Self::NumOverflow),
            0x10 => Some(Self::IdBucket),
            0x11 => Some(Self::KeywordBucket),
            0x12 => Some(Self::SecBucket),
            0x13 => Some(Self::NumBucket),
            _ => None,
        }
    }
}
