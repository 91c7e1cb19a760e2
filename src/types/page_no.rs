//! Page number type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a page by its byte offset in the index file.
///
/// Offset 0 is the primary tree root and never moves: root splits and
/// root collapses rewrite page 0 in place. Pointers on disk are stored
/// as these offsets, which is what the compactor's remapping table
/// translates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PageNo(pub u64);

impl PageNo {
    /// Null pointer, used for absent siblings/overflow/parent links
    pub const NULL: PageNo = PageNo(u64::MAX);

    /// The primary tree root (page 0)
    pub const ROOT: PageNo = PageNo(0);

    /// Create a new page number from a byte offset
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Get the raw byte offset
    pub const fn offset(self) -> u64 {
        self.0
    }

    /// Check whether this is a real page (not the null sentinel)
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Check whether this is the null sentinel
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for PageNo {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

impl From<PageNo> for u64 {
    fn from(no: PageNo) -> Self {
        no.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_no_basics() {
        let no = PageNo::new(4096);
        assert_eq!(no.offset(), 4096);
        assert!(no.is_some());
        assert!(PageNo::NULL.is_null());
        assert!(PageNo::ROOT.is_some());
    }

    #[test]
    fn test_page_no_display() {
        assert_eq!(format!("{}", PageNo::new(2048)), "2048");
        assert_eq!(format!("{}", PageNo::NULL), "NULL");
    }
}
