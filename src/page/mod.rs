//! Page layer: on-disk page formats and codecs.
//!
//! Every page starts with a one-byte tag followed by fixed-width
//! big-endian header fields at fixed offsets. The body layout depends on
//! the tag: node pages carry ordered keys and child pointers (spilling
//! into overflow continuations), bucket pages carry packed records.
//! All pointer/offset arithmetic over page bytes lives in this module.

mod header;

pub mod bucket;
pub mod node;

pub use header::{BucketHeader, NodeHeader, BUCKET_HEADER_SIZE, NODE_HEADER_SIZE};

use crate::error::{IndexError, Result};
use crate::types::NodeTag;

/// A raw page buffer sized to the index's page size
#[derive(Clone, PartialEq, Eq)]
pub struct PageBuf {
    data: Vec<u8>,
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size],
        }
    }

    /// Create a page buffer from raw bytes, zero-padding short input
    pub fn from_bytes(bytes: &[u8], page_size: usize) -> Self {
        let mut data = vec![0u8; page_size];
        let len = bytes.len().min(page_size);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Page size this buffer was created with
    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    /// Read the page tag
    pub fn tag(&self) -> Result<NodeTag> {
        NodeTag::from_byte(self.data[0])
            .ok_or_else(|| IndexError::invalid_page(format!("unknown page tag {:#04x}", self.data[0])))
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PageBuf({} bytes, tag {:#04x})", self.data.len(), self.data[0])
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl AsRef<[u8]> for PageBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Used byte length of a page, computed from its header alone.
///
/// The compactor relies on this being page-local: node pages record the
/// body bytes they hold in `total_len`, bucket pages in `used`, so a page
/// can be measured without consulting the rest of its chain.
pub fn used_size(buf: &PageBuf) -> Result<usize> {
    let tag = buf.tag()?;
    let size = if tag.is_node() {
        let hdr = NodeHeader::read(buf)?;
        NODE_HEADER_SIZE + hdr.total_len as usize
    } else if tag.is_bucket() {
        let hdr = BucketHeader::read(buf)?;
        BUCKET_HEADER_SIZE + hdr.used as usize
    } else {
        return Err(IndexError::invalid_page(format!(
            "cannot size a {:?} page",
            tag
        )));
    };
    if size > buf.page_size() {
        return Err(IndexError::corruption(format!(
            "page used size {} exceeds page size {}",
            size,
            buf.page_size()
        )));
    }
    Ok(size)
}
