//! Compaction: packing and unpacking the index file.
//!
//! A write-mode index lives as fixed-size pages, many of them partly
//! empty or retired. On close, `compress` repacks the live pages into
//! contiguous variable-size records; on the next open-for-update,
//! `uncompress` expands them back onto page-aligned offsets. Both
//! directions are the same pass: walk the source in offset order,
//! measure every live page, assign destination offsets, then rewrite
//! each reachable page exactly once with every pointer translated
//! through the offset table.
//!
//! Pointer fields are translated by class: header fields (left, right,
//! parent, overflow, block number) and node child pointers always; the
//! level stored in a root's parent field never; bucket record fields
//! only where they reference index pages (secondary and duplicate tree
//! roots) - identifier and numeric record offsets point into the
//! sequence databases and must pass through unchanged.

use crate::error::{IndexError, Result};
use crate::page::bucket::{self, IdEntry, KeywordEntry, NumEntry, SecEntry};
use crate::page::node::{self, NodeKey};
use crate::page::{self, BucketHeader, NodeHeader, PageBuf};
use crate::storage::{IndexParams, PageFile};
use crate::types::{NodeTag, PageNo};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How records are laid out in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Fixed-size pages at multiples of the page size
    Aligned,
    /// Variable-size records packed back to back
    Packed,
}

/// One live page discovered by the scan pass
struct PageSlot {
    old: PageNo,
    new: PageNo,
    used: usize,
    tag: NodeTag,
}

/// Repack a page-aligned index file into its compacted form, in place.
/// Updates the params' page count and compression flag; the caller
/// persists them.
pub fn compress(path: &Path, params: &mut IndexParams) -> Result<()> {
    let total = remap_file(path, params.page_size as usize, Layout::Aligned)?;
    params.compressed = true;
    params.pages = total;
    Ok(())
}

/// Expand a compacted index file back onto page-aligned offsets, in
/// place. The inverse of [`compress`].
pub fn uncompress(path: &Path, params: &mut IndexParams) -> Result<()> {
    let total = remap_file(path, params.page_size as usize, Layout::Packed)?;
    params.compressed = false;
    params.pages = total;
    Ok(())
}

/// Run the remapping pass from `src_layout` to the opposite layout.
/// Returns the number of live pages written.
fn remap_file(path: &Path, page_size: usize, src_layout: Layout) -> Result<u64> {
    let src = PageFile::open(path, page_size, false)?;

    // Pass 1: measure every live page and assign destination offsets
    let mut slots = Vec::new();
    let mut map = HashMap::new();
    let mut src_at = 0u64;
    let mut dst_at = 0u64;
    while src_at < src.len() {
        let pos = PageNo::new(src_at);
        let buf = src.read_page(pos)?;
        let tag = buf.tag()?;

        if tag == NodeTag::Free {
            if src_layout == Layout::Packed {
                return Err(IndexError::corruption(format!(
                    "free page at {} in a compacted file",
                    pos
                )));
            }
            src_at += page_size as u64;
            continue;
        }

        let used = page::used_size(&buf)?;
        let new = PageNo::new(dst_at);
        map.insert(pos.offset(), new.offset());
        slots.push(PageSlot {
            old: pos,
            new,
            used,
            tag,
        });

        src_at += match src_layout {
            Layout::Aligned => page_size as u64,
            Layout::Packed => used as u64,
        };
        dst_at += match src_layout {
            Layout::Aligned => used as u64, // packing
            Layout::Packed => page_size as u64,
        };
    }

    if slots.is_empty() {
        return Err(IndexError::corruption("index file holds no live pages"));
    }
    if slots[0].old != PageNo::ROOT || slots[0].new != PageNo::ROOT {
        return Err(IndexError::corruption("primary root is not the first page"));
    }

    // Pass 2: rewrite each reachable page at its destination
    let tmp = tmp_path(path);
    let mut dst = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;

    for slot in &slots {
        match slot.tag {
            NodeTag::Root | NodeTag::Internal | NodeTag::Leaf => {
                rewrite_node::<Vec<u8>>(&src, &mut dst, &map, slot)?;
            }
            NodeTag::NumRoot | NodeTag::NumInternal | NodeTag::NumLeaf => {
                rewrite_node::<u64>(&src, &mut dst, &map, slot)?;
            }
            NodeTag::Overflow | NodeTag::NumOverflow => {
                // Rewritten with the node that owns the chain
            }
            NodeTag::IdBucket => rewrite_bucket::<IdEntry>(&src, &mut dst, &map, slot)?,
            NodeTag::KeywordBucket => rewrite_bucket::<KeywordEntry>(&src, &mut dst, &map, slot)?,
            NodeTag::SecBucket => rewrite_bucket::<SecEntry>(&src, &mut dst, &map, slot)?,
            NodeTag::NumBucket => rewrite_bucket::<NumEntry>(&src, &mut dst, &map, slot)?,
            NodeTag::Free => unreachable!("free pages are dropped by the scan"),
        }
    }

    dst.set_len(dst_at)?;
    dst.sync_all()?;
    drop(dst);
    drop(src);
    std::fs::rename(&tmp, path)?;

    Ok(slots.len() as u64)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".remap");
    path.with_file_name(name)
}

/// Translate a pointer through the offset table; null passes through
fn map_page(map: &HashMap<u64, u64>, pos: PageNo, what: &str) -> Result<PageNo> {
    if pos.is_null() {
        return Ok(PageNo::NULL);
    }
    map.get(&pos.offset())
        .copied()
        .map(PageNo::new)
        .ok_or_else(|| {
            IndexError::corruption(format!("{} points at unmapped page {}", what, pos))
        })
}

fn write_at(dst: &mut std::fs::File, pos: PageNo, bytes: &[u8]) -> Result<()> {
    dst.seek(SeekFrom::Start(pos.offset()))?;
    dst.write_all(bytes)?;
    Ok(())
}

/// Decode a node with its overflow chain, translate every pointer, and
/// re-encode it at the destination offsets of its pages. Record sizes
/// are pointer-width invariant, so the chain layout reproduces exactly.
fn rewrite_node<K: NodeKey>(
    src: &PageFile,
    dst: &mut std::fs::File,
    map: &HashMap<u64, u64>,
    slot: &PageSlot,
) -> Result<()> {
    let first = src.read_page(slot.old)?;
    let decoded = node::decode_node::<K, _>(slot.old, &first, |p| src.read_page(p))?;

    let mut out = decoded.clone();
    out.children = decoded
        .children
        .iter()
        .map(|&c| map_page(map, c, "child"))
        .collect::<Result<_>>()?;
    out.left = map_page(map, decoded.left, "left sibling")?;
    out.right = map_page(map, decoded.right, "right sibling")?;
    if !slot.tag.is_root() {
        // Roots keep the tree level in this field
        out.prev = map_page(map, decoded.parent(), "parent")?.offset();
    }

    let mut bufs = node::encode_node(&out, src.page_size())?;
    if bufs.len() != decoded.chain.len() + 1 {
        return Err(IndexError::corruption(format!(
            "node {} re-encoded to a different chain length",
            slot.old
        )));
    }

    let new_self = slot.new;
    for (i, buf) in bufs.iter_mut().enumerate() {
        let old_page = if i == 0 {
            slot.old
        } else {
            decoded.chain[i - 1]
        };
        let new_page = map_page(map, old_page, "chain page")?;
        let next = if i < decoded.chain.len() {
            map_page(map, decoded.chain[i], "overflow")?
        } else {
            PageNo::NULL
        };

        let mut hdr = NodeHeader::read(buf)?;
        hdr.block_no = new_page;
        hdr.overflow = next;
        if i == 0 {
            hdr.left = out.left;
            hdr.right = out.right;
            hdr.prev = out.prev;
        } else {
            hdr.left = PageNo::NULL;
            hdr.right = PageNo::NULL;
            hdr.prev = new_self.offset();
        }
        hdr.write(buf);

        let used = page::used_size(buf)?;
        write_at(dst, new_page, &buf.as_bytes()[..used])?;
    }
    Ok(())
}

/// Translate a single bucket page in place: the chain pointer in the
/// header and any tree-root pointers inside the records.
fn rewrite_bucket<R: bucket::BucketRecord>(
    src: &PageFile,
    dst: &mut std::fs::File,
    map: &HashMap<u64, u64>,
    slot: &PageSlot,
) -> Result<()> {
    let mut buf: PageBuf = src.read_page(slot.old)?;
    let mut hdr = BucketHeader::read(&buf)?;
    hdr.overflow = map_page(map, hdr.overflow, "bucket overflow")?;
    hdr.write(&mut buf);
    bucket::remap_page_records::<R>(&mut buf, map)?;

    write_at(dst, slot.new, &buf.as_bytes()[..slot.used])?;
    Ok(())
}
