//! Bucket encoding and decoding.
//!
//! Buckets are the leaf-attached record blocks holding the actual index
//! entries; a leaf node's child slots reference bucket pages. Records
//! pack sequentially after the bucket header; when a page fills, the
//! chain continues on an overflow bucket page carrying its own entry
//! count, so every page remains measurable and patchable on its own.
//!
//! Four record kinds exist: identifier entries (locations in the source
//! databases), keyword entries (pointing at per-keyword secondary
//! trees), secondary id entries (membership only) and numeric offset
//! triples.

use crate::buffer::PageCache;
use crate::error::{IndexError, Result};
use crate::page::header::{read_u64, write_u64};
use crate::page::node::NodeKey;
use crate::page::{BucketHeader, PageBuf, BUCKET_HEADER_SIZE};
use crate::types::{NodeTag, PageNo};
use std::collections::HashMap;

/// A record stored in a bucket
pub trait BucketRecord: Clone + std::fmt::Debug {
    /// Key type of the tree this record lives under
    type Key: NodeKey;
    /// Tag of this record's bucket pages
    const TAG: NodeTag;

    fn key(&self) -> Self::Key;
    fn encoded_len(&self) -> usize;
    fn write_record(&self, out: &mut [u8]);
    fn read_record(bytes: &[u8]) -> Result<(Self, usize)>;

    /// Remap any index-page pointers embedded in the record through the
    /// compactor's offset table. Most records carry only data-file
    /// offsets, which are never remapped.
    fn remap_pointers(&mut self, map: &HashMap<u64, u64>) -> Result<()> {
        let _ = map;
        Ok(())
    }
}

fn remap(map: &HashMap<u64, u64>, offset: u64, what: &str) -> Result<u64> {
    map.get(&offset).copied().ok_or_else(|| {
        IndexError::corruption(format!("{} points at unmapped page {}", what, offset))
    })
}

/// Identifier entry: one id's location in the flat-file databases.
///
/// When `dups` is non-zero the identifier occurs multiple times and
/// `offset` is the root page of a numeric tree holding every
/// (offset, refoffset, dbno) triple instead of a data-file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdEntry {
    pub id: Vec<u8>,
    pub dbno: u32,
    pub dups: u32,
    pub offset: u64,
    pub refoffset: u64,
}

impl BucketRecord for IdEntry {
    type Key = Vec<u8>;
    const TAG: NodeTag = NodeTag::IdBucket;

    fn key(&self) -> Vec<u8> {
        self.id.clone()
    }

    fn encoded_len(&self) -> usize {
        26 + self.id.len()
    }

    fn write_record(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&(self.id.len() as u16).to_be_bytes());
        out[2..6].copy_from_slice(&self.dbno.to_be_bytes());
        out[6..10].copy_from_slice(&self.dups.to_be_bytes());
        write_u64(out, 10, self.offset);
        write_u64(out, 18, self.refoffset);
        out[26..26 + self.id.len()].copy_from_slice(&self.id);
    }

    fn read_record(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 26 {
            return Err(IndexError::corruption("truncated identifier entry"));
        }
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 26 + len {
            return Err(IndexError::corruption("truncated identifier entry"));
        }
        Ok((
            Self {
                id: bytes[26..26 + len].to_vec(),
                dbno: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
                dups: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
                offset: read_u64(bytes, 10),
                refoffset: read_u64(bytes, 18),
            },
            26 + len,
        ))
    }

    fn remap_pointers(&mut self, map: &HashMap<u64, u64>) -> Result<()> {
        if self.dups > 0 {
            self.offset = remap(map, self.offset, "duplicate tree root")?;
        }
        Ok(())
    }
}

/// Keyword entry: one keyword and the root of its secondary id tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordEntry {
    pub keyword: Vec<u8>,
    pub root: PageNo,
}

impl BucketRecord for KeywordEntry {
    type Key = Vec<u8>;
    const TAG: NodeTag = NodeTag::KeywordBucket;

    fn key(&self) -> Vec<u8> {
        self.keyword.clone()
    }

    fn encoded_len(&self) -> usize {
        10 + self.keyword.len()
    }

    fn write_record(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&(self.keyword.len() as u16).to_be_bytes());
        write_u64(out, 2, self.root.offset());
        out[10..10 + self.keyword.len()].copy_from_slice(&self.keyword);
    }

    fn read_record(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 10 {
            return Err(IndexError::corruption("truncated keyword entry"));
        }
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 10 + len {
            return Err(IndexError::corruption("truncated keyword entry"));
        }
        Ok((
            Self {
                keyword: bytes[10..10 + len].to_vec(),
                root: PageNo::new(read_u64(bytes, 2)),
            },
            10 + len,
        ))
    }

    fn remap_pointers(&mut self, map: &HashMap<u64, u64>) -> Result<()> {
        self.root = PageNo::new(remap(map, self.root.offset(), "secondary tree root")?);
        Ok(())
    }
}

/// Secondary entry: a bare member id, membership test only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecEntry {
    pub id: Vec<u8>,
}

impl BucketRecord for SecEntry {
    type Key = Vec<u8>;
    const TAG: NodeTag = NodeTag::SecBucket;

    fn key(&self) -> Vec<u8> {
        self.id.clone()
    }

    fn encoded_len(&self) -> usize {
        2 + self.id.len()
    }

    fn write_record(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&(self.id.len() as u16).to_be_bytes());
        out[2..2 + self.id.len()].copy_from_slice(&self.id);
    }

    fn read_record(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 2 {
            return Err(IndexError::corruption("truncated secondary entry"));
        }
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 2 + len {
            return Err(IndexError::corruption("truncated secondary entry"));
        }
        Ok((
            Self {
                id: bytes[2..2 + len].to_vec(),
            },
            2 + len,
        ))
    }
}

/// Numeric entry: one (offset, refoffset, dbno) triple, keyed by offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumEntry {
    pub offset: u64,
    pub refoffset: u64,
    pub dbno: u32,
}

impl BucketRecord for NumEntry {
    type Key = u64;
    const TAG: NodeTag = NodeTag::NumBucket;

    fn key(&self) -> u64 {
        self.offset
    }

    fn encoded_len(&self) -> usize {
        20
    }

    fn write_record(&self, out: &mut [u8]) {
        write_u64(out, 0, self.offset);
        write_u64(out, 8, self.refoffset);
        out[16..20].copy_from_slice(&self.dbno.to_be_bytes());
    }

    fn read_record(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 20 {
            return Err(IndexError::corruption("truncated numeric entry"));
        }
        Ok((
            Self {
                offset: read_u64(bytes, 0),
                refoffset: read_u64(bytes, 8),
                dbno: u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            },
            20,
        ))
    }
}

fn check_tag<R: BucketRecord>(hdr: &BucketHeader, pos: PageNo) -> Result<()> {
    if hdr.tag != R::TAG {
        return Err(IndexError::invalid_page(format!(
            "expected a {:?} page at {}, found {:?}",
            R::TAG,
            pos,
            hdr.tag
        )));
    }
    Ok(())
}

/// Allocate a new empty bucket
pub fn create<R: BucketRecord>(cache: &mut PageCache) -> Result<PageNo> {
    let pos = cache.allocate()?;
    let mut buf = PageBuf::new(cache.page_size());
    BucketHeader {
        tag: R::TAG,
        count: 0,
        used: 0,
        overflow: PageNo::NULL,
    }
    .write(&mut buf);
    cache.write(pos, &buf)?;
    Ok(pos)
}

/// Read every record of a bucket, following the overflow chain
pub fn read_all<R: BucketRecord>(cache: &mut PageCache, head: PageNo) -> Result<Vec<R>> {
    let mut entries = Vec::new();
    let mut pos = head;
    while pos.is_some() {
        let buf = cache.read(pos)?;
        let hdr = BucketHeader::read(&buf)?;
        check_tag::<R>(&hdr, pos)?;
        let mut cursor = BUCKET_HEADER_SIZE;
        for _ in 0..hdr.count {
            let (entry, used) = R::read_record(&buf.as_bytes()[cursor..])?;
            entries.push(entry);
            cursor += used;
        }
        pos = hdr.overflow;
    }
    Ok(entries)
}

/// Count the records of a bucket without decoding them
pub fn entry_count<R: BucketRecord>(cache: &mut PageCache, head: PageNo) -> Result<usize> {
    let mut count = 0;
    let mut pos = head;
    while pos.is_some() {
        let buf = cache.read(pos)?;
        let hdr = BucketHeader::read(&buf)?;
        check_tag::<R>(&hdr, pos)?;
        count += hdr.count as usize;
        pos = hdr.overflow;
    }
    Ok(count)
}

/// Append one record in place if the chain's last page has room.
///
/// Returns false (leaving the bucket untouched) when it does not; the
/// caller then falls back to a full rewrite.
pub fn try_append<R: BucketRecord>(
    cache: &mut PageCache,
    head: PageNo,
    entry: &R,
) -> Result<bool> {
    let mut pos = head;
    loop {
        let buf = cache.read(pos)?;
        let hdr = BucketHeader::read(&buf)?;
        check_tag::<R>(&hdr, pos)?;
        if hdr.overflow.is_some() {
            pos = hdr.overflow;
            continue;
        }

        let len = entry.encoded_len();
        let cursor = BUCKET_HEADER_SIZE + hdr.used as usize;
        if cursor + len > cache.page_size() || hdr.count == u16::MAX {
            return Ok(false);
        }

        let mut buf = buf;
        entry.write_record(&mut buf.as_bytes_mut()[cursor..cursor + len]);
        BucketHeader {
            tag: hdr.tag,
            count: hdr.count + 1,
            used: hdr.used + len as u32,
            overflow: PageNo::NULL,
        }
        .write(&mut buf);
        cache.write(pos, &buf)?;
        return Ok(true);
    }
}

/// Rewrite a bucket with the given records, growing or shrinking its
/// overflow chain as needed. The head page keeps its identity.
pub fn write_all<R: BucketRecord>(
    cache: &mut PageCache,
    head: PageNo,
    entries: &[R],
) -> Result<()> {
    let page_size = cache.page_size();

    // Pack records first-fit into page-sized chunks
    let mut chunks: Vec<Vec<&R>> = vec![Vec::new()];
    let mut used = 0usize;
    for entry in entries {
        let len = entry.encoded_len();
        if BUCKET_HEADER_SIZE + len > page_size {
            return Err(IndexError::KeyTooLarge {
                size: len,
                max: page_size - BUCKET_HEADER_SIZE,
            });
        }
        if BUCKET_HEADER_SIZE + used + len > page_size {
            chunks.push(Vec::new());
            used = 0;
        }
        chunks.last_mut().expect("chunk open").push(entry);
        used += len;
    }

    // Collect the current chain, then size it to the chunk count
    let mut pages = vec![head];
    let mut pos = head;
    loop {
        let buf = cache.read(pos)?;
        let hdr = BucketHeader::read(&buf)?;
        check_tag::<R>(&hdr, pos)?;
        if hdr.overflow.is_null() {
            break;
        }
        pos = hdr.overflow;
        pages.push(pos);
    }
    while pages.len() < chunks.len() {
        pages.push(cache.allocate()?);
    }
    for surplus in pages.split_off(chunks.len()) {
        cache.retire(surplus)?;
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let mut buf = PageBuf::new(page_size);
        let mut cursor = BUCKET_HEADER_SIZE;
        for entry in chunk {
            let len = entry.encoded_len();
            entry.write_record(&mut buf.as_bytes_mut()[cursor..cursor + len]);
            cursor += len;
        }
        BucketHeader {
            tag: R::TAG,
            count: chunk.len() as u16,
            used: (cursor - BUCKET_HEADER_SIZE) as u32,
            overflow: if i + 1 < pages.len() {
                pages[i + 1]
            } else {
                PageNo::NULL
            },
        }
        .write(&mut buf);
        cache.write(pages[i], &buf)?;
    }

    Ok(())
}

/// Retire a bucket and its whole overflow chain
pub fn free(cache: &mut PageCache, head: PageNo) -> Result<()> {
    let mut pos = head;
    while pos.is_some() {
        let buf = cache.read(pos)?;
        let hdr = BucketHeader::read(&buf)?;
        cache.retire(pos)?;
        pos = hdr.overflow;
    }
    Ok(())
}

/// Remap the index-page pointers of every record on a single bucket
/// page, in place. Record sizes are unchanged by remapping, so the page
/// layout is preserved. Used by the compactor.
pub fn remap_page_records<R: BucketRecord>(
    buf: &mut PageBuf,
    map: &HashMap<u64, u64>,
) -> Result<()> {
    let hdr = BucketHeader::read(buf)?;
    if hdr.tag != R::TAG {
        return Err(IndexError::invalid_page(format!(
            "expected a {:?} page, found {:?}",
            R::TAG,
            hdr.tag
        )));
    }
    let mut cursor = BUCKET_HEADER_SIZE;
    for _ in 0..hdr.count {
        let (mut entry, used) = R::read_record(&buf.as_bytes()[cursor..])?;
        entry.remap_pointers(map)?;
        entry.write_record(&mut buf.as_bytes_mut()[cursor..cursor + used]);
        cursor += used;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_entry_roundtrip() {
        let entry = IdEntry {
            id: b"P12345".to_vec(),
            dbno: 3,
            dups: 0,
            offset: 123456789,
            refoffset: 42,
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.write_record(&mut buf);
        let (read, used) = IdEntry::read_record(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(read, entry);
    }

    #[test]
    fn test_keyword_entry_roundtrip() {
        let entry = KeywordEntry {
            keyword: b"kinase".to_vec(),
            root: PageNo::new(8192),
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.write_record(&mut buf);
        let (read, used) = KeywordEntry::read_record(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(read, entry);
    }

    #[test]
    fn test_sec_and_num_roundtrip() {
        let sec = SecEntry {
            id: b"Q99999".to_vec(),
        };
        let mut buf = vec![0u8; sec.encoded_len()];
        sec.write_record(&mut buf);
        assert_eq!(SecEntry::read_record(&buf).unwrap().0, sec);

        let num = NumEntry {
            offset: 777,
            refoffset: 888,
            dbno: 2,
        };
        let mut buf = vec![0u8; num.encoded_len()];
        num.write_record(&mut buf);
        assert_eq!(NumEntry::read_record(&buf).unwrap().0, num);
    }

    #[test]
    fn test_truncated_record_rejected() {
        assert!(IdEntry::read_record(&[0u8; 10]).is_err());
        let entry = SecEntry {
            id: b"ABCDEF".to_vec(),
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.write_record(&mut buf);
        assert!(SecEntry::read_record(&buf[..4]).is_err());
    }

    #[test]
    fn test_remap_only_tree_pointers() {
        let mut map = HashMap::new();
        map.insert(8192u64, 100u64);

        // Plain id entries keep their data-file offsets
        let mut plain = IdEntry {
            id: b"A".to_vec(),
            dbno: 1,
            dups: 0,
            offset: 8192,
            refoffset: 0,
        };
        plain.remap_pointers(&map).unwrap();
        assert_eq!(plain.offset, 8192);

        // Duplicated ids point at a numeric tree root, which moves
        let mut dup = IdEntry {
            dups: 2,
            ..plain.clone()
        };
        dup.remap_pointers(&map).unwrap();
        assert_eq!(dup.offset, 100);

        let mut kw = KeywordEntry {
            keyword: b"kinase".to_vec(),
            root: PageNo::new(8192),
        };
        kw.remap_pointers(&map).unwrap();
        assert_eq!(kw.root, PageNo::new(100));

        // Unmapped pointer is corruption
        let mut bad = KeywordEntry {
            keyword: b"x".to_vec(),
            root: PageNo::new(555),
        };
        assert!(bad.remap_pointers(&map).is_err());
    }
}
