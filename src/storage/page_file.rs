//! Page file implementation.
//!
//! The page file reads and writes fixed-size pages by byte offset and
//! grows by appending zeroed pages. A compacted index file is not
//! page-aligned; reads near the end of such a file are zero-padded so
//! the same read path serves both layouts.

use crate::error::{IndexError, Result};
use crate::page::PageBuf;
use crate::types::PageNo;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Page-granular view of the index file
pub struct PageFile {
    file: RwLock<File>,
    /// Current file length in bytes
    len: RwLock<u64>,
    page_size: usize,
    writable: bool,
}

impl PageFile {
    /// Create a fresh index file, truncating any existing one
    pub fn create(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: RwLock::new(file),
            len: RwLock::new(0),
            page_size,
            writable: true,
        })
    }

    /// Open an existing index file
    pub fn open(path: &Path, page_size: usize, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: RwLock::new(file),
            len: RwLock::new(len),
            page_size,
            writable,
        })
    }

    /// Page size this file was opened with
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        *self.len.read()
    }

    /// Number of whole pages in the file (meaningful for aligned files)
    pub fn page_count(&self) -> u64 {
        self.len() / self.page_size as u64
    }

    /// Read the page at the given offset, zero-padding past end of file
    pub fn read_page(&self, pos: PageNo) -> Result<PageBuf> {
        let len = self.len();
        if pos.is_null() || pos.offset() >= len {
            return Err(IndexError::PageNotFound(pos));
        }

        let available = (len - pos.offset()).min(self.page_size as u64) as usize;
        let mut buf = PageBuf::new(self.page_size);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(pos.offset()))?;
        file.read_exact(&mut buf.as_bytes_mut()[..available])?;

        Ok(buf)
    }

    /// Write the page at the given offset
    pub fn write_page(&self, pos: PageNo, buf: &PageBuf) -> Result<()> {
        if !self.writable {
            return Err(IndexError::invalid_operation(
                "index file is open read-only",
            ));
        }
        if pos.is_null() || pos.offset() >= self.len() {
            return Err(IndexError::PageNotFound(pos));
        }
        if buf.page_size() != self.page_size {
            return Err(IndexError::invalid_operation(format!(
                "page buffer is {} bytes, file uses {}",
                buf.page_size(),
                self.page_size
            )));
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(pos.offset()))?;
        file.write_all(buf.as_bytes())?;

        Ok(())
    }

    /// Append a zeroed page at the end of the file and return its offset
    pub fn allocate(&self) -> Result<PageNo> {
        if !self.writable {
            return Err(IndexError::invalid_operation(
                "index file is open read-only",
            ));
        }

        let mut len = self.len.write();
        let pos = PageNo::new(*len);
        let zeros = vec![0u8; self.page_size];

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(*len))?;
        file.write_all(&zeros)?;
        *len += self.page_size as u64;

        Ok(pos)
    }

    /// Flush file contents and metadata to disk
    pub fn sync(&self) -> Result<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PAGE_SIZE;
    use tempfile::tempdir;

    #[test]
    fn test_allocate_and_rw() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        let pf = PageFile::create(&path, DEFAULT_PAGE_SIZE)?;
        assert_eq!(pf.page_count(), 0);

        let p0 = pf.allocate()?;
        let p1 = pf.allocate()?;
        assert_eq!(p0, PageNo::new(0));
        assert_eq!(p1, PageNo::new(DEFAULT_PAGE_SIZE as u64));
        assert_eq!(pf.page_count(), 2);

        let mut buf = PageBuf::new(DEFAULT_PAGE_SIZE);
        buf.as_bytes_mut()[0..5].copy_from_slice(b"hello");
        pf.write_page(p1, &buf)?;

        let read = pf.read_page(p1)?;
        assert_eq!(&read.as_bytes()[0..5], b"hello");

        Ok(())
    }

    #[test]
    fn test_read_out_of_bounds() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        let pf = PageFile::create(&path, DEFAULT_PAGE_SIZE)?;
        pf.allocate()?;

        assert!(pf.read_page(PageNo::new(DEFAULT_PAGE_SIZE as u64)).is_err());
        assert!(pf.read_page(PageNo::NULL).is_err());

        Ok(())
    }

    #[test]
    fn test_read_only_rejects_writes() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        {
            let pf = PageFile::create(&path, DEFAULT_PAGE_SIZE)?;
            pf.allocate()?;
            pf.sync()?;
        }

        let pf = PageFile::open(&path, DEFAULT_PAGE_SIZE, false)?;
        assert!(pf.read_page(PageNo::new(0)).is_ok());
        assert!(pf.allocate().is_err());
        let buf = PageBuf::new(DEFAULT_PAGE_SIZE);
        assert!(pf.write_page(PageNo::new(0), &buf).is_err());

        Ok(())
    }

    #[test]
    fn test_short_tail_is_zero_padded() -> Result<()> {
        // A compacted file need not be page-aligned
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cmp");
        std::fs::write(&path, b"\x10rest-of-record").unwrap();

        let pf = PageFile::open(&path, DEFAULT_PAGE_SIZE, false)?;
        let buf = pf.read_page(PageNo::new(0))?;
        assert_eq!(buf.as_bytes()[0], 0x10);
        assert_eq!(buf.as_bytes()[DEFAULT_PAGE_SIZE - 1], 0);

        Ok(())
    }
}
