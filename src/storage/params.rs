//! Parameter sidecar file.
//!
//! A line-oriented text file written beside the index file. It is the
//! authoritative source of tree shape when an index is reopened; the
//! index file itself stores no shape metadata beyond the per-page
//! headers.

use crate::error::{IndexError, Result};
use crate::types::{IndexKind, TreeShape};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Tree shape and bookkeeping persisted beside the index file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// What this index maps (identifiers or keywords)
    pub kind: IndexKind,
    /// Whether the index file is currently in compacted form
    pub compressed: bool,
    /// Live page count of the index file
    pub pages: u64,
    /// Primary tree order
    pub order: u32,
    /// Primary tree bucket fill factor
    pub fill: u32,
    /// Page size in bytes
    pub page_size: u32,
    /// Primary tree depth (0 = the root is a leaf)
    pub level: u32,
    /// Resident page count of the cache
    pub cache_size: u32,
    /// Secondary tree order
    pub order2: u32,
    /// Secondary tree bucket fill factor
    pub fill2: u32,
    /// Unique keys in the index
    pub count: u64,
    /// Total entries including duplicates
    pub full_count: u64,
    /// Keyword length limit; longer keywords are truncated
    pub kw_limit: u32,
}

impl IndexParams {
    /// Shape of the primary tree
    pub fn primary_shape(&self) -> TreeShape {
        TreeShape::new(self.order as usize, self.fill as usize)
    }

    /// Shape of secondary (per-keyword / per-duplicate) trees
    pub fn secondary_shape(&self) -> TreeShape {
        TreeShape::new(self.order2 as usize, self.fill2 as usize)
    }

    /// Read the sidecar file
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Write the sidecar file
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }

    fn parse(text: &str) -> Result<Self> {
        let mut kind = None;
        let mut compressed = None;
        let mut pages = None;
        let mut order = None;
        let mut fill = None;
        let mut page_size = None;
        let mut level = None;
        let mut cache_size = None;
        let mut order2 = None;
        let mut fill2 = None;
        let mut count = None;
        let mut full_count = None;
        let mut kw_limit = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(char::is_whitespace).ok_or_else(|| {
                IndexError::invalid_params(format!("line {}: missing value", lineno + 1))
            })?;
            let value = value.trim();

            let bad = |what: &str| {
                IndexError::invalid_params(format!("line {}: bad {} '{}'", lineno + 1, what, value))
            };

            match key {
                "Type" => {
                    kind = Some(IndexKind::from_str(value).ok_or_else(|| bad("index type"))?)
                }
                "Compress" => {
                    compressed = Some(match value {
                        "Yes" => true,
                        "No" => false,
                        _ => return Err(bad("compress flag")),
                    })
                }
                "Pages" => pages = Some(value.parse().map_err(|_| bad("page count"))?),
                "Order" => order = Some(value.parse().map_err(|_| bad("order"))?),
                "Fill" => fill = Some(value.parse().map_err(|_| bad("fill"))?),
                "Pagesize" => page_size = Some(value.parse().map_err(|_| bad("page size"))?),
                "Level" => level = Some(value.parse().map_err(|_| bad("level"))?),
                "Cachesize" => cache_size = Some(value.parse().map_err(|_| bad("cache size"))?),
                "Order2" => order2 = Some(value.parse().map_err(|_| bad("order2"))?),
                "Fill2" => fill2 = Some(value.parse().map_err(|_| bad("fill2"))?),
                "Count" => count = Some(value.parse().map_err(|_| bad("count"))?),
                "Fullcount" => full_count = Some(value.parse().map_err(|_| bad("full count"))?),
                "Kwlimit" => kw_limit = Some(value.parse().map_err(|_| bad("keyword limit"))?),
                _ => {
                    return Err(IndexError::invalid_params(format!(
                        "line {}: unknown field '{}'",
                        lineno + 1,
                        key
                    )))
                }
            }
        }

        let missing = |what: &str| IndexError::invalid_params(format!("missing field {}", what));
        Ok(Self {
            kind: kind.ok_or_else(|| missing("Type"))?,
            compressed: compressed.ok_or_else(|| missing("Compress"))?,
            pages: pages.ok_or_else(|| missing("Pages"))?,
            order: order.ok_or_else(|| missing("Order"))?,
            fill: fill.ok_or_else(|| missing("Fill"))?,
            page_size: page_size.ok_or_else(|| missing("Pagesize"))?,
            level: level.ok_or_else(|| missing("Level"))?,
            cache_size: cache_size.ok_or_else(|| missing("Cachesize"))?,
            order2: order2.ok_or_else(|| missing("Order2"))?,
            fill2: fill2.ok_or_else(|| missing("Fill2"))?,
            count: count.ok_or_else(|| missing("Count"))?,
            full_count: full_count.ok_or_else(|| missing("Fullcount"))?,
            kw_limit: kw_limit.ok_or_else(|| missing("Kwlimit"))?,
        })
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Type      {}", self.kind.as_str());
        let _ = writeln!(
            out,
            "Compress  {}",
            if self.compressed { "Yes" } else { "No" }
        );
        let _ = writeln!(out, "Pages     {}", self.pages);
        let _ = writeln!(out, "Order     {}", self.order);
        let _ = writeln!(out, "Fill      {}", self.fill);
        let _ = writeln!(out, "Pagesize  {}", self.page_size);
        let _ = writeln!(out, "Level     {}", self.level);
        let _ = writeln!(out, "Cachesize {}", self.cache_size);
        let _ = writeln!(out, "Order2    {}", self.order2);
        let _ = writeln!(out, "Fill2     {}", self.fill2);
        let _ = writeln!(out, "Count     {}", self.count);
        let _ = writeln!(out, "Fullcount {}", self.full_count);
        let _ = writeln!(out, "Kwlimit   {}", self.kw_limit);
        out
    }
}

/// Path of the sidecar file for a given index file
pub fn sidecar_path(index_path: &Path) -> PathBuf {
    index_path.with_extension("param")
}
