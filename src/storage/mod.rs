//! Storage layer: page-granular file I/O and the parameter sidecar.
//!
//! This module owns the raw index file (fixed-size pages appended at the
//! end, read and written by byte offset) and the line-oriented text
//! sidecar that is the authoritative source of tree shape when an index
//! is reopened.

mod page_file;
mod params;

pub use page_file::PageFile;
pub use params::{sidecar_path, IndexParams};
