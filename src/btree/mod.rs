//! B+ tree layer.
//!
//! One generic engine serves every tree variant: the primary identifier
//! and keyword trees, the per-keyword secondary id trees and the
//! per-duplicate numeric trees. A variant is the combination of a
//! bucket record type (which fixes the key type and bucket tag) and a
//! tree shape.

pub mod calc;
mod cursor;
mod delete;
mod secondary;
mod tree;

pub use cursor::Cursor;
pub use secondary::{DupTrees, KeywordTrees};
pub use tree::Tree;
