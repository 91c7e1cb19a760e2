//! Buffer layer: bounded in-memory page cache.
//!
//! The cache keeps a fixed number of resident pages keyed by file
//! offset, ordered most- to least-recently used, and destages dirty
//! pages when they are evicted. Locking a page pins it against
//! eviction; this is not concurrency control but protection for pages
//! consulted across recursive tree operations (the roots above all).

mod cache;

pub use cache::{CacheStats, PageCache};
