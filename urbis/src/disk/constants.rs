//! Compile-time defaults for the disk layer.
//!
//! The page size and pages-per-track values are also persisted in the file
//! header; readers honour the header fields, not these constants, so files
//! written with other settings stay loadable.

/// Default page slot size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Default number of pages per disk track.
pub const PAGES_PER_TRACK: usize = 16;

/// Hard upper bound on spatial objects per page.
pub const MAX_OBJECTS_PER_PAGE: usize = 64;

/// Default number of pages retained by the LRU cache.
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// Default maximum number of object centroids per KD block.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Magic number for file format identification ("URBI").
pub const MAGIC: u32 = 0x5552_4249;

/// File format version.
pub const VERSION: u32 = 1;

/// The on-disk header occupies one 4 KiB-aligned slot regardless of the
/// configured page size.
pub const HEADER_SLOT_SIZE: usize = 4096;
