//! Constants and record layouts that define the on-disk format.
//!
//! Every structure is persisted through explicit `encode`/`decode` routines
//! (bincode with fixed-width little-endian integers), so the byte layout is a
//! property of the field order written here, not of the Rust struct layout.

/// The superblock record and the derived region layout.
pub mod superblock;

/// The inode record and its block-pointer table.
pub mod inode;

/// Reserved index value meaning "no inode/block allocated here".
pub const NULL_INDEX: u32 = u32::MAX;
