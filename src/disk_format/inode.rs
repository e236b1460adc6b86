use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::NULL_INDEX;

/// The number of bytes occupied by a serialized inode record.
pub const INODE_SIZE: usize = 100;

/// Direct data-block pointer slots.
pub const NUM_DIRECT: usize = 12;

/// Total pointer slots: direct plus the two indirect index slots.
pub const NUM_POINTERS: usize = 14;

/// Pointer slot holding the single-indirect index block.
pub const SINGLE_INDIRECT_SLOT: usize = 12;

/// Pointer slot holding the double-indirect index block.
pub const DOUBLE_INDIRECT_SLOT: usize = 13;

/// Flags bit 0: this inode describes a directory.
pub const FLAG_DIRECTORY: u32 = 1;

/// Per-file metadata plus the block-pointer table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInode {
    /// File size in bytes.
    pub size: u32,
    /// Last access timestamp, unix seconds.
    pub access_time: u64,
    /// Last modification timestamp, unix seconds.
    pub modify_time: u64,
    /// Creation timestamp, unix seconds.
    pub creation_time: u64,
    /// Number of directory entries referring to this inode.
    pub link_count: u32,
    /// Attribute bits; see [`FLAG_DIRECTORY`].
    pub flags: u32,
    /// Owner id.
    pub owner: u32,
    /// Slots 0-11 are direct data-block pointers, slot 12 the single-indirect
    /// index block, slot 13 the double-indirect index block. [`NULL_INDEX`]
    /// means unallocated.
    pub pointers: [u32; NUM_POINTERS],
    /// Blocks this inode's addressing structure is committed to needing,
    /// including index blocks, reserved ahead of actual allocation.
    pub block_preserved: u32,
}

impl RawInode {
    /// A fresh inode: zero size, all pointers unallocated.
    pub fn new(flags: u32, owner: u32, creation_time: u64) -> Self {
        Self {
            size: 0,
            access_time: 0,
            modify_time: 0,
            creation_time,
            link_count: 0,
            flags,
            owner,
            pointers: [NULL_INDEX; NUM_POINTERS],
            block_preserved: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
