use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::inode::INODE_SIZE;

/// Magic value marking a formatted medium. It is the last field of the
/// record, so a field added before it forces a reformat instead of silently
/// misreading old images.
pub const MAGIC: u16 = 0x1234;

/// The number of bytes occupied by the serialized superblock.
pub const SUPERBLOCK_SIZE: usize = 24;

/// Minimum inode capacity accepted by format.
pub const MIN_INODE_CAPACITY: u32 = 32;

/// Minimum block count a formatted medium must end up with.
pub const MIN_BLOCK_CAPACITY: u32 = 128;

/// Accepted block sizes, in KiB.
pub const BLOCK_SIZE_CHOICES_KB: [u16; 4] = [1, 2, 4, 8];

/// The persistent filesystem header, stored at byte 0 of the medium.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSuperblock {
    /// How many inodes the medium can hold.
    pub inode_capacity: u32,
    /// How many inodes are currently allocated.
    pub inode_allocated: u32,
    /// Block size in bytes.
    pub block_size: u16,
    /// How many data blocks the medium can hold.
    pub block_capacity: u32,
    /// How many blocks are reserved by inode addressing structures.
    pub block_preserved: u32,
    /// How many blocks are actually allocated.
    pub block_allocated: u32,
    /// Validity marker; must equal [`MAGIC`].
    pub magic: u16,
}

impl RawSuperblock {
    pub fn new(inode_capacity: u32, block_size: u16, block_capacity: u32) -> Self {
        Self {
            inode_capacity,
            inode_allocated: 0,
            block_size,
            block_capacity,
            block_preserved: 0,
            block_allocated: 0,
            magic: MAGIC,
        }
    }

    /// Whether this record describes a formatted medium.
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Number of u32 words in a bitmap region covering `capacity` items.
///
/// One spare word beyond the floor division, matching the persisted layout.
pub fn bitmap_words(capacity: u32) -> u32 {
    capacity / 32 + 1
}

/// Byte offsets of the medium's regions, derived from the superblock fields.
/// Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Start of the inode allocation bitmap.
    pub inode_bitmap: u64,
    /// Start of the inode table.
    pub inode_table: u64,
    /// Start of the block allocation bitmap.
    pub block_bitmap: u64,
    /// Start of the block data region.
    pub block_data: u64,
}

impl Layout {
    /// Regions are laid out greedily in fixed order: header, inode bitmap,
    /// inode table, block bitmap, block data.
    pub fn for_superblock(sb: &RawSuperblock) -> Self {
        let mut offset = SUPERBLOCK_SIZE as u64;

        let inode_bitmap = offset;
        offset += u64::from(bitmap_words(sb.inode_capacity)) * 4;

        let inode_table = offset;
        offset += u64::from(sb.inode_capacity) * INODE_SIZE as u64;

        let block_bitmap = offset;
        offset += u64::from(bitmap_words(sb.block_capacity)) * 4;

        Self {
            inode_bitmap,
            inode_table,
            block_bitmap,
            block_data: offset,
        }
    }

    /// Byte offset of the inode record at `index`.
    pub fn inode_position(&self, index: u32) -> u64 {
        self.inode_table + u64::from(index) * INODE_SIZE as u64
    }

    /// Byte offset of `offset` within the block at `index`.
    pub fn block_position(&self, block_size: u16, index: u32, offset: u32) -> u64 {
        self.block_data + u64::from(index) * u64::from(block_size) + u64::from(offset)
    }
}
