use crate::disk_format::NULL_INDEX;
use crate::error::Result;
use crate::fs::Filesystem;
use crate::storage::Device;

/// A handle to one fixed-size storage unit in the data region.
///
/// Nothing but the index is carried; accessors address the medium relative to
/// the block's own offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    index: u32,
}

impl Block {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether this handle carries the "unallocated" sentinel.
    pub fn is_null(&self) -> bool {
        self.index == NULL_INDEX
    }
}

impl<D: Device> Filesystem<D> {
    fn block_position(&self, block: Block, offset: u32) -> u64 {
        self.layout
            .block_position(self.superblock.block_size, block.index(), offset)
    }

    /// Read bytes starting at `offset` within `block`.
    pub fn block_read(&self, block: Block, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.device.read_at(self.block_position(block, offset), buf)
    }

    /// Write bytes starting at `offset` within `block`.
    pub fn block_write(&mut self, block: Block, offset: u32, buf: &[u8]) -> Result<()> {
        self.device
            .write_at(self.block_position(block, offset), buf)
    }

    /// Read the u32 pointer stored in `slot` of an index block.
    pub fn block_read_pointer(&self, block: Block, slot: u32) -> Result<u32> {
        self.device.read_u32(self.block_position(block, slot * 4))
    }

    /// Write the u32 pointer stored in `slot` of an index block.
    pub fn block_write_pointer(&mut self, block: Block, slot: u32, value: u32) -> Result<()> {
        self.device
            .write_u32(self.block_position(block, slot * 4), value)
    }

    /// Read an index block's full pointer table.
    pub fn block_read_index(&self, block: Block) -> Result<Vec<u32>> {
        let entries = (self.block_size() / 4) as usize;
        self.device
            .read_u32_array(self.block_position(block, 0), entries)
    }

    /// Fill every byte of `block` with `fill`.
    pub fn block_fill(&mut self, block: Block, fill: u8) -> Result<()> {
        let bytes = vec![fill; self.block_size() as usize];
        self.block_write(block, 0, &bytes)
    }
}
