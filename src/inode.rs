//! Inode handles, the tiered block-addressing scheme, and the byte-stream
//! read/write/resize logic that walks it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{info, warn};

use crate::block::Block;
use crate::disk_format::inode::{
    RawInode, DOUBLE_INDIRECT_SLOT, NUM_DIRECT, SINGLE_INDIRECT_SLOT,
};
use crate::disk_format::NULL_INDEX;
use crate::error::Result;
use crate::fs::{unix_timestamp, Filesystem};
use crate::storage::Device;

/// An inode bound to its table slot.
#[derive(Clone, Debug)]
pub struct Inode {
    /// Index into the inode table.
    pub index: u32,
    /// The persisted record.
    pub raw: RawInode,
}

/// Shared handle to an in-memory inode instance.
pub type InodeRef = Rc<RefCell<Inode>>;

/// Registry of live inode instances, keyed by index.
///
/// Guarantees that looking up the same index twice within a process yields
/// the same instance, so in-process mutations are serialized through one
/// object instead of silently diverging. Entries lapse once every handle is
/// dropped and are transparently reloaded from the medium.
pub(crate) struct InodeCache {
    entries: HashMap<u32, Weak<RefCell<Inode>>>,
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, index: u32) -> Option<InodeRef> {
        match self.entries.get(&index).and_then(Weak::upgrade) {
            Some(inode) => Some(inode),
            None => {
                self.entries.remove(&index);
                None
            }
        }
    }

    pub fn insert(&mut self, inode: Inode) -> InodeRef {
        let index = inode.index;
        let handle = Rc::new(RefCell::new(inode));
        self.entries.insert(index, Rc::downgrade(&handle));
        handle
    }

    pub fn remove(&mut self, index: u32) {
        self.entries.remove(&index);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Addressing-tier arithmetic for one block size.
#[derive(Clone, Copy)]
struct Tiers {
    block_size: u32,
    index_per_block: u32,
    /// First byte position beyond the direct tier.
    bound_lv0: u32,
    /// First byte position beyond the single-indirect tier.
    bound_lv1: u32,
}

impl Tiers {
    fn new(block_size: u32) -> Self {
        let index_per_block = block_size / 4;
        let bound_lv0 = NUM_DIRECT as u32 * block_size;
        Self {
            block_size,
            index_per_block,
            bound_lv0,
            bound_lv1: bound_lv0 + index_per_block * block_size,
        }
    }
}

impl<D: Device> Filesystem<D> {
    fn tiers(&self) -> Tiers {
        Tiers::new(self.block_size())
    }

    /// Total blocks, data plus intermediate index blocks, required to address
    /// the byte at `pos`. The single source of truth for both the write path
    /// and the shrink path, so the two bookkeeping sides cannot diverge.
    fn blocks_required(&self, pos: u32) -> u32 {
        let t = self.tiers();
        if pos < t.bound_lv0 {
            pos / t.block_size + 1
        } else if pos < t.bound_lv1 {
            let slot = (pos - t.bound_lv0) / t.block_size;
            // direct tier, the single-indirect index block, leaves up to slot
            NUM_DIRECT as u32 + 1 + slot + 1
        } else {
            let ordinal = (pos - t.bound_lv1) / t.block_size;
            let lv1 = ordinal / t.index_per_block;
            let lv2 = ordinal % t.index_per_block;
            // full lower tiers, the double-indirect index block, `lv1` full
            // second-level chains, then the partial chain up to `lv2`
            NUM_DIRECT as u32
                + 1
                + t.index_per_block
                + 1
                + lv1 * (t.index_per_block + 1)
                + 1
                + lv2
                + 1
        }
    }

    /// Resolve the block containing `pos`. Never allocates: any sentinel on
    /// the pointer path short-circuits to a null handle.
    pub fn block_at_position(&self, inode: &Inode, pos: u32) -> Result<Block> {
        let t = self.tiers();

        if pos < t.bound_lv0 {
            let slot = (pos / t.block_size) as usize;
            return Ok(Block::new(inode.raw.pointers[slot]));
        }

        if pos < t.bound_lv1 {
            let index_block = Block::new(inode.raw.pointers[SINGLE_INDIRECT_SLOT]);
            if index_block.is_null() {
                return Ok(index_block);
            }
            let slot = (pos - t.bound_lv0) / t.block_size;
            return Ok(Block::new(self.block_read_pointer(index_block, slot)?));
        }

        let double_block = Block::new(inode.raw.pointers[DOUBLE_INDIRECT_SLOT]);
        if double_block.is_null() {
            return Ok(double_block);
        }
        let ordinal = (pos - t.bound_lv1) / t.block_size;
        let lv1 = ordinal / t.index_per_block;
        let lv2 = ordinal % t.index_per_block;

        let lv1_block = Block::new(self.block_read_pointer(double_block, lv1)?);
        if lv1_block.is_null() {
            return Ok(lv1_block);
        }
        Ok(Block::new(self.block_read_pointer(lv1_block, lv2)?))
    }

    /// Resolve the block containing `pos`, materializing storage on the way.
    ///
    /// The reservation delta is preserved and the inode persisted before any
    /// allocation happens; newly allocated index blocks are sentinel-filled
    /// and written into their parent slot immediately, so a successful write
    /// makes later reads at the same offset deterministic.
    pub fn prepare_block_at_position(&mut self, inode: &mut Inode, pos: u32) -> Result<Block> {
        let t = self.tiers();

        let required = self.blocks_required(pos);
        if required > inode.raw.block_preserved {
            self.preserve_blocks(required - inode.raw.block_preserved)?;
            inode.raw.block_preserved = required;
            self.save_inode(inode)?;
        }

        if pos < t.bound_lv0 {
            let slot = (pos / t.block_size) as usize;
            let mut block = Block::new(inode.raw.pointers[slot]);
            if block.is_null() {
                block = self.allocate_block(0)?;
                inode.raw.pointers[slot] = block.index();
                self.save_inode(inode)?;
            }
            return Ok(block);
        }

        if pos < t.bound_lv1 {
            let mut index_block = Block::new(inode.raw.pointers[SINGLE_INDIRECT_SLOT]);
            if index_block.is_null() {
                index_block = self.allocate_block(0xff)?;
                inode.raw.pointers[SINGLE_INDIRECT_SLOT] = index_block.index();
                self.save_inode(inode)?;
            }

            let slot = (pos - t.bound_lv0) / t.block_size;
            let mut block = Block::new(self.block_read_pointer(index_block, slot)?);
            if block.is_null() {
                block = self.allocate_block(0)?;
                self.block_write_pointer(index_block, slot, block.index())?;
            }
            return Ok(block);
        }

        let mut double_block = Block::new(inode.raw.pointers[DOUBLE_INDIRECT_SLOT]);
        if double_block.is_null() {
            double_block = self.allocate_block(0xff)?;
            inode.raw.pointers[DOUBLE_INDIRECT_SLOT] = double_block.index();
            self.save_inode(inode)?;
        }

        let ordinal = (pos - t.bound_lv1) / t.block_size;
        let lv1 = ordinal / t.index_per_block;
        let lv2 = ordinal % t.index_per_block;

        let mut lv1_block = Block::new(self.block_read_pointer(double_block, lv1)?);
        if lv1_block.is_null() {
            lv1_block = self.allocate_block(0xff)?;
            self.block_write_pointer(double_block, lv1, lv1_block.index())?;
        }

        let mut block = Block::new(self.block_read_pointer(lv1_block, lv2)?);
        if block.is_null() {
            block = self.allocate_block(0)?;
            self.block_write_pointer(lv1_block, lv2, block.index())?;
        }
        Ok(block)
    }

    /// Read up to `buf.len()` bytes starting at `pos`, clamped to the current
    /// size. Sparse holes read back as zeros. Returns the byte count.
    pub fn read(&self, inode: &InodeRef, pos: u32, buf: &mut [u8]) -> Result<u32> {
        let node = inode.borrow();
        if pos >= node.raw.size || buf.is_empty() {
            return Ok(0);
        }
        let count = (buf.len() as u64).min(u64::from(node.raw.size - pos)) as u32;
        let block_size = self.block_size();

        let mut done = 0;
        while done < count {
            let position = pos + done;
            let offset = position % block_size;
            let chunk = (count - done).min(block_size - offset);
            let range = done as usize..(done + chunk) as usize;

            let block = self.block_at_position(&node, position)?;
            if block.is_null() {
                buf[range].fill(0);
            } else {
                self.block_read(block, offset, &mut buf[range])?;
            }
            done += chunk;
        }
        Ok(count)
    }

    /// The inode's entire byte payload.
    pub fn read_all(&self, inode: &InodeRef) -> Result<Vec<u8>> {
        let size = inode.borrow().raw.size as usize;
        let mut buf = vec![0u8; size];
        self.read(inode, 0, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` starting at `pos`, materializing storage block by block
    /// and extending the size if the write runs past it.
    pub fn write(&mut self, inode: &InodeRef, pos: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut node = inode.borrow_mut();
        let block_size = self.block_size();
        let count = data.len() as u32;

        let mut done = 0;
        while done < count {
            let position = pos + done;
            let offset = position % block_size;
            let chunk = (count - done).min(block_size - offset);

            let block = self.prepare_block_at_position(&mut node, position)?;
            self.block_write(block, offset, &data[done as usize..(done + chunk) as usize])?;
            done += chunk;
        }

        let end = pos + count;
        if end > node.raw.size {
            node.raw.size = end;
        }
        node.raw.modify_time = unix_timestamp();
        self.save_inode(&node)
    }

    /// Replace the inode's entire payload, releasing blocks the new payload
    /// no longer needs.
    pub fn write_all(&mut self, inode: &InodeRef, data: &[u8]) -> Result<()> {
        self.resize(inode, data.len() as u32)?;
        self.write(inode, 0, data)
    }

    /// Shrink the inode's data to `new_size` bytes; growth is implicit via
    /// writes and a larger `new_size` is a no-op.
    ///
    /// Walks the three tiers iteratively, freeing every block whose first
    /// byte lies at or beyond the boundary and any index block whose whole
    /// range does, then corrects the reservation so that the preserved count
    /// equals the minimum blocks required to address `new_size`.
    pub fn resize(&mut self, inode: &InodeRef, new_size: u32) -> Result<()> {
        let mut node = inode.borrow_mut();
        if new_size >= node.raw.size {
            return Ok(());
        }
        info!(
            "resizing inode {} from {} to {}",
            node.index, node.raw.size, new_size
        );

        let t = self.tiers();
        // Global ordinal of the last data block still addressed, if any.
        let last_kept = (new_size != 0).then(|| (new_size - 1) / t.block_size);
        let keep = |ordinal: u32| matches!(last_kept, Some(last) if ordinal <= last);
        let mut freed = 0u32;

        for slot in 0..NUM_DIRECT {
            let pointer = node.raw.pointers[slot];
            if pointer != NULL_INDEX && !keep(slot as u32) {
                self.deallocate_block(pointer)?;
                node.raw.pointers[slot] = NULL_INDEX;
                freed += 1;
            }
        }

        if node.raw.pointers[SINGLE_INDIRECT_SLOT] != NULL_INDEX {
            let index_block = Block::new(node.raw.pointers[SINGLE_INDIRECT_SLOT]);
            let entries = self.block_read_index(index_block)?;
            for (slot, &pointer) in entries.iter().enumerate() {
                let ordinal = NUM_DIRECT as u32 + slot as u32;
                if pointer != NULL_INDEX && !keep(ordinal) {
                    self.deallocate_block(pointer)?;
                    self.block_write_pointer(index_block, slot as u32, NULL_INDEX)?;
                    freed += 1;
                }
            }
            if !keep(NUM_DIRECT as u32) {
                // nothing in the single-indirect range survives
                self.deallocate_block(index_block.index())?;
                node.raw.pointers[SINGLE_INDIRECT_SLOT] = NULL_INDEX;
                freed += 1;
            }
        }

        if node.raw.pointers[DOUBLE_INDIRECT_SLOT] != NULL_INDEX {
            let double_block = Block::new(node.raw.pointers[DOUBLE_INDIRECT_SLOT]);
            let lv1_entries = self.block_read_index(double_block)?;
            for (lv1_slot, &lv1_pointer) in lv1_entries.iter().enumerate() {
                if lv1_pointer == NULL_INDEX {
                    continue;
                }
                let first_ordinal = NUM_DIRECT as u32
                    + t.index_per_block
                    + lv1_slot as u32 * t.index_per_block;

                let lv1_block = Block::new(lv1_pointer);
                let lv2_entries = self.block_read_index(lv1_block)?;
                for (lv2_slot, &pointer) in lv2_entries.iter().enumerate() {
                    if pointer != NULL_INDEX && !keep(first_ordinal + lv2_slot as u32) {
                        self.deallocate_block(pointer)?;
                        self.block_write_pointer(lv1_block, lv2_slot as u32, NULL_INDEX)?;
                        freed += 1;
                    }
                }
                if !keep(first_ordinal) {
                    self.deallocate_block(lv1_pointer)?;
                    self.block_write_pointer(double_block, lv1_slot as u32, NULL_INDEX)?;
                    freed += 1;
                }
            }
            if !keep(NUM_DIRECT as u32 + t.index_per_block) {
                self.deallocate_block(double_block.index())?;
                node.raw.pointers[DOUBLE_INDIRECT_SLOT] = NULL_INDEX;
                freed += 1;
            }
        }

        // Deallocation released the reservation of every freed block; what
        // remains to release is the slack that was committed but never
        // materialized into an allocation.
        let required = match new_size {
            0 => 0,
            n => self.blocks_required(n - 1),
        };
        let retained = node.raw.block_preserved.saturating_sub(freed);
        if retained < required {
            warn!(
                "inode {}: preserved count {} below structural requirement {}",
                node.index, retained, required
            );
        }
        self.depreserve_blocks(retained.saturating_sub(required))?;
        node.raw.block_preserved = required;

        node.raw.size = new_size;
        node.raw.modify_time = unix_timestamp();
        self.save_inode(&node)
    }
}
