use std::time::{SystemTime, UNIX_EPOCH};

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use log::{info, warn};

use crate::block::Block;
use crate::directory::DirectoryTable;
use crate::disk_format::inode::{RawInode, FLAG_DIRECTORY, INODE_SIZE};
use crate::disk_format::superblock::{
    bitmap_words, Layout, RawSuperblock, BLOCK_SIZE_CHOICES_KB, MIN_BLOCK_CAPACITY,
    MIN_INODE_CAPACITY, SUPERBLOCK_SIZE,
};
use crate::disk_format::NULL_INDEX;
use crate::error::{FsError, Result};
use crate::inode::{Inode, InodeCache, InodeRef};
use crate::storage::Device;

/// Inode index of the root directory.
pub const ROOT_INODE: u32 = 0;

/// Owner id assigned to entries created through the built-in APIs.
pub const DEFAULT_OWNER: u32 = 0;

/// Allocation bitmap word storage: one bit per item, least-significant first.
pub(crate) type Bitmap = BitVec<u32, Lsb0>;

/// The filesystem engine: superblock, allocation bitmaps, inode table I/O,
/// and the process-wide inode instance cache, all over one [`Device`].
pub struct Filesystem<D: Device> {
    pub(crate) device: D,
    pub(crate) superblock: RawSuperblock,
    pub(crate) layout: Layout,
    inode_bitmap: Bitmap,
    block_bitmap: Bitmap,
    pub(crate) cache: InodeCache,
}

impl<D: Device> Filesystem<D> {
    /// Bind the engine to a medium. An unformatted medium is accepted;
    /// everything but [`Self::format`] will then fail with
    /// [`FsError::UnformattedMedium`].
    pub fn new(device: D) -> Result<Self> {
        let mut header = vec![0u8; SUPERBLOCK_SIZE];
        device.read_at(0, &mut header)?;
        let superblock = RawSuperblock::decode(&header)?;
        let layout = Layout::for_superblock(&superblock);

        let mut fs = Self {
            device,
            superblock,
            layout,
            inode_bitmap: BitVec::new(),
            block_bitmap: BitVec::new(),
            cache: InodeCache::new(),
        };

        if fs.superblock.is_valid() {
            fs.load_bitmaps()?;
            info!(
                "loaded image: {} inodes ({} allocated), {} blocks of {} bytes ({} allocated, {} preserved)",
                fs.superblock.inode_capacity,
                fs.superblock.inode_allocated,
                fs.superblock.block_capacity,
                fs.superblock.block_size,
                fs.superblock.block_allocated,
                fs.superblock.block_preserved,
            );
        }

        Ok(fs)
    }

    /// Whether the medium carries a valid superblock.
    pub fn is_formatted(&self) -> bool {
        self.superblock.is_valid()
    }

    /// The persistent superblock fields, for statistics display.
    pub fn superblock(&self) -> &RawSuperblock {
        &self.superblock
    }

    /// The derived region offsets.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Block size in bytes.
    pub(crate) fn block_size(&self) -> u32 {
        u32::from(self.superblock.block_size)
    }

    /// Release the underlying device.
    pub fn into_device(self) -> D {
        self.device
    }

    pub(crate) fn ensure_formatted(&self) -> Result<()> {
        if self.is_formatted() {
            Ok(())
        } else {
            Err(FsError::UnformattedMedium)
        }
    }

    /// Lay out a fresh filesystem on the medium.
    ///
    /// Regions are computed greedily in fixed order; the space taken by the
    /// block bitmap itself is subtracted (rounded up) from the candidate
    /// block count before the capacity is persisted. The root directory is
    /// created as inode 0 with `.` and `..` both pointing at itself.
    pub fn format(&mut self, inode_capacity: u32, block_size_kb: u16) -> Result<()> {
        if inode_capacity < MIN_INODE_CAPACITY {
            return Err(FsError::InvalidFormatParameters(
                "inode capacity must be at least 32",
            ));
        }
        if !BLOCK_SIZE_CHOICES_KB.contains(&block_size_kb) {
            return Err(FsError::InvalidFormatParameters(
                "block size must be 1, 2, 4 or 8 KiB",
            ));
        }

        let block_size = u64::from(block_size_kb) << 10;
        let device_size = self.device.size();

        // Header through inode table must fit before any block exists.
        let fixed_regions = SUPERBLOCK_SIZE as u64
            + u64::from(bitmap_words(inode_capacity)) * 4
            + u64::from(inode_capacity) * INODE_SIZE as u64;
        if fixed_regions > device_size {
            return Err(FsError::InvalidFormatParameters(
                "inode regions exceed device size",
            ));
        }

        // All remaining space as blocks, before accounting for their bitmap.
        let remaining = device_size - fixed_regions;
        let candidate = (remaining / block_size).min(u64::from(u32::MAX - 1)) as u32;
        if candidate < MIN_BLOCK_CAPACITY {
            return Err(FsError::InvalidFormatParameters(
                "device too small: fewer than 128 blocks",
            ));
        }

        let bitmap_bytes = u64::from(bitmap_words(candidate)) * 4;
        let block_capacity = candidate - bitmap_bytes.div_ceil(block_size) as u32;

        self.superblock = RawSuperblock::new(inode_capacity, block_size as u16, block_capacity);
        self.layout = Layout::for_superblock(&self.superblock);
        self.save_superblock()?;

        self.inode_bitmap = BitVec::repeat(false, bitmap_words(inode_capacity) as usize * 32);
        self.block_bitmap = BitVec::repeat(false, bitmap_words(block_capacity) as usize * 32);
        self.device
            .write_u32_array(self.layout.inode_bitmap, self.inode_bitmap.as_raw_slice())?;
        self.device
            .write_u32_array(self.layout.block_bitmap, self.block_bitmap.as_raw_slice())?;

        self.cache.clear();

        let mut root = DirectoryTable::create(self)?;
        debug_assert_eq!(root.inode_index(), ROOT_INODE);
        // The root is its own parent.
        root.add_parent(self, ROOT_INODE)?;

        info!(
            "formatted: {} inodes, {} blocks of {} bytes, data region at {}",
            inode_capacity, block_capacity, block_size, self.layout.block_data,
        );
        Ok(())
    }

    fn load_bitmaps(&mut self) -> Result<()> {
        let inode_words = bitmap_words(self.superblock.inode_capacity) as usize;
        let block_words = bitmap_words(self.superblock.block_capacity) as usize;

        let words = self
            .device
            .read_u32_array(self.layout.inode_bitmap, inode_words)?;
        self.inode_bitmap = BitVec::from_vec(words);

        let words = self
            .device
            .read_u32_array(self.layout.block_bitmap, block_words)?;
        self.block_bitmap = BitVec::from_vec(words);

        Ok(())
    }

    pub(crate) fn save_superblock(&mut self) -> Result<()> {
        let encoded = self.superblock.encode()?;
        self.device.write_at(0, &encoded)
    }

    /// First zero bit, scanning word-by-word then bit-by-bit from the least
    /// significant end. A hit in the spare tail beyond `capacity` counts as
    /// exhaustion.
    fn first_free(bitmap: &Bitmap, capacity: u32) -> Option<u32> {
        for (word_index, &word) in bitmap.as_raw_slice().iter().enumerate() {
            if word == u32::MAX {
                continue;
            }
            for bit in 0..32 {
                if word & (1 << bit) == 0 {
                    let index = word_index as u32 * 32 + bit;
                    return (index < capacity).then_some(index);
                }
            }
        }
        None
    }

    fn set_inode_bit(&mut self, index: u32, allocated: bool) -> Result<()> {
        self.inode_bitmap.set(index as usize, allocated);
        let word_index = (index / 32) as usize;
        let word = self.inode_bitmap.as_raw_slice()[word_index];
        self.device
            .write_u32(self.layout.inode_bitmap + word_index as u64 * 4, word)
    }

    fn set_block_bit(&mut self, index: u32, allocated: bool) -> Result<()> {
        self.block_bitmap.set(index as usize, allocated);
        let word_index = (index / 32) as usize;
        let word = self.block_bitmap.as_raw_slice()[word_index];
        self.device
            .write_u32(self.layout.block_bitmap + word_index as u64 * 4, word)
    }

    /// Allocate and initialize a fresh inode.
    pub fn allocate_inode(&mut self, flags: u32, owner: u32) -> Result<InodeRef> {
        self.ensure_formatted()?;

        let index = Self::first_free(&self.inode_bitmap, self.superblock.inode_capacity)
            .ok_or(FsError::CapacityExhausted("inode"))?;

        let inode = Inode {
            index,
            raw: RawInode::new(flags, owner, unix_timestamp()),
        };
        self.save_inode(&inode)?;

        self.set_inode_bit(index, true)?;
        self.superblock.inode_allocated += 1;
        self.save_superblock()?;

        Ok(self.cache.insert(inode))
    }

    /// Allocate a fresh directory inode.
    pub fn allocate_directory_inode(&mut self, owner: u32) -> Result<InodeRef> {
        self.allocate_inode(FLAG_DIRECTORY, owner)
    }

    /// Allocate a block and fill every byte with `fill`.
    pub fn allocate_block(&mut self, fill: u8) -> Result<Block> {
        self.ensure_formatted()?;

        let index = Self::first_free(&self.block_bitmap, self.superblock.block_capacity)
            .ok_or(FsError::CapacityExhausted("block"))?;

        let block = Block::new(index);
        self.block_fill(block, fill)?;

        self.set_block_bit(index, true)?;
        self.superblock.block_allocated += 1;
        self.save_superblock()?;

        Ok(block)
    }

    /// Return an inode to the free pool.
    ///
    /// Sentinel, out-of-range, or already-free indices are a caller bug but
    /// must not corrupt state further: they are logged and ignored.
    pub fn deallocate_inode(&mut self, index: u32) -> Result<()> {
        if index == NULL_INDEX || index >= self.superblock.inode_capacity {
            warn!("deallocating inode {index} out of bounds");
            return Ok(());
        }
        if !self.inode_bitmap[index as usize] {
            warn!("deallocating inode {index} which is not allocated");
            return Ok(());
        }

        self.cache.remove(index);
        self.set_inode_bit(index, false)?;
        self.superblock.inode_allocated -= 1;
        self.save_superblock()
    }

    /// Return a block to the free pool. Releases its reservation as well;
    /// bad indices are logged and ignored like [`Self::deallocate_inode`].
    pub fn deallocate_block(&mut self, index: u32) -> Result<()> {
        if index == NULL_INDEX {
            warn!("deallocating null block");
            return Ok(());
        }
        if index >= self.superblock.block_capacity {
            warn!("deallocating block {index} out of bounds");
            return Ok(());
        }
        if !self.block_bitmap[index as usize] {
            warn!("deallocating block {index} which is not allocated");
            return Ok(());
        }

        self.set_block_bit(index, false)?;
        self.superblock.block_allocated -= 1;
        self.superblock.block_preserved -= 1;
        self.save_superblock()
    }

    /// Commit `count` more blocks to future allocation.
    pub fn preserve_blocks(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.superblock.block_preserved + count > self.superblock.block_capacity {
            return Err(FsError::ReservationExhausted);
        }
        self.superblock.block_preserved += count;
        self.save_superblock()
    }

    /// Release `count` committed-but-unallocated blocks.
    pub fn depreserve_blocks(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.superblock.block_preserved < count {
            return Err(FsError::ReservationExhausted);
        }
        self.superblock.block_preserved -= count;
        self.save_superblock()
    }

    /// Look up an inode, returning the process-wide shared instance.
    ///
    /// A cache miss reloads the record from the medium and refreshes its
    /// access timestamp; repeated lookups while a handle is live return the
    /// same instance, so in-process mutations never diverge.
    pub fn inode(&mut self, index: u32) -> Result<InodeRef> {
        self.ensure_formatted()?;
        if index >= self.superblock.inode_capacity {
            return Err(FsError::NotFound(format!("inode {index}")));
        }

        if let Some(inode) = self.cache.get(index) {
            return Ok(inode);
        }

        let mut record = vec![0u8; INODE_SIZE];
        self.device
            .read_at(self.layout.inode_position(index), &mut record)?;
        let mut inode = Inode {
            index,
            raw: RawInode::decode(&record)?,
        };

        inode.raw.access_time = unix_timestamp();
        self.save_inode(&inode)?;

        Ok(self.cache.insert(inode))
    }

    /// Persist an inode record at its table slot.
    pub fn save_inode(&mut self, inode: &Inode) -> Result<()> {
        let encoded = inode.raw.encode()?;
        self.device
            .write_at(self.layout.inode_position(inode.index), &encoded)
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
