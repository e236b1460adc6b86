use crate::error::Result;

/// A byte-addressable storage medium of known total size.
///
/// Every filesystem structure lives at a deterministic byte offset derived
/// from the superblock fields, so the contract is nothing more than sized,
/// fixed-offset reads and writes. In-memory, plain-file, or memory-mapped
/// implementations are interchangeable without touching the engine.
pub trait Device {
    /// Total capacity in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` from the medium starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` to the medium starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Read one little-endian u32 at `offset`.
    fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_at(offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write one little-endian u32 at `offset`.
    fn write_u32(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Read `count` little-endian u32 words starting at `offset`.
    fn read_u32_array(&self, offset: u64, count: usize) -> Result<Vec<u32>> {
        let mut bytes = vec![0u8; count * 4];
        self.read_at(offset, &mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Write all of `words` as little-endian u32s starting at `offset`.
    fn write_u32_array(&mut self, offset: u64, words: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write_at(offset, &bytes)
    }
}
