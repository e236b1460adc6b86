use std::io;

use crate::error::{FsError, Result};

use super::device::Device;

/// A device backed by a plain byte vector. Used by the test suite and for
/// throwaway images.
pub struct MemoryDevice {
    bytes: Vec<u8>,
}

impl MemoryDevice {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<usize> {
        let offset = usize::try_from(offset)
            .map_err(|_| FsError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)))?;
        if offset + len > self.bytes.len() {
            return Err(FsError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)));
        }
        Ok(offset)
    }
}

impl Device for MemoryDevice {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = self.check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let offset = self.check_range(offset, buf.len())?;
        self.bytes[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}
