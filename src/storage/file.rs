use std::fs::{File, OpenOptions};
use std::os::unix::prelude::FileExt;
use std::path::Path;

use crate::error::Result;

use super::device::Device;

/// A device backed by a regular file, accessed with positional I/O.
pub struct FileBackedDevice {
    file: File,
    size: u64,
}

impl FileBackedDevice {
    /// Open an existing image file in read-write mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    /// Create (or truncate) an image file preallocated to `size` bytes.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        Ok(Self { file, size })
    }
}

impl Device for FileBackedDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }
}
