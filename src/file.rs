//! File handles: open-mode dispatch plus cursor-based reads and writes.

use crate::directory::DirectoryTable;
use crate::error::{FsError, Result};
use crate::fs::{Filesystem, DEFAULT_OWNER};
use crate::inode::InodeRef;
use crate::path;
use crate::storage::Device;

/// How [`File::open`] treats existing and missing targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file; fail if it already exists.
    CreateNew,
    /// Create the file, truncating it if it already exists.
    Create,
    /// Open an existing file; fail if it is missing.
    Open,
    /// Open the file, creating it if it is missing.
    OpenOrCreate,
    /// Open an existing file and discard its contents; fail if it is missing.
    Truncate,
    /// Open the file, creating it if it is missing, with the cursor at the
    /// end.
    Append,
}

/// An open file: a shared inode handle plus a byte cursor.
pub struct File {
    inode: InodeRef,
    position: u32,
}

impl File {
    /// Resolve `path` and open it according to `mode`.
    ///
    /// The parent directory must exist in every mode; a path denoting a
    /// directory is rejected outright.
    pub fn open<D: Device>(fs: &mut Filesystem<D>, path: &str, mode: OpenMode) -> Result<Self> {
        path::validate_path(path)?;
        let name = path::file_name(path)?.to_owned();
        path::validate_name(&name)?;
        let parent_path = path::parent_directory(path)?.to_owned();

        let Some(mut parent) = DirectoryTable::resolve(fs, &parent_path)? else {
            return Err(FsError::NotFound(parent_path));
        };

        let inode = match parent.find(&name) {
            Some(index) => {
                let inode = fs.inode(index)?;
                if inode.borrow().raw.is_directory() {
                    return Err(FsError::InvalidPath(path.to_owned()));
                }
                match mode {
                    OpenMode::CreateNew => {
                        return Err(FsError::AlreadyExists(path.to_owned()));
                    }
                    OpenMode::Create | OpenMode::Truncate => fs.resize(&inode, 0)?,
                    OpenMode::Open | OpenMode::OpenOrCreate | OpenMode::Append => {}
                }
                inode
            }
            None => match mode {
                OpenMode::Open | OpenMode::Truncate => {
                    return Err(FsError::NotFound(path.to_owned()));
                }
                _ => {
                    let inode = fs.allocate_inode(0, DEFAULT_OWNER)?;
                    parent.add_file(fs, &name, &inode)?;
                    inode
                }
            },
        };

        let position = match mode {
            OpenMode::Append => inode.borrow().raw.size,
            _ => 0,
        };
        Ok(Self { inode, position })
    }

    /// Current size in bytes.
    pub fn size(&self) -> u32 {
        self.inode.borrow().raw.size
    }

    /// Current cursor position.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Move the cursor. Positions past the end are allowed; a write there
    /// produces a sparse hole.
    pub fn seek(&mut self, position: u32) {
        self.position = position;
    }

    /// Read up to `buf.len()` bytes at the cursor, advancing it by the byte
    /// count actually read.
    pub fn read<D: Device>(&mut self, fs: &Filesystem<D>, buf: &mut [u8]) -> Result<u32> {
        let count = fs.read(&self.inode, self.position, buf)?;
        self.position += count;
        Ok(count)
    }

    /// Everything from the cursor to the end of the file.
    pub fn read_to_end<D: Device>(&mut self, fs: &Filesystem<D>) -> Result<Vec<u8>> {
        let remaining = self.size().saturating_sub(self.position);
        let mut buf = vec![0u8; remaining as usize];
        self.read(fs, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at the cursor, advancing it past the written bytes.
    pub fn write<D: Device>(&mut self, fs: &mut Filesystem<D>, data: &[u8]) -> Result<()> {
        fs.write(&self.inode, self.position, data)?;
        self.position += data.len() as u32;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Directory;
    use crate::fs::tests::fresh_fs;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_create_new() {
        let mut fs = fresh_fs();

        let file = File::open(&mut fs, "/a.txt", OpenMode::CreateNew).unwrap();
        assert_eq!(file.size(), 0);
        assert_eq!(file.position(), 0);

        assert!(matches!(
            File::open(&mut fs, "/a.txt", OpenMode::CreateNew),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_truncates_existing() {
        let mut fs = fresh_fs();
        let mut file = File::open(&mut fs, "/a.txt", OpenMode::Create).unwrap();
        file.write(&mut fs, &pattern(3000)).unwrap();

        let file = File::open(&mut fs, "/a.txt", OpenMode::Create).unwrap();
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn test_open_requires_existing() {
        let mut fs = fresh_fs();
        assert!(matches!(
            File::open(&mut fs, "/missing", OpenMode::Open),
            Err(FsError::NotFound(_))
        ));

        let mut file = File::open(&mut fs, "/a", OpenMode::OpenOrCreate).unwrap();
        file.write(&mut fs, b"data").unwrap();

        let mut file = File::open(&mut fs, "/a", OpenMode::Open).unwrap();
        assert_eq!(file.read_to_end(&fs).unwrap(), b"data");
    }

    #[test]
    fn test_open_or_create_both_ways() {
        let mut fs = fresh_fs();
        let mut file = File::open(&mut fs, "/a", OpenMode::OpenOrCreate).unwrap();
        file.write(&mut fs, b"xy").unwrap();

        let file = File::open(&mut fs, "/a", OpenMode::OpenOrCreate).unwrap();
        assert_eq!(file.size(), 2);
        assert_eq!(file.position(), 0);
    }

    #[test]
    fn test_truncate_mode() {
        let mut fs = fresh_fs();
        assert!(matches!(
            File::open(&mut fs, "/a", OpenMode::Truncate),
            Err(FsError::NotFound(_))
        ));

        let mut file = File::open(&mut fs, "/a", OpenMode::Create).unwrap();
        file.write(&mut fs, &pattern(5000)).unwrap();
        let allocated = fs.superblock().block_allocated;

        let file = File::open(&mut fs, "/a", OpenMode::Truncate).unwrap();
        assert_eq!(file.size(), 0);
        assert_eq!(fs.superblock().block_allocated, allocated - 5);
    }

    #[test]
    fn test_append_mode() {
        let mut fs = fresh_fs();
        let mut file = File::open(&mut fs, "/log", OpenMode::Append).unwrap();
        assert_eq!(file.position(), 0);
        file.write(&mut fs, b"one").unwrap();

        let mut file = File::open(&mut fs, "/log", OpenMode::Append).unwrap();
        assert_eq!(file.position(), 3);
        file.write(&mut fs, b"two").unwrap();

        let mut file = File::open(&mut fs, "/log", OpenMode::Open).unwrap();
        assert_eq!(file.read_to_end(&fs).unwrap(), b"onetwo");
    }

    #[test]
    fn test_cursor_advances() {
        let mut fs = fresh_fs();
        let mut file = File::open(&mut fs, "/a", OpenMode::Create).unwrap();
        file.write(&mut fs, b"abcdef").unwrap();
        assert_eq!(file.position(), 6);

        file.seek(2);
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&fs, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"cd");
        assert_eq!(file.position(), 4);

        // Seeking past the end and writing leaves a hole.
        file.seek(10);
        file.write(&mut fs, b"z").unwrap();
        assert_eq!(file.size(), 11);
        file.seek(6);
        assert_eq!(file.read_to_end(&fs).unwrap(), [0, 0, 0, 0, b'z']);
    }

    #[test]
    fn test_directory_path_is_rejected() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "sub").unwrap();

        assert!(matches!(
            File::open(&mut fs, "/sub", OpenMode::Open),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(
            File::open(&mut fs, "/sub", OpenMode::Create),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let mut fs = fresh_fs();
        assert!(matches!(
            File::open(&mut fs, "/no/dir/a", OpenMode::Create),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_nested_roundtrip_across_reopen() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "docs").unwrap();

        let data = pattern(5000);
        let mut file = File::open(&mut fs, "/docs/a.bin", OpenMode::CreateNew).unwrap();
        file.write(&mut fs, &data).unwrap();
        drop(file);

        let mut fs = Filesystem::new(fs.into_device()).unwrap();
        let mut file = File::open(&mut fs, "/docs/a.bin", OpenMode::Open).unwrap();
        assert_eq!(file.read_to_end(&fs).unwrap(), data);
    }
}
