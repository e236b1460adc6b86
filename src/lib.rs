mod block;
mod directory;
pub mod disk_format;
mod error;
mod file;
mod fs;
mod inode;
pub mod path;
pub mod storage;

pub use block::Block;
pub use directory::{Directory, DirectoryTable, EntryMetadata};
pub use error::{FsError, Result};
pub use file::{File, OpenMode};
pub use fs::{Filesystem, DEFAULT_OWNER, ROOT_INODE};
pub use inode::{Inode, InodeRef};
