//! Directory tables and the path-level directory API.
//!
//! A directory's entire byte payload is one bincode-serialized name-to-inode
//! map. Every table carries a `.` entry for itself and, once linked into the
//! tree, a `..` entry for its parent; an inode's link count is the number of
//! table entries anywhere that refer to it, dot entries included.

use std::collections::HashMap;

use log::warn;

use crate::error::{FsError, Result};
use crate::fs::{Filesystem, DEFAULT_OWNER, ROOT_INODE};
use crate::inode::InodeRef;
use crate::path;
use crate::storage::Device;

/// The in-memory form of one directory's entry table, bound to its inode.
pub struct DirectoryTable {
    inode: InodeRef,
    entries: HashMap<String, u32>,
}

impl DirectoryTable {
    /// Allocate a fresh directory inode carrying only its `.` entry.
    ///
    /// The table is not reachable from the tree until a parent links it in
    /// with [`Self::add_directory`] (or [`Self::add_parent`] for the root).
    pub fn create<D: Device>(fs: &mut Filesystem<D>) -> Result<Self> {
        let inode = fs.allocate_directory_inode(DEFAULT_OWNER)?;
        let index = inode.borrow().index;

        let mut table = Self {
            inode,
            entries: HashMap::new(),
        };
        table.entries.insert(".".to_owned(), index);
        table.inode.borrow_mut().raw.link_count += 1;
        table.save(fs)?;
        Ok(table)
    }

    /// Deserialize the table stored at `index`.
    pub fn load<D: Device>(fs: &mut Filesystem<D>, index: u32) -> Result<Self> {
        let inode = fs.inode(index)?;
        if !inode.borrow().raw.is_directory() {
            return Err(FsError::NotFound(format!("directory inode {index}")));
        }

        let bytes = fs.read_all(&inode)?;
        let entries = bincode::deserialize(&bytes)?;
        Ok(Self { inode, entries })
    }

    /// Walk `path` from the root, component by component. `None` when a
    /// component is missing or is not a directory.
    pub fn resolve<D: Device>(fs: &mut Filesystem<D>, path: &str) -> Result<Option<Self>> {
        path::validate_path(path)?;

        let mut table = Self::load(fs, ROOT_INODE)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let Some(index) = table.find(component) else {
                return Ok(None);
            };
            let inode = fs.inode(index)?;
            if !inode.borrow().raw.is_directory() {
                return Ok(None);
            }
            table = Self::load(fs, index)?;
        }
        Ok(Some(table))
    }

    /// Index of the inode holding this table.
    pub fn inode_index(&self) -> u32 {
        self.inode.borrow().index
    }

    /// Number of entries, dot entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Inode index mapped to `name`, if present.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.entries.get(name).copied()
    }

    /// Entry names in sorted order, dot entries included.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Install the `..` entry pointing at `parent`.
    pub(crate) fn add_parent<D: Device>(&mut self, fs: &mut Filesystem<D>, parent: u32) -> Result<()> {
        self.entries.insert("..".to_owned(), parent);

        let parent_inode = fs.inode(parent)?;
        parent_inode.borrow_mut().raw.link_count += 1;
        fs.save_inode(&parent_inode.borrow())?;

        self.save(fs)
    }

    /// Link an existing inode under `name`. `false` when the name is taken.
    pub fn add_file<D: Device>(
        &mut self,
        fs: &mut Filesystem<D>,
        name: &str,
        inode: &InodeRef,
    ) -> Result<bool> {
        if self.entries.contains_key(name) {
            return Ok(false);
        }

        self.entries.insert(name.to_owned(), inode.borrow().index);
        inode.borrow_mut().raw.link_count += 1;
        fs.save_inode(&inode.borrow())?;

        self.save(fs)?;
        Ok(true)
    }

    /// Link a freshly created directory table under `name`. `false` when the
    /// name is taken or the child is already linked somewhere.
    pub fn add_directory<D: Device>(
        &mut self,
        fs: &mut Filesystem<D>,
        name: &str,
        child: &mut DirectoryTable,
    ) -> Result<bool> {
        if self.entries.contains_key(name) {
            return Ok(false);
        }
        if child.entries.contains_key("..") {
            warn!("directory {} is already linked into the tree", child.inode_index());
            return Ok(false);
        }

        self.entries.insert(name.to_owned(), child.inode_index());
        child.inode.borrow_mut().raw.link_count += 1;
        fs.save_inode(&child.inode.borrow())?;

        child.add_parent(fs, self.inode_index())?;
        self.save(fs)?;
        Ok(true)
    }

    /// Remap an entry to a new name. `false` when `old` is missing, `new` is
    /// taken, or either side is a dot entry.
    pub fn rename<D: Device>(
        &mut self,
        fs: &mut Filesystem<D>,
        old: &str,
        new: &str,
    ) -> Result<bool> {
        // dot entries are structural; renaming one would detach the table
        // from itself or its parent
        if old == "." || old == ".." || new == "." || new == ".." {
            return Ok(false);
        }
        if self.entries.contains_key(new) {
            return Ok(false);
        }
        let Some(index) = self.entries.remove(old) else {
            return Ok(false);
        };

        self.entries.insert(new.to_owned(), index);
        self.save(fs)?;
        Ok(true)
    }

    /// Unlink `name`, releasing its whole subtree when the last reference
    /// goes. `false` when the entry is missing or is a dot entry.
    pub fn delete<D: Device>(&mut self, fs: &mut Filesystem<D>, name: &str) -> Result<bool> {
        // deleting `.` or `..` would dismantle a directory that is still
        // linked from its parent
        if name == "." || name == ".." {
            return Ok(false);
        }
        let Some(target) = self.entries.remove(name) else {
            return Ok(false);
        };
        self.save(fs)?;

        release_tree(fs, target, self.inode_index())?;
        Ok(true)
    }

    /// Serialize the table as the inode's entire payload.
    pub(crate) fn save<D: Device>(&mut self, fs: &mut Filesystem<D>) -> Result<()> {
        let bytes = bincode::serialize(&self.entries)?;
        fs.write_all(&self.inode, &bytes)
    }
}

/// Tear down the subtree rooted at `index`, whose referencing entry was just
/// removed from `parent`'s table.
///
/// Iterative post-order walk: directories are expanded once, revisited after
/// their children are gone, then stripped of their remaining references (the
/// removed parent entry plus their own `.`, with their `..` released against
/// the parent). Any inode whose link count reaches zero is truncated and
/// returned to the free pool.
fn release_tree<D: Device>(fs: &mut Filesystem<D>, index: u32, parent: u32) -> Result<()> {
    let mut stack = vec![(index, parent, false)];

    while let Some((index, parent, expanded)) = stack.pop() {
        let inode = fs.inode(index)?;
        let is_directory = inode.borrow().raw.is_directory();
        drop(inode);

        if is_directory && !expanded {
            stack.push((index, parent, true));
            let table = DirectoryTable::load(fs, index)?;
            for (name, &child) in &table.entries {
                if name != "." && name != ".." {
                    stack.push((child, index, false));
                }
            }
            continue;
        }

        if is_directory {
            drop_links(fs, index, 2)?;
            drop_links(fs, parent, 1)?;
        } else {
            drop_links(fs, index, 1)?;
        }
    }
    Ok(())
}

/// Remove `count` references from an inode, releasing it at zero.
fn drop_links<D: Device>(fs: &mut Filesystem<D>, index: u32, count: u32) -> Result<()> {
    let inode = fs.inode(index)?;

    let remaining = {
        let mut node = inode.borrow_mut();
        node.raw.link_count = node.raw.link_count.saturating_sub(count);
        node.raw.link_count
    };

    if remaining == 0 {
        fs.resize(&inode, 0)?;
        fs.deallocate_inode(index)
    } else {
        fs.save_inode(&inode.borrow())
    }
}

/// Metadata snapshot of one directory entry.
#[derive(Clone, Debug)]
pub struct EntryMetadata {
    pub name: String,
    pub path: String,
    pub inode_index: u32,
    pub size: u32,
    pub access_time: u64,
    pub modify_time: u64,
    pub creation_time: u64,
    pub flags: u32,
    pub owner: u32,
    pub is_directory: bool,
}

/// A directory resolved from an absolute path.
pub struct Directory {
    path: String,
    table: DirectoryTable,
}

impl Directory {
    /// Resolve `path` to an existing directory. A missing trailing `/` is
    /// tolerated.
    pub fn open<D: Device>(fs: &mut Filesystem<D>, path: &str) -> Result<Self> {
        path::validate_path(path)?;
        let mut normalized = path.to_owned();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }

        match DirectoryTable::resolve(fs, &normalized)? {
            Some(table) => Ok(Self {
                path: normalized,
                table,
            }),
            None => Err(FsError::NotFound(path.to_owned())),
        }
    }

    /// The normalized absolute path, with trailing `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains(name)
    }

    /// Metadata for every entry except `.` and `..`, sorted by name.
    pub fn list<D: Device>(&self, fs: &mut Filesystem<D>) -> Result<Vec<EntryMetadata>> {
        let mut out = Vec::new();
        for name in self.table.names() {
            if name == "." || name == ".." {
                continue;
            }
            // names() only returns keys present in the table
            let Some(index) = self.table.find(&name) else {
                continue;
            };

            let inode = fs.inode(index)?;
            let node = inode.borrow();
            out.push(EntryMetadata {
                path: format!("{}{}", self.path, name),
                name,
                inode_index: index,
                size: node.raw.size,
                access_time: node.raw.access_time,
                modify_time: node.raw.modify_time,
                creation_time: node.raw.creation_time,
                flags: node.raw.flags,
                owner: node.raw.owner,
                is_directory: node.raw.is_directory(),
            });
        }
        Ok(out)
    }

    /// Create an empty subdirectory named `name`.
    pub fn create_directory<D: Device>(&mut self, fs: &mut Filesystem<D>, name: &str) -> Result<()> {
        path::validate_name(name)?;
        if self.table.contains(name) {
            return Err(FsError::AlreadyExists(format!("{}{name}", self.path)));
        }

        let mut child = DirectoryTable::create(fs)?;
        self.table.add_directory(fs, name, &mut child)?;
        Ok(())
    }

    /// Rename the entry `old` to `new`.
    pub fn rename<D: Device>(
        &mut self,
        fs: &mut Filesystem<D>,
        old: &str,
        new: &str,
    ) -> Result<()> {
        path::validate_name(old)?;
        path::validate_name(new)?;
        if !self.table.contains(old) {
            return Err(FsError::NotFound(format!("{}{old}", self.path)));
        }
        if self.table.contains(new) {
            return Err(FsError::AlreadyExists(format!("{}{new}", self.path)));
        }

        self.table.rename(fs, old, new)?;
        Ok(())
    }

    /// Delete the entry `name` and, for directories, everything below it.
    pub fn delete<D: Device>(&mut self, fs: &mut Filesystem<D>, name: &str) -> Result<()> {
        path::validate_name(name)?;
        if !self.table.delete(fs, name)? {
            return Err(FsError::NotFound(format!("{}{name}", self.path)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::fresh_fs;

    #[test]
    fn test_root_has_dot_entries() {
        let mut fs = fresh_fs();
        let table = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();

        assert_eq!(table.find("."), Some(ROOT_INODE));
        assert_eq!(table.find(".."), Some(ROOT_INODE));
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());

        let root = fs.inode(ROOT_INODE).unwrap();
        assert_eq!(root.borrow().raw.link_count, 2);
    }

    #[test]
    fn test_add_file_and_reload() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();

        let file = fs.allocate_inode(0, 0).unwrap();
        assert!(root.add_file(&mut fs, "notes.txt", &file).unwrap());
        assert!(!root.add_file(&mut fs, "notes.txt", &file).unwrap());
        assert_eq!(file.borrow().raw.link_count, 1);

        let reloaded = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();
        assert_eq!(reloaded.find("notes.txt"), Some(file.borrow().index));
    }

    #[test]
    fn test_add_directory_links_both_sides() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();

        let mut child = DirectoryTable::create(&mut fs).unwrap();
        assert!(root.add_directory(&mut fs, "sub", &mut child).unwrap());

        assert_eq!(child.find("."), Some(child.inode_index()));
        assert_eq!(child.find(".."), Some(ROOT_INODE));

        let child_inode = fs.inode(child.inode_index()).unwrap();
        assert_eq!(child_inode.borrow().raw.link_count, 2);
        let root_inode = fs.inode(ROOT_INODE).unwrap();
        assert_eq!(root_inode.borrow().raw.link_count, 3);
    }

    #[test]
    fn test_linked_directory_cannot_be_relinked() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();

        let mut child = DirectoryTable::create(&mut fs).unwrap();
        assert!(root.add_directory(&mut fs, "a", &mut child).unwrap());
        assert!(!root.add_directory(&mut fs, "b", &mut child).unwrap());
        assert!(!root.contains("b"));
    }

    #[test]
    fn test_rename_rules() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();
        let file = fs.allocate_inode(0, 0).unwrap();
        root.add_file(&mut fs, "a", &file).unwrap();
        let other = fs.allocate_inode(0, 0).unwrap();
        root.add_file(&mut fs, "b", &other).unwrap();

        assert!(!root.rename(&mut fs, "missing", "c").unwrap());
        assert!(!root.rename(&mut fs, "a", "b").unwrap());
        assert!(root.rename(&mut fs, "a", "c").unwrap());
        assert!(!root.contains("a"));
        assert_eq!(root.find("c"), Some(file.borrow().index));
    }

    #[test]
    fn test_rename_keeps_dot_entries() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();

        assert!(!root.rename(&mut fs, "..", "escape").unwrap());
        assert!(!root.rename(&mut fs, ".", "this").unwrap());
        assert_eq!(root.find("."), Some(ROOT_INODE));
        assert_eq!(root.find(".."), Some(ROOT_INODE));

        let file = fs.allocate_inode(0, 0).unwrap();
        root.add_file(&mut fs, "a", &file).unwrap();
        assert!(!root.rename(&mut fs, "a", "..").unwrap());
        assert!(root.contains("a"));
    }

    #[test]
    fn test_delete_keeps_dot_entries() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "sub").unwrap();
        let inodes = fs.superblock().inode_allocated;

        let mut sub = DirectoryTable::resolve(&mut fs, "/sub/").unwrap().unwrap();
        assert!(!sub.delete(&mut fs, ".").unwrap());
        assert!(!sub.delete(&mut fs, "..").unwrap());

        assert_eq!(sub.find("."), Some(sub.inode_index()));
        assert_eq!(sub.find(".."), Some(ROOT_INODE));
        assert_eq!(fs.superblock().inode_allocated, inodes);

        // the parent entry still resolves
        assert!(Directory::open(&mut fs, "/sub").is_ok());
    }

    #[test]
    fn test_delete_file_frees_inode() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();
        let allocated = fs.superblock().inode_allocated;

        let file = fs.allocate_inode(0, 0).unwrap();
        root.add_file(&mut fs, "f", &file).unwrap();
        drop(file);

        assert!(root.delete(&mut fs, "f").unwrap());
        assert!(!root.contains("f"));
        assert_eq!(fs.superblock().inode_allocated, allocated);
        assert!(!root.delete(&mut fs, "f").unwrap());
    }

    #[test]
    fn test_recursive_delete_restores_counters() {
        let mut fs = fresh_fs();
        let inodes_before = fs.superblock().inode_allocated;
        let blocks_before = fs.superblock().block_allocated;
        let preserved_before = fs.superblock().block_preserved;

        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "d").unwrap();
        let mut d = Directory::open(&mut fs, "/d").unwrap();
        d.create_directory(&mut fs, "e").unwrap();

        let mut e = DirectoryTable::resolve(&mut fs, "/d/e/").unwrap().unwrap();
        let file = fs.allocate_inode(0, 0).unwrap();
        fs.write_all(&file, &[7u8; 3000]).unwrap();
        e.add_file(&mut fs, "payload", &file).unwrap();
        drop(file);

        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.delete(&mut fs, "d").unwrap();

        assert_eq!(fs.superblock().inode_allocated, inodes_before);
        assert_eq!(fs.superblock().block_allocated, blocks_before);
        assert_eq!(fs.superblock().block_preserved, preserved_before);

        let root_inode = fs.inode(ROOT_INODE).unwrap();
        assert_eq!(root_inode.borrow().raw.link_count, 2);
    }

    #[test]
    fn test_resolve_paths() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "sub").unwrap();

        assert!(Directory::open(&mut fs, "/sub").is_ok());
        assert!(Directory::open(&mut fs, "/sub/").is_ok());
        assert!(matches!(
            Directory::open(&mut fs, "/missing"),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            Directory::open(&mut fs, "relative"),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_resolve_through_file_is_none() {
        let mut fs = fresh_fs();
        let mut root = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();
        let file = fs.allocate_inode(0, 0).unwrap();
        root.add_file(&mut fs, "f", &file).unwrap();

        assert!(DirectoryTable::resolve(&mut fs, "/f/x/").unwrap().is_none());
    }

    #[test]
    fn test_directory_persists_across_reopen() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "kept").unwrap();

        let mut fs = Filesystem::new(fs.into_device()).unwrap();
        let root = Directory::open(&mut fs, "/").unwrap();
        assert!(root.contains("kept"));
        assert!(Directory::open(&mut fs, "/kept").is_ok());
    }

    #[test]
    fn test_list_metadata() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();
        root.create_directory(&mut fs, "sub").unwrap();

        let mut table = DirectoryTable::load(&mut fs, ROOT_INODE).unwrap();
        let file = fs.allocate_inode(0, 9).unwrap();
        fs.write_all(&file, b"hello world").unwrap();
        table.add_file(&mut fs, "a.txt", &file).unwrap();

        let root = Directory::open(&mut fs, "/").unwrap();
        let entries = root.list(&mut fs).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].path, "/a.txt");
        assert_eq!(entries[0].size, 11);
        assert_eq!(entries[0].owner, 9);
        assert!(!entries[0].is_directory);

        assert_eq!(entries[1].name, "sub");
        assert_eq!(entries[1].path, "/sub");
        assert!(entries[1].is_directory);
    }

    #[test]
    fn test_create_directory_name_rules() {
        let mut fs = fresh_fs();
        let mut root = Directory::open(&mut fs, "/").unwrap();

        assert!(matches!(
            root.create_directory(&mut fs, "bad/name"),
            Err(FsError::InvalidName(_))
        ));
        root.create_directory(&mut fs, "ok").unwrap();
        assert!(matches!(
            root.create_directory(&mut fs, "ok"),
            Err(FsError::AlreadyExists(_))
        ));
    }
}
