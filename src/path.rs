//! Path and entry-name validity rules shared by the file and directory APIs.

use crate::error::{FsError, Result};

/// A path is valid when it is non-empty and absolute.
pub fn is_path_valid(path: &str) -> bool {
    path.starts_with('/')
}

/// An entry name is valid when it is non-empty, contains no `/`, is not one of
/// the reserved `.`/`..` entries, and does not end in `.`.
pub fn is_name_valid(name: &str) -> bool {
    if name.is_empty() || name.contains('/') {
        return false;
    }
    if name == "." || name == ".." {
        return false;
    }
    !name.ends_with('.')
}

pub fn validate_path(path: &str) -> Result<()> {
    if is_path_valid(path) {
        Ok(())
    } else {
        Err(FsError::InvalidPath(path.to_string()))
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if is_name_valid(name) {
        Ok(())
    } else {
        Err(FsError::InvalidName(name.to_string()))
    }
}

/// The final component of a path: everything after the last `/`.
pub fn file_name(path: &str) -> Result<&str> {
    validate_path(path)?;
    match path.rfind('/') {
        Some(pos) => Ok(&path[pos + 1..]),
        None => Err(FsError::InvalidPath(path.to_string())),
    }
}

/// The containing directory of a path: everything through the last `/`.
pub fn parent_directory(path: &str) -> Result<&str> {
    validate_path(path)?;
    match path.rfind('/') {
        Some(pos) => Ok(&path[..pos + 1]),
        None => Err(FsError::InvalidPath(path.to_string())),
    }
}
