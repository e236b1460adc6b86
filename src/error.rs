use thiserror::Error;

/// Errors surfaced by the filesystem engine.
///
/// Everything here is synchronous and final: there are no transient failures
/// in this model, so nothing is retried internally.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not start with `/`.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Name is empty, contains `/`, is `.`/`..`, or ends in `.`.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// A path component or directory entry is missing.
    #[error("not found: {0:?}")]
    NotFound(String),

    /// Name collision on create or rename.
    #[error("already exists: {0:?}")]
    AlreadyExists(String),

    /// No free bit left in the inode or block bitmap.
    #[error("no free {0} available")]
    CapacityExhausted(&'static str),

    /// Reservation counter would exceed block capacity or drop below zero.
    #[error("block reservation out of range")]
    ReservationExhausted,

    /// The superblock magic value is not present.
    #[error("medium is not formatted")]
    UnformattedMedium,

    /// Rejected format parameters (block size, inode count, device size).
    #[error("invalid format parameters: {0}")]
    InvalidFormatParameters(&'static str),

    /// A persisted record failed to encode or decode.
    #[error("record serialization failed: {0}")]
    Codec(#[from] bincode::Error),

    /// Storage medium failure, propagated unmodified.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
