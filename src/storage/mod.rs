//! The storage-medium abstraction and its implementations.

/// The device trait.
mod device;
/// File-backed device.
mod file;
/// In-memory device.
mod memory;

pub use device::*;
pub use file::*;
pub use memory::*;
