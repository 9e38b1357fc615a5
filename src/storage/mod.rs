//! Pluggable storage backends.
//!
//! The index core treats storage as an opaque, byte-addressable file store:
//! named files that are created once, read many times, renamed atomically to
//! publish commits, and eventually deleted. [`FileStorage`] backs an index
//! with a filesystem directory; [`MemoryStorage`] keeps everything in memory
//! for tests and ephemeral indexes.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use structured::{StructReader, StructWriter};
pub use traits::{Storage, StorageConfig, StorageError, StorageInput, StorageOutput};
