//! Filesystem backends.

mod disk;
mod memory;
mod memory_file;

pub use disk::{DiskFile, DiskFileSystem};
pub use memory::{MemoryDir, MemoryFileSystem};
pub use memory_file::MemoryFile;

// Both backends must stay usable as `dyn FileSystem`.
const _: fn() = || {
    fn assert_backend<T: crate::FileSystem + 'static>() {}
    assert_backend::<DiskFileSystem>();
    assert_backend::<MemoryFileSystem>();
};
