//! # Composable virtual filesystem layers
//! This crate defines a filesystem abstraction that can be backed by multiple
//! implementations and composed via filters, so applications can swap real
//! storage for in-memory, read-only, re-rooted, name-filtered, cached, or
//! overlaid variants.
//!
//! `layerfs` has the following filesystems implemented out of the box:
//! - `MemFs`: A read-write in-memory filesystem holding a concurrent tree of
//!   file and directory nodes.
//! - `ReadOnlyFs`: A filter that rejects every mutating operation on the
//!   wrapped filesystem.
//! - `RegexFs`: A filter that hides file entries whose path fails a regular
//!   expression; directories are always visible.
//! - `BasePathFs`: A filter that re-roots a virtual `/` onto a sub-path of the
//!   wrapped filesystem.
//! - `CopyOnWriteFs`: An overlay presenting a read-only base and a writable
//!   layer as one namespace; the first write promotes a file into the layer
//!   and directory listings merge across both sides.
//! - `CacheOnReadFs`: An overlay that lazily promotes files from a slow base
//!   into a fast layer on read, with a time-to-live staleness policy.

use mockall::automock;
use std::time::SystemTime;

pub use file::{File, FileInfo, OpenOptions, MODE_DIR};

/// The result of every filesystem and handle operation.
///
/// Errors are plain [`std::io::Error`] values so handles slot straight into
/// `std::io` adaptors; the constructors in [`util`] put the operation name
/// and path into each message.
pub type Result<T> = std::io::Result<T>;

/// A filesystem with a directory tree.
///
/// Implementations are safe for concurrent use from many threads. Handles
/// returned by the open family are implementation specific; their cursor is
/// not synchronized.
#[automock]
pub trait Filesystem: Send + Sync {
    /// Creates the file at `path`, truncating it if it already exists, and
    /// opens it for reading and writing.
    fn create(&self, path: &str) -> Result<Box<dyn File>>;

    /// Creates a single directory at `path`; fails with `AlreadyExists` when
    /// any entry already occupies the path.
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;

    /// Creates the directory at `path` together with every missing ancestor.
    /// Succeeds when the path already exists as a directory.
    fn mkdir_all(&self, path: &str, mode: u32) -> Result<()>;

    /// Opens the file at `path` for reading.
    fn open(&self, path: &str) -> Result<Box<dyn File>>;

    /// Opens the file at `path` honoring `options` (create, exclusive create,
    /// truncate, append, and the access bits) with POSIX semantics; `mode` is
    /// applied to newly-created files.
    fn open_file(&self, path: &str, options: &OpenOptions, mode: u32) -> Result<Box<dyn File>>;

    /// Removes a single file or empty directory.
    fn remove(&self, path: &str) -> Result<()>;

    /// Removes the subtree rooted at `path`; removing an absent path is not
    /// an error.
    fn remove_all(&self, path: &str) -> Result<()>;

    /// Renames `old` to `new`; renaming a path onto itself is a no-op.
    fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Returns the metadata for the file or directory at `path`.
    fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Changes the permission bits of the entry at `path`.
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    /// Changes the access and modification times of the entry at `path`.
    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    /// A human-readable label for the backend, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Stats `path` without following a final symlink, when the backend can.
    ///
    /// The boolean reports whether link-aware metadata was actually produced.
    /// The default falls back to [`Filesystem::stat`] and reports `false`;
    /// backends with symlink awareness override this, and wrappers forward it
    /// to their source.
    fn lstat_if_possible(&self, path: &str) -> Result<(FileInfo, bool)> {
        self.stat(path).map(|info| (info, false))
    }
}

pub mod base_path_fs;
pub mod cache_on_read_fs;
pub mod copy_on_write_fs;
pub mod file;
pub mod fsutil;
pub mod mem_fs;
pub mod read_only_fs;
pub mod regex_fs;
pub mod util;

pub use base_path_fs::BasePathFs;
pub use cache_on_read_fs::CacheOnReadFs;
pub use copy_on_write_fs::CopyOnWriteFs;
pub use mem_fs::MemFs;
pub use read_only_fs::ReadOnlyFs;
pub use regex_fs::RegexFs;
