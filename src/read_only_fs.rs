use crate::file::{FileInfo, OpenOptions};
use crate::util::permission_denied;
use crate::{File, Filesystem};
use std::time::SystemTime;

/// A filter that rejects every mutating operation on its source.
///
/// Reads delegate unchanged, so the wrapped filesystem stays fully visible.
pub struct ReadOnlyFs<F> {
    source: F,
}

impl<F: Filesystem> ReadOnlyFs<F> {
    /// Wraps `source` in a read-only gate.
    pub fn new(source: F) -> Self {
        Self { source }
    }
}

impl<F: Filesystem> Filesystem for ReadOnlyFs<F> {
    fn create(&self, path: &str) -> crate::Result<Box<dyn File>> {
        Err(permission_denied("create", path))
    }

    fn mkdir(&self, path: &str, _mode: u32) -> crate::Result<()> {
        Err(permission_denied("mkdir", path))
    }

    fn mkdir_all(&self, path: &str, _mode: u32) -> crate::Result<()> {
        Err(permission_denied("mkdir", path))
    }

    fn open(&self, path: &str) -> crate::Result<Box<dyn File>> {
        self.source.open(path)
    }

    fn open_file(
        &self,
        path: &str,
        options: &OpenOptions,
        mode: u32,
    ) -> crate::Result<Box<dyn File>> {
        if options.write_intent() {
            return Err(permission_denied("open", path));
        }
        self.source.open_file(path, options, mode)
    }

    fn remove(&self, path: &str) -> crate::Result<()> {
        Err(permission_denied("remove", path))
    }

    fn remove_all(&self, path: &str) -> crate::Result<()> {
        Err(permission_denied("remove_all", path))
    }

    fn rename(&self, old: &str, _new: &str) -> crate::Result<()> {
        Err(permission_denied("rename", old))
    }

    fn stat(&self, path: &str) -> crate::Result<FileInfo> {
        self.source.stat(path)
    }

    fn chmod(&self, path: &str, _mode: u32) -> crate::Result<()> {
        Err(permission_denied("chmod", path))
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, _mtime: SystemTime) -> crate::Result<()> {
        Err(permission_denied("chtimes", path))
    }

    fn name(&self) -> &'static str {
        "ReadOnlyFs"
    }

    fn lstat_if_possible(&self, path: &str) -> crate::Result<(FileInfo, bool)> {
        self.source.lstat_if_possible(path)
    }
}
