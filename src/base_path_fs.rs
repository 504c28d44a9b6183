use crate::file::{FileInfo, OpenOptions};
use crate::util::{normalize_path, path_error, SEPARATOR};
use crate::{File, Filesystem};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

/// A filter that binds a virtual root to a sub-path of its source.
///
/// Every incoming path is normalized and interpreted relative to the bound
/// root; normalization resolves `..` lexically, so a path can never climb out
/// of the bound sub-tree. Errors surfacing from the source are rewritten so
/// they name the virtual path, not the real one.
pub struct BasePathFs<F> {
    source: F,
    base: String,
}

impl<F: Filesystem> BasePathFs<F> {
    /// Re-roots the virtual `/` onto `base` inside `source`.
    pub fn new(source: F, base: &str) -> Self {
        Self {
            source,
            base: normalize_path(base),
        }
    }

    /// Maps a virtual path onto the source path.
    fn full_path(&self, path: &str) -> String {
        let clean = normalize_path(path);
        if clean == SEPARATOR {
            self.base.clone()
        } else if self.base == SEPARATOR {
            clean
        } else {
            format!("{}{}", self.base, clean)
        }
    }

    /// Rewrites a source error so the visible path is the virtual one.
    fn rewrite(&self, err: io::Error, op: &str, path: &str) -> io::Error {
        path_error(err.kind(), op, &normalize_path(path))
    }
}

impl<F: Filesystem> Filesystem for BasePathFs<F> {
    fn create(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let file = self
            .source
            .create(&self.full_path(path))
            .map_err(|err| self.rewrite(err, "create", path))?;
        Ok(Box::new(BasePathFile::new(file, normalize_path(path))))
    }

    fn mkdir(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.source
            .mkdir(&self.full_path(path), mode)
            .map_err(|err| self.rewrite(err, "mkdir", path))
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.source
            .mkdir_all(&self.full_path(path), mode)
            .map_err(|err| self.rewrite(err, "mkdir", path))
    }

    fn open(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let file = self
            .source
            .open(&self.full_path(path))
            .map_err(|err| self.rewrite(err, "open", path))?;
        Ok(Box::new(BasePathFile::new(file, normalize_path(path))))
    }

    fn open_file(
        &self,
        path: &str,
        options: &OpenOptions,
        mode: u32,
    ) -> crate::Result<Box<dyn File>> {
        let file = self
            .source
            .open_file(&self.full_path(path), options, mode)
            .map_err(|err| self.rewrite(err, "open", path))?;
        Ok(Box::new(BasePathFile::new(file, normalize_path(path))))
    }

    fn remove(&self, path: &str) -> crate::Result<()> {
        self.source
            .remove(&self.full_path(path))
            .map_err(|err| self.rewrite(err, "remove", path))
    }

    fn remove_all(&self, path: &str) -> crate::Result<()> {
        self.source
            .remove_all(&self.full_path(path))
            .map_err(|err| self.rewrite(err, "remove_all", path))
    }

    fn rename(&self, old: &str, new: &str) -> crate::Result<()> {
        self.source
            .rename(&self.full_path(old), &self.full_path(new))
            .map_err(|err| self.rewrite(err, "rename", old))
    }

    fn stat(&self, path: &str) -> crate::Result<FileInfo> {
        self.source
            .stat(&self.full_path(path))
            .map_err(|err| self.rewrite(err, "stat", path))
    }

    fn chmod(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.source
            .chmod(&self.full_path(path), mode)
            .map_err(|err| self.rewrite(err, "chmod", path))
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> crate::Result<()> {
        self.source
            .chtimes(&self.full_path(path), atime, mtime)
            .map_err(|err| self.rewrite(err, "chtimes", path))
    }

    fn name(&self) -> &'static str {
        "BasePathFs"
    }

    fn lstat_if_possible(&self, path: &str) -> crate::Result<(FileInfo, bool)> {
        self.source
            .lstat_if_possible(&self.full_path(path))
            .map_err(|err| self.rewrite(err, "lstat", path))
    }
}

/// A handle reporting the virtual path instead of the source path.
struct BasePathFile {
    inner: Box<dyn File>,
    name: String,
}

impl BasePathFile {
    fn new(inner: Box<dyn File>, name: String) -> Self {
        Self { inner, name }
    }
}

impl Read for BasePathFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for BasePathFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for BasePathFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl File for BasePathFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> crate::Result<FileInfo> {
        self.inner.stat()
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        self.inner.read_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> crate::Result<usize> {
        self.inner.write_at(buf, offset)
    }

    fn truncate(&mut self, size: u64) -> crate::Result<()> {
        self.inner.truncate(size)
    }

    fn sync(&mut self) -> crate::Result<()> {
        self.inner.sync()
    }

    fn close(&mut self) -> crate::Result<()> {
        self.inner.close()
    }

    fn readdir(&mut self, count: isize) -> crate::Result<Vec<FileInfo>> {
        self.inner.readdir(count)
    }
}
