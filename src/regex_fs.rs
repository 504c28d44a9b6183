use crate::file::{FileInfo, OpenOptions};
use crate::util::not_found;
use crate::{fsutil, File, Filesystem};
use regex::Regex;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

/// A filter that hides files (not directories) by regular expression.
///
/// Only files whose path matches the pattern are visible; all others fail
/// with a not-found error. Directory listings drop hidden entries, and
/// creating directories is always allowed.
pub struct RegexFs<F> {
    source: F,
    pattern: Regex,
}

impl<F: Filesystem> RegexFs<F> {
    /// Wraps `source`, admitting only file paths matching `pattern`.
    pub fn new(source: F, pattern: Regex) -> Self {
        Self { source, pattern }
    }

    fn matches(&self, op: &str, path: &str) -> crate::Result<()> {
        if self.pattern.is_match(path) {
            Ok(())
        } else {
            Err(not_found(op, path))
        }
    }

    /// Admits `path` if it is a directory or matches the pattern. A missing
    /// path surfaces the source's own error.
    fn dir_or_matches(&self, op: &str, path: &str) -> crate::Result<()> {
        if fsutil::is_dir(&self.source, path)? {
            return Ok(());
        }
        self.matches(op, path)
    }
}

impl<F: Filesystem> Filesystem for RegexFs<F> {
    fn create(&self, path: &str) -> crate::Result<Box<dyn File>> {
        self.matches("create", path)?;
        self.source.create(path)
    }

    fn mkdir(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.source.mkdir(path, mode)
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.source.mkdir_all(path, mode)
    }

    fn open(&self, path: &str) -> crate::Result<Box<dyn File>> {
        self.dir_or_matches("open", path)?;
        let file = self.source.open(path)?;
        Ok(Box::new(RegexFile {
            inner: file,
            pattern: self.pattern.clone(),
        }))
    }

    fn open_file(
        &self,
        path: &str,
        options: &OpenOptions,
        mode: u32,
    ) -> crate::Result<Box<dyn File>> {
        match self.dir_or_matches("open", path) {
            Ok(()) => {}
            // a matching path may still be created
            Err(err) if err.kind() == io::ErrorKind::NotFound && options.create => {
                self.matches("open", path)?;
            }
            Err(err) => return Err(err),
        }
        self.source.open_file(path, options, mode)
    }

    fn remove(&self, path: &str) -> crate::Result<()> {
        self.dir_or_matches("remove", path)?;
        self.source.remove(path)
    }

    fn remove_all(&self, path: &str) -> crate::Result<()> {
        match fsutil::is_dir(&self.source, path) {
            // directories are removed unconditionally
            Ok(true) => self.source.remove_all(path),
            Ok(false) => {
                self.matches("remove_all", path)?;
                self.source.remove_all(path)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn rename(&self, old: &str, new: &str) -> crate::Result<()> {
        if !fsutil::is_dir(&self.source, old)? {
            self.matches("rename", old)?;
            self.matches("rename", new)?;
        }
        self.source.rename(old, new)
    }

    fn stat(&self, path: &str) -> crate::Result<FileInfo> {
        self.dir_or_matches("stat", path)?;
        self.source.stat(path)
    }

    fn chmod(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.dir_or_matches("chmod", path)?;
        self.source.chmod(path, mode)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> crate::Result<()> {
        self.dir_or_matches("chtimes", path)?;
        self.source.chtimes(path, atime, mtime)
    }

    fn name(&self) -> &'static str {
        "RegexFs"
    }

    fn lstat_if_possible(&self, path: &str) -> crate::Result<(FileInfo, bool)> {
        self.dir_or_matches("lstat", path)?;
        self.source.lstat_if_possible(path)
    }
}

/// A handle whose directory listings drop files failing the pattern.
struct RegexFile {
    inner: Box<dyn File>,
    pattern: Regex,
}

impl Read for RegexFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for RegexFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for RegexFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl File for RegexFile {
    fn name(&self) -> &str {
        self.inner.name()
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
        let entries = self.inner.readdir(count)?;
        Ok(entries
            .into_iter()
            .filter(|info| info.is_dir() || self.pattern.is_match(&info.name))
            .collect())
    }
}
