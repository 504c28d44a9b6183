use crate::file::{FileInfo, OpenOptions};
use crate::util::{copy_to_layer, is_a_directory, normalize_path, not_found, parent_path};
use crate::{File, Filesystem};
use std::io::ErrorKind;
use std::time::{Duration, SystemTime};

/// The cache disposition of one path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CacheStatus {
    /// Not in the layer yet.
    Miss,
    /// In both and fresh, or the cache never expires.
    Hit,
    /// In both, but the base has moved on by at least the time-to-live.
    Stale,
    /// Only in the layer; created through the overlay.
    Local,
}

/// An overlay that promotes files from a slow `base` into a fast `layer` the
/// first time they are read.
///
/// A cached file is refreshed when `ttl` is non-zero and the base modification
/// time has run ahead of the cached copy by at least `ttl`; a zero `ttl` pins
/// the cache forever. Writes through the overlay land in the layer only and
/// are never propagated back to the base.
pub struct CacheOnReadFs<B, L> {
    base: B,
    layer: L,
    ttl: Duration,
}

impl<B: Filesystem, L: Filesystem> CacheOnReadFs<B, L> {
    /// Caches reads of `base` inside `layer` with the given time-to-live.
    pub fn new(base: B, layer: L, ttl: Duration) -> Self {
        Self { base, layer, ttl }
    }

    /// Computes the cache status of `path` together with the metadata of the
    /// side that currently owns it.
    fn cache_status(&self, path: &str) -> crate::Result<(CacheStatus, Option<FileInfo>)> {
        let layer_info = match self.layer.stat(path) {
            Ok(info) => info,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok((CacheStatus::Miss, None));
            }
            Err(err) => return Err(err),
        };
        match self.base.stat(path) {
            Ok(base_info) => {
                if !self.ttl.is_zero() {
                    let age = base_info
                        .modified
                        .duration_since(layer_info.modified)
                        .unwrap_or(Duration::ZERO);
                    if age >= self.ttl {
                        return Ok((CacheStatus::Stale, Some(base_info)));
                    }
                }
                Ok((CacheStatus::Hit, Some(layer_info)))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Ok((CacheStatus::Local, Some(layer_info)))
            }
            Err(err) => Err(err),
        }
    }

    fn copy_up(&self, path: &str) -> crate::Result<()> {
        copy_to_layer(&self.base, &self.layer, path)
    }

    /// Ensures the cached file at `path` is present and fresh, then serves the
    /// open from the layer. Directories are never cached and are served from
    /// the side that owns them.
    fn open_cached(&self, path: &str, options: &OpenOptions, mode: u32) -> crate::Result<Box<dyn File>> {
        match self.cache_status(path)?.0 {
            CacheStatus::Hit | CacheStatus::Local => self.layer.open_file(path, options, mode),
            CacheStatus::Stale => {
                self.copy_up(path)?;
                self.layer.open_file(path, options, mode)
            }
            CacheStatus::Miss => match self.base.stat(path) {
                Ok(info) if info.is_dir() => self.base.open_file(path, options, mode),
                Ok(_) => {
                    self.copy_up(path)?;
                    self.layer.open_file(path, options, mode)
                }
                Err(err) => Err(err),
            },
        }
    }
}

impl<B: Filesystem, L: Filesystem> Filesystem for CacheOnReadFs<B, L> {
    fn create(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);
        self.layer.mkdir_all(parent_path(&path), 0o777)?;
        self.layer.create(&path)
    }

    fn mkdir(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.layer.mkdir(path, mode)
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.layer.mkdir_all(path, mode)
    }

    fn open(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);
        match self.cache_status(&path)? {
            (CacheStatus::Hit | CacheStatus::Local, _) => self.layer.open(&path),
            (CacheStatus::Stale, Some(info)) if info.is_dir() => self.layer.open(&path),
            (CacheStatus::Stale, _) => {
                self.copy_up(&path)?;
                self.layer.open(&path)
            }
            (CacheStatus::Miss, _) => {
                let info = self.base.stat(&path)?;
                if info.is_dir() {
                    return self.base.open(&path);
                }
                self.copy_up(&path)?;
                self.layer.open(&path)
            }
        }
    }

    fn open_file(
        &self,
        path: &str,
        options: &OpenOptions,
        mode: u32,
    ) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);
        if !options.write_intent() {
            return self.open_cached(&path, options, mode);
        }

        match self.cache_status(&path)?.0 {
            CacheStatus::Hit | CacheStatus::Local => self.layer.open_file(&path, options, mode),
            CacheStatus::Stale => {
                self.copy_up(&path)?;
                self.layer.open_file(&path, options, mode)
            }
            CacheStatus::Miss => match self.base.stat(&path) {
                Ok(info) => {
                    if info.is_dir() {
                        return Err(is_a_directory("open", &path));
                    }
                    self.copy_up(&path)?;
                    self.layer.open_file(&path, options, mode)
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if !(options.create || options.create_new) {
                        return Err(not_found("open", &path));
                    }
                    self.layer.mkdir_all(parent_path(&path), 0o777)?;
                    self.layer.open_file(&path, options, mode)
                }
                Err(err) => Err(err),
            },
        }
    }

    fn remove(&self, path: &str) -> crate::Result<()> {
        self.layer.remove(path)
    }

    fn remove_all(&self, path: &str) -> crate::Result<()> {
        self.layer.remove_all(path)
    }

    fn rename(&self, old: &str, new: &str) -> crate::Result<()> {
        self.layer.rename(old, new)
    }

    fn stat(&self, path: &str) -> crate::Result<FileInfo> {
        match self.cache_status(path)? {
            (CacheStatus::Hit | CacheStatus::Local, Some(info)) => Ok(info),
            (CacheStatus::Stale, Some(info)) => Ok(info),
            _ => self.base.stat(path),
        }
    }

    fn chmod(&self, path: &str, mode: u32) -> crate::Result<()> {
        self.layer.chmod(path, mode)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> crate::Result<()> {
        self.layer.chtimes(path, atime, mtime)
    }

    fn name(&self) -> &'static str {
        "CacheOnReadFs"
    }

    fn lstat_if_possible(&self, path: &str) -> crate::Result<(FileInfo, bool)> {
        match self.cache_status(path)?.0 {
            CacheStatus::Hit | CacheStatus::Local => self.layer.lstat_if_possible(path),
            CacheStatus::Miss | CacheStatus::Stale => self.base.lstat_if_possible(path),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{fsutil, MemFs};
    use std::io::{ErrorKind, Write};

    fn cache(ttl: Duration) -> (MemFs, MemFs, CacheOnReadFs<MemFs, MemFs>) {
        let base = MemFs::new();
        let layer = MemFs::new();
        let fs = CacheOnReadFs::new(base.clone(), layer.clone(), ttl);
        (base, layer, fs)
    }

    #[test]
    fn first_read_populates_the_layer() {
        let (base, layer, fs) = cache(Duration::ZERO);
        fsutil::write_file(&base, "/file.txt", b"This is a test", 0o644).unwrap();

        let mut file = fs.open("/file.txt").unwrap();
        assert_eq!(file.read_into_string().unwrap(), "This is a test");
        file.close().unwrap();

        // the layer now carries the copy, mod-time included
        assert_eq!(fsutil::read_file(&layer, "/file.txt").unwrap(), b"This is a test");
        assert_eq!(
            layer.stat("/file.txt").unwrap().modified,
            base.stat("/file.txt").unwrap().modified
        );
    }

    #[test]
    fn zero_ttl_pins_the_cache() {
        let (base, _layer, fs) = cache(Duration::ZERO);
        fsutil::write_file(&base, "/file.txt", b"original", 0o644).unwrap();

        assert_eq!(fsutil::read_file(&fs, "/file.txt").unwrap(), b"original");

        // the base changes behind the cache's back
        fsutil::write_file(&base, "/file.txt", b"changed!", 0o644).unwrap();
        let later = SystemTime::now() + Duration::from_secs(3600);
        base.chtimes("/file.txt", later, later).unwrap();

        assert_eq!(fsutil::read_file(&fs, "/file.txt").unwrap(), b"original");
    }

    #[test]
    fn expired_entries_are_refreshed() {
        let (base, _layer, fs) = cache(Duration::from_secs(5));
        fsutil::write_file(&base, "/file.txt", b"This is a test", 0o644).unwrap();

        assert_eq!(fsutil::read_file(&fs, "/file.txt").unwrap(), b"This is a test");

        fsutil::write_file(&base, "/file.txt", b"Another test", 0o644).unwrap();
        let later = SystemTime::now() + Duration::from_secs(10);
        base.chtimes("/file.txt", later, later).unwrap();

        assert_eq!(fsutil::read_file(&fs, "/file.txt").unwrap(), b"Another test");
    }

    #[test]
    fn fresh_entries_are_served_from_the_layer() {
        let (base, layer, fs) = cache(Duration::from_secs(3600));
        fsutil::write_file(&base, "/file.txt", b"from base", 0o644).unwrap();

        assert_eq!(fsutil::read_file(&fs, "/file.txt").unwrap(), b"from base");

        // poke the layer copy directly to prove subsequent reads hit it
        fsutil::write_file(&layer, "/file.txt", b"from layer", 0o644).unwrap();
        assert_eq!(fsutil::read_file(&fs, "/file.txt").unwrap(), b"from layer");
    }

    #[test]
    fn writes_stay_in_the_layer() {
        let (base, layer, fs) = cache(Duration::ZERO);
        base.mkdir("/data", 0o777).unwrap();

        let mut file = fs.create("/data/file.txt").unwrap();
        file.write_string("This is a test").unwrap();
        file.close().unwrap();

        assert_eq!(
            fsutil::read_file(&layer, "/data/file.txt").unwrap(),
            b"This is a test"
        );
        assert!(!fsutil::exists(&base, "/data/file.txt").unwrap());

        // and the overlay serves the local copy back
        assert_eq!(fsutil::read_file(&fs, "/data/file.txt").unwrap(), b"This is a test");
    }

    #[test]
    fn stat_miss_reads_the_base_without_promoting() {
        let (base, layer, fs) = cache(Duration::ZERO);
        fsutil::write_file(&base, "/file.txt", b"sized", 0o644).unwrap();

        assert_eq!(fs.stat("/file.txt").unwrap().size, 5);
        assert!(!fsutil::exists(&layer, "/file.txt").unwrap());

        let err = fs.stat("/missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn write_open_of_a_base_file_caches_it_first() {
        let (base, layer, fs) = cache(Duration::ZERO);
        fsutil::write_file(&base, "/file.txt", b"This is a test", 0o644).unwrap();

        let mut file = fs
            .open_file("/file.txt", &OpenOptions::new().read(true).write(true), 0o644)
            .unwrap();
        file.write(b"####").unwrap();
        file.close().unwrap();

        assert_eq!(fsutil::read_file(&layer, "/file.txt").unwrap(), b"#### is a test");
        assert_eq!(fsutil::read_file(&base, "/file.txt").unwrap(), b"This is a test");
    }

    #[test]
    fn directories_are_served_without_caching() {
        let (base, layer, fs) = cache(Duration::ZERO);
        base.mkdir_all("/data/sub", 0o777).unwrap();
        fsutil::write_file(&base, "/data/a.txt", b"a", 0o644).unwrap();

        let mut dir = fs.open("/data").unwrap();
        let names = dir.readdirnames(-1).unwrap();
        assert_eq!(names, vec!["a.txt", "sub"]);
        assert!(!fsutil::exists(&layer, "/data").unwrap());
    }
}
