use crate::file::{FileInfo, OpenOptions};
use crate::util::{
    already_exists, copy_to_layer, end_of_stream, file_closed, is_a_directory, normalize_path,
    not_found, parent_path, permission_denied,
};
use crate::{File, Filesystem};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

/// A copy-on-write overlay presenting two filesystems as one namespace.
///
/// Reads prefer the writable `layer` and fall back to the `base`; the first
/// write-open of a base-only file promotes its bytes into the layer, where all
/// mutations land. The base is never written. Directory listings union both
/// sides by name, the layer winning on collisions.
///
/// There is no whiteout mechanism: an entry present in the base cannot be
/// removed or renamed through the overlay.
pub struct CopyOnWriteFs<B, L> {
    base: B,
    layer: L,
}

impl<B: Filesystem, L: Filesystem> CopyOnWriteFs<B, L> {
    /// Overlays the writable `layer` on top of `base`.
    pub fn new(base: B, layer: L) -> Self {
        Self { base, layer }
    }

    fn in_layer(&self, path: &str) -> crate::Result<Option<FileInfo>> {
        stat_optional(&self.layer, path)
    }

    fn in_base(&self, path: &str) -> crate::Result<Option<FileInfo>> {
        stat_optional(&self.base, path)
    }

    /// Stats across the union; the layer shadows the base.
    fn union_stat(&self, path: &str) -> crate::Result<Option<FileInfo>> {
        match self.in_layer(path)? {
            Some(info) => Ok(Some(info)),
            None => self.in_base(path),
        }
    }

    /// Copies a base file into the layer, ancestors included.
    fn copy_up(&self, path: &str) -> crate::Result<()> {
        copy_to_layer(&self.base, &self.layer, path)
    }

    /// Ensures the parent directory chain of `path` exists in the layer,
    /// requiring it to exist somewhere in the union first.
    fn promote_parent(&self, op: &str, path: &str) -> crate::Result<()> {
        let parent = parent_path(path).to_owned();
        if self.union_stat(&parent)?.is_none() {
            return Err(not_found(op, path));
        }
        self.layer.mkdir_all(&parent, 0o777)
    }
}

fn stat_optional<F: Filesystem>(fs: &F, path: &str) -> crate::Result<Option<FileInfo>> {
    match fs.stat(path) {
        Ok(info) => Ok(Some(info)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

impl<B: Filesystem, L: Filesystem> Filesystem for CopyOnWriteFs<B, L> {
    fn create(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);
        if let Some(info) = self.union_stat(&path)? {
            if info.is_dir() {
                return Err(is_a_directory("create", &path));
            }
        }
        self.promote_parent("create", &path)?;
        self.layer.create(&path)
    }

    fn mkdir(&self, path: &str, mode: u32) -> crate::Result<()> {
        let path = normalize_path(path);
        if self.union_stat(&path)?.is_some() {
            return Err(already_exists("mkdir", &path));
        }
        self.layer.mkdir_all(&path, mode)
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> crate::Result<()> {
        let path = normalize_path(path);
        match self.union_stat(&path)? {
            Some(info) if info.is_dir() => Ok(()),
            Some(_) => Err(already_exists("mkdir", &path)),
            None => self.layer.mkdir_all(&path, mode),
        }
    }

    fn open(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);
        let layer_info = self.in_layer(&path)?;
        let base_info = self.in_base(&path)?;

        match (layer_info, base_info) {
            (Some(layer), Some(base)) if layer.is_dir() && base.is_dir() => {
                let base_dir = self.base.open(&path)?;
                let layer_dir = self.layer.open(&path)?;
                Ok(Box::new(MergedDirFile::new(path, base_dir, layer_dir)))
            }
            (Some(_), _) => self.layer.open(&path),
            (None, Some(_)) => self.base.open(&path),
            (None, None) => Err(not_found("open", &path)),
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
            return self.open(&path);
        }

        if options.create_new && self.union_stat(&path)?.is_some() {
            return Err(already_exists("open", &path));
        }

        if self.in_layer(&path)?.is_some() {
            return self.layer.open_file(&path, options, mode);
        }
        match self.in_base(&path)? {
            Some(info) => {
                if info.is_dir() {
                    return Err(is_a_directory("open", &path));
                }
                self.copy_up(&path)?;
                self.layer.open_file(&path, options, mode)
            }
            None if options.create || options.create_new => {
                self.promote_parent("open", &path)?;
                self.layer.open_file(&path, options, mode)
            }
            None => Err(not_found("open", &path)),
        }
    }

    fn remove(&self, path: &str) -> crate::Result<()> {
        let path = normalize_path(path);
        if self.in_base(&path)?.is_some() {
            return Err(permission_denied("remove", &path));
        }
        self.layer.remove(&path)
    }

    fn remove_all(&self, path: &str) -> crate::Result<()> {
        let path = normalize_path(path);
        if self.in_base(&path)?.is_some() {
            return Err(permission_denied("remove_all", &path));
        }
        self.layer.remove_all(&path)
    }

    fn rename(&self, old: &str, new: &str) -> crate::Result<()> {
        let old = normalize_path(old);
        let new = normalize_path(new);
        if self.in_base(&old)?.is_some() {
            return Err(permission_denied("rename", &old));
        }
        self.layer.rename(&old, &new)
    }

    fn stat(&self, path: &str) -> crate::Result<FileInfo> {
        match self.in_layer(path)? {
            Some(info) => Ok(info),
            None => self.base.stat(path),
        }
    }

    fn chmod(&self, path: &str, mode: u32) -> crate::Result<()> {
        let path = normalize_path(path);
        if self.in_layer(&path)?.is_some() {
            return self.layer.chmod(&path, mode);
        }
        match self.in_base(&path)? {
            Some(info) => {
                if info.is_dir() {
                    self.layer.mkdir_all(&path, info.mode & 0o777)?;
                } else {
                    self.copy_up(&path)?;
                }
                self.layer.chmod(&path, mode)
            }
            None => Err(not_found("chmod", &path)),
        }
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> crate::Result<()> {
        let path = normalize_path(path);
        if self.in_layer(&path)?.is_some() {
            return self.layer.chtimes(&path, atime, mtime);
        }
        match self.in_base(&path)? {
            Some(info) => {
                if info.is_dir() {
                    self.layer.mkdir_all(&path, info.mode & 0o777)?;
                } else {
                    self.copy_up(&path)?;
                }
                self.layer.chtimes(&path, atime, mtime)
            }
            None => Err(not_found("chtimes", &path)),
        }
    }

    fn name(&self) -> &'static str {
        "CopyOnWriteFs"
    }

    fn lstat_if_possible(&self, path: &str) -> crate::Result<(FileInfo, bool)> {
        if self.in_layer(path)?.is_some() {
            return self.layer.lstat_if_possible(path);
        }
        self.base.lstat_if_possible(path)
    }
}

/// A directory handle merging the listings of both overlay sides.
///
/// The union is computed once at the first page request: entries are
/// deduplicated by name with the layer winning, sorted, and served from the
/// snapshot with the usual paging cursor.
struct MergedDirFile {
    name: String,
    base: Box<dyn File>,
    layer: Box<dyn File>,
    entries: Option<Vec<FileInfo>>,
    offset: usize,
    closed: bool,
}

impl MergedDirFile {
    fn new(name: String, base: Box<dyn File>, layer: Box<dyn File>) -> Self {
        Self {
            name,
            base,
            layer,
            entries: None,
            offset: 0,
            closed: false,
        }
    }

    fn snapshot(&mut self) -> crate::Result<()> {
        if self.entries.is_some() {
            return Ok(());
        }
        let mut merged: std::collections::BTreeMap<String, FileInfo> = self
            .base
            .readdir(-1)?
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect();
        merged.extend(
            self.layer
                .readdir(-1)?
                .into_iter()
                .map(|info| (info.name.clone(), info)),
        );
        self.entries = Some(merged.into_values().collect());
        Ok(())
    }

    fn dir_error(&self, op: &str) -> io::Error {
        is_a_directory(op, &self.name)
    }
}

impl Read for MergedDirFile {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(self.dir_error("read"))
    }
}

impl Write for MergedDirFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(self.dir_error("write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MergedDirFile {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(self.dir_error("seek"))
    }
}

impl File for MergedDirFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> crate::Result<FileInfo> {
        self.layer.stat()
    }

    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> crate::Result<usize> {
        Err(self.dir_error("read"))
    }

    fn write_at(&mut self, _buf: &[u8], _offset: u64) -> crate::Result<usize> {
        Err(self.dir_error("write"))
    }

    fn truncate(&mut self, _size: u64) -> crate::Result<()> {
        Err(self.dir_error("truncate"))
    }

    fn sync(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        if self.closed {
            return Err(file_closed(&self.name));
        }
        self.closed = true;
        let base = self.base.close();
        let layer = self.layer.close();
        base.and(layer)
    }

    fn readdir(&mut self, count: isize) -> crate::Result<Vec<FileInfo>> {
        if self.closed {
            return Err(file_closed(&self.name));
        }
        self.snapshot()?;

        let entries = self.entries.as_ref().unwrap();
        if count <= 0 {
            let page = entries[self.offset..].to_vec();
            self.offset = entries.len();
            return Ok(page);
        }

        let remaining = entries.len() - self.offset;
        if remaining == 0 {
            return Err(end_of_stream());
        }
        let n = remaining.min(count as usize);
        let page = entries[self.offset..self.offset + n].to_vec();
        self.offset += n;
        Ok(page)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::test::read_directory;
    use crate::{fsutil, MemFs, ReadOnlyFs};
    use std::io::ErrorKind;

    fn overlay(base: MemFs, layer: MemFs) -> CopyOnWriteFs<ReadOnlyFs<MemFs>, MemFs> {
        CopyOnWriteFs::new(ReadOnlyFs::new(base), layer)
    }

    #[test]
    fn write_open_promotes_and_preserves_the_base() {
        let base = MemFs::new();
        let layer = MemFs::new();
        base.mkdir_all("/home/test", 0o777).unwrap();
        fsutil::write_file(&base, "/home/test/file.txt", b"This is a test", 0o666).unwrap();

        let fs = overlay(base.clone(), layer.clone());

        let mut file = fs
            .open_file(
                "/home/test/file.txt",
                &OpenOptions::new().read(true).write(true),
                0o666,
            )
            .unwrap();
        file.write(b"####").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(file.read_into_string().unwrap(), "#### is a test");
        file.close().unwrap();

        // the base bytes are untouched; the layer holds the new bytes
        assert_eq!(
            fsutil::read_file(&base, "/home/test/file.txt").unwrap(),
            b"This is a test"
        );
        assert_eq!(
            fsutil::read_file(&layer, "/home/test/file.txt").unwrap(),
            b"#### is a test"
        );
    }

    #[test]
    fn create_truncates_an_existing_base_file() {
        let base = MemFs::new();
        base.mkdir_all("/home/test", 0o777).unwrap();
        fsutil::write_file(&base, "/home/test/file.txt", b"This is a test", 0o666).unwrap();

        let fs = overlay(base, MemFs::new());

        let file = fs.create("/home/test/file.txt").unwrap();
        assert_eq!(file.stat().unwrap().size, 0);
    }

    #[test]
    fn readdir_merges_both_sides() {
        let base = MemFs::new();
        let layer = MemFs::new();
        base.mkdir_all("/home/test", 0o777).unwrap();
        fsutil::write_file(&base, "/home/test/file.txt", b"This is a test", 0o666).unwrap();
        layer.mkdir_all("/home/test", 0o777).unwrap();
        fsutil::write_file(&layer, "/home/test/file2.txt", b"This is a test", 0o666).unwrap();

        let fs = overlay(base, layer.clone());
        fsutil::write_file(&fs, "/home/test/file3.txt", b"This is a test", 0o666).unwrap();

        let mut dir = fs.open("/home/test").unwrap();
        let names = dir.readdirnames(-1).unwrap();
        assert_eq!(names, vec!["file.txt", "file2.txt", "file3.txt"]);

        // the layer alone only has its own two files
        let entries = read_directory(&layer, "/home/test");
        itertools::assert_equal(entries.keys(), vec!["file2.txt", "file3.txt"]);
    }

    #[test]
    fn readdir_dedups_by_name_and_the_layer_wins() {
        let base = MemFs::new();
        let layer = MemFs::new();
        base.mkdir_all("/d", 0o777).unwrap();
        layer.mkdir_all("/d", 0o777).unwrap();
        fsutil::write_file(&base, "/d/shared", b"base bytes", 0o666).unwrap();
        fsutil::write_file(&layer, "/d/shared", b"layer", 0o666).unwrap();

        let fs = overlay(base, layer);
        let mut dir = fs.open("/d").unwrap();
        let entries = dir.readdir(-1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 5);
    }

    #[test]
    fn nested_dir_only_in_base_is_listable() {
        let base = MemFs::new();
        base.mkdir_all("/home/test/foo/bar", 0o777).unwrap();
        fsutil::write_file(&base, "/home/test/file.txt", b"This is a test", 0o666).unwrap();
        fsutil::write_file(&base, "/home/test/foo/file2.txt", b"This is a test", 0o666).unwrap();
        fsutil::write_file(&base, "/home/test/foo/bar/file3.txt", b"This is a test", 0o666)
            .unwrap();

        let fs = overlay(base, MemFs::new());
        let mut dir = fs.open("/home/test/foo").unwrap();
        assert_eq!(dir.readdir(-1).unwrap().len(), 2);
    }

    #[test]
    fn nested_dir_only_in_layer_is_listable() {
        let layer = MemFs::new();
        layer.mkdir_all("/home/test/foo/bar", 0o777).unwrap();
        fsutil::write_file(&layer, "/home/test/file.txt", b"This is a test", 0o666).unwrap();
        fsutil::write_file(&layer, "/home/test/foo/file2.txt", b"This is a test", 0o666).unwrap();
        fsutil::write_file(&layer, "/home/test/foo/bar/file3.txt", b"This is a test", 0o666)
            .unwrap();

        let fs = overlay(MemFs::new(), layer);
        let mut dir = fs.open("/home/test/foo").unwrap();
        assert_eq!(dir.readdir(-1).unwrap().len(), 2);
    }

    #[test]
    fn mkdir_behaves_like_a_single_filesystem() {
        let base = MemFs::new();
        base.mkdir_all("/some/path", 0o744).unwrap();

        let fs = overlay(base, MemFs::new());

        let err = fs.mkdir("/some/path", 0o744).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        fs.mkdir_all("/some/path", 0o744).unwrap();

        fs.mkdir("/some/path/deeper", 0o744).unwrap();
        assert!(fsutil::dir_exists(&fs, "/some/path/deeper").unwrap());
    }

    #[test]
    fn base_entries_cannot_be_removed_or_renamed() {
        let base = MemFs::new();
        fsutil::write_file(&base, "/kept", b"kept", 0o666).unwrap();

        let layer = MemFs::new();
        let fs = overlay(base, layer.clone());
        fsutil::write_file(&fs, "/scratch", b"scratch", 0o666).unwrap();

        assert_eq!(fs.remove("/kept").unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(fs.remove_all("/kept").unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            fs.rename("/kept", "/moved").unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );

        // layer-only entries come and go freely
        fs.rename("/scratch", "/renamed").unwrap();
        fs.remove("/renamed").unwrap();
        assert!(!fsutil::exists(&layer, "/renamed").unwrap());

        let err = fs.remove("/never").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn chmod_promotes_base_files() {
        let base = MemFs::new();
        fsutil::write_file(&base, "/f", b"bytes", 0o644).unwrap();

        let layer = MemFs::new();
        let fs = overlay(base.clone(), layer.clone());

        fs.chmod("/f", 0o600).unwrap();
        assert_eq!(fs.stat("/f").unwrap().mode & 0o777, 0o600);
        // the base keeps its mode and its bytes
        assert_eq!(base.stat("/f").unwrap().mode & 0o777, 0o644);
        assert_eq!(fsutil::read_file(&layer, "/f").unwrap(), b"bytes");
    }

    #[test]
    fn stat_prefers_the_layer() {
        let base = MemFs::new();
        let layer = MemFs::new();
        fsutil::write_file(&base, "/f", b"0123456789", 0o666).unwrap();
        fsutil::write_file(&layer, "/f", b"abc", 0o666).unwrap();

        let fs = overlay(base, layer);
        assert_eq!(fs.stat("/f").unwrap().size, 3);
    }

    #[test]
    fn missing_parent_fails_creation() {
        let fs = overlay(MemFs::new(), MemFs::new());

        let err = fs.create("/no/such/parent/file").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn create_new_sees_base_files() {
        let base = MemFs::new();
        fsutil::write_file(&base, "/f", b"x", 0o666).unwrap();

        let fs = overlay(base, MemFs::new());
        let err = fs
            .open_file("/f", &OpenOptions::new().create_new(true), 0o666)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn empty_merged_dir_terminates_immediately() {
        let base = MemFs::new();
        let layer = MemFs::new();
        base.mkdir("/shared", 0o700).unwrap();
        layer.mkdir("/shared", 0o700).unwrap();

        let fs = overlay(base, layer);

        let mut dir = fs.open("/shared").unwrap();
        let err = dir.readdirnames(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        let mut dir = fs.open("/shared").unwrap();
        assert!(dir.readdirnames(0).unwrap().is_empty());
    }

    #[test]
    fn merged_readdir_over_ask_then_eof() {
        let base = MemFs::new();
        for i in 0..5 {
            fsutil::write_file(&base, &format!("/file{i}.txt"), b"bytes", 0o777).unwrap();
        }
        let layer = MemFs::new();
        let fs = overlay(base, layer);

        let mut dir = fs.open("/").unwrap();
        let names = dir.readdirnames(6).unwrap();
        assert_eq!(names.len(), 5);
        let err = dir.readdirnames(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn lstat_delegates_to_the_owning_side() {
        let base = MemFs::new();
        let layer = MemFs::new();
        fsutil::write_file(&base, "/base-only", b"b", 0o666).unwrap();
        fsutil::write_file(&layer, "/layer-only", b"la", 0o666).unwrap();

        let fs = overlay(base, layer);

        let (info, was_lstat) = fs.lstat_if_possible("/base-only").unwrap();
        assert!(!was_lstat);
        assert_eq!(info.size, 1);
        let (info, was_lstat) = fs.lstat_if_possible("/layer-only").unwrap();
        assert!(!was_lstat);
        assert_eq!(info.size, 2);

        let err = fs.lstat_if_possible("/missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
