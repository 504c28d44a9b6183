use crate::{fsutil, Filesystem};
use normalize_path::NormalizePath;
use path_slash::PathBufExt;
use std::io;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// The canonical path separator and root of every filesystem in this crate.
pub const SEPARATOR: &str = "/";

/// Lexically cleans `path` into an absolute slash-rooted name.
///
/// Redundant separators and `.` components are dropped, `..` components are
/// resolved; `.` and `..` that collapse past the root degenerate to `/`.
///
/// # Example
/// ```
/// use layerfs::util::normalize_path;
///
/// assert_eq!(normalize_path("///////"), "/");
/// assert_eq!(normalize_path("./test/something/../"), "/test");
/// assert_eq!(normalize_path("../test"), "/test");
/// assert_eq!(normalize_path("a/b//c"), "/a/b/c");
/// ```
pub fn normalize_path(path: &str) -> String {
    let cleaned = make_relative(path).normalize();
    let slashed = cleaned.to_slash_lossy();
    if slashed.is_empty() || slashed == "." {
        SEPARATOR.to_owned()
    } else {
        format!("/{slashed}")
    }
}

/// Returns the parent of a normalized path; the parent of `/` is `/`.
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => SEPARATOR,
        Some(idx) => &path[..idx],
    }
}

/// Returns the final component of a normalized path; the base of `/` is `/`.
pub(crate) fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) if idx + 1 < path.len() => &path[idx + 1..],
        _ => SEPARATOR,
    }
}

/// Produces every prefix of a normalized path from shallowest to deepest,
/// excluding the root and including the path itself.
///
/// # Example
/// ```
/// use layerfs::util::ancestor_chain;
///
/// itertools::assert_equal(ancestor_chain("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
/// itertools::assert_equal(ancestor_chain("/"), Vec::<&str>::new());
/// ```
pub fn ancestor_chain(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.char_indices()
        .filter_map(|(idx, c)| (c == '/' && idx > 0).then(|| &path[..idx]))
        .chain((path != SEPARATOR).then_some(path))
}

/// Joins a child component onto a normalized parent path.
pub(crate) fn join_path(parent: &str, child: &str) -> String {
    if parent == SEPARATOR {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Trims the `/` and `\\` roots off of the beginning of the path, making it
/// relative.
pub(crate) fn make_relative<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref().to_str().unwrap_or("");
    path.trim_start_matches('/').trim_start_matches('\\').into()
}

/// Builds a path-bearing error of the given kind for `op` on `path`.
pub(crate) fn path_error(kind: ErrorKind, op: &str, path: &str) -> io::Error {
    let detail = match kind {
        ErrorKind::NotFound => "no such file or directory",
        ErrorKind::AlreadyExists => "file already exists",
        ErrorKind::PermissionDenied => "permission denied",
        ErrorKind::InvalidInput => "invalid argument",
        ErrorKind::NotADirectory => "not a directory",
        ErrorKind::IsADirectory => "is a directory",
        ErrorKind::DirectoryNotEmpty => "directory not empty",
        _ => "i/o error",
    };
    io::Error::new(kind, format!("{op} {path}: {detail}"))
}

/// Returns an error indicating that `path` was not found.
pub(crate) fn not_found(op: &str, path: &str) -> io::Error {
    path_error(ErrorKind::NotFound, op, path)
}

/// Returns an error indicating that `path` already exists.
pub(crate) fn already_exists(op: &str, path: &str) -> io::Error {
    path_error(ErrorKind::AlreadyExists, op, path)
}

/// Returns an error indicating that the operation is not permitted.
pub(crate) fn permission_denied(op: &str, path: &str) -> io::Error {
    path_error(ErrorKind::PermissionDenied, op, path)
}

/// Returns an error indicating that `path` is not a directory.
pub(crate) fn not_a_directory(op: &str, path: &str) -> io::Error {
    path_error(ErrorKind::NotADirectory, op, path)
}

/// Returns an error indicating that `path` is a directory.
pub(crate) fn is_a_directory(op: &str, path: &str) -> io::Error {
    path_error(ErrorKind::IsADirectory, op, path)
}

/// Returns an error indicating that a directory still has entries.
pub(crate) fn directory_not_empty(op: &str, path: &str) -> io::Error {
    path_error(ErrorKind::DirectoryNotEmpty, op, path)
}

/// Returns an error indicating an invalid argument.
pub(crate) fn invalid_input(error: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, error.to_owned())
}

/// Returns the error terminating an exhausted directory stream.
pub(crate) fn end_of_stream() -> io::Error {
    io::Error::new(ErrorKind::UnexpectedEof, "end of directory stream")
}

/// Returns an error indicating that a handle was used after being closed.
pub(crate) fn file_closed(name: &str) -> io::Error {
    io::Error::other(format!("{name}: file already closed"))
}

/// Copies the file at `path` from `src` up into `dst`.
///
/// Missing ancestor directories are created in `dst` first. The copy streams
/// the source bytes into a freshly-created destination file, verifies the
/// copied length against the source size, and carries the source modification
/// time over. On any failure the destination file is removed before the error
/// is returned.
///
/// # Arguments
/// `src`: The filesystem to copy from.
/// `dst`: The filesystem to copy into.
/// `path`: The file to copy; the same path is used on both sides.
pub fn copy_to_layer<S, D>(src: &S, dst: &D, path: &str) -> crate::Result<()>
where
    S: Filesystem + ?Sized,
    D: Filesystem + ?Sized,
{
    let mut src_file = src.open(path)?;

    let parent = parent_path(&normalize_path(path)).to_owned();
    if !fsutil::exists(dst, &parent)? {
        dst.mkdir_all(&parent, 0o777)?;
    }

    let mut dst_file = dst.create(path)?;

    let mut copied: u64 = 0;
    let mut buf = [0u8; 8192];
    loop {
        let n = match src_file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                let _ = dst.remove(path);
                return Err(err);
            }
        };
        if let Err(err) = dst_file.write_all(&buf[..n]) {
            let _ = dst.remove(path);
            return Err(err);
        }
        copied += n as u64;
    }

    let info = match src_file.stat() {
        Ok(info) if info.size == copied => info,
        Ok(_) => {
            let _ = dst.remove(path);
            return Err(io::Error::other(format!(
                "copy {path}: short copy ({copied} bytes)"
            )));
        }
        Err(err) => {
            let _ = dst.remove(path);
            return Err(err);
        }
    };

    if let Err(err) = dst_file.close() {
        let _ = dst.remove(path);
        return Err(err);
    }

    dst.chtimes(path, info.modified, info.modified)
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::file::FileInfo;
    use crate::{fsutil, MemFs};
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime};

    /// Reads the directory and sorts all entries into a map.
    pub(crate) fn read_directory<F: Filesystem>(fs: &F, dir: &str) -> BTreeMap<String, FileInfo> {
        fsutil::read_dir(fs, dir)
            .unwrap()
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect()
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_path("///////"), "/");
        assert_eq!(normalize_path("."), "/");
        assert_eq!(normalize_path(".."), "/");
        assert_eq!(normalize_path("./test/something/../"), "/test");
        assert_eq!(normalize_path("../test"), "/test");
        assert_eq!(normalize_path("a/b//c/"), "/a/b/c");
        assert_eq!(normalize_path("/already/clean"), "/already/clean");
    }

    #[test]
    fn parents_and_bases() {
        assert_eq!(parent_path("/a/b/c"), "/a/b");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(base_name("/a/b/c"), "c");
        assert_eq!(base_name("/a"), "a");
        assert_eq!(base_name("/"), "/");
    }

    #[test]
    fn ancestors() {
        itertools::assert_equal(ancestor_chain("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        itertools::assert_equal(ancestor_chain("/a"), vec!["/a"]);
        itertools::assert_equal(ancestor_chain("/"), Vec::<&str>::new());
    }

    #[test]
    fn copy_preserves_content_and_modtime() {
        let src = MemFs::new();
        let dst = MemFs::new();

        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        fsutil::write_file(&src, "/deep/nested/file", b"payload", 0o644).unwrap();
        src.chtimes("/deep/nested/file", modified, modified).unwrap();

        copy_to_layer(&src, &dst, "/deep/nested/file").unwrap();

        assert_eq!(fsutil::read_file(&dst, "/deep/nested/file").unwrap(), b"payload");
        let info = dst.stat("/deep/nested/file").unwrap();
        assert_eq!(info.modified, modified);
        assert!(fsutil::dir_exists(&dst, "/deep/nested").unwrap());
    }

    #[test]
    fn copy_missing_source() {
        let src = MemFs::new();
        let dst = MemFs::new();

        let err = copy_to_layer(&src, &dst, "/absent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!fsutil::exists(&dst, "/absent").unwrap());
    }

    #[test]
    fn copy_source_is_shared_not_consumed() {
        let src = MemFs::new();
        let dst = MemFs::new();
        fsutil::write_file(&src, "/f", b"stays", 0o644).unwrap();

        copy_to_layer(&src, &dst, "/f").unwrap();

        let mut handle = src.open("/f").unwrap();
        assert_eq!(handle.read_into_string().unwrap(), "stays");
    }
}
