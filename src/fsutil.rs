//! Convenience helpers layered on top of the [`Filesystem`] trait.

use crate::file::{FileInfo, OpenOptions};
use crate::util::{already_exists, invalid_input, join_path, normalize_path, parent_path};
use crate::{File, Filesystem};
use itertools::Itertools;
use std::io::{self, ErrorKind, Read};

/// Returns whether a file or directory exists at `path`.
pub fn exists<F: Filesystem + ?Sized>(fs: &F, path: &str) -> crate::Result<bool> {
    match fs.stat(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Returns whether `path` exists and is a directory.
pub fn dir_exists<F: Filesystem + ?Sized>(fs: &F, path: &str) -> crate::Result<bool> {
    match fs.stat(path) {
        Ok(info) => Ok(info.is_dir()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Returns whether the existing path is a directory.
pub fn is_dir<F: Filesystem + ?Sized>(fs: &F, path: &str) -> crate::Result<bool> {
    Ok(fs.stat(path)?.is_dir())
}

/// Returns whether the file at `path` has no bytes, or the directory at
/// `path` has no entries. A missing path is an error.
pub fn is_empty<F: Filesystem + ?Sized>(fs: &F, path: &str) -> crate::Result<bool> {
    let info = fs.stat(path)?;
    if !info.is_dir() {
        return Ok(info.size == 0);
    }
    let mut dir = fs.open(path)?;
    Ok(dir.readdir(-1)?.is_empty())
}

/// Reads the whole file at `path`.
pub fn read_file<F: Filesystem + ?Sized>(fs: &F, path: &str) -> crate::Result<Vec<u8>> {
    let mut file = fs.open(path)?;
    let content = file.read_into_vec()?;
    file.close()?;
    Ok(content)
}

/// Writes `content` to the file at `path`, creating or truncating it.
pub fn write_file<F: Filesystem + ?Sized>(
    fs: &F,
    path: &str,
    content: &[u8],
    mode: u32,
) -> crate::Result<()> {
    let mut file = fs.open_file(
        path,
        &OpenOptions::new().write(true).create(true).truncate(true),
        mode,
    )?;
    io::Write::write_all(&mut file, content)?;
    file.close()
}

/// Reads the remainder of an open file.
pub fn read_all(file: &mut dyn File) -> crate::Result<Vec<u8>> {
    file.read_into_vec()
}

/// Returns the full listing of the directory at `path`, sorted by name.
pub fn read_dir<F: Filesystem + ?Sized>(fs: &F, path: &str) -> crate::Result<Vec<FileInfo>> {
    let mut dir = fs.open(path)?;
    let entries = dir
        .readdir(-1)?
        .into_iter()
        .sorted_by(|a, b| a.name.cmp(&b.name))
        .collect();
    dir.close()?;
    Ok(entries)
}

/// Writes everything `reader` yields to the file at `path`, creating missing
/// parent directories.
pub fn write_reader<F: Filesystem + ?Sized>(
    fs: &F,
    path: &str,
    reader: &mut dyn Read,
) -> crate::Result<()> {
    let path = normalize_path(path);
    fs.mkdir_all(parent_path(&path), 0o777)?;

    let mut file = fs.create(&path)?;
    io::copy(reader, &mut file)?;
    file.close()
}

/// Like [`write_reader`], but refuses to replace an existing file.
pub fn safe_write_reader<F: Filesystem + ?Sized>(
    fs: &F,
    path: &str,
    reader: &mut dyn Read,
) -> crate::Result<()> {
    let path = normalize_path(path);
    fs.mkdir_all(parent_path(&path), 0o777)?;

    if exists(fs, &path)? {
        return Err(already_exists("write", &path));
    }
    write_reader(fs, &path, reader)
}

/// Creates a uniquely-named directory under `parent` (or `/tmp` when empty)
/// and returns its path.
pub fn temp_dir<F: Filesystem + ?Sized>(
    fs: &F,
    parent: &str,
    prefix: &str,
) -> crate::Result<String> {
    let parent = sanitized_parent(fs, parent)?;

    for _ in 0..10_000 {
        let dir = join_path(&parent, &format!("{prefix}{}", rand::random::<u32>()));
        match fs.mkdir(&dir, 0o700) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(invalid_input("temp_dir: gave up finding a free name"))
}

/// Creates and opens a uniquely-named file under `parent` (or `/tmp` when
/// empty).
pub fn temp_file<F: Filesystem + ?Sized>(
    fs: &F,
    parent: &str,
    prefix: &str,
) -> crate::Result<Box<dyn File>> {
    let parent = sanitized_parent(fs, parent)?;

    for _ in 0..10_000 {
        let path = join_path(&parent, &format!("{prefix}{}", rand::random::<u32>()));
        match fs.open_file(&path, &OpenOptions::new().read(true).create_new(true), 0o600) {
            Ok(file) => return Ok(file),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(invalid_input("temp_file: gave up finding a free name"))
}

fn sanitized_parent<F: Filesystem + ?Sized>(fs: &F, parent: &str) -> crate::Result<String> {
    let parent = if parent.is_empty() {
        "/tmp".to_owned()
    } else {
        normalize_path(&unicode_sanitize(parent))
    };
    fs.mkdir_all(&parent, 0o777)?;
    Ok(parent)
}

/// Rewrites a string to remove non-standard path characters, keeping letters,
/// digits, marks, and `. / \ _ - % ' ' #`.
pub fn unicode_sanitize(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            c.is_alphanumeric()
                || matches!(c, '.' | '/' | '\\' | '_' | '-' | '%' | ' ' | '#')
        })
        .collect()
}

/// Returns whether the file at `path` contains `subslice`.
pub fn file_contains_bytes<F: Filesystem + ?Sized>(
    fs: &F,
    path: &str,
    subslice: &[u8],
) -> crate::Result<bool> {
    let mut file = fs.open(path)?;
    let found = reader_contains_any(&mut *file, &[subslice]);
    file.close()?;
    Ok(found)
}

/// Returns whether the file at `path` contains any of `subslices`.
pub fn file_contains_any_bytes<F: Filesystem + ?Sized>(
    fs: &F,
    path: &str,
    subslices: &[&[u8]],
) -> crate::Result<bool> {
    let mut file = fs.open(path)?;
    let found = reader_contains_any(&mut *file, subslices);
    file.close()?;
    Ok(found)
}

/// Reports whether any of `subslices` occurs in the reader's byte stream.
///
/// The scan keeps a window of four times the longest subslice and shifts it by
/// half its length between refills, so matches straddling a refill boundary
/// are still seen.
pub fn reader_contains_any<R: Read + ?Sized>(reader: &mut R, subslices: &[&[u8]]) -> bool {
    let largest = subslices.iter().map(|sl| sl.len()).max().unwrap_or(0);
    if largest == 0 {
        return false;
    }

    let buf_len = largest * 4;
    let half_len = buf_len / 2;
    let mut buf = vec![0u8; buf_len];

    let mut round = 0usize;
    loop {
        round += 1;
        let (n, err) = if round == 1 {
            read_at_least(reader, &mut buf[..half_len])
        } else {
            if round != 2 {
                // shift left to catch matches overlapping the refill boundary
                buf.copy_within(half_len.., 0);
            }
            read_at_least(reader, &mut buf[half_len..])
        };

        if n > 0
            && subslices
                .iter()
                .any(|sl| buf.windows(sl.len()).any(|window| window == *sl))
        {
            return true;
        }

        if err {
            return false;
        }
    }
}

/// Fills as much of `buf` as the reader allows; the flag reports end of input
/// or a read failure.
fn read_at_least<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> (usize, bool) {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return (filled, true),
            Ok(n) => filled += n,
            Err(_) => return (filled, true),
        }
    }
    (filled, false)
}
