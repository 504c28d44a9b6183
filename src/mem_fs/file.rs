use crate::file::{File, FileInfo, OpenOptions};
use crate::mem_fs::node::FileNode;
use crate::mem_fs::State;
use crate::util::{
    end_of_stream, file_closed, invalid_input, is_a_directory, join_path, not_a_directory,
    permission_denied,
};
use enumflags2::{bitflags, BitFlags};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// The handle access mode.
#[bitflags]
#[derive(Debug, Copy, Clone)]
#[repr(u8)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    /// Collects the access bits from the associated open options.
    pub fn from_options(options: &OpenOptions) -> BitFlags<Self> {
        let mut mode = BitFlags::empty();
        if options.read {
            mode.insert(AccessMode::Read);
        }
        if options.write || options.append || options.truncate {
            mode.insert(AccessMode::Write);
        }
        mode
    }
}

/// A handle onto one node of a [`super::MemFs`].
///
/// The byte cursor belongs to the handle; the content belongs to the node, so
/// every handle to the same file observes the same bytes. Directory handles
/// snapshot the child listing at the first page request and serve subsequent
/// pages from the snapshot.
pub struct FileHandle {
    state: Arc<State>,
    node: Arc<FileNode>,
    name: String,
    pos: u64,
    access: BitFlags<AccessMode>,
    closed: bool,
    dir_entries: Option<Vec<FileInfo>>,
    dir_offset: usize,
}

impl FileHandle {
    pub(crate) fn new(
        state: Arc<State>,
        node: Arc<FileNode>,
        name: String,
        access: BitFlags<AccessMode>,
    ) -> Self {
        Self {
            state,
            node,
            name,
            pos: 0,
            access,
            closed: false,
            dir_entries: None,
            dir_offset: 0,
        }
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(file_closed(&self.name))
        } else {
            Ok(())
        }
    }

    fn check_access(&self, required: AccessMode, op: &str) -> io::Result<()> {
        if self.access.contains(required) {
            Ok(())
        } else {
            Err(permission_denied(op, &self.name))
        }
    }

    fn check_file(&self, op: &str) -> io::Result<()> {
        if self.node.is_dir() {
            Err(is_a_directory(op, &self.name))
        } else {
            Ok(())
        }
    }

    /// Takes the directory snapshot if it has not been taken yet.
    ///
    /// The store lock is held shared while child metadata is collected; node
    /// locks are taken one at a time underneath it.
    fn snapshot_dir(&mut self) -> io::Result<()> {
        if self.dir_entries.is_some() {
            return Ok(());
        }
        if !self.node.is_dir() {
            return Err(not_a_directory("readdir", &self.name));
        }

        let data = self.state.data.read();
        let (dir_path, children) = {
            let inner = self.node.inner.read();
            (inner.name.clone(), inner.children.iter().cloned().collect::<Vec<_>>())
        };
        let entries = children
            .iter()
            .filter_map(|child| data.get(&join_path(&dir_path, child)).map(|node| node.info()))
            .collect();

        self.dir_entries = Some(entries);
        Ok(())
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        self.check_access(AccessMode::Read, "read")?;
        self.check_file("read")?;

        let inner = self.node.inner.read();
        let pos = (self.pos as usize).min(inner.content.len());
        let n = (&inner.content[pos..]).read(buf)?;
        self.pos += n as u64;

        Ok(n)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        self.check_access(AccessMode::Write, "write")?;
        self.check_file("write")?;

        let n = self.node.splice(self.pos, buf);
        self.pos += n as u64;

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open()
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_open()?;

        let (base_pos, offset) = match pos {
            SeekFrom::Start(n) => {
                self.pos = n;
                return Ok(n);
            }
            SeekFrom::Current(n) => (self.pos, n),
            SeekFrom::End(n) => (self.node.size(), n),
        };

        if let Some(n) = base_pos.checked_add_signed(offset) {
            self.pos = n;
            Ok(n)
        } else {
            Err(invalid_input(
                "invalid seek to a negative or overflowing position",
            ))
        }
    }
}

impl File for FileHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> crate::Result<FileInfo> {
        Ok(self.node.info())
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        self.check_open()?;
        self.check_access(AccessMode::Read, "read")?;
        self.check_file("read")?;

        let inner = self.node.inner.read();
        let pos = (offset as usize).min(inner.content.len());
        (&inner.content[pos..]).read(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> crate::Result<usize> {
        self.check_open()?;
        self.check_access(AccessMode::Write, "write")?;
        self.check_file("write")?;

        Ok(self.node.splice(offset, buf))
    }

    fn truncate(&mut self, size: u64) -> crate::Result<()> {
        self.check_open()?;
        self.check_access(AccessMode::Write, "truncate")?;
        self.check_file("truncate")?;

        self.node.resize(size);
        Ok(())
    }

    fn sync(&mut self) -> crate::Result<()> {
        self.check_open()
    }

    fn close(&mut self) -> crate::Result<()> {
        self.check_open()?;
        self.closed = true;
        Ok(())
    }

    fn readdir(&mut self, count: isize) -> crate::Result<Vec<FileInfo>> {
        self.check_open()?;
        self.snapshot_dir()?;

        let entries = self.dir_entries.as_ref().unwrap();
        if count <= 0 {
            let page = entries[self.dir_offset..].to_vec();
            self.dir_offset = entries.len();
            return Ok(page);
        }

        let remaining = entries.len() - self.dir_offset;
        if remaining == 0 {
            return Err(end_of_stream());
        }
        let n = remaining.min(count as usize);
        let page = entries[self.dir_offset..self.dir_offset + n].to_vec();
        self.dir_offset += n;
        Ok(page)
    }
}
