use crate::file::{FileInfo, MODE_DIR};
use crate::util::base_name;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::time::SystemTime;

/// A single file or directory node.
///
/// The store owns every node; directories track their children by component
/// name only, so a rename never has to chase pointers back up the tree.
pub(crate) struct FileNode {
    pub(crate) inner: RwLock<NodeInner>,
}

pub(crate) struct NodeInner {
    /// The absolute normalized path of the node.
    pub name: String,
    /// Raw file content; empty and ignored for directories.
    pub content: Vec<u8>,
    /// Mode word; [`MODE_DIR`] marks directories.
    pub mode: u32,
    pub modified: SystemTime,
    /// Component names of the children, sorted. Directories only.
    pub children: BTreeSet<String>,
}

impl FileNode {
    pub(crate) fn file(name: String, mode: u32) -> Self {
        Self::with_mode(name, mode & !MODE_DIR)
    }

    pub(crate) fn directory(name: String, mode: u32) -> Self {
        Self::with_mode(name, mode | MODE_DIR)
    }

    fn with_mode(name: String, mode: u32) -> Self {
        Self {
            inner: RwLock::new(NodeInner {
                name,
                content: Vec::new(),
                mode,
                modified: SystemTime::now(),
                children: BTreeSet::new(),
            }),
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.inner.read().mode & MODE_DIR != 0
    }

    pub(crate) fn size(&self) -> u64 {
        self.inner.read().content.len() as u64
    }

    pub(crate) fn info(&self) -> FileInfo {
        let inner = self.inner.read();
        FileInfo {
            name: base_name(&inner.name).to_owned(),
            size: if inner.mode & MODE_DIR != 0 {
                0
            } else {
                inner.content.len() as u64
            },
            mode: inner.mode,
            modified: inner.modified,
        }
    }

    /// Writes `buf` into the content at `offset`, zero-filling any gap past
    /// the current end, and touches the modification time.
    pub(crate) fn splice(&self, offset: u64, buf: &[u8]) -> usize {
        let mut inner = self.inner.write();
        let pos = offset as usize;
        let end = pos + buf.len();
        if end > inner.content.len() {
            inner.content.resize(end, 0);
        }
        inner.content[pos..end].copy_from_slice(buf);
        inner.modified = SystemTime::now();
        buf.len()
    }

    /// Shortens or zero-extends the content to exactly `size` bytes.
    pub(crate) fn resize(&self, size: u64) {
        let mut inner = self.inner.write();
        inner.content.resize(size as usize, 0);
        inner.modified = SystemTime::now();
    }
}
