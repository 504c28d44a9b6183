mod file;
mod node;

use crate::file::{FileInfo, OpenOptions};
use crate::mem_fs::file::{AccessMode, FileHandle};
use crate::mem_fs::node::FileNode;
use crate::util::{
    already_exists, ancestor_chain, base_name, directory_not_empty, invalid_input, is_a_directory,
    normalize_path, not_a_directory, not_found, parent_path, SEPARATOR,
};
use crate::{File, Filesystem};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use std::time::SystemTime;

use crate::file::MODE_DIR;

type Store = HashMap<String, Arc<FileNode>>;

/// A memory-backed filesystem. All nodes are stored within.
///
/// Cloning is cheap and yields a second handle onto the same store, which is
/// how one store is shared between an overlay and direct access in tests.
#[derive(Clone)]
pub struct MemFs {
    state: Arc<State>,
}

/// The node store. Membership is guarded by one store-level lock; each node
/// guards its own content and child-set. Lock order is store before node, and
/// never two node locks at once.
pub(crate) struct State {
    pub(crate) data: RwLock<Store>,
}

impl MemFs {
    /// Creates an empty filesystem containing only the root directory.
    pub fn new() -> Self {
        let mut data = Store::new();
        data.insert(
            SEPARATOR.to_owned(),
            Arc::new(FileNode::directory(SEPARATOR.to_owned(), 0o755)),
        );
        Self {
            state: Arc::new(State {
                data: RwLock::new(data),
            }),
        }
    }

    fn lookup(&self, path: &str) -> Option<Arc<FileNode>> {
        self.state.data.read().get(path).cloned()
    }

    fn handle(&self, node: Arc<FileNode>, name: String, options: &OpenOptions) -> FileHandle {
        FileHandle::new(
            Arc::clone(&self.state),
            node,
            name,
            AccessMode::from_options(options),
        )
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates every missing directory along `path` (inclusive) and links each new
/// node into its parent's child-set. Fails when a regular file occupies any
/// prefix of the path.
fn ensure_dirs(data: &mut Store, path: &str, mode: u32) -> crate::Result<()> {
    for prefix in ancestor_chain(path) {
        match data.get(prefix) {
            Some(node) if node.is_dir() => {}
            Some(_) => return Err(not_a_directory("mkdir", prefix)),
            None => {
                let node = Arc::new(FileNode::directory(prefix.to_owned(), mode));
                insert_node(data, prefix, node);
            }
        }
    }
    Ok(())
}

/// Inserts `node` at `path` and registers it with its parent, which must
/// already exist as a directory.
fn insert_node(data: &mut Store, path: &str, node: Arc<FileNode>) {
    data.insert(path.to_owned(), node);
    if path != SEPARATOR {
        if let Some(parent) = data.get(parent_path(path)) {
            parent
                .inner
                .write()
                .children
                .insert(base_name(path).to_owned());
        }
    }
}

fn unlink_child(data: &mut Store, path: &str) {
    if path == SEPARATOR {
        return;
    }
    if let Some(parent) = data.get(parent_path(path)) {
        parent.inner.write().children.remove(base_name(path));
    }
}

impl Filesystem for MemFs {
    fn create(&self, path: &str) -> crate::Result<Box<dyn File>> {
        self.open_file(
            path,
            &OpenOptions::new().write(true).create(true).truncate(true),
            0o666,
        )
    }

    fn mkdir(&self, path: &str, mode: u32) -> crate::Result<()> {
        let path = normalize_path(path);
        let mut data = self.state.data.write();
        if data.contains_key(&path) {
            return Err(already_exists("mkdir", &path));
        }
        ensure_dirs(&mut data, parent_path(&path), 0o777)?;
        let node = Arc::new(FileNode::directory(path.clone(), mode));
        insert_node(&mut data, &path, node);
        Ok(())
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> crate::Result<()> {
        let path = normalize_path(path);
        let mut data = self.state.data.write();
        match data.get(&path) {
            Some(node) if node.is_dir() => Ok(()),
            Some(_) => Err(already_exists("mkdir", &path)),
            None => ensure_dirs(&mut data, &path, mode),
        }
    }

    fn open(&self, path: &str) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);
        let node = self
            .lookup(&path)
            .ok_or_else(|| not_found("open", &path))?;
        Ok(Box::new(self.handle(node, path, &OpenOptions::new())))
    }

    fn open_file(
        &self,
        path: &str,
        options: &OpenOptions,
        mode: u32,
    ) -> crate::Result<Box<dyn File>> {
        let path = normalize_path(path);

        let node = if options.create || options.create_new {
            let mut data = self.state.data.write();
            match data.get(&path) {
                Some(node) => {
                    if options.create_new {
                        return Err(already_exists("open", &path));
                    }
                    if node.is_dir() && options.write_intent() {
                        return Err(is_a_directory("open", &path));
                    }
                    Arc::clone(node)
                }
                None => {
                    ensure_dirs(&mut data, parent_path(&path), 0o777)?;
                    let node = Arc::new(FileNode::file(path.clone(), mode));
                    insert_node(&mut data, &path, Arc::clone(&node));
                    node
                }
            }
        } else {
            let node = self
                .lookup(&path)
                .ok_or_else(|| not_found("open", &path))?;
            if node.is_dir() && options.write_intent() {
                return Err(is_a_directory("open", &path));
            }
            node
        };

        let mut handle = self.handle(node, path, options);
        if options.truncate && options.write {
            File::truncate(&mut handle, 0)?;
        }
        if options.append {
            handle.seek(SeekFrom::End(0))?;
        }
        Ok(Box::new(handle))
    }

    fn remove(&self, path: &str) -> crate::Result<()> {
        let path = normalize_path(path);
        if path == SEPARATOR {
            return Err(invalid_input("remove /: operation not permitted"));
        }

        let mut data = self.state.data.write();
        let node = data
            .get(&path)
            .cloned()
            .ok_or_else(|| not_found("remove", &path))?;
        if node.is_dir() && !node.inner.read().children.is_empty() {
            return Err(directory_not_empty("remove", &path));
        }

        unlink_child(&mut data, &path);
        data.remove(&path);
        Ok(())
    }

    fn remove_all(&self, path: &str) -> crate::Result<()> {
        let path = normalize_path(path);
        let mut data = self.state.data.write();

        if path == SEPARATOR {
            data.retain(|key, _| key == SEPARATOR);
            if let Some(root) = data.get(SEPARATOR) {
                root.inner.write().children.clear();
            }
            return Ok(());
        }

        if !data.contains_key(&path) {
            return Ok(());
        }
        unlink_child(&mut data, &path);
        let prefix = format!("{path}/");
        data.retain(|key, _| key != &path && !key.starts_with(&prefix));
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> crate::Result<()> {
        let old = normalize_path(old);
        let new = normalize_path(new);
        if old == new {
            return Ok(());
        }
        if old == SEPARATOR || new == SEPARATOR {
            return Err(invalid_input("rename: cannot rename the root directory"));
        }
        let subtree_prefix = format!("{old}/");
        if new.starts_with(&subtree_prefix) {
            return Err(invalid_input(
                "rename: cannot move a directory into itself",
            ));
        }

        let mut data = self.state.data.write();
        let node = data
            .get(&old)
            .cloned()
            .ok_or_else(|| not_found("rename", &old))?;
        if matches!(data.get(&new), Some(existing) if existing.is_dir()) {
            return Err(already_exists("rename", &new));
        }

        ensure_dirs(&mut data, parent_path(&new), 0o777)?;
        unlink_child(&mut data, &old);
        data.remove(&old);

        // a directory brings its whole subtree with it
        if node.is_dir() {
            let descendants: Vec<String> = data
                .keys()
                .filter(|key| key.starts_with(&subtree_prefix))
                .cloned()
                .collect();
            for key in descendants {
                let moved = data.remove(&key).unwrap();
                let new_key = format!("{new}{}", &key[old.len()..]);
                moved.inner.write().name = new_key.clone();
                data.insert(new_key, moved);
            }
        }

        node.inner.write().name = new.clone();
        insert_node(&mut data, &new, node);
        Ok(())
    }

    fn stat(&self, path: &str) -> crate::Result<FileInfo> {
        let path = normalize_path(path);
        self.lookup(&path)
            .map(|node| node.info())
            .ok_or_else(|| not_found("stat", &path))
    }

    fn chmod(&self, path: &str, mode: u32) -> crate::Result<()> {
        let path = normalize_path(path);
        let node = self
            .lookup(&path)
            .ok_or_else(|| not_found("chmod", &path))?;
        let mut inner = node.inner.write();
        let dir_bit = inner.mode & MODE_DIR;
        inner.mode = (mode & !MODE_DIR) | dir_bit;
        Ok(())
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, mtime: SystemTime) -> crate::Result<()> {
        let path = normalize_path(path);
        let node = self
            .lookup(&path)
            .ok_or_else(|| not_found("chtimes", &path))?;
        node.inner.write().modified = mtime;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MemFs"
    }
}
