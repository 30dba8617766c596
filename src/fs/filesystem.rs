//! User-level file system facade
//!
//! Assembles the tree engine, node and blob stores, version manager, and
//! saver into one object with directory-style operations. The object
//! graph is wired here at construction; there is no hidden process-wide
//! state, and a caller wanting thread safety wraps the whole value in a
//! mutex.
//!
//! Opening loads the persisted tables (falling back to a fresh single
//! empty version when nothing loads) and positions the cursor in the
//! latest version's root. Closing persists every table and compacts the
//! write-ahead log into the snapshot.

use crate::error::{VfsError, VfsResult};
use crate::fs::blob_store::BlobStore;
use crate::fs::node_store::NodeStore;
use crate::fs::tree::{NodeKind, TreeEngine};
use crate::fs::version::{VersionManager, VersionSummary};
use crate::store::{Saver, SaverOptions};
use log::{error, info, warn};

/// Persistent branching virtual file system.
pub struct FileSystem {
    engine: TreeEngine,
    nodes: NodeStore,
    blobs: BlobStore,
    versions: VersionManager,
    saver: Saver,
    current_version: u64,
    closed: bool,
}

impl FileSystem {
    /// Open (or create) a file system persisted at the locations in
    /// `options`.
    pub fn open(options: SaverOptions) -> VfsResult<Self> {
        let mut saver = Saver::new(options)?;
        saver.initialize()?;

        let mut engine = TreeEngine::new();
        let mut nodes = NodeStore::new();
        let mut blobs = BlobStore::new();
        let mut versions = VersionManager::new();

        let loaded = Self::load_tables(&mut engine, &mut nodes, &mut blobs, &mut versions, &saver);
        if let Err(err) = loaded {
            info!("starting with a fresh tree ({})", err);
            engine = TreeEngine::new();
            nodes = NodeStore::new();
            blobs = BlobStore::new();
            versions = VersionManager::new();
        }

        let mut fs = Self {
            engine,
            nodes,
            blobs,
            versions,
            saver,
            current_version: 0,
            closed: false,
        };
        if fs.versions.is_empty() {
            fs.create_version(None, "")?;
        } else {
            fs.switch_version(fs.versions.latest()?)?;
        }
        Ok(fs)
    }

    fn load_tables(
        engine: &mut TreeEngine,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
        versions: &mut VersionManager,
        saver: &Saver,
    ) -> VfsResult<()> {
        blobs.load(saver)?;
        nodes.load(saver)?;
        versions.load(engine, saver)
    }

    /// Persist every table and compact the log. Idempotent; called by
    /// `Drop` as a best effort if the caller forgot.
    pub fn close(&mut self) -> VfsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.blobs.save(&mut self.saver)?;
        self.nodes.save(&mut self.saver)?;
        self.versions.save(&self.engine, &mut self.saver)?;
        self.saver.shutdown()?;
        self.closed = true;
        Ok(())
    }

    // ----- version operations -----

    /// Fork a new version and switch to it. `model` of `None` creates an
    /// empty version.
    pub fn create_version(&mut self, model: Option<u64>, info: &str) -> VfsResult<u64> {
        let id = self.versions.fork(
            &mut self.engine,
            &mut self.nodes,
            &mut self.blobs,
            model,
            info,
        )?;
        self.switch_version(id)?;
        Ok(id)
    }

    /// Fork the current version and switch to the fork.
    pub fn branch(&mut self, info: &str) -> VfsResult<u64> {
        self.create_version(Some(self.current_version), info)
    }

    /// Re-point the cursor at a version's root directory.
    pub fn switch_version(&mut self, id: u64) -> VfsResult<()> {
        let root = self.versions.get_root(id)?;
        self.engine.set_root(root)?;
        self.current_version = id;
        Ok(())
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    pub fn versions(&self) -> Vec<VersionSummary> {
        self.versions.enumerate()
    }

    // ----- directory operations -----

    pub fn mkdir(&mut self, name: &str) -> VfsResult<()> {
        self.engine
            .insert(NodeKind::Dir, name, &mut self.nodes, &mut self.blobs)
    }

    pub fn make_file(&mut self, name: &str) -> VfsResult<()> {
        self.engine
            .insert(NodeKind::File, name, &mut self.nodes, &mut self.blobs)
    }

    pub fn chdir(&mut self, name: &str) -> VfsResult<()> {
        self.engine.chdir(name, &self.nodes)
    }

    pub fn to_parent(&mut self) -> VfsResult<()> {
        self.engine.to_parent()
    }

    /// Child names of the current directory, in creation order.
    pub fn ls(&mut self) -> VfsResult<Vec<String>> {
        self.engine.list(&self.nodes)
    }

    /// Absolute path of the current directory, `/`-separated.
    pub fn pwd(&mut self) -> VfsResult<String> {
        let components = self.engine.current_path(&self.nodes)?;
        // The root's own name is not part of the user-visible path.
        let mut path = String::from("/");
        if components.len() > 1 {
            path.push_str(&components[1..].join("/"));
        }
        Ok(path)
    }

    pub fn rm(&mut self, name: &str) -> VfsResult<()> {
        self.engine
            .remove_file(name, &mut self.nodes, &mut self.blobs)
    }

    pub fn rmdir(&mut self, name: &str) -> VfsResult<()> {
        self.engine
            .remove_dir(name, &mut self.nodes, &mut self.blobs)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> VfsResult<()> {
        self.engine
            .rename(from, to, &mut self.nodes, &mut self.blobs)
    }

    // ----- file operations -----

    pub fn update_content(&mut self, name: &str, content: &str) -> VfsResult<()> {
        self.engine
            .update_content(name, content, &mut self.nodes, &mut self.blobs)
    }

    pub fn get_content(&mut self, name: &str) -> VfsResult<String> {
        let (kind, payload) = self.engine.stat(name, &self.nodes)?;
        if kind != NodeKind::File {
            return Err(VfsError::WrongKind {
                name: name.to_string(),
                expected: "file",
            });
        }
        self.nodes.content(payload, &self.blobs)
    }

    pub fn get_ctime(&mut self, name: &str) -> VfsResult<String> {
        let (_, payload) = self.engine.stat(name, &self.nodes)?;
        Ok(self.nodes.ctime(payload)?.to_string())
    }

    pub fn get_mtime(&mut self, name: &str) -> VfsResult<String> {
        let (_, payload) = self.engine.stat(name, &self.nodes)?;
        Ok(self.nodes.mtime(payload)?.to_string())
    }

    pub fn get_kind(&mut self, name: &str) -> VfsResult<NodeKind> {
        let (kind, _) = self.engine.stat(name, &self.nodes)?;
        Ok(kind)
    }

    // ----- whole-tree operations -----

    /// Unix-`tree`-style rendering of the current version.
    pub fn tree_text(&self) -> VfsResult<String> {
        let root = self.versions.get_root(self.current_version)?;
        self.engine.render_tree(root, &self.nodes)
    }

    /// Search the current version for names containing `needle`.
    pub fn find(&self, needle: &str) -> VfsResult<Vec<(String, Vec<String>)>> {
        let root = self.versions.get_root(self.current_version)?;
        self.engine.find(root, needle, &self.nodes)
    }

    /// The underlying saver, for collaborators that persist their own
    /// tables alongside the file system's (e.g. the shell registry).
    pub fn saver(&self) -> &Saver {
        &self.saver
    }

    pub fn saver_mut(&mut self) -> &mut Saver {
        &mut self.saver
    }

    // ----- diagnostics used by tests -----

    #[cfg(test)]
    pub(crate) fn stores(&self) -> (&NodeStore, &BlobStore) {
        (&self.nodes, &self.blobs)
    }

    #[cfg(test)]
    pub(crate) fn arena_live_count(&self) -> usize {
        self.engine.arena.live_count()
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                error!("failed to persist file system state on drop: {}", err);
            } else {
                warn!("file system dropped without close(); state saved");
            }
        }
    }
}
