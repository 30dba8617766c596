//! Copy-on-write n-ary tree engine
//!
//! The file tree is stored left-child/right-sibling in a handle-based
//! arena. Every directory owns a `Head` sentinel as its first child, so
//! the children of a directory are the sentinel's sibling chain, so
//! insertion at the front needs no special case.
//!
//! ```text
//! Dir ── first_child ──▶ Head ── next_sibling ──▶ child ──▶ child ──▶ ∅
//!                                                   │
//!                                              first_child (if Dir)
//! ```
//!
//! Nodes are reference-counted across versions. A node with share count 1
//! may be mutated in place; a shared node must be cloned first. The
//! engine keeps a navigation cursor, a stack of handles alternating
//! `[Dir, Head, Dir, Head, .., X]`, and every mutation funnels through
//! [`TreeEngine::rebuild_to`], which walks the cursor from the top,
//! cloning shared nodes and re-linking until it reaches an unshared node
//! it can edit in place. Untouched subtrees stay shared with the versions
//! that still reference them.

use crate::error::{VfsError, VfsResult};
use crate::fs::blob_store::BlobStore;
use crate::fs::node_store::NodeStore;
use log::error;
use rustc_hash::FxHashMap;

/// Index of a tree node in the arena.
pub type Handle = usize;

/// Names and search needles at or above this length never match.
const MAX_NAME_LEN: usize = 1000;

/// Node classification. `Head` is the sentinel sibling-list prefix owned
/// by its parent directory; it never corresponds to a user-visible name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
    Head,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Dir => "directory",
            NodeKind::Head => "head",
        }
    }
}

/// One arena entry.
///
/// `child_index` is a lazily built name → handle cache over the sibling
/// chain, present only on directories. It is never the source of truth
/// (the chain is) and is dropped, not copied, whenever a node is cloned.
#[derive(Debug)]
pub struct TreeNode {
    pub kind: NodeKind,
    pub share: u64,
    pub payload: Option<u64>,
    pub next_sibling: Option<Handle>,
    pub first_child: Option<Handle>,
    pub child_index: Option<FxHashMap<String, Handle>>,
}

/// Slab of tree nodes with a free list.
#[derive(Default)]
pub struct TreeArena {
    nodes: Vec<Option<TreeNode>>,
    free: Vec<Handle>,
}

impl TreeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: TreeNode) -> Handle {
        match self.free.pop() {
            Some(handle) => {
                self.nodes[handle] = Some(node);
                handle
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Allocate a file node with share count 1.
    pub fn alloc_file(&mut self, payload: u64) -> Handle {
        self.alloc(TreeNode {
            kind: NodeKind::File,
            share: 1,
            payload: Some(payload),
            next_sibling: None,
            first_child: None,
            child_index: None,
        })
    }

    /// Allocate a head sentinel with share count 1.
    pub fn alloc_head(&mut self) -> Handle {
        self.alloc(TreeNode {
            kind: NodeKind::Head,
            share: 1,
            payload: None,
            next_sibling: None,
            first_child: None,
            child_index: None,
        })
    }

    /// Allocate a directory node together with its head sentinel.
    pub fn alloc_dir(&mut self, payload: u64) -> Handle {
        let head = self.alloc_head();
        self.alloc(TreeNode {
            kind: NodeKind::Dir,
            share: 1,
            payload: Some(payload),
            next_sibling: None,
            first_child: Some(head),
            child_index: Some(FxHashMap::default()),
        })
    }

    pub fn free(&mut self, handle: Handle) {
        if handle < self.nodes.len() && self.nodes[handle].is_some() {
            self.nodes[handle] = None;
            self.free.push(handle);
        }
    }

    pub fn get(&self, handle: Handle) -> VfsResult<&TreeNode> {
        self.nodes.get(handle).and_then(Option::as_ref).ok_or_else(|| {
            error!("dangling tree handle {}", handle);
            VfsError::Invariant(format!("dangling tree handle {}", handle))
        })
    }

    pub fn get_mut(&mut self, handle: Handle) -> VfsResult<&mut TreeNode> {
        self.nodes.get_mut(handle).and_then(Option::as_mut).ok_or_else(|| {
            error!("dangling tree handle {}", handle);
            VfsError::Invariant(format!("dangling tree handle {}", handle))
        })
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.nodes.get(handle).map_or(false, Option::is_some)
    }

    /// Number of live nodes, used by the refcount tests.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }
}

/// Navigation cursor plus the mutation protocol over a [`TreeArena`].
#[derive(Default)]
pub struct TreeEngine {
    pub(crate) arena: TreeArena,
    cursor: Vec<Handle>,
    cached_path: Option<Vec<String>>,
}

impl TreeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalidate_path_cache(&mut self) {
        self.cached_path = None;
    }

    fn top(&self) -> VfsResult<Handle> {
        self.cursor.last().copied().ok_or_else(|| {
            error!("navigation cursor is empty");
            VfsError::Invariant("navigation cursor is empty".to_string())
        })
    }

    fn check_cursor(&self) -> VfsResult<()> {
        if self.cursor.is_empty() {
            error!("navigation cursor is empty");
            return Err(VfsError::Invariant("navigation cursor is empty".to_string()));
        }
        for &handle in &self.cursor {
            self.arena.get(handle)?;
        }
        Ok(())
    }

    /// Point the cursor at a version root: `[root, root.head]`.
    pub fn set_root(&mut self, root: Handle) -> VfsResult<()> {
        let node = self.arena.get(root)?;
        if node.kind != NodeKind::Dir {
            return Err(VfsError::Invariant("version root is not a directory".to_string()));
        }
        let head = node.first_child.ok_or_else(|| {
            error!("version root has no head sentinel");
            VfsError::Invariant("version root has no head sentinel".to_string())
        })?;
        self.invalidate_path_cache();
        self.cursor.clear();
        self.cursor.push(root);
        self.cursor.push(head);
        Ok(())
    }

    /// Pop the cursor until its top is a head sentinel.
    pub fn to_head(&mut self) -> VfsResult<()> {
        self.check_cursor()?;
        while let Some(&top) = self.cursor.last() {
            if self.arena.get(top)?.kind == NodeKind::Head {
                return Ok(());
            }
            self.invalidate_path_cache();
            self.cursor.pop();
        }
        error!("cursor exhausted while seeking a head sentinel");
        Err(VfsError::Invariant("cursor has no head sentinel".to_string()))
    }

    /// From the current position, follow sibling links to the chain end.
    pub fn to_tail(&mut self) -> VfsResult<()> {
        self.check_cursor()?;
        loop {
            let top = self.top()?;
            match self.arena.get(top)?.next_sibling {
                Some(next) => {
                    self.invalidate_path_cache();
                    self.cursor.push(next);
                }
                None => return Ok(()),
            }
        }
    }

    /// Step out to the enclosing directory; a no-op at the root.
    pub fn to_parent(&mut self) -> VfsResult<()> {
        self.to_head()?;
        if self.cursor.len() > 2 {
            self.invalidate_path_cache();
            self.cursor.pop();
        }
        Ok(())
    }

    /// Directory owning the sibling chain the cursor currently sits in.
    /// Valid immediately after [`Self::to_head`].
    fn parent_dir(&self) -> VfsResult<Handle> {
        if self.cursor.len() < 2 {
            error!("cursor too short to have a parent directory");
            return Err(VfsError::Invariant("cursor has no parent directory".to_string()));
        }
        Ok(self.cursor[self.cursor.len() - 2])
    }

    /// Build the name cache for `dir` from its sibling chain if absent.
    fn ensure_child_index(&mut self, dir: Handle, nodes: &NodeStore) -> VfsResult<()> {
        {
            let node = self.arena.get(dir)?;
            if node.kind != NodeKind::Dir || node.child_index.is_some() {
                return Ok(());
            }
        }
        let mut index = FxHashMap::default();
        let head = self.arena.get(dir)?.first_child.ok_or_else(|| {
            error!("directory without head sentinel");
            VfsError::Invariant("directory without head sentinel".to_string())
        })?;
        let mut cursor = self.arena.get(head)?.next_sibling;
        while let Some(handle) = cursor {
            let node = self.arena.get(handle)?;
            if let Some(payload) = node.payload {
                index.insert(nodes.name(payload)?.to_string(), handle);
            }
            cursor = node.next_sibling;
        }
        self.arena.get_mut(dir)?.child_index = Some(index);
        Ok(())
    }

    /// Drop the name cache of `dir` (if it is still live and a directory).
    fn clear_child_index(&mut self, dir: Handle) {
        if let Some(Some(node)) = self.arena.nodes.get_mut(dir) {
            if node.kind == NodeKind::Dir {
                node.child_index = None;
            }
        }
    }

    /// Look up `name` among the current directory's children.
    fn lookup_child(&mut self, name: &str, nodes: &NodeStore) -> VfsResult<Option<Handle>> {
        self.to_head()?;
        let parent = self.parent_dir()?;
        self.ensure_child_index(parent, nodes)?;
        if let Some(index) = &self.arena.get(parent)?.child_index {
            return Ok(index.get(name).copied());
        }
        // Cache unavailable: linear walk over the sibling chain.
        let mut cursor = self.arena.get(self.top()?)?.next_sibling;
        while let Some(handle) = cursor {
            let node = self.arena.get(handle)?;
            if let Some(payload) = node.payload {
                if nodes.name(payload)? == name {
                    return Ok(Some(handle));
                }
            }
            cursor = node.next_sibling;
        }
        Ok(None)
    }

    /// Whether `name` exists in the current directory.
    pub fn name_exists(&mut self, name: &str, nodes: &NodeStore) -> VfsResult<bool> {
        Ok(self.lookup_child(name, nodes)?.is_some())
    }

    /// Move the cursor onto the named child. The whole sibling run from
    /// the head sentinel to the child is pushed; the rebuild protocol
    /// relies on the cursor carrying each node's physical predecessor.
    /// Entering a directory additionally pushes its head sentinel,
    /// leaving the cursor ready to enumerate.
    pub fn enter_child(&mut self, name: &str, nodes: &NodeStore) -> VfsResult<()> {
        let child = self
            .lookup_child(name, nodes)?
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        self.invalidate_path_cache();
        let mut link = self.arena.get(self.top()?)?.next_sibling;
        loop {
            let Some(handle) = link else {
                error!("child index entry points outside the sibling chain");
                return Err(VfsError::Invariant(
                    "child index entry points outside the sibling chain".to_string(),
                ));
            };
            self.cursor.push(handle);
            if handle == child {
                break;
            }
            link = self.arena.get(handle)?.next_sibling;
        }
        let node = self.arena.get(child)?;
        if node.kind == NodeKind::Dir {
            let head = node.first_child.ok_or_else(|| {
                error!("directory without head sentinel");
                VfsError::Invariant("directory without head sentinel".to_string())
            })?;
            self.cursor.push(head);
        }
        Ok(())
    }

    /// Like [`Self::enter_child`] but always stops on the named node
    /// itself, never inside it.
    fn enter_node(&mut self, name: &str, nodes: &NodeStore) -> VfsResult<()> {
        self.enter_child(name, nodes)?;
        if self.arena.get(self.top()?)?.kind == NodeKind::Head {
            self.invalidate_path_cache();
            self.cursor.pop();
        }
        Ok(())
    }

    /// Enter the named directory; files are rejected.
    pub fn chdir(&mut self, name: &str, nodes: &NodeStore) -> VfsResult<()> {
        self.enter_child(name, nodes)?;
        if self.arena.get(self.top()?)?.kind != NodeKind::Head {
            self.to_head()?;
            return Err(VfsError::WrongKind {
                name: name.to_string(),
                expected: "directory",
            });
        }
        Ok(())
    }

    /// Kind and payload id of the named child.
    pub fn stat(&mut self, name: &str, nodes: &NodeStore) -> VfsResult<(NodeKind, u64)> {
        self.enter_node(name, nodes)?;
        let node = self.arena.get(self.top()?)?;
        let payload = node.payload.ok_or_else(|| {
            error!("named node {} has no payload", name);
            VfsError::Invariant(format!("node {} has no payload", name))
        })?;
        Ok((node.kind, payload))
    }

    /// Child names of the current directory, in sibling-chain order.
    pub fn list(&mut self, nodes: &NodeStore) -> VfsResult<Vec<String>> {
        self.to_head()?;
        let mut names = Vec::new();
        let mut cursor = self.arena.get(self.top()?)?.next_sibling;
        while let Some(handle) = cursor {
            let node = self.arena.get(handle)?;
            if let Some(payload) = node.payload {
                names.push(nodes.name(payload)?.to_string());
            }
            cursor = node.next_sibling;
        }
        Ok(names)
    }

    /// Names from the root to the current directory. Cached until the
    /// cursor moves.
    ///
    /// The cursor may carry sibling runs between a head and the entered
    /// node; a directory belongs to the path exactly when its own head
    /// sentinel is the next cursor entry.
    pub fn current_path(&mut self, nodes: &NodeStore) -> VfsResult<Vec<String>> {
        self.to_head()?;
        if let Some(path) = &self.cached_path {
            return Ok(path.clone());
        }
        let mut path = Vec::new();
        for pair in self.cursor.windows(2) {
            let node = self.arena.get(pair[0])?;
            if node.kind != NodeKind::Dir || node.first_child != Some(pair[1]) {
                continue;
            }
            if let Some(payload) = node.payload {
                path.push(nodes.name(payload)?.to_string());
            }
        }
        self.cached_path = Some(path.clone());
        Ok(path)
    }

    /// Decrement a node's share count; at zero, release its payload row
    /// and return the handle to the arena.
    fn decrease(
        &mut self,
        handle: Handle,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        let (share, payload) = {
            let node = self.arena.get(handle)?;
            (node.share, node.payload)
        };
        if share == 0 {
            error!("tree node {} share count is already zero", handle);
            return Err(VfsError::Invariant(format!(
                "tree node {} share count is not positive",
                handle
            )));
        }
        if share == 1 {
            if let Some(payload) = payload {
                nodes.delete(payload, blobs)?;
            }
            self.arena.free(handle);
        } else {
            self.arena.get_mut(handle)?.share = share - 1;
        }
        Ok(())
    }

    /// Post-order release of a whole subtree. The top-level call leaves
    /// the subtree's own siblings alone; the recursion below it does not.
    /// Nodes still referenced by other versions survive with a lower
    /// share count.
    pub(crate) fn recursive_dec(
        &mut self,
        handle: Option<Handle>,
        dec_siblings: bool,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        let Some(handle) = handle else { return Ok(()) };
        let (first_child, next_sibling) = {
            let node = self.arena.get(handle)?;
            (node.first_child, node.next_sibling)
        };
        self.recursive_dec(first_child, true, nodes, blobs)?;
        if dec_siblings {
            self.recursive_dec(next_sibling, true, nodes, blobs)?;
        }
        self.decrease(handle, nodes, blobs)
    }

    /// Mirror of [`Self::recursive_dec`]: add one reference to every node
    /// of a subtree (and its payload row). Used when a fork adopts a
    /// shared child chain.
    pub(crate) fn recursive_inc(
        &mut self,
        handle: Option<Handle>,
        inc_siblings: bool,
        nodes: &mut NodeStore,
    ) -> VfsResult<()> {
        let Some(handle) = handle else { return Ok(()) };
        let (first_child, next_sibling) = {
            let node = self.arena.get(handle)?;
            (node.first_child, node.next_sibling)
        };
        self.recursive_inc(first_child, true, nodes)?;
        if inc_siblings {
            self.recursive_inc(next_sibling, true, nodes)?;
        }
        let node = self.arena.get_mut(handle)?;
        node.share += 1;
        if let Some(payload) = node.payload {
            nodes.inc(payload)?;
        }
        Ok(())
    }

    /// Core of the copy-on-write protocol.
    ///
    /// `replacement` takes the place of the cursor top's outgoing link.
    /// Walking down from the cursor top, every node with share count > 1
    /// is cloned (share 1, payload reference added, cache dropped) and
    /// stitched into the new chain while the original loses one
    /// reference; the first node with share count 1 is edited in place.
    /// The rebuilt chain is pushed back onto the cursor.
    ///
    /// On failure everything allocated here is rolled back: clones are
    /// freed, reference counts restored, and the cursor returned to its
    /// starting state, so the original tree stays observable unchanged.
    fn rebuild_to(
        &mut self,
        replacement: Option<Handle>,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        self.check_cursor()?;
        self.invalidate_path_cache();

        // Link direction into the rebuilt chain: a cloned head is hooked
        // up through its parent directory's first_child, anything else
        // through next_sibling.
        let mut via_first_child = false;
        let mut rebuilt: Vec<Option<Handle>> = vec![replacement];
        let mut displaced: Vec<Handle> = Vec::new();

        let outcome = loop {
            let Some(&top) = self.cursor.last() else {
                break Err(VfsError::Invariant(
                    "cursor exhausted during rebuild".to_string(),
                ));
            };
            let (kind, share, payload, next_sibling, first_child) = match self.arena.get(top) {
                Ok(node) => (
                    node.kind,
                    node.share,
                    node.payload,
                    node.next_sibling,
                    node.first_child,
                ),
                Err(err) => break Err(err),
            };
            if share == 0 {
                error!("tree node {} share count is already zero", top);
                break Err(VfsError::Invariant(format!(
                    "tree node {} share count is not positive",
                    top
                )));
            }
            if share == 1 {
                break Ok(top);
            }

            let link = rebuilt.last().copied().flatten();
            let mut clone = TreeNode {
                kind,
                share: 1,
                payload,
                next_sibling,
                first_child,
                child_index: None,
            };
            if via_first_child {
                clone.first_child = link;
            } else {
                clone.next_sibling = link;
            }
            if let Some(payload) = payload {
                if let Err(err) = nodes.inc(payload) {
                    break Err(err);
                }
            }
            rebuilt.push(Some(self.arena.alloc(clone)));
            via_first_child = kind == NodeKind::Head;

            // The original keeps serving the versions that still share it.
            match self.arena.get_mut(top) {
                Ok(node) => node.share = share - 1,
                Err(err) => break Err(err),
            }
            self.cursor.pop();
            displaced.push(top);
        };

        let anchor = match outcome {
            Ok(anchor) => anchor,
            Err(err) => {
                self.unwind_rebuild(&rebuilt, &displaced, nodes, blobs);
                return Err(err);
            }
        };

        let link = rebuilt.last().copied().flatten();
        {
            let node = self.arena.get_mut(anchor)?;
            if via_first_child {
                node.first_child = link;
            } else {
                node.next_sibling = link;
            }
            if node.kind == NodeKind::Dir {
                node.child_index = None;
            }
        }
        while let Some(entry) = rebuilt.pop() {
            if let Some(handle) = entry {
                self.cursor.push(handle);
            }
        }
        Ok(())
    }

    /// Roll back a failed rebuild: free every fresh clone, undo its
    /// payload reference, restore the share counts of displaced
    /// originals, and put the cursor back. Each clone is released exactly
    /// once and the payload rows it referenced are still held by their
    /// originals, so nothing leaks and nothing double-frees.
    fn unwind_rebuild(
        &mut self,
        rebuilt: &[Option<Handle>],
        displaced: &[Handle],
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) {
        for &entry in rebuilt.iter().skip(1) {
            let Some(handle) = entry else { continue };
            let payload = self
                .arena
                .nodes
                .get(handle)
                .and_then(Option::as_ref)
                .and_then(|node| node.payload);
            if let Some(payload) = payload {
                if let Err(err) = nodes.delete(payload, blobs) {
                    error!("rebuild rollback left payload counts inconsistent: {}", err);
                }
            }
            self.arena.free(handle);
        }
        for &original in displaced.iter().rev() {
            let mut payload = None;
            if let Some(Some(node)) = self.arena.nodes.get_mut(original) {
                node.share += 1;
                payload = node.payload;
            }
            if let Some(payload) = payload {
                if let Err(err) = nodes.inc(payload) {
                    error!("rebuild rollback left payload counts inconsistent: {}", err);
                }
            }
            self.cursor.push(original);
        }
    }

    /// Create a file or directory named `name` in the current directory.
    pub fn insert(
        &mut self,
        kind: NodeKind,
        name: &str,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        if kind == NodeKind::Head {
            return Err(VfsError::Invariant(
                "head sentinels cannot be inserted by name".to_string(),
            ));
        }
        if self.name_exists(name, nodes)? {
            return Err(VfsError::AlreadyExists(name.to_string()));
        }
        let parent = self.parent_dir()?;
        self.to_tail()?;

        let payload = nodes.new_node(name, blobs);
        let fresh = match kind {
            NodeKind::File => self.arena.alloc_file(payload),
            NodeKind::Dir => self.arena.alloc_dir(payload),
            NodeKind::Head => unreachable!(),
        };
        if let Err(err) = self.rebuild_to(Some(fresh), nodes, blobs) {
            let _ = self.recursive_dec(Some(fresh), false, nodes, blobs);
            return Err(err);
        }
        self.clear_child_index(parent);
        Ok(())
    }

    /// Remove the named file from the current directory.
    pub fn remove_file(
        &mut self,
        name: &str,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        self.enter_node(name, nodes)?;
        let target = self.top()?;
        if self.arena.get(target)?.kind != NodeKind::File {
            self.to_head()?;
            return Err(VfsError::WrongKind {
                name: name.to_string(),
                expected: "file",
            });
        }
        self.unlink_and(target, nodes, blobs, |engine, target, nodes, blobs| {
            engine.decrease(target, nodes, blobs)
        })
    }

    /// Remove the named directory and release its whole subtree.
    pub fn remove_dir(
        &mut self,
        name: &str,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        self.enter_node(name, nodes)?;
        let target = self.top()?;
        if self.arena.get(target)?.kind != NodeKind::Dir {
            self.to_head()?;
            return Err(VfsError::WrongKind {
                name: name.to_string(),
                expected: "directory",
            });
        }
        self.unlink_and(target, nodes, blobs, |engine, target, nodes, blobs| {
            engine.recursive_dec(Some(target), false, nodes, blobs)
        })
    }

    /// Shared tail of the removal operations: detach `target` from its
    /// sibling chain via the COW rebuild, then release it with `teardown`.
    fn unlink_and(
        &mut self,
        target: Handle,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
        teardown: impl FnOnce(&mut Self, Handle, &mut NodeStore, &mut BlobStore) -> VfsResult<()>,
    ) -> VfsResult<()> {
        let parent = self.owning_dir()?;
        let next = self.arena.get(target)?.next_sibling;
        self.invalidate_path_cache();
        self.cursor.pop();
        if let Err(err) = self.rebuild_to(next, nodes, blobs) {
            self.cursor.push(target);
            return Err(err);
        }
        teardown(self, target, nodes, blobs)?;
        self.clear_child_index(parent);
        Ok(())
    }

    /// Directory containing the node the cursor currently points at:
    /// the owner of the deepest head sentinel on the cursor.
    fn owning_dir(&self) -> VfsResult<Handle> {
        for position in (1..self.cursor.len()).rev() {
            if self.arena.get(self.cursor[position])?.kind == NodeKind::Head {
                return Ok(self.cursor[position - 1]);
            }
        }
        error!("cursor has no head sentinel to locate the owning directory");
        Err(VfsError::Invariant(
            "cursor has no owning directory".to_string(),
        ))
    }

    /// Rename a child. The node is replaced by a fresh clone whose
    /// payload row carries the new name and the old content and ctime.
    pub fn rename(
        &mut self,
        from: &str,
        to: &str,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        if self.name_exists(to, nodes)? {
            return Err(VfsError::AlreadyExists(to.to_string()));
        }
        self.enter_node(from, nodes)?;
        self.replace_top(from, nodes, blobs, |nodes, payload, blobs| {
            nodes.update_name(payload, to, blobs)
        })
    }

    /// Replace the named file's content. Directories are rejected.
    pub fn update_content(
        &mut self,
        name: &str,
        content: &str,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
    ) -> VfsResult<()> {
        self.enter_node(name, nodes)?;
        if self.arena.get(self.top()?)?.kind != NodeKind::File {
            self.to_head()?;
            return Err(VfsError::WrongKind {
                name: name.to_string(),
                expected: "file",
            });
        }
        self.replace_top(name, nodes, blobs, |nodes, payload, blobs| {
            nodes.update_content(payload, content, blobs)
        })
    }

    /// Shared tail of rename and content update: swap the cursor-top node
    /// for a share-1 clone with a fresh payload row, rebuild the path to
    /// it, and release the displaced original last (dropping it earlier
    /// would lose the node).
    fn replace_top(
        &mut self,
        name: &str,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
        swap_payload: impl FnOnce(&mut NodeStore, u64, &mut BlobStore) -> VfsResult<u64>,
    ) -> VfsResult<()> {
        let parent = self.owning_dir()?;
        let target = self.top()?;
        let (kind, payload, next_sibling, first_child) = {
            let node = self.arena.get(target)?;
            (node.kind, node.payload, node.next_sibling, node.first_child)
        };
        let payload = payload.ok_or_else(|| {
            error!("named node {} has no payload", name);
            VfsError::Invariant(format!("node {} has no payload", name))
        })?;

        let new_payload = swap_payload(nodes, payload, blobs)?;
        let fresh = self.arena.alloc(TreeNode {
            kind,
            share: 1,
            payload: Some(new_payload),
            next_sibling,
            first_child,
            child_index: None,
        });

        self.invalidate_path_cache();
        self.cursor.pop();
        if let Err(err) = self.rebuild_to(Some(fresh), nodes, blobs) {
            self.arena.free(fresh);
            if let Err(inner) = nodes.delete(new_payload, blobs) {
                error!("rollback of payload swap failed: {}", inner);
            }
            self.cursor.push(target);
            return Err(err);
        }
        self.decrease(target, nodes, blobs)?;
        self.clear_child_index(parent);
        Ok(())
    }

    /// Render the subtree under `root` in Unix `tree` style.
    pub fn render_tree(&self, root: Handle, nodes: &NodeStore) -> VfsResult<String> {
        let mut out = String::new();
        let node = self.arena.get(root)?;
        if let Some(payload) = node.payload {
            out.push_str(nodes.name(payload)?);
        }
        out.push('\n');
        self.render_children(root, "", nodes, &mut out)?;
        Ok(out)
    }

    fn render_children(
        &self,
        dir: Handle,
        prefix: &str,
        nodes: &NodeStore,
        out: &mut String,
    ) -> VfsResult<()> {
        let children = self.children_of(dir)?;
        let count = children.len();
        for (position, child) in children.into_iter().enumerate() {
            let last = position + 1 == count;
            let node = self.arena.get(child)?;
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            if let Some(payload) = node.payload {
                out.push_str(nodes.name(payload)?);
            }
            out.push('\n');
            if node.kind == NodeKind::Dir {
                let extended = format!("{}{}", prefix, if last { "    " } else { "│   " });
                self.render_children(child, &extended, nodes, out)?;
            }
        }
        Ok(())
    }

    /// Child handles of a directory (head sentinel skipped); empty for
    /// files and heads, whose children must never be dereferenced.
    fn children_of(&self, handle: Handle) -> VfsResult<Vec<Handle>> {
        let node = self.arena.get(handle)?;
        if node.kind != NodeKind::Dir {
            return Ok(Vec::new());
        }
        let head = node.first_child.ok_or_else(|| {
            error!("directory without head sentinel");
            VfsError::Invariant("directory without head sentinel".to_string())
        })?;
        let mut children = Vec::new();
        let mut cursor = self.arena.get(head)?.next_sibling;
        while let Some(child) = cursor {
            children.push(child);
            cursor = self.arena.get(child)?.next_sibling;
        }
        Ok(children)
    }

    /// Search the subtree under `root` for names containing `needle`.
    /// Returns `(matched_name, path_from_root)` pairs in preorder.
    pub fn find(
        &self,
        root: Handle,
        needle: &str,
        nodes: &NodeStore,
    ) -> VfsResult<Vec<(String, Vec<String>)>> {
        if needle.len() >= MAX_NAME_LEN {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        let mut path = Vec::new();
        if let Some(payload) = self.arena.get(root)?.payload {
            path.push(nodes.name(payload)?.to_string());
        }
        self.find_walk(root, needle, nodes, &mut path, &mut results)?;
        Ok(results)
    }

    fn find_walk(
        &self,
        dir: Handle,
        needle: &str,
        nodes: &NodeStore,
        path: &mut Vec<String>,
        results: &mut Vec<(String, Vec<String>)>,
    ) -> VfsResult<()> {
        for child in self.children_of(dir)? {
            let node = self.arena.get(child)?;
            let Some(payload) = node.payload else { continue };
            let name = nodes.name(payload)?.to_string();
            if kmp_contains(&name, needle) {
                let mut full = path.clone();
                full.push(name.clone());
                results.push((name.clone(), full));
            }
            if node.kind == NodeKind::Dir {
                path.push(name);
                self.find_walk(child, needle, nodes, path, results)?;
                path.pop();
            }
        }
        Ok(())
    }
}

/// KMP substring test, bounded to names shorter than `MAX_NAME_LEN`.
/// An empty needle matches everything.
fn kmp_contains(text: &str, pattern: &str) -> bool {
    let text = text.as_bytes();
    let pattern = pattern.as_bytes();
    if text.len() >= MAX_NAME_LEN || pattern.len() >= MAX_NAME_LEN {
        return false;
    }
    if pattern.is_empty() {
        return true;
    }

    let mut fail = vec![0usize; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[k] != pattern[i] {
            k = fail[k - 1];
        }
        if pattern[k] == pattern[i] {
            k += 1;
        }
        fail[i] = k;
    }

    let mut k = 0;
    for &byte in text {
        while k > 0 && pattern[k] != byte {
            k = fail[k - 1];
        }
        if pattern[k] == byte {
            k += 1;
        }
        if k == pattern.len() {
            return true;
        }
    }
    false
}
