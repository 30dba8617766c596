//! Version table: named tree roots that share structure
//!
//! A version is an id, an info string, and a root directory node. Forking
//! does not copy the tree: the new root adopts the model's child chain
//! and every node in that chain gains one reference. From then on the
//! copy-on-write protocol keeps the versions independent while they keep
//! sharing every subtree neither has touched.
//!
//! Persistence flattens the node graph with dense depth-first labels:
//!
//! ```text
//! VersionManager::DATA_TREENODE_INFO
//!   label  kind  share  payload|NULL  next_sibling|NULL  first_child|NULL
//! VersionManager::DATA_VERSION_INFO
//!   version_id  info  root_label
//! ```
//!
//! NULL is the sentinel 0x3f3f3f3f3f3f. Loading materializes every node
//! first and resolves labels second; a malformed field or dangling label
//! aborts the load with no partial state left behind.

use crate::error::{VfsError, VfsResult};
use crate::fs::blob_store::BlobStore;
use crate::fs::node_store::NodeStore;
use crate::fs::tree::{Handle, NodeKind, TreeEngine, TreeNode};
use crate::store::{is_all_digits, parse_column_u64, Saver};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// First version id handed out; later ids are max + 1.
pub const FIRST_VERSION_ID: u64 = 1001;

/// Label standing in for an absent link or payload in persisted rows.
pub const NULL_LABEL: u64 = 0x3f3f3f3f3f3f;

const TREENODE_TABLE: &str = "VersionManager::DATA_TREENODE_INFO";
const VERSION_TABLE: &str = "VersionManager::DATA_VERSION_INFO";

/// One version entry.
#[derive(Debug)]
pub struct Version {
    pub info: String,
    pub root: Handle,
}

/// Version listing row handed to callers: no live root inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSummary {
    pub id: u64,
    pub info: String,
}

/// Ordered map of version ids to roots, with fork and persistence.
#[derive(Default)]
pub struct VersionManager {
    versions: BTreeMap<u64, Version>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn exists(&self, id: u64) -> bool {
        self.versions.contains_key(&id)
    }

    pub fn get_root(&self, id: u64) -> VfsResult<Handle> {
        self.versions
            .get(&id)
            .map(|version| version.root)
            .ok_or_else(|| VfsError::NotFound(format!("version {}", id)))
    }

    pub fn latest(&self) -> VfsResult<u64> {
        self.versions
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| VfsError::NotFound("any version".to_string()))
    }

    /// Ids and info text of every version, oldest first.
    pub fn enumerate(&self) -> Vec<VersionSummary> {
        self.versions
            .iter()
            .map(|(&id, version)| VersionSummary {
                id,
                info: version.info.clone(),
            })
            .collect()
    }

    /// Create a new version, empty or from a model version.
    ///
    /// The fresh root starts with one reference (this table's). With a
    /// model, the root adopts the model's child chain and every adopted
    /// node (head sentinel, children, and their subtrees) gains exactly
    /// one reference, so each version-walk reaches each node once per
    /// share count.
    pub fn fork(
        &mut self,
        engine: &mut TreeEngine,
        nodes: &mut NodeStore,
        blobs: &mut BlobStore,
        model: Option<u64>,
        info: &str,
    ) -> VfsResult<u64> {
        let model_root = match model {
            Some(model_id) => Some(self.get_root(model_id)?),
            None => None,
        };

        let payload = nodes.new_node("root", blobs);
        let root = engine.arena.alloc_dir(payload);

        if let Some(model_root) = model_root {
            let adopted = engine.arena.get(model_root)?.first_child;
            let fresh_head = engine.arena.get(root)?.first_child;
            if let Some(fresh_head) = fresh_head {
                engine.arena.free(fresh_head);
            }
            {
                let node = engine.arena.get_mut(root)?;
                node.first_child = adopted;
                node.child_index = None;
            }
            engine.recursive_inc(adopted, true, nodes)?;
        }

        let id = self
            .versions
            .keys()
            .next_back()
            .map_or(FIRST_VERSION_ID, |&max| max + 1);
        self.versions.insert(
            id,
            Version {
                info: info.to_string(),
                root,
            },
        );
        debug!("created version {} (model {:?})", id, model);
        Ok(id)
    }

    /// Assign dense first-encounter labels to every node reachable from
    /// any version root.
    fn label_nodes(&self, engine: &TreeEngine) -> VfsResult<FxHashMap<Handle, u64>> {
        let mut labels = FxHashMap::default();
        for version in self.versions.values() {
            self.label_dfs(engine, Some(version.root), &mut labels)?;
        }
        Ok(labels)
    }

    fn label_dfs(
        &self,
        engine: &TreeEngine,
        handle: Option<Handle>,
        labels: &mut FxHashMap<Handle, u64>,
    ) -> VfsResult<()> {
        let Some(handle) = handle else { return Ok(()) };
        if labels.contains_key(&handle) {
            return Ok(());
        }
        labels.insert(handle, labels.len() as u64);
        let (first_child, next_sibling) = {
            let node = engine.arena.get(handle)?;
            (node.first_child, node.next_sibling)
        };
        self.label_dfs(engine, first_child, labels)?;
        self.label_dfs(engine, next_sibling, labels)
    }

    /// Persist the node graph and version table through the saver.
    pub fn save(&self, engine: &TreeEngine, saver: &mut Saver) -> VfsResult<()> {
        let labels = self.label_nodes(engine)?;

        let mut node_rows = vec![Vec::new(); labels.len()];
        for (&handle, &label) in &labels {
            let node = engine.arena.get(handle)?;
            let link_label = |link: Option<Handle>| -> VfsResult<u64> {
                match link {
                    None => Ok(NULL_LABEL),
                    Some(target) => labels.get(&target).copied().ok_or_else(|| {
                        VfsError::Invariant(format!("unlabeled tree handle {}", target))
                    }),
                }
            };
            let kind = match node.kind {
                NodeKind::File => 0u64,
                NodeKind::Dir => 1,
                NodeKind::Head => 2,
            };
            node_rows[label as usize] = vec![
                label.to_string(),
                kind.to_string(),
                node.share.to_string(),
                node.payload.unwrap_or(NULL_LABEL).to_string(),
                link_label(node.next_sibling)?.to_string(),
                link_label(node.first_child)?.to_string(),
            ];
        }
        saver.put(TREENODE_TABLE, &node_rows)?;

        let version_rows: Vec<Vec<String>> = self
            .versions
            .iter()
            .map(|(&id, version)| {
                let root_label = labels.get(&version.root).copied().ok_or_else(|| {
                    VfsError::Invariant(format!("unlabeled version root {}", version.root))
                })?;
                Ok(vec![
                    id.to_string(),
                    version.info.clone(),
                    root_label.to_string(),
                ])
            })
            .collect::<VfsResult<_>>()?;
        saver.put(VERSION_TABLE, &version_rows)
    }

    /// Load the node graph and version table, replacing current contents.
    ///
    /// The arena is expected to be empty; on any failure every node
    /// materialized so far is released again and an error is returned.
    pub fn load(&mut self, engine: &mut TreeEngine, saver: &Saver) -> VfsResult<()> {
        let node_rows = saver.get(TREENODE_TABLE, false)?;
        let version_rows = saver.get(VERSION_TABLE, false)?;

        match self.materialize(engine, &node_rows, &version_rows) {
            Ok(versions) => {
                self.versions = versions;
                Ok(())
            }
            Err(err) => {
                warn!("version tables failed to load: {}", err);
                engine.arena.clear();
                Err(err)
            }
        }
    }

    fn materialize(
        &self,
        engine: &mut TreeEngine,
        node_rows: &[Vec<String>],
        version_rows: &[Vec<String>],
    ) -> VfsResult<BTreeMap<u64, Version>> {
        let mut by_label: FxHashMap<u64, Handle> = FxHashMap::default();

        // First pass: materialize nodes with unresolved links.
        let mut links: Vec<(u64, u64, u64)> = Vec::with_capacity(node_rows.len());
        for row in node_rows {
            if row.len() != 6 || !row.iter().all(|cell| is_all_digits(cell)) {
                return Err(VfsError::Corruption(
                    "malformed tree node row".to_string(),
                ));
            }
            let label = parse_column_u64(&row[0], "node label")?;
            let kind_code = parse_column_u64(&row[1], "node kind")?;
            let share = parse_column_u64(&row[2], "node share")?;
            let payload = parse_column_u64(&row[3], "node payload")?;
            let next_sibling = parse_column_u64(&row[4], "next sibling label")?;
            let first_child = parse_column_u64(&row[5], "first child label")?;

            let kind = match kind_code {
                0 => NodeKind::File,
                1 => NodeKind::Dir,
                2 => NodeKind::Head,
                other => {
                    return Err(VfsError::Corruption(format!(
                        "unknown tree node kind {}",
                        other
                    )))
                }
            };
            let payload = if payload == NULL_LABEL {
                None
            } else {
                Some(payload)
            };
            if (kind == NodeKind::Head) != payload.is_none() {
                return Err(VfsError::Corruption(
                    "tree node payload does not match its kind".to_string(),
                ));
            }
            if share == 0 {
                return Err(VfsError::Corruption(
                    "tree node share count is zero".to_string(),
                ));
            }

            let handle = engine.arena.alloc(TreeNode {
                kind,
                share,
                payload,
                next_sibling: None,
                first_child: None,
                child_index: None,
            });
            if by_label.insert(label, handle).is_some() {
                return Err(VfsError::Corruption(format!(
                    "duplicate tree node label {}",
                    label
                )));
            }
            links.push((label, next_sibling, first_child));
        }

        // Second pass: resolve labels into handles.
        for (label, next_sibling, first_child) in links {
            let resolve = |target: u64| -> VfsResult<Option<Handle>> {
                if target == NULL_LABEL {
                    return Ok(None);
                }
                by_label.get(&target).copied().map(Some).ok_or_else(|| {
                    VfsError::Corruption(format!("dangling tree node label {}", target))
                })
            };
            let next_sibling = resolve(next_sibling)?;
            let first_child = resolve(first_child)?;
            let handle = by_label[&label];
            let node = engine.arena.get_mut(handle)?;
            node.next_sibling = next_sibling;
            node.first_child = first_child;
        }

        let mut versions = BTreeMap::new();
        for row in version_rows {
            if row.len() != 3 || !is_all_digits(&row[0]) || !is_all_digits(&row[2]) {
                return Err(VfsError::Corruption("malformed version row".to_string()));
            }
            let id = parse_column_u64(&row[0], "version id")?;
            let root_label = parse_column_u64(&row[2], "version root label")?;
            let root = by_label.get(&root_label).copied().ok_or_else(|| {
                VfsError::Corruption(format!("dangling version root label {}", root_label))
            })?;
            if engine.arena.get(root)?.kind != NodeKind::Dir {
                return Err(VfsError::Corruption(format!(
                    "version {} root is not a directory",
                    id
                )));
            }
            versions.insert(
                id,
                Version {
                    info: row[1].clone(),
                    root,
                },
            );
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SaverOptions;
    use tempfile::TempDir;

    struct Fixture {
        engine: TreeEngine,
        nodes: NodeStore,
        blobs: BlobStore,
        versions: VersionManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                engine: TreeEngine::new(),
                nodes: NodeStore::new(),
                blobs: BlobStore::new(),
                versions: VersionManager::new(),
            }
        }

        fn fork(&mut self, model: Option<u64>, info: &str) -> u64 {
            self.versions
                .fork(&mut self.engine, &mut self.nodes, &mut self.blobs, model, info)
                .unwrap()
        }

        fn insert(&mut self, kind: NodeKind, name: &str) {
            self.engine
                .insert(kind, name, &mut self.nodes, &mut self.blobs)
                .unwrap();
        }
    }

    #[test]
    fn ids_start_at_1001_and_increase() {
        let mut fx = Fixture::new();
        assert!(fx.versions.is_empty());
        assert_eq!(fx.fork(None, "first"), FIRST_VERSION_ID);
        assert_eq!(fx.fork(None, "second"), FIRST_VERSION_ID + 1);
        assert_eq!(fx.versions.latest().unwrap(), FIRST_VERSION_ID + 1);

        let listing = fx.versions.enumerate();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].id, FIRST_VERSION_ID);
        assert_eq!(listing[0].info, "first");
    }

    #[test]
    fn fork_of_missing_model_fails() {
        let mut fx = Fixture::new();
        let err = fx
            .versions
            .fork(&mut fx.engine, &mut fx.nodes, &mut fx.blobs, Some(999), "")
            .unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[test]
    fn fork_shares_children_with_one_extra_reference() {
        let mut fx = Fixture::new();
        let v1 = fx.fork(None, "");
        fx.engine.set_root(fx.versions.get_root(v1).unwrap()).unwrap();
        fx.insert(NodeKind::File, "shared");

        let v2 = fx.fork(Some(v1), "branch");
        let root1 = fx.versions.get_root(v1).unwrap();
        let root2 = fx.versions.get_root(v2).unwrap();
        assert_ne!(root1, root2);

        // The child chain is the same arena nodes, one reference richer.
        let head1 = fx.engine.arena.get(root1).unwrap().first_child.unwrap();
        let head2 = fx.engine.arena.get(root2).unwrap().first_child.unwrap();
        assert_eq!(head1, head2);
        assert_eq!(fx.engine.arena.get(head1).unwrap().share, 2);
        let file = fx.engine.arena.get(head1).unwrap().next_sibling.unwrap();
        assert_eq!(fx.engine.arena.get(file).unwrap().share, 2);

        // Each root itself carries exactly its table reference.
        assert_eq!(fx.engine.arena.get(root1).unwrap().share, 1);
        assert_eq!(fx.engine.arena.get(root2).unwrap().share, 1);
    }

    #[test]
    fn tables_round_trip_with_shared_structure() {
        let dir = TempDir::new().unwrap();
        let mut saver = Saver::new(SaverOptions::in_dir(dir.path())).unwrap();
        saver.initialize().unwrap();

        let mut fx = Fixture::new();
        let v1 = fx.fork(None, "base");
        fx.engine.set_root(fx.versions.get_root(v1).unwrap()).unwrap();
        fx.insert(NodeKind::Dir, "d");
        fx.engine.chdir("d", &fx.nodes).unwrap();
        fx.insert(NodeKind::File, "f");
        let v2 = fx.fork(Some(v1), "branch");

        fx.versions.save(&fx.engine, &mut saver).unwrap();

        let mut loaded = Fixture::new();
        loaded
            .versions
            .load(&mut loaded.engine, &saver)
            .unwrap();
        assert_eq!(loaded.versions.enumerate(), fx.versions.enumerate());

        // Shared structure is shared after the round trip too.
        let root1 = loaded.versions.get_root(v1).unwrap();
        let root2 = loaded.versions.get_root(v2).unwrap();
        let head1 = loaded.engine.arena.get(root1).unwrap().first_child.unwrap();
        let head2 = loaded.engine.arena.get(root2).unwrap().first_child.unwrap();
        assert_eq!(head1, head2);
        assert_eq!(loaded.engine.arena.get(head1).unwrap().share, 2);
        assert_eq!(
            loaded.engine.arena.live_count(),
            fx.engine.arena.live_count()
        );
    }

    /// Visit counts of a preorder walk from each given root. Along
    /// `first_child`/`next_sibling` every node is reached once per walk
    /// that can see it.
    fn walk_counts(engine: &TreeEngine, roots: &[Handle]) -> FxHashMap<Handle, u64> {
        fn visit(engine: &TreeEngine, handle: Option<Handle>, counts: &mut FxHashMap<Handle, u64>) {
            let Some(handle) = handle else { return };
            *counts.entry(handle).or_insert(0) += 1;
            let node = engine.arena.get(handle).unwrap();
            visit(engine, node.first_child, counts);
            visit(engine, node.next_sibling, counts);
        }
        let mut counts = FxHashMap::default();
        for &root in roots {
            visit(engine, Some(root), &mut counts);
        }
        counts
    }

    fn assert_share_invariant(fx: &Fixture) {
        let roots: Vec<Handle> = fx
            .versions
            .enumerate()
            .iter()
            .map(|summary| fx.versions.get_root(summary.id).unwrap())
            .collect();
        let counts = walk_counts(&fx.engine, &roots);
        assert_eq!(
            counts.len(),
            fx.engine.arena.live_count(),
            "every live node must be reachable from some version root"
        );
        for (&handle, &count) in &counts {
            let share = fx.engine.arena.get(handle).unwrap().share;
            assert_eq!(
                count, share,
                "node {} reached {} times but has share count {}",
                handle, count, share
            );
        }
    }

    #[test]
    fn version_walks_reach_each_node_exactly_share_times() {
        let mut fx = Fixture::new();
        let v1 = fx.fork(None, "");
        fx.engine.set_root(fx.versions.get_root(v1).unwrap()).unwrap();
        fx.insert(NodeKind::Dir, "d");
        fx.engine.chdir("d", &fx.nodes).unwrap();
        fx.insert(NodeKind::File, "a");
        fx.insert(NodeKind::File, "b");
        fx.engine.to_parent().unwrap();
        fx.insert(NodeKind::File, "top");
        assert_share_invariant(&fx);

        // Fork and mutate the fork: content update, insert, removal.
        let v2 = fx.fork(Some(v1), "");
        assert_share_invariant(&fx);
        fx.engine.set_root(fx.versions.get_root(v2).unwrap()).unwrap();
        fx.engine.chdir("d", &fx.nodes).unwrap();
        fx.engine
            .update_content("a", "branched", &mut fx.nodes, &mut fx.blobs)
            .unwrap();
        fx.engine
            .remove_file("b", &mut fx.nodes, &mut fx.blobs)
            .unwrap();
        fx.engine.to_parent().unwrap();
        fx.insert(NodeKind::File, "only-v2");
        assert_share_invariant(&fx);

        // A second-generation fork, then tear a shared directory out of it.
        let v3 = fx.fork(Some(v2), "");
        assert_share_invariant(&fx);
        fx.engine.set_root(fx.versions.get_root(v3).unwrap()).unwrap();
        fx.engine
            .remove_dir("d", &mut fx.nodes, &mut fx.blobs)
            .unwrap();
        assert_share_invariant(&fx);

        // The other versions still see their own trees.
        fx.engine.set_root(fx.versions.get_root(v1).unwrap()).unwrap();
        assert_eq!(fx.engine.list(&fx.nodes).unwrap(), vec!["d", "top"]);
        fx.engine.set_root(fx.versions.get_root(v3).unwrap()).unwrap();
        assert_eq!(fx.engine.list(&fx.nodes).unwrap(), vec!["top", "only-v2"]);
    }

    #[test]
    fn corrupted_tables_abort_the_load() {
        let dir = TempDir::new().unwrap();
        let mut saver = Saver::new(SaverOptions::in_dir(dir.path())).unwrap();
        saver.initialize().unwrap();

        // A node row referencing a label that never appears.
        let node_rows = vec![vec![
            "0".to_string(),
            "1".to_string(),
            "1".to_string(),
            "42".to_string(),
            NULL_LABEL.to_string(),
            "7".to_string(),
        ]];
        let version_rows = vec![vec!["1001".to_string(), "".to_string(), "0".to_string()]];
        saver.put(TREENODE_TABLE, &node_rows).unwrap();
        saver.put(VERSION_TABLE, &version_rows).unwrap();

        let mut fx = Fixture::new();
        let err = fx.versions.load(&mut fx.engine, &saver).unwrap_err();
        assert!(matches!(err, VfsError::Corruption(_)));
        assert_eq!(fx.engine.arena.live_count(), 0);
        assert!(fx.versions.is_empty());
    }
}
