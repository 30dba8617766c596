//! Node metadata rows: name, timestamps, content blob
//!
//! Every user-visible file or directory in the tree points at one row
//! here through its payload id. Rows are reference-counted the same way
//! tree nodes are, and any change allocates a fresh row id; that keeps
//! the copy-on-write protocol uniform: a mutation always yields a new
//! payload id, so older versions still pointing at the old id are
//! untouched.

use crate::error::{VfsError, VfsResult};
use crate::fs::blob_store::BlobStore;
use crate::store::{is_all_digits, parse_column_u64, Saver};
use chrono::Utc;
use log::error;
use rustc_hash::FxHashMap;

/// Logical table name the node store persists under.
const TABLE_NAME: &str = "NodeManager::map_relation";

/// Timestamp format used for ctime and mtime.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug)]
struct NodeRecord {
    name: String,
    ctime: String,
    mtime: String,
    blob_id: u64,
    share: u64,
}

fn now() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}

/// Dictionary of reference-counted node metadata rows.
#[derive(Default)]
pub struct NodeStore {
    nodes: FxHashMap<u64, NodeRecord>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> u64 {
        loop {
            let id = rand::random::<u64>();
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }

    fn record(&self, id: u64) -> VfsResult<&NodeRecord> {
        self.nodes
            .get(&id)
            .ok_or_else(|| VfsError::NotFound(format!("node {}", id)))
    }

    /// Allocate a new row with a fresh empty blob; ctime = mtime = now.
    pub fn new_node(&mut self, name: impl Into<String>, blobs: &mut BlobStore) -> u64 {
        let id = self.fresh_id();
        let stamp = now();
        self.nodes.insert(
            id,
            NodeRecord {
                name: name.into(),
                ctime: stamp.clone(),
                mtime: stamp,
                blob_id: blobs.create(""),
                share: 1,
            },
        );
        id
    }

    pub fn exists(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Increment the share count of an existing row.
    pub fn inc(&mut self, id: u64) -> VfsResult<()> {
        let record = self.nodes.get_mut(&id).ok_or_else(|| {
            error!("incrementing unknown node {}", id);
            VfsError::Invariant(format!("node {} does not exist", id))
        })?;
        record.share += 1;
        Ok(())
    }

    /// Decrement the share count; a row reaching zero releases its blob
    /// and is removed.
    ///
    /// An id with no row is a no-op: when a content or name update swaps
    /// a node's payload, the old row can already be gone by the time the
    /// displaced tree node releases its last reference.
    pub fn delete(&mut self, id: u64, blobs: &mut BlobStore) -> VfsResult<()> {
        let Some(record) = self.nodes.get_mut(&id) else {
            return Ok(());
        };
        match record.share {
            0 => {
                error!("node {} share count is already zero", id);
                Err(VfsError::Invariant(format!(
                    "node {} share count is not positive",
                    id
                )))
            }
            1 => {
                let blob_id = record.blob_id;
                self.nodes.remove(&id);
                blobs.dec(blob_id)
            }
            _ => {
                record.share -= 1;
                Ok(())
            }
        }
    }

    /// Release one reference to `id` and build a fresh row with the same
    /// name and new content. Returns the new row id.
    pub fn update_content(
        &mut self,
        id: u64,
        content: impl Into<String>,
        blobs: &mut BlobStore,
    ) -> VfsResult<u64> {
        let name = self.record(id)?.name.clone();
        self.delete(id, blobs)?;

        let new_id = self.new_node(name, blobs);
        if let Some(record) = self.nodes.get_mut(&new_id) {
            record.blob_id = blobs.update(record.blob_id, content)?;
        }
        Ok(new_id)
    }

    /// Release one reference to `id` and build a fresh row with the new
    /// name, keeping the old row's blob and ctime. Returns the new row id.
    pub fn update_name(
        &mut self,
        id: u64,
        new_name: impl Into<String>,
        blobs: &mut BlobStore,
    ) -> VfsResult<u64> {
        let (blob_id, ctime) = {
            let record = self.record(id)?;
            (record.blob_id, record.ctime.clone())
        };
        // Hold the content blob across the swap.
        blobs.inc(blob_id)?;

        let new_id = self.new_node(new_name, blobs);
        if let Some(record) = self.nodes.get_mut(&new_id) {
            blobs.dec(record.blob_id)?;
            record.blob_id = blob_id;
            record.ctime = ctime;
        }
        self.delete(id, blobs)?;
        Ok(new_id)
    }

    pub fn name(&self, id: u64) -> VfsResult<&str> {
        Ok(self.record(id)?.name.as_str())
    }

    pub fn content(&self, id: u64, blobs: &BlobStore) -> VfsResult<String> {
        Ok(blobs.get(self.record(id)?.blob_id)?.to_string())
    }

    pub fn ctime(&self, id: u64) -> VfsResult<&str> {
        Ok(self.record(id)?.ctime.as_str())
    }

    pub fn mtime(&self, id: u64) -> VfsResult<&str> {
        Ok(self.record(id)?.mtime.as_str())
    }

    pub fn blob_id(&self, id: u64) -> VfsResult<u64> {
        Ok(self.record(id)?.blob_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current share count, used by refcount tests.
    pub fn share_count(&self, id: u64) -> Option<u64> {
        self.nodes.get(&id).map(|record| record.share)
    }

    /// Persist the node table through the saver.
    pub fn save(&self, saver: &mut Saver) -> VfsResult<()> {
        let mut ids: Vec<u64> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        let rows: Vec<Vec<String>> = ids
            .iter()
            .map(|id| {
                let record = &self.nodes[id];
                vec![
                    id.to_string(),
                    record.share.to_string(),
                    record.name.clone(),
                    record.ctime.clone(),
                    record.mtime.clone(),
                    record.blob_id.to_string(),
                ]
            })
            .collect();
        saver.put(TABLE_NAME, &rows)
    }

    /// Load the node table, replacing current contents.
    pub fn load(&mut self, saver: &Saver) -> VfsResult<()> {
        let rows = saver.get(TABLE_NAME, false)?;
        let mut nodes = FxHashMap::default();
        for row in &rows {
            if row.len() != 6
                || !is_all_digits(&row[0])
                || !is_all_digits(&row[1])
                || !is_all_digits(&row[5])
            {
                return Err(VfsError::Corruption(
                    "malformed node table row".to_string(),
                ));
            }
            let id = parse_column_u64(&row[0], "node id")?;
            let share = parse_column_u64(&row[1], "node share")?;
            let blob_id = parse_column_u64(&row[5], "node blob id")?;
            nodes.insert(
                id,
                NodeRecord {
                    name: row[2].clone(),
                    ctime: row[3].clone(),
                    mtime: row[4].clone(),
                    blob_id,
                    share,
                },
            );
        }
        self.nodes = nodes;
        Ok(())
    }
}
