//! Reference-counted content blobs
//!
//! File contents live here, one blob per distinct holder. Blob ids are
//! random u64s, stable for as long as anything references them; a content
//! change allocates a fresh blob so other holders (other versions of the
//! tree) keep seeing the old bytes.

use crate::error::{VfsError, VfsResult};
use crate::store::{is_all_digits, parse_column_u64, Saver};
use log::error;
use rustc_hash::FxHashMap;

/// Logical table name the blob store persists under.
const TABLE_NAME: &str = "FileManager::map_relation";

#[derive(Clone, Debug)]
struct Blob {
    content: String,
    share: u64,
}

/// Dictionary of reference-counted content blobs.
#[derive(Default)]
pub struct BlobStore {
    blobs: FxHashMap<u64, Blob>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a random id not currently in use.
    fn fresh_id(&self) -> u64 {
        loop {
            let id = rand::random::<u64>();
            if !self.blobs.contains_key(&id) {
                return id;
            }
        }
    }

    /// Insert new content with share count 1; returns the blob id.
    pub fn create(&mut self, content: impl Into<String>) -> u64 {
        let id = self.fresh_id();
        self.blobs.insert(
            id,
            Blob {
                content: content.into(),
                share: 1,
            },
        );
        id
    }

    pub fn exists(&self, id: u64) -> bool {
        self.blobs.contains_key(&id)
    }

    pub fn get(&self, id: u64) -> VfsResult<&str> {
        self.blobs
            .get(&id)
            .map(|blob| blob.content.as_str())
            .ok_or_else(|| VfsError::NotFound(format!("blob {}", id)))
    }

    /// Increment the share count of an existing blob.
    pub fn inc(&mut self, id: u64) -> VfsResult<()> {
        let blob = self.blobs.get_mut(&id).ok_or_else(|| {
            error!("incrementing unknown blob {}", id);
            VfsError::Invariant(format!("blob {} does not exist", id))
        })?;
        blob.share += 1;
        Ok(())
    }

    /// Decrement the share count; a blob reaching zero is removed.
    pub fn dec(&mut self, id: u64) -> VfsResult<()> {
        let blob = self.blobs.get_mut(&id).ok_or_else(|| {
            error!("decrementing unknown blob {}", id);
            VfsError::Invariant(format!("blob {} does not exist", id))
        })?;
        match blob.share {
            0 => {
                error!("blob {} share count is already zero", id);
                Err(VfsError::Invariant(format!(
                    "blob {} share count is not positive",
                    id
                )))
            }
            1 => {
                self.blobs.remove(&id);
                Ok(())
            }
            _ => {
                blob.share -= 1;
                Ok(())
            }
        }
    }

    /// Release one reference and allocate a fresh blob with new content.
    ///
    /// Shared blobs survive for their other holders; the returned id is
    /// always new.
    pub fn update(&mut self, id: u64, content: impl Into<String>) -> VfsResult<u64> {
        self.dec(id)?;
        Ok(self.create(content))
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Current share count, used by refcount tests.
    pub fn share_count(&self, id: u64) -> Option<u64> {
        self.blobs.get(&id).map(|blob| blob.share)
    }

    /// Persist the blob table through the saver.
    pub fn save(&self, saver: &mut Saver) -> VfsResult<()> {
        let mut ids: Vec<u64> = self.blobs.keys().copied().collect();
        ids.sort_unstable();
        let rows: Vec<Vec<String>> = ids
            .iter()
            .map(|id| {
                let blob = &self.blobs[id];
                vec![id.to_string(), blob.content.clone(), blob.share.to_string()]
            })
            .collect();
        saver.put(TABLE_NAME, &rows)
    }

    /// Load the blob table, replacing current contents.
    pub fn load(&mut self, saver: &Saver) -> VfsResult<()> {
        let rows = saver.get(TABLE_NAME, false)?;
        let mut blobs = FxHashMap::default();
        for row in &rows {
            if row.len() != 3 || !is_all_digits(&row[0]) || !is_all_digits(&row[2]) {
                return Err(VfsError::Corruption(
                    "malformed blob table row".to_string(),
                ));
            }
            let id = parse_column_u64(&row[0], "blob id")?;
            let share = parse_column_u64(&row[2], "blob share")?;
            blobs.insert(
                id,
                Blob {
                    content: row[1].clone(),
                    share,
                },
            );
        }
        self.blobs = blobs;
        Ok(())
    }
}
