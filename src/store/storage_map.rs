//! In-memory encrypted record map with snapshot persistence
//!
//! The storage map is the value half of the saver: a hash-keyed dictionary
//! of encrypted records, with a whitespace-separated ASCII snapshot file.
//!
//! ## Snapshot record format (one per line)
//!
//! ```text
//! <name_hash:u64> <data_hash:u64> <block_count:u64>
//!     (<real:f64> <imag:f64>){block_count * 1024}
//! ```
//!
//! Snapshots are written atomically: the complete content goes to
//! `<path>.tmp`, which is then renamed over the target. A crash between
//! the two steps leaves the previous snapshot intact. Any read failure
//! leaves the in-memory map empty.

use crate::error::{VfsError, VfsResult};
use crate::store::codec::BLOCK_SIZE;
use log::warn;
use rustc_hash::FxHashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

/// One encrypted value: hashes, block count, and the FFT point data.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedRecord {
    pub name_hash: u64,
    pub data_hash: u64,
    /// Number of FFT blocks; `data.len() == block_count * BLOCK_SIZE`.
    pub block_count: u64,
    pub data: Vec<(f64, f64)>,
}

impl EncryptedRecord {
    /// Build a record from its parts, deriving the block count.
    pub fn new(name_hash: u64, data_hash: u64, data: Vec<(f64, f64)>) -> Self {
        Self {
            name_hash,
            data_hash,
            block_count: (data.len() / BLOCK_SIZE) as u64,
            data,
        }
    }
}

/// Dictionary from name hash to encrypted record.
#[derive(Default)]
pub struct StorageMap {
    records: FxHashMap<u64, EncryptedRecord>,
}

impl StorageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, keyed by its own name hash.
    pub fn store(&mut self, record: EncryptedRecord) {
        self.records.insert(record.name_hash, record);
    }

    pub fn retrieve(&self, name_hash: u64) -> Option<&EncryptedRecord> {
        self.records.get(&name_hash)
    }

    pub fn exists(&self, name_hash: u64) -> bool {
        self.records.contains_key(&name_hash)
    }

    /// Remove a record; returns whether it was present.
    pub fn remove(&mut self, name_hash: u64) -> bool {
        self.records.remove(&name_hash).is_some()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render one record in snapshot/WAL token form (no trailing newline).
    pub(crate) fn format_record(record: &EncryptedRecord, out: &mut String) {
        let _ = write!(
            out,
            "{} {} {}",
            record.name_hash, record.data_hash, record.block_count
        );
        for &(re, im) in &record.data {
            let _ = write!(out, " {} {}", re, im);
        }
    }

    /// Write the complete snapshot via temp file + rename.
    pub fn snapshot_save(&self, path: &Path) -> VfsResult<()> {
        let mut content = String::new();
        let mut keys: Vec<u64> = self.records.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            Self::format_record(&self.records[&key], &mut content);
            content.push('\n');
        }

        let tmp = tmp_path(path);
        if let Err(err) = fs::write(&tmp, &content) {
            let _ = fs::remove_file(&tmp);
            return Err(VfsError::IoFailure(err));
        }
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(VfsError::IoFailure(err));
        }
        Ok(())
    }

    /// Load a snapshot, replacing the current contents.
    ///
    /// An absent file is reported as [`VfsError::NotFound`] (the caller's
    /// first-run signal); any parse failure clears the map and reports
    /// [`VfsError::Corruption`].
    pub fn snapshot_load(&mut self, path: &Path) -> VfsResult<()> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VfsError::NotFound(format!("snapshot {}", path.display())));
            }
            Err(err) => return Err(VfsError::IoFailure(err)),
        };

        self.records.clear();
        let mut tokens = content.split_ascii_whitespace();
        loop {
            let Some(first) = tokens.next() else { break };
            match Self::parse_record(first, &mut tokens) {
                Ok(record) => self.store(record),
                Err(err) => {
                    self.records.clear();
                    warn!("snapshot {} is corrupted: {}", path.display(), err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn parse_record<'a>(
        first: &str,
        tokens: &mut impl Iterator<Item = &'a str>,
    ) -> VfsResult<EncryptedRecord> {
        let name_hash = parse_u64(first, "name_hash")?;
        let data_hash = parse_u64(next_token(tokens, "data_hash")?, "data_hash")?;
        let block_count = parse_u64(next_token(tokens, "block_count")?, "block_count")?;

        let pair_count = block_count as usize * BLOCK_SIZE;
        let mut data = Vec::with_capacity(pair_count);
        for _ in 0..pair_count {
            let re = parse_f64(next_token(tokens, "real part")?)?;
            let im = parse_f64(next_token(tokens, "imaginary part")?)?;
            data.push((re, im));
        }
        Ok(EncryptedRecord {
            name_hash,
            data_hash,
            block_count,
            data,
        })
    }
}

/// Sibling temp file used by the atomic snapshot write: `<path>.tmp`.
fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}

fn next_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> VfsResult<&'a str> {
    tokens
        .next()
        .ok_or_else(|| VfsError::Corruption(format!("unexpected end of record: missing {}", what)))
}

pub(crate) fn parse_u64(token: &str, what: &str) -> VfsResult<u64> {
    token
        .parse::<u64>()
        .map_err(|_| VfsError::Corruption(format!("invalid {}: {:?}", what, token)))
}

pub(crate) fn parse_f64(token: &str) -> VfsResult<f64> {
    token
        .parse::<f64>()
        .map_err(|_| VfsError::Corruption(format!("invalid floating-point token {:?}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::codec;
    use tempfile::TempDir;

    fn sample_record(name_hash: u64, payload: &[i64]) -> EncryptedRecord {
        let data = codec::encrypt(payload);
        EncryptedRecord::new(name_hash, codec::hash_ints(payload), data)
    }

    #[test]
    fn store_retrieve_remove() {
        let mut map = StorageMap::new();
        let record = sample_record(7, &[1, 2, 3]);
        map.store(record.clone());

        assert!(map.exists(7));
        assert_eq!(map.retrieve(7), Some(&record));
        assert!(map.remove(7));
        assert!(!map.remove(7));
        assert!(map.is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.chm");

        let mut map = StorageMap::new();
        map.store(sample_record(1, &[10, 20, 30]));
        map.store(sample_record(2, &(0..2000).collect::<Vec<i64>>()));
        map.snapshot_save(&path).unwrap();

        let mut reloaded = StorageMap::new();
        reloaded.snapshot_load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.retrieve(1), map.retrieve(1));
        assert_eq!(reloaded.retrieve(2), map.retrieve(2));
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut map = StorageMap::new();
        let err = map.snapshot_load(&dir.path().join("absent.chm")).unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[test]
    fn corrupted_snapshot_clears_map() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.chm");

        let mut map = StorageMap::new();
        map.store(sample_record(1, &[1]));
        map.snapshot_save(&path).unwrap();

        // Truncate mid-record.
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, &content[..content.len() / 2]).unwrap();

        let mut reloaded = StorageMap::new();
        reloaded.store(sample_record(9, &[9]));
        assert!(matches!(
            reloaded.snapshot_load(&path),
            Err(VfsError::Corruption(_))
        ));
        assert!(reloaded.is_empty());
    }

    #[test]
    fn save_is_atomic_under_replacement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.chm");

        let mut map = StorageMap::new();
        map.store(sample_record(1, &[1]));
        map.snapshot_save(&path).unwrap();
        map.store(sample_record(2, &[2]));
        map.snapshot_save(&path).unwrap();

        assert!(!tmp_path(&path).exists());
        let mut reloaded = StorageMap::new();
        reloaded.snapshot_load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
    }
}
