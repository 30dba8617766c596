//! Write-ahead log
//!
//! Append-only text log of storage mutations, replayed on startup and
//! truncated once its contents have been compacted into the snapshot.
//!
//! ## Record format (one line per operation)
//!
//! ```text
//! <op:0|1|2> <name_hash:u64> <data_hash:u64> <len:u64>
//!     (<real:f64> <imag:f64>){len * 1024}
//! ```
//!
//! Op 0 = Insert, 1 = Update, 2 = Delete (len 0, no data). Appends are
//! line-at-a-time, so a crash can tear at most the final line; replay
//! skips torn or malformed lines instead of aborting.

use crate::error::{VfsError, VfsResult};
use crate::store::codec::BLOCK_SIZE;
use crate::store::storage_map::{parse_f64, parse_u64, EncryptedRecord, StorageMap};
use log::{debug, warn};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

/// Number of WAL entries that triggers an automatic compaction.
pub const DEFAULT_AUTO_COMPACT_THRESHOLD: usize = 100;

/// One logged storage mutation.
#[derive(Clone, Debug)]
pub enum WalOp {
    Insert(EncryptedRecord),
    Update(EncryptedRecord),
    Delete { name_hash: u64 },
}

impl WalOp {
    fn code(&self) -> u8 {
        match self {
            WalOp::Insert(_) => 0,
            WalOp::Update(_) => 1,
            WalOp::Delete { .. } => 2,
        }
    }
}

/// Append-only operation log backing the storage map.
pub struct WriteAheadLog {
    path: PathBuf,
    enabled: bool,
    entry_count: usize,
    auto_compact_threshold: usize,
}

impl WriteAheadLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            entry_count: 0,
            auto_compact_threshold: DEFAULT_AUTO_COMPACT_THRESHOLD,
        }
    }

    /// Append one operation as a complete line.
    ///
    /// When the log is disabled this is a successful no-op and the entry
    /// counter does not move.
    pub fn append(&mut self, op: &WalOp) -> VfsResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut line = String::new();
        match op {
            WalOp::Insert(record) | WalOp::Update(record) => {
                let _ = write!(line, "{} ", op.code());
                StorageMap::format_record(record, &mut line);
            }
            WalOp::Delete { name_hash } => {
                let _ = write!(line, "{} {} 0 0", op.code(), name_hash);
            }
        }
        line.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        self.entry_count += 1;
        Ok(())
    }

    /// Replay every parseable record into `apply`, then truncate the log.
    ///
    /// Returns [`VfsError::NotFound`] exactly when the log file is absent,
    /// the caller's first-run signal. Lines with malformed headers are
    /// logged and skipped; lines whose data arrays are truncated (a torn
    /// final append) are skipped whole, so `apply` never sees partial data.
    pub fn replay(&mut self, mut apply: impl FnMut(WalOp)) -> VfsResult<usize> {
        if !self.enabled {
            return Ok(0);
        }

        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VfsError::NotFound(format!(
                    "write-ahead log {}",
                    self.path.display()
                )));
            }
            Err(err) => return Err(VfsError::IoFailure(err)),
        };

        let mut replayed = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match Self::parse_line(&line) {
                Ok(op) => {
                    apply(op);
                    replayed += 1;
                    self.entry_count += 1;
                }
                Err(err) => warn!("skipping unusable WAL line: {}", err),
            }
        }

        if replayed > 0 {
            debug!("replayed {} WAL entries from {}", replayed, self.path.display());
        }
        self.clear()?;
        Ok(replayed)
    }

    fn parse_line(line: &str) -> VfsResult<WalOp> {
        let mut tokens = line.split_ascii_whitespace();
        let op_code = parse_u64(
            tokens
                .next()
                .ok_or_else(|| VfsError::Corruption("empty WAL record".to_string()))?,
            "op",
        )?;
        let name_hash = parse_u64(
            tokens
                .next()
                .ok_or_else(|| VfsError::Corruption("missing name_hash".to_string()))?,
            "name_hash",
        )?;
        let data_hash = parse_u64(
            tokens
                .next()
                .ok_or_else(|| VfsError::Corruption("missing data_hash".to_string()))?,
            "data_hash",
        )?;
        let len = parse_u64(
            tokens
                .next()
                .ok_or_else(|| VfsError::Corruption("missing len".to_string()))?,
            "len",
        )?;

        if op_code == 2 {
            return Ok(WalOp::Delete { name_hash });
        }

        let pair_count = len as usize * BLOCK_SIZE;
        let mut data = Vec::with_capacity(pair_count);
        for _ in 0..pair_count {
            let re = tokens.next().map(parse_f64).transpose()?.ok_or_else(|| {
                VfsError::Corruption("truncated WAL data array".to_string())
            })?;
            let im = tokens.next().map(parse_f64).transpose()?.ok_or_else(|| {
                VfsError::Corruption("truncated WAL data array".to_string())
            })?;
            data.push((re, im));
        }

        let record = EncryptedRecord {
            name_hash,
            data_hash,
            block_count: len,
            data,
        };
        match op_code {
            0 => Ok(WalOp::Insert(record)),
            1 => Ok(WalOp::Update(record)),
            other => Err(VfsError::Corruption(format!("unknown WAL op {}", other))),
        }
    }

    /// Truncate the log file and reset the entry counter.
    pub fn clear(&mut self) -> VfsResult<()> {
        fs::write(&self.path, "")?;
        self.entry_count = 0;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the facade should compact after the latest append.
    pub fn should_compact(&self) -> bool {
        self.entry_count >= self.auto_compact_threshold
    }

    pub fn auto_compact_threshold(&self) -> usize {
        self.auto_compact_threshold
    }

    /// Set the auto-compaction threshold; zero is rejected.
    pub fn set_auto_compact_threshold(&mut self, threshold: usize) -> VfsResult<()> {
        if threshold == 0 {
            return Err(VfsError::Invariant(
                "auto-compact threshold must be positive".to_string(),
            ));
        }
        self.auto_compact_threshold = threshold;
        Ok(())
    }
}
