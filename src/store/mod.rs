//! Durable storage stack: codec, serializer, storage map, WAL, and saver
//!
//! Layered bottom-up:
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ Saver: string-keyed table store                │
//! ├──────────────┬──────────────┬──────────────────┤
//! │ Serializer   │ Codec        │ StorageMap + WAL │
//! │ (tables ⇄    │ (FFT blocks, │ (records, file   │
//! │  byte stream)│  hashes)     │  persistence)    │
//! └──────────────┴──────────────┴──────────────────┘
//! ```
//!
//! Everything above this module talks to [`Saver`]; the lower layers are
//! exposed for tests and tooling.

pub mod codec;
pub mod serializer;
pub mod storage_map;
pub mod wal;

mod saver;

pub use saver::{
    is_all_digits, parse_column_u64, Saver, SaverOptions, DEFAULT_DATA_FILE, DEFAULT_WAL_FILE,
};
pub use serializer::Table;
pub use storage_map::{EncryptedRecord, StorageMap};
pub use wal::{WalOp, WriteAheadLog, DEFAULT_AUTO_COMPACT_THRESHOLD};
