//! # branchfs
//!
//! A single-process, persistent virtual file system with branching
//! version history. Files and directories live inside named versions;
//! any version can be forked into a new branch, and every mutation is
//! crash-recoverable through a write-ahead log compacted into a
//! snapshot file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FileSystem                           │
//! │   chdir / ls / mkdir / rm / rename / find / versions        │
//! ├──────────────┬──────────────────┬───────────────────────────┤
//! │  TreeEngine  │  VersionManager  │  NodeStore + BlobStore    │
//! │  COW n-ary   │  named roots,    │  refcounted metadata      │
//! │  tree with a │  fork shares     │  rows and content blobs   │
//! │  navigation  │  whole subtrees  │                           │
//! │  cursor      │                  │                           │
//! ├──────────────┴──────────────────┴───────────────────────────┤
//! │                          Saver                              │
//! │   serialize ▸ FFT-encrypt ▸ StorageMap ▸ WAL ▸ snapshot     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tree is left-child/right-sibling with per-node reference counts:
//! forking a version adds one reference to every shared node, and any
//! mutation clones only the path down to the change site, leaving
//! untouched subtrees shared between versions.
//!
//! # Example
//!
//! ```no_run
//! use branchfs::{FileSystem, SaverOptions};
//!
//! # fn main() -> branchfs::VfsResult<()> {
//! let mut fs = FileSystem::open(SaverOptions::default())?;
//! fs.make_file("notes.txt")?;
//! fs.update_content("notes.txt", "remember the milk")?;
//!
//! let branch = fs.branch("experiment")?;
//! fs.update_content("notes.txt", "remember the oat milk")?;
//!
//! fs.switch_version(1001)?;
//! assert_eq!(fs.get_content("notes.txt")?, "remember the milk");
//! fs.switch_version(branch)?;
//! fs.close()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fs;
pub mod shell;
pub mod store;

pub use error::{VfsError, VfsResult};
pub use fs::{FileSystem, NodeKind, VersionSummary};
pub use store::{Saver, SaverOptions};
