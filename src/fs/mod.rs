//! The virtual file tree and its managers
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │ FileSystem: user-level facade                     │
//! ├─────────────┬───────────────┬─────────────────────┤
//! │ TreeEngine  │ VersionManager│ NodeStore/BlobStore │
//! │ (COW n-ary  │ (named roots, │ (refcounted rows    │
//! │  tree +     │  fork,        │  and content        │
//! │  cursor)    │  persistence) │  blobs)             │
//! └─────────────┴───────────────┴─────────────────────┘
//! ```

pub mod blob_store;
pub mod node_store;
pub mod tree;
pub mod version;

mod filesystem;

pub use blob_store::BlobStore;
pub use filesystem::FileSystem;
pub use node_store::NodeStore;
pub use tree::{Handle, NodeKind, TreeArena, TreeEngine, TreeNode};
pub use version::{VersionManager, VersionSummary, FIRST_VERSION_ID};
