//! Error types shared by every branchfs subsystem
//!
//! Every fallible core operation returns [`VfsResult`]. The variants map
//! one-to-one onto the failure classes the storage and tree layers can
//! produce; an [`VfsError::Invariant`] means an internal consistency check
//! failed: the current operation is abandoned, the process keeps running.

use std::fmt;
use std::io;

/// Result type for branchfs operations
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors that can occur during file-system and storage operations
#[derive(Debug)]
pub enum VfsError {
    /// A name, id, or version looked up does not exist
    NotFound(String),
    /// The target name already exists as a sibling
    AlreadyExists(String),
    /// A file-only operation hit a directory, or vice versa
    WrongKind { name: String, expected: &'static str },
    /// Parse or integrity failure in a snapshot, WAL, or persisted table
    Corruption(String),
    /// Underlying file read, write, or rename failed
    IoFailure(io::Error),
    /// A structural invariant was violated (cursor shape, share counts)
    Invariant(String),
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::NotFound(what) => write!(f, "not found: {}", what),
            VfsError::AlreadyExists(name) => write!(f, "already exists: {}", name),
            VfsError::WrongKind { name, expected } => {
                write!(f, "{}: not a {}", name, expected)
            }
            VfsError::Corruption(msg) => write!(f, "corrupted data: {}", msg),
            VfsError::IoFailure(err) => write!(f, "i/o failure: {}", err),
            VfsError::Invariant(msg) => write!(f, "invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for VfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VfsError::IoFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        VfsError::IoFailure(err)
    }
}

impl VfsError {
    /// Short diagnostic class, used by the shell for user-facing messages
    pub fn kind(&self) -> &'static str {
        match self {
            VfsError::NotFound(_) => "not-found",
            VfsError::AlreadyExists(_) => "already-exists",
            VfsError::WrongKind { .. } => "wrong-kind",
            VfsError::Corruption(_) => "corruption",
            VfsError::IoFailure(_) => "io-failure",
            VfsError::Invariant(_) => "invariant",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = VfsError::NotFound("notes.txt".to_string());
        assert_eq!(err.to_string(), "not found: notes.txt");

        let err = VfsError::WrongKind {
            name: "logs".to_string(),
            expected: "file",
        };
        assert_eq!(err.to_string(), "logs: not a file");
    }

    #[test]
    fn io_errors_convert() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: VfsError = io.into();
        assert_eq!(err.kind(), "io-failure");
    }
}
