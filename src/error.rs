//! Error types for tarmount
//!
//! Build-time failures distinguish structural corruption (fatal to the
//! mount attempt) from single entries that cannot be represented (skipped).
//! Query-time failures map onto the standard errno vocabulary the kernel
//! expects.

use std::path::PathBuf;

use libc::c_int;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the archive bridge
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header failed structural validation; the archive cannot be indexed
    #[error("corrupt archive at stream offset {offset}: {reason}")]
    CorruptArchive { offset: u64, reason: String },

    /// A single entry cannot be represented and was skipped
    #[error("unsupported entry {path:?}: {reason}")]
    UnsupportedEntry { path: PathBuf, reason: String },

    /// No node with the requested inode or name
    #[error("no such entry")]
    NotFound,

    /// Directory operation on a non-directory node
    #[error("not a directory")]
    NotADirectory,

    /// File operation on a node without readable data
    #[error("not a regular file")]
    NotAFile,

    /// Read starting past the end of an entry's data
    #[error("read offset past end of entry")]
    OutOfRange,

    /// Invalid mount configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying byte source failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map to the errno surfaced at the FUSE boundary
    pub fn errno(&self) -> c_int {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::NotADirectory => libc::ENOTDIR,
            Error::NotAFile => libc::EPERM,
            Error::OutOfRange => libc::EINVAL,
            Error::CorruptArchive { .. }
            | Error::UnsupportedEntry { .. }
            | Error::Config(_)
            | Error::Io(_) => libc::EIO,
        }
    }
}
