//! Archive entry representation
//!
//! One `ArchiveEntry` is one logical header+data record from the tar
//! stream, with its path already normalized and its data region located
//! inside the logical (decompressed) stream. Entries are immutable once
//! parsed.

use std::path::PathBuf;

/// Kind of an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Hard link to another entry in the same archive
    HardLink,
    /// Named pipe
    Fifo,
    /// Character device
    CharDevice,
    /// Block device
    BlockDevice,
}

impl EntryKind {
    /// Convert to fuser file type
    pub fn to_fuser(self) -> fuser::FileType {
        match self {
            EntryKind::Regular | EntryKind::HardLink => fuser::FileType::RegularFile,
            EntryKind::Directory => fuser::FileType::Directory,
            EntryKind::Symlink => fuser::FileType::Symlink,
            EntryKind::Fifo => fuser::FileType::NamedPipe,
            EntryKind::CharDevice => fuser::FileType::CharDevice,
            EntryKind::BlockDevice => fuser::FileType::BlockDevice,
        }
    }

    /// Whether the entry owns a data region in the stream
    pub fn has_data(self) -> bool {
        self == EntryKind::Regular
    }
}

/// One parsed record from the archive header stream
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Normalized path, relative to the archive root
    pub path: PathBuf,
    /// Entry kind
    pub kind: EntryKind,
    /// Data size in bytes (0 for everything but regular files)
    pub size: u64,
    /// Permission bits (low 12 bits of the tar mode field)
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
    /// Link target for symlinks and hard links
    pub link_target: Option<PathBuf>,
    /// Byte offset of the data region within the logical stream
    pub data_offset: u64,
    /// PAX extended attributes, in archive order
    pub xattrs: Vec<(String, Vec<u8>)>,
}

impl ArchiveEntry {
    /// Synthesized directory for a path implied by children but absent
    /// from the archive itself. `mtime` comes from the archive file so
    /// synthesized nodes do not show epoch timestamps.
    pub fn synthesized_dir(path: PathBuf, mtime: u64) -> Self {
        ArchiveEntry {
            path,
            kind: EntryKind::Directory,
            size: 0,
            mode: 0o755,
            uid: 0,
            gid: 0,
            mtime,
            link_target: None,
            data_offset: 0,
            xattrs: Vec::new(),
        }
    }

    /// Look up one extended attribute by key
    pub fn xattr(&self, key: &str) -> Option<&[u8]> {
        self.xattrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}
