//! Tree nodes of the exposed namespace
//!
//! Nodes live in an arena owned by the index and refer to each other by
//! inode number, never by reference, so the hierarchy carries no ownership
//! cycles.

use std::ffi::{OsStr, OsString};

use crate::archive::{ArchiveEntry, EntryKind};

/// Inode number of the archive root (the FUSE root inode)
pub const ROOT_INO: u64 = 1;

/// One item in the exposed directory tree
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable inode number, assigned at build time, never reused
    pub ino: u64,
    /// Parent inode; the root is its own parent
    pub parent: u64,
    /// Name within the parent directory (empty for the root)
    pub name: OsString,
    /// The archive record backing this node
    pub entry: ArchiveEntry,
    /// Ordered children, first-seen archive order
    pub children: Vec<(OsString, u64)>,
    /// Data-owning inode this hard link resolves to
    pub hardlink_target: Option<u64>,
    /// Link count reported through getattr
    pub nlink: u32,
    /// Directory created from child paths only, still replaceable by a
    /// later explicit entry
    pub synthesized: bool,
}

impl Node {
    pub fn new(ino: u64, parent: u64, name: OsString, entry: ArchiveEntry) -> Self {
        let nlink = if entry.kind == EntryKind::Directory { 2 } else { 1 };
        Node {
            ino,
            parent,
            name,
            entry,
            children: Vec::new(),
            hardlink_target: None,
            nlink,
            synthesized: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.entry.kind == EntryKind::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.entry.kind == EntryKind::Symlink
    }

    /// Find a child inode by name
    pub fn child(&self, name: &OsStr) -> Option<u64> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, ino)| ino)
    }

    /// Point `name` at `ino`: an existing slot keeps its position in the
    /// listing, a new name appends in first-seen order.
    pub fn set_child(&mut self, name: OsString, ino: u64) {
        match self.children.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = ino,
            None => self.children.push((name, ino)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn dir_node(ino: u64) -> Node {
        Node::new(
            ino,
            ROOT_INO,
            OsString::from("d"),
            ArchiveEntry::synthesized_dir(PathBuf::from("d"), 0),
        )
    }

    #[test]
    fn test_child_order_preserved() {
        let mut node = dir_node(2);
        node.set_child("b".into(), 3);
        node.set_child("a".into(), 4);

        assert_eq!(node.child(OsStr::new("a")), Some(4));
        assert_eq!(node.children[0].0, OsString::from("b"));
    }

    #[test]
    fn test_set_child_keeps_position_of_existing_name() {
        let mut node = dir_node(2);
        node.set_child("a".into(), 3);
        node.set_child("b".into(), 4);

        node.set_child("a".into(), 9);
        assert_eq!(node.children[0], (OsString::from("a"), 9));
        assert_eq!(node.children[1], (OsString::from("b"), 4));
        assert_eq!(node.children.len(), 2);
    }

    #[test]
    fn test_directory_nlink_default() {
        assert_eq!(dir_node(2).nlink, 2);
    }
}
