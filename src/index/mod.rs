//! The frozen archive index
//!
//! Consumes the entry stream exactly once at mount time and turns the flat
//! entry list into a tree of nodes with stable inode numbers. After
//! [`ArchiveIndex::build`] returns the index is immutable; every query is a
//! plain read and needs no locking.
//!
//! Duplicate paths follow tar extraction semantics: the entry seen later in
//! the stream wins. Parent directories are synthesized on demand so a child
//! can always attach, even when the archive never mentions `a` or `a/b`
//! before `a/b/c`.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::archive::{paths, ArchiveEntry, EntryKind, EntryStream};
use crate::error::{Error, Result};

mod node;

pub use node::{Node, ROOT_INO};

/// Path→inode and inode→node lookups over the node arena
#[derive(Debug)]
pub struct ArchiveIndex {
    /// Arena; inode `n` lives at slot `n - 1`
    nodes: Vec<Node>,
    /// Full normalized path → inode
    paths: HashMap<PathBuf, u64>,
    /// mtime assigned to synthesized directories
    default_mtime: u64,
}

impl ArchiveIndex {
    /// Consume the entry stream and freeze the tree.
    ///
    /// Structurally corrupt archives abort the build; entries that cannot
    /// be represented are skipped with a warning and the build continues.
    pub fn build<R: Read>(stream: &mut EntryStream<R>, default_mtime: u64) -> Result<Self> {
        let mut root = Node::new(
            ROOT_INO,
            ROOT_INO,
            OsString::new(),
            ArchiveEntry::synthesized_dir(PathBuf::new(), default_mtime),
        );
        root.synthesized = true;

        let mut index = ArchiveIndex {
            nodes: vec![root],
            paths: HashMap::new(),
            default_mtime,
        };

        for item in stream.entries()? {
            match item.and_then(|entry| index.insert(entry)) {
                Ok(()) => {}
                Err(Error::UnsupportedEntry { path, reason }) => {
                    warn!(path = %path.display(), %reason, "skipping archive entry");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(nodes = index.nodes.len(), "archive index frozen");
        Ok(index)
    }

    /// Resolve a name within a directory. `.` and `..` follow standard
    /// directory semantics; the root's `..` is the root itself.
    pub fn resolve(&self, parent: u64, name: &OsStr) -> Result<u64> {
        let node = self.node(parent)?;
        if !node.is_dir() {
            return Err(Error::NotADirectory);
        }
        if name == OsStr::new(".") {
            return Ok(node.ino);
        }
        if name == OsStr::new("..") {
            return Ok(node.parent);
        }
        node.child(name).ok_or(Error::NotFound)
    }

    /// Ordered children of a directory node
    pub fn children(&self, ino: u64) -> Result<&[(OsString, u64)]> {
        let node = self.node(ino)?;
        if !node.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(&node.children)
    }

    /// The archive record behind a node
    pub fn entry(&self, ino: u64) -> Result<&ArchiveEntry> {
        Ok(&self.node(ino)?.entry)
    }

    pub fn node(&self, ino: u64) -> Result<&Node> {
        if ino == 0 {
            return Err(Error::NotFound);
        }
        self.nodes.get((ino - 1) as usize).ok_or(Error::NotFound)
    }

    /// Inode for a full normalized path; empty path is the root
    pub fn lookup_path(&self, path: &Path) -> Option<u64> {
        if path.as_os_str().is_empty() {
            return Some(ROOT_INO);
        }
        self.paths.get(path).copied()
    }

    /// Total nodes allocated over the mount's lifetime
    pub fn node_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    fn insert(&mut self, entry: ArchiveEntry) -> Result<()> {
        let path = entry.path.clone();
        let parent = self.ensure_parents(&path)?;
        let name = match path.file_name() {
            Some(name) => name.to_os_string(),
            None => {
                return Err(Error::UnsupportedEntry {
                    path,
                    reason: "entry has no final path component".into(),
                });
            }
        };

        let hardlink_target = if entry.kind == EntryKind::HardLink {
            Some(self.resolve_hardlink(&entry)?)
        } else {
            None
        };

        // Only a node still wired into the live tree may be adopted; a
        // stale paths-map entry (its parent chain was replaced) is treated
        // like a fresh path.
        let existing = self
            .paths
            .get(&path)
            .copied()
            .filter(|&ino| self.node_ref(parent).child(&name) == Some(ino));

        let ino = match existing {
            Some(ino) if self.node_ref(ino).synthesized && entry.kind == EntryKind::Directory => {
                // Explicit directory arriving after children implied it:
                // adopt the placeholder, keep the identifier.
                let node = self.node_mut(ino);
                node.entry = entry;
                node.synthesized = false;
                ino
            }
            _ => {
                // Last-write-wins: fresh identifier; an existing name
                // keeps its listing position.
                let ino = self.alloc(parent, name.clone(), entry);
                self.node_mut(parent).set_child(name, ino);
                self.paths.insert(path, ino);
                ino
            }
        };

        if let Some(target) = hardlink_target {
            self.node_mut(ino).hardlink_target = Some(target);
            self.node_mut(target).nlink += 1;
        }

        Ok(())
    }

    /// Walk (and synthesize) the directory chain above `path`
    fn ensure_parents(&mut self, path: &Path) -> Result<u64> {
        let mut current = ROOT_INO;
        let parent_path = match path.parent() {
            Some(parent) => parent,
            None => return Ok(current),
        };

        let mut walked = PathBuf::new();
        for component in parent_path.components() {
            walked.push(component);
            let name = component.as_os_str().to_os_string();

            // Usable only if it is a directory still attached to the live
            // chain; otherwise (absent, a file in the way, or detached by
            // an earlier replacement) a fresh directory takes the slot.
            let usable = self
                .paths
                .get(&walked)
                .copied()
                .filter(|&ino| {
                    self.node_ref(ino).is_dir() && self.node_ref(current).child(&name) == Some(ino)
                });

            current = match usable {
                Some(ino) => ino,
                None => {
                    let dir = self.synthesize_dir(current, walked.clone());
                    self.node_mut(current).set_child(name, dir);
                    self.paths.insert(walked.clone(), dir);
                    dir
                }
            };
        }

        Ok(current)
    }

    /// Find the data-owning inode behind a hard link entry
    fn resolve_hardlink(&self, entry: &ArchiveEntry) -> Result<u64> {
        let raw_target = entry.link_target.as_ref().ok_or_else(|| Error::UnsupportedEntry {
            path: entry.path.clone(),
            reason: "hard link without a target".into(),
        })?;

        let normalized = paths::normalize(raw_target)?.ok_or_else(|| Error::UnsupportedEntry {
            path: entry.path.clone(),
            reason: "hard link target resolves to the archive root".into(),
        })?;

        let target = self
            .paths
            .get(&normalized)
            .copied()
            .ok_or_else(|| Error::UnsupportedEntry {
                path: entry.path.clone(),
                reason: format!("hard link target {} not present in archive", normalized.display()),
            })?;

        // Chase links-to-links so every hard link shares one data owner.
        let owner = self.node_ref(target).hardlink_target.unwrap_or(target);
        if !self.node_ref(owner).is_file() {
            return Err(Error::UnsupportedEntry {
                path: entry.path.clone(),
                reason: "hard link target is not a regular file".into(),
            });
        }
        Ok(owner)
    }

    fn alloc(&mut self, parent: u64, name: OsString, entry: ArchiveEntry) -> u64 {
        let ino = self.nodes.len() as u64 + 1;
        self.nodes.push(Node::new(ino, parent, name, entry));
        ino
    }

    fn synthesize_dir(&mut self, parent: u64, path: PathBuf) -> u64 {
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        let entry = ArchiveEntry::synthesized_dir(path, self.default_mtime);
        let ino = self.alloc(parent, name, entry);
        self.node_mut(ino).synthesized = true;
        ino
    }

    fn node_ref(&self, ino: u64) -> &Node {
        &self.nodes[(ino - 1) as usize]
    }

    fn node_mut(&mut self, ino: u64) -> &mut Node {
        &mut self.nodes[(ino - 1) as usize]
    }
}
