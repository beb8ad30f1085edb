//! File handle management
//!
//! The mount is read-only, so a handle only remembers which inode was
//! opened and which inode actually owns the data (they differ for hard
//! links).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Represents an open file
#[derive(Debug, Clone, Copy)]
pub struct Handle {
    /// Inode the caller opened
    pub ino: u64,
    /// Inode whose data region serves reads
    pub target_ino: u64,
}

/// Manages open file handles
pub struct HandleManager {
    /// Next handle ID
    next_id: AtomicU64,
    /// Open handles
    handles: RwLock<HashMap<u64, Handle>>,
}

impl HandleManager {
    pub fn new() -> Self {
        HandleManager {
            next_id: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Open a file and return a handle ID
    pub fn open(&self, ino: u64, target_ino: u64) -> u64 {
        let fh = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handles.write().insert(fh, Handle { ino, target_ino });
        fh
    }

    /// Get a handle by ID
    pub fn get(&self, fh: u64) -> Option<Handle> {
        self.handles.read().get(&fh).copied()
    }

    /// Close a handle
    pub fn close(&self, fh: u64) -> Option<Handle> {
        self.handles.write().remove(&fh)
    }

    /// Number of currently open handles
    pub fn open_count(&self) -> usize {
        self.handles.read().len()
    }
}

impl Default for HandleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let manager = HandleManager::new();

        let fh1 = manager.open(2, 2);
        let fh2 = manager.open(3, 5);
        assert_ne!(fh1, fh2);

        assert_eq!(manager.get(fh2).unwrap().target_ino, 5);
        assert_eq!(manager.open_count(), 2);

        manager.close(fh1);
        assert!(manager.get(fh1).is_none());
        assert_eq!(manager.open_count(), 1);
    }

    #[test]
    fn test_unknown_handle() {
        let manager = HandleManager::new();
        assert!(manager.get(999).is_none());
        assert!(manager.close(999).is_none());
    }
}
