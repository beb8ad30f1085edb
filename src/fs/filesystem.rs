//! FUSE filesystem over the archive index
//!
//! Every operation is a read-only query against the frozen index, with
//! reads delegated to the offset resolver. The tree cannot change while
//! mounted, so attribute and entry TTLs are long.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyXattr, Request,
};
use libc::{c_int, EINVAL, EISDIR, ENOENT, EPERM, EROFS};
use tracing::{debug, error, info};

use crate::archive::{ArchiveEntry, EntryKind, EntryStream};
use crate::config::MountConfig;
use crate::error::{Error, Result};
use crate::fs::handle::HandleManager;
use crate::index::ArchiveIndex;
use crate::resolver::OffsetResolver;

/// The tree is immutable for the mount's lifetime
const TTL: Duration = Duration::from_secs(3600);

#[cfg(target_os = "macos")]
const NO_XATTR: c_int = libc::ENOATTR;
#[cfg(not(target_os = "macos"))]
const NO_XATTR: c_int = libc::ENODATA;

/// Read-only FUSE filesystem backed by a tar archive
pub struct TarFs {
    index: ArchiveIndex,
    resolver: OffsetResolver,
    handles: HandleManager,
    /// On-disk size of the archive file, for statfs
    archive_size: u64,
}

impl TarFs {
    /// Index the archive and prepare the resolver.
    ///
    /// This is the blocking build phase; the filesystem is only handed to
    /// the session once it returns.
    pub fn open(config: &MountConfig) -> Result<Self> {
        let compression = config.transform();
        let metadata = std::fs::metadata(&config.archive)?;
        let default_mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut stream = EntryStream::open(&config.archive, compression)?;
        let index = ArchiveIndex::build(&mut stream, default_mtime)?;
        info!(
            archive = %config.archive.display(),
            nodes = index.node_count(),
            ?compression,
            "archive indexed"
        );

        let resolver =
            OffsetResolver::open(&config.archive, compression, config.checkpoint_interval)?;

        Ok(TarFs {
            index,
            resolver,
            handles: HandleManager::new(),
            archive_size: metadata.len(),
        })
    }

    /// Build the attribute view of a node. Hard links surface the target's
    /// metadata under their own inode.
    fn attr(&self, ino: u64) -> Result<FileAttr> {
        let node = self.index.node(ino)?;
        let (entry, nlink) = match node.hardlink_target {
            Some(target) => {
                let owner = self.index.node(target)?;
                (&owner.entry, owner.nlink)
            }
            None => (&node.entry, node.nlink),
        };

        let mtime = timestamp(entry.mtime);
        Ok(FileAttr {
            ino,
            size: entry.size,
            blocks: (entry.size + 511) / 512,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: entry.kind.to_fuser(),
            perm: entry.mode as u16,
            nlink,
            uid: entry.uid,
            gid: entry.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        })
    }

    /// Which inode's data region an open of `ino` should read, or the
    /// errno to report.
    fn open_target(&self, ino: u64) -> std::result::Result<u64, c_int> {
        let node = self.index.node(ino).map_err(|e| e.errno())?;
        match node.entry.kind {
            EntryKind::Regular => Ok(ino),
            EntryKind::HardLink => node.hardlink_target.ok_or(ENOENT),
            EntryKind::Directory => Err(EISDIR),
            // Symlinks are followed by the caller, never opened here.
            _ => Err(EPERM),
        }
    }

    /// Read a slice of the data region owned by `target_ino`
    fn read_entry(&self, target_ino: u64, offset: u64, size: usize) -> Result<Vec<u8>> {
        let entry = self.index.entry(target_ino)?;
        self.resolver.read_range(entry, offset, size)
    }

    /// Flattened, NUL-terminated xattr name list
    fn xattr_names(entry: &ArchiveEntry) -> Vec<u8> {
        let mut names = Vec::new();
        for (key, _) in &entry.xattrs {
            names.extend_from_slice(key.as_bytes());
            names.push(0);
        }
        names
    }
}

fn timestamp(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

impl Filesystem for TarFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        match self
            .index
            .resolve(parent, name)
            .and_then(|ino| self.attr(ino))
        {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            // Not-found is a normal outcome here, not worth logging.
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        match self.attr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let children = match self.index.children(ino) {
            Ok(children) => children,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        let parent = self
            .index
            .node(ino)
            .map(|node| node.parent)
            .unwrap_or(ino);

        let mut entries: Vec<(u64, fuser::FileType, OsString)> = vec![
            (ino, fuser::FileType::Directory, OsString::from(".")),
            (parent, fuser::FileType::Directory, OsString::from("..")),
        ];
        for (name, child) in children {
            let kind = self
                .index
                .entry(*child)
                .map(|entry| entry.kind.to_fuser())
                .unwrap_or(fuser::FileType::RegularFile);
            entries.push((*child, kind, name.clone()));
        }

        for (i, (child, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            let buffer_full = reply.add(*child, (i + 1) as i64, *kind, name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino);

        match self.index.children(ino) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#o})", ino, flags);

        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(EROFS);
            return;
        }

        match self.open_target(ino) {
            Ok(target) => {
                let fh = self.handles.open(ino, target);
                reply.opened(fh, 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        let handle = match self.handles.get(fh) {
            Some(handle) => handle,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        match self.read_entry(handle.target_ino, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(Error::Io(e)) => {
                error!("read of inode {} failed: {}", handle.target_ino, e);
                reply.error(libc::EIO);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);
        self.handles.close(fh);
        reply.ok();
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);

        let node = match self.index.node(ino) {
            Ok(node) => node,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        match (&node.entry.kind, &node.entry.link_target) {
            (EntryKind::Symlink, Some(target)) => reply.data(target.as_os_str().as_bytes()),
            _ => reply.error(EINVAL),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr(ino={}, size={})", ino, size);

        let entry = match self.index.entry(ino) {
            Ok(entry) => entry,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let names = Self::xattr_names(entry);
        if size == 0 {
            reply.size(names.len() as u32);
        } else if names.len() as u32 <= size {
            reply.data(&names);
        } else {
            reply.error(libc::ERANGE);
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!("getxattr(ino={}, name={:?}, size={})", ino, name, size);

        let entry = match self.index.entry(ino) {
            Ok(entry) => entry,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let value = entry
            .xattrs
            .iter()
            .find(|(key, _)| key.as_bytes() == name.as_bytes())
            .map(|(_, value)| value.as_slice());

        match value {
            Some(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if value.len() as u32 <= size {
                    reply.data(value);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            // Absent key is "no such attribute", not an error condition.
            None => reply.error(NO_XATTR),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(
            (self.archive_size + 511) / 512, // blocks
            0,                               // bfree
            0,                               // bavail
            self.index.node_count(),         // files
            0,                               // ffree
            512,                             // bsize
            255,                             // namelen
            512,                             // frsize
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ROOT_INO;
    use crate::test_support::{gzip, TarFixture};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    fn fixture_tar() -> Vec<u8> {
        TarFixture::new()
            .dir("docs", 0o755)
            .file("docs/readme.txt", b"ten bytes!", 0o644)
            .file("docs/notes.txt", b"second file body", 0o600)
            .symlink("docs/latest", "readme.txt")
            .hardlink("alias.txt", "docs/readme.txt")
            .pax_file("tagged.bin", b"xyz", &[("SCHILY.xattr.user.note", b"hello")])
            .finish()
    }

    fn write_archive(name: &str, bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        (dir, path)
    }

    fn open_fs(path: &Path) -> TarFs {
        let mut config = MountConfig::new(path.to_path_buf());
        config.checkpoint_interval = 4096;
        TarFs::open(&config).unwrap()
    }

    fn resolve_path(fs: &TarFs, path: &str) -> u64 {
        let mut ino = ROOT_INO;
        for part in path.split('/') {
            ino = fs.index.resolve(ino, OsStr::new(part)).unwrap();
        }
        ino
    }

    #[test]
    fn test_plain_archive_end_to_end() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        let root_attr = fs.attr(ROOT_INO).unwrap();
        assert_eq!(root_attr.kind, fuser::FileType::Directory);

        let readme = resolve_path(&fs, "docs/readme.txt");
        let attr = fs.attr(readme).unwrap();
        assert_eq!(attr.size, 10);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.mtime, timestamp(1_600_000_000));

        assert_eq!(fs.read_entry(readme, 0, 100).unwrap(), b"ten bytes!");
        // Truncated read at end-of-entry: exactly the remaining 2 bytes.
        assert_eq!(fs.read_entry(readme, 8, 100).unwrap(), b"s!");
        assert!(fs.read_entry(readme, 10, 100).unwrap().is_empty());
    }

    #[test]
    fn test_compressed_archive_end_to_end() {
        let (_dir, path) = write_archive("t.tar.gz", &gzip(&fixture_tar()));
        let fs = open_fs(&path);

        let notes = resolve_path(&fs, "docs/notes.txt");
        assert_eq!(fs.read_entry(notes, 0, 100).unwrap(), b"second file body");
        assert_eq!(fs.read_entry(notes, 7, 4).unwrap(), b"file");

        // Second read of the same range decompresses nothing further.
        let counted = fs.resolver.bytes_decompressed();
        assert!(counted > 0);
        assert_eq!(fs.read_entry(notes, 7, 4).unwrap(), b"file");
        assert_eq!(fs.resolver.bytes_decompressed(), counted);
    }

    #[test]
    fn test_hardlink_opens_target_data() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        let alias = resolve_path(&fs, "alias.txt");
        let readme = resolve_path(&fs, "docs/readme.txt");

        let target = fs.open_target(alias).unwrap();
        assert_eq!(target, readme);
        assert_eq!(fs.read_entry(target, 0, 100).unwrap(), b"ten bytes!");

        // The alias reports the target's metadata under its own inode.
        let attr = fs.attr(alias).unwrap();
        assert_eq!(attr.ino, alias);
        assert_eq!(attr.size, 10);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn test_open_rejects_non_files() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        let docs = resolve_path(&fs, "docs");
        assert_eq!(fs.open_target(docs), Err(EISDIR));

        let link = resolve_path(&fs, "docs/latest");
        assert_eq!(fs.open_target(link), Err(EPERM));
    }

    #[test]
    fn test_symlink_reports_target() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        let link = resolve_path(&fs, "docs/latest");
        let node = fs.index.node(link).unwrap();
        assert!(node.is_symlink());
        assert_eq!(
            node.entry.link_target.as_deref(),
            Some(Path::new("readme.txt"))
        );
        assert_eq!(fs.attr(link).unwrap().kind, fuser::FileType::Symlink);
    }

    #[test]
    fn test_xattrs_surface_verbatim() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        let tagged = resolve_path(&fs, "tagged.bin");
        let entry = fs.index.entry(tagged).unwrap();
        assert_eq!(TarFs::xattr_names(entry), b"user.note\0".to_vec());
        assert_eq!(entry.xattr("user.note"), Some(&b"hello"[..]));
        assert_eq!(entry.xattr("user.absent"), None);
    }

    #[test]
    fn test_getattr_is_idempotent() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        let ino = resolve_path(&fs, "docs/readme.txt");
        let first = fs.attr(ino).unwrap();
        let second = fs.attr(ino).unwrap();
        assert_eq!(first.ino, second.ino);
        assert_eq!(first.size, second.size);
        assert_eq!(first.perm, second.perm);
        assert_eq!(first.mtime, second.mtime);
    }

    #[test]
    fn test_statfs_figures() {
        let (_dir, path) = write_archive("t.tar", &fixture_tar());
        let fs = open_fs(&path);

        assert_eq!(fs.archive_size, std::fs::metadata(&path).unwrap().len());
        assert!(fs.index.node_count() >= 6);
    }
}
