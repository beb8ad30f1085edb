//! Sequential entry stream over the archive
//!
//! Wraps the `tar` crate's header parsing in a lazy, non-restartable
//! iterator of [`ArchiveEntry`] records. The stream has no knowledge of
//! paths-as-a-tree; it only normalizes each entry's own path and locates
//! its data region inside the logical (decompressed) stream.
//!
//! Failure policy: errors from the tar layer itself are structural
//! (`CorruptArchive`, fatal to the build); a successfully parsed entry
//! whose fields cannot be represented yields `UnsupportedEntry`, which the
//! index builder skips.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::archive::compression::Compression;
use crate::archive::entry::{ArchiveEntry, EntryKind};
use crate::archive::paths;
use crate::error::{Error, Result};

/// PAX key prefix carrying extended attributes
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// Reader wrapper counting bytes consumed from the logical stream
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        CountingReader {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle onto the byte counter
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Lazy sequence of archive entries, consumed once at index-build time
pub struct EntryStream<R: Read> {
    archive: tar::Archive<CountingReader<R>>,
    pos: Arc<AtomicU64>,
}

impl EntryStream<Box<dyn Read + Send>> {
    /// Open the archive at `path`, applying the given transform
    pub fn open(path: &Path, compression: Compression) -> Result<Self> {
        let file = File::open(path)?;
        Ok(EntryStream::new(compression.decoder(file)?))
    }
}

impl<R: Read> EntryStream<R> {
    pub fn new(source: R) -> Self {
        let counting = CountingReader::new(source);
        let pos = counting.counter();
        EntryStream {
            archive: tar::Archive::new(counting),
            pos,
        }
    }

    /// Current position within the logical stream
    pub fn position(&self) -> u64 {
        self.pos.load(Ordering::Relaxed)
    }

    /// Iterate the archive's entries. Single use; the stream cannot rewind.
    pub fn entries(&mut self) -> Result<EntryIter<'_, R>> {
        let pos = Arc::clone(&self.pos);
        let inner = self.archive.entries().map_err(|e| Error::CorruptArchive {
            offset: pos.load(Ordering::Relaxed),
            reason: e.to_string(),
        })?;
        Ok(EntryIter { inner, pos })
    }
}

/// Iterator over parsed entries
pub struct EntryIter<'a, R: 'a + Read> {
    inner: tar::Entries<'a, CountingReader<R>>,
    pos: Arc<AtomicU64>,
}

impl<'a, R: Read> Iterator for EntryIter<'a, R> {
    type Item = Result<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(Error::CorruptArchive {
                        offset: self.pos.load(Ordering::Relaxed),
                        reason: e.to_string(),
                    }));
                }
            };

            match convert(entry) {
                Ok(Some(parsed)) => return Some(Ok(parsed)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn unsupported(path: &Path, reason: impl Into<String>) -> Error {
    Error::UnsupportedEntry {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Map one tar entry onto an [`ArchiveEntry`].
///
/// `Ok(None)` marks records that carry metadata for other entries (PAX
/// headers, GNU long names) or normalize to the archive root itself.
fn convert<R: Read>(mut entry: tar::Entry<'_, R>) -> Result<Option<ArchiveEntry>> {
    let raw_path = entry
        .path()
        .map_err(|e| unsupported(Path::new("<unreadable>"), format!("bad path encoding: {e}")))?
        .into_owned();

    let header = entry.header();
    let entry_type = header.entry_type();

    // Metadata carriers are folded into their neighbors by the tar layer;
    // skip them if they surface anyway.
    if entry_type.is_pax_global_extensions()
        || entry_type.is_pax_local_extensions()
        || entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink()
    {
        return Ok(None);
    }

    if entry_type.is_gnu_sparse() {
        return Err(unsupported(
            &raw_path,
            "sparse entries have no contiguous data region",
        ));
    }

    let kind = if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_symlink() {
        EntryKind::Symlink
    } else if entry_type.is_hard_link() {
        EntryKind::HardLink
    } else if entry_type.is_fifo() {
        EntryKind::Fifo
    } else if entry_type.is_character_special() {
        EntryKind::CharDevice
    } else if entry_type.is_block_special() {
        EntryKind::BlockDevice
    } else if entry_type.is_file() || entry_type.is_contiguous() {
        EntryKind::Regular
    } else {
        return Err(unsupported(&raw_path, "unrepresentable entry type"));
    };

    let path = match paths::normalize(&raw_path)? {
        Some(path) => path,
        None => return Ok(None),
    };

    let mode = header
        .mode()
        .map_err(|e| unsupported(&path, format!("bad mode field: {e}")))?
        & 0o7777;
    let uid = header
        .uid()
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| unsupported(&path, "uid exceeds representable range"))?;
    let gid = header
        .gid()
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| unsupported(&path, "gid exceeds representable range"))?;
    let mtime = header
        .mtime()
        .map_err(|e| unsupported(&path, format!("bad mtime field: {e}")))?;

    let link_target = entry
        .link_name()
        .map_err(|e| unsupported(&path, format!("bad link target: {e}")))?
        .map(|t| t.into_owned());
    if matches!(kind, EntryKind::Symlink | EntryKind::HardLink) && link_target.is_none() {
        return Err(unsupported(&path, "link entry without a target"));
    }

    let size = if kind == EntryKind::Regular { entry.size() } else { 0 };
    let data_offset = entry.raw_file_position();

    let mut xattrs = Vec::new();
    if let Some(extensions) = entry
        .pax_extensions()
        .map_err(|e| unsupported(&path, format!("bad PAX extensions: {e}")))?
    {
        for extension in extensions {
            let extension =
                extension.map_err(|e| unsupported(&path, format!("bad PAX record: {e}")))?;
            if let Ok(key) = extension.key() {
                if let Some(name) = key.strip_prefix(PAX_XATTR_PREFIX) {
                    xattrs.push((name.to_string(), extension.value_bytes().to_vec()));
                }
            }
        }
    }

    Ok(Some(ArchiveEntry {
        path,
        kind,
        size,
        mode,
        uid,
        gid,
        mtime,
        link_target,
        data_offset,
        xattrs,
    }))
}
