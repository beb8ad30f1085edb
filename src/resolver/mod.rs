//! Random-access reads against the logical stream
//!
//! Uncompressed archives are served by positioned reads on the archive
//! file. Compressed archives go through the checkpoint table in
//! [`checkpoint`]. Either way the caller supplies an entry and an
//! entry-local range; the resolver translates to logical stream offsets
//! and applies truncated-read semantics at the entry boundary.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::archive::{ArchiveEntry, Compression};
use crate::error::{Error, Result};

mod checkpoint;

pub use checkpoint::CheckpointedSource;

/// Serves byte ranges of entry data regions
pub enum OffsetResolver {
    /// Plain archive: stateless positioned reads
    Direct(DirectSource),
    /// Compressed archive: milestone checkpoints
    Checkpointed(CheckpointedSource),
}

impl OffsetResolver {
    /// Open the resolver matching the archive's transform
    pub fn open(path: &Path, compression: Compression, interval: usize) -> Result<Self> {
        Ok(if compression.is_compressed() {
            OffsetResolver::Checkpointed(CheckpointedSource::new(path, compression, interval))
        } else {
            OffsetResolver::Direct(DirectSource {
                file: File::open(path)?,
            })
        })
    }

    /// Read up to `len` bytes of an entry's data starting at the
    /// entry-local `start`.
    ///
    /// `start` past the entry's size is `OutOfRange`; a range overlapping
    /// the end is truncated, so the only short read is at end-of-entry.
    pub fn read_range(&self, entry: &ArchiveEntry, start: u64, len: usize) -> Result<Vec<u8>> {
        if start > entry.size {
            return Err(Error::OutOfRange);
        }
        let len = len.min((entry.size - start) as usize);
        if len == 0 {
            return Ok(Vec::new());
        }

        let offset = entry.data_offset + start;
        match self {
            OffsetResolver::Direct(source) => source.read_at(offset, len),
            OffsetResolver::Checkpointed(source) => source.read_at(offset, len),
        }
    }

    /// Decompressed bytes produced so far (0 for plain archives)
    pub fn bytes_decompressed(&self) -> u64 {
        match self {
            OffsetResolver::Direct(_) => 0,
            OffsetResolver::Checkpointed(source) => source.bytes_decompressed(),
        }
    }
}

/// Positioned reads on an uncompressed archive file
pub struct DirectSource {
    file: File,
}

impl DirectSource {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64)? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
