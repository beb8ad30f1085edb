//! Checkpointed access into a compressed logical stream
//!
//! Decompression is sequential; random access is recovered by materializing
//! the stream in milestone-aligned segments. A single frontier decoder
//! advances forward exactly once per mount, recording a checkpoint (the
//! segment's bytes plus the raw-stream position reached) every time it
//! crosses a milestone. The table is append-only and gap-free below the
//! frontier, so any read under it is a lock-free-ish memory copy and never
//! touches the decoder again.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::archive::{Compression, CountingReader};
use crate::error::Result;

/// One materialized milestone segment
struct Checkpoint {
    /// Decompressed bytes of this segment
    data: Arc<Vec<u8>>,
    /// Raw (compressed) stream position when the segment was completed
    raw_pos: u64,
}

/// Append-only table of materialized segments
struct CheckpointTable {
    segments: Vec<Checkpoint>,
    /// Total decompressed bytes materialized
    len: u64,
    /// The frontier decoder reached end of stream
    finished: bool,
}

/// The sequential decoder feeding the table
struct Frontier {
    decoder: Option<Box<dyn Read + Send>>,
    raw_count: Arc<AtomicU64>,
}

/// Random-access reads over a compressed archive
pub struct CheckpointedSource {
    path: PathBuf,
    compression: Compression,
    interval: usize,
    table: RwLock<CheckpointTable>,
    frontier: Mutex<Frontier>,
    /// Decompressed bytes produced over the mount's lifetime
    produced: AtomicU64,
}

impl CheckpointedSource {
    pub fn new(path: &Path, compression: Compression, interval: usize) -> Self {
        assert!(interval > 0, "checkpoint interval must be nonzero");
        CheckpointedSource {
            path: path.to_path_buf(),
            compression,
            interval,
            table: RwLock::new(CheckpointTable {
                segments: Vec::new(),
                len: 0,
                finished: false,
            }),
            frontier: Mutex::new(Frontier {
                decoder: None,
                raw_count: Arc::new(AtomicU64::new(0)),
            }),
            produced: AtomicU64::new(0),
        }
    }

    /// Copy `len` bytes starting at the logical offset, truncating at the
    /// end of the stream.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.materialize_to(offset + len as u64)?;

        let table = self.table.read();
        let end = (offset + len as u64).min(table.len);
        if offset >= end {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let slot = (pos / self.interval as u64) as usize;
            let segment = &table.segments[slot];
            let local = (pos - slot as u64 * self.interval as u64) as usize;
            let take = (segment.data.len() - local).min((end - pos) as usize);
            out.extend_from_slice(&segment.data[local..local + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    /// Decompressed bytes produced so far; reads below the frontier do not
    /// move this counter.
    pub fn bytes_decompressed(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Advance the frontier until `target` logical bytes are materialized
    /// (or the stream ends), recording a checkpoint per crossed milestone.
    fn materialize_to(&self, target: u64) -> Result<()> {
        {
            let table = self.table.read();
            if table.len >= target || table.finished {
                return Ok(());
            }
        }

        let mut frontier = self.frontier.lock();
        loop {
            // A concurrent reader may have advanced past us while we
            // waited on the frontier lock.
            {
                let table = self.table.read();
                if table.len >= target || table.finished {
                    return Ok(());
                }
            }

            let mut decoder = match frontier.decoder.take() {
                Some(decoder) => decoder,
                None => {
                    let source = CountingReader::new(File::open(&self.path)?);
                    frontier.raw_count = source.counter();
                    let mut decoder = self.compression.decoder(source)?;
                    // A fresh decoder starts at byte zero. If an earlier
                    // I/O error dropped the frontier mid-stream, it must
                    // first re-reach the materialized length.
                    let materialized = self.table.read().len;
                    if materialized > 0 {
                        let skipped = std::io::copy(
                            &mut (&mut decoder).take(materialized),
                            &mut std::io::sink(),
                        )?;
                        self.produced.fetch_add(skipped, Ordering::Relaxed);
                    }
                    debug!(path = %self.path.display(), "opened frontier decoder");
                    decoder
                }
            };

            let mut segment = vec![0u8; self.interval];
            let filled = read_full(&mut decoder, &mut segment)?;
            segment.truncate(filled);
            frontier.decoder = Some(decoder);

            self.produced.fetch_add(filled as u64, Ordering::Relaxed);
            let raw_pos = frontier.raw_count.load(Ordering::Relaxed);

            let mut table = self.table.write();
            let milestone = table.segments.len();
            table.len += filled as u64;
            if filled < self.interval {
                table.finished = true;
            }
            trace!(
                milestone,
                logical_end = table.len,
                raw_pos,
                "recorded checkpoint"
            );
            table.segments.push(Checkpoint {
                data: Arc::new(segment),
                raw_pos,
            });
            if table.finished {
                debug!(total = table.len, "logical stream fully materialized");
            }
        }
    }
}

/// Read until `buf` is full or the stream ends
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
