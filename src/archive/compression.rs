//! Decompression transform selection
//!
//! The transform is picked from the archive filename the same way the
//! classic tar tools do it, or forced explicitly on the command line.
//! Decoders are plain sequential readers; random access on top of them is
//! the resolver's job.

use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Compression transform applied to the archive byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Compression {
    /// Plain tar, no transform
    None,
    /// gzip (.tar.gz, .tgz)
    Gzip,
    /// bzip2 (.tar.bz2, .tbz2)
    Bzip2,
    /// xz (.tar.xz, .txz)
    Xz,
    /// zstandard (.tar.zst, .tzst)
    Zstd,
}

impl Compression {
    /// Pick a transform from the archive filename
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_ascii_lowercase(),
            None => return Compression::None,
        };

        match ext.as_str() {
            "gz" | "tgz" => Compression::Gzip,
            "bz2" | "tbz2" => Compression::Bzip2,
            "xz" | "txz" => Compression::Xz,
            "zst" | "tzst" => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Whether reads need the checkpointed resolver
    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }

    /// Wrap the raw archive byte source in the matching sequential decoder
    pub fn decoder<R: Read + Send + 'static>(self, source: R) -> Result<Box<dyn Read + Send>> {
        Ok(match self {
            Compression::None => Box::new(source),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(source)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(source)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(source)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(source)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_for_filename() {
        let cases = [
            ("tarfile1.tar", Compression::None),
            ("tarfile1.tar.gz", Compression::Gzip),
            ("tarfile1.tar.bz2", Compression::Bzip2),
            ("tarfile1.tar.xz", Compression::Xz),
            ("tarfile1.tar.zst", Compression::Zstd),
            ("tarfile1.tgz", Compression::Gzip),
            ("tarfile1.tbz2", Compression::Bzip2),
            ("tarfile1.txz", Compression::Xz),
            ("tarfile1.tzst", Compression::Zstd),
            ("TARFILE1.TAR.GZ", Compression::Gzip),
            ("noext", Compression::None),
        ];

        for (name, expected) in cases {
            assert_eq!(
                Compression::from_path(Path::new(name)),
                expected,
                "wrong transform for {name}"
            );
        }
    }

    #[test]
    fn test_gzip_decoder_round_trip() {
        use std::fs::File;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.gz");

        let payload = b"sequential access only".repeat(64);
        let mut enc =
            flate2::write::GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
        enc.write_all(&payload).unwrap();
        enc.finish().unwrap();

        let mut out = Vec::new();
        Compression::Gzip
            .decoder(File::open(&path).unwrap())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, payload);
    }
}
