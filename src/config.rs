//! Mount configuration
//!
//! Everything the bridge needs to go from an archive path to a live
//! mount. The mount point may be given explicitly or derived from the
//! archive filename by stripping its archive extensions.

use std::path::{Path, PathBuf};

use crate::archive::Compression;
use crate::error::{Error, Result};

/// Default milestone spacing for the checkpoint table: 2 MiB
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 2 * 1024 * 1024;

/// Mount configuration
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Path to the archive file
    pub archive: PathBuf,

    /// Mount point; derived from the archive name when absent
    pub mount_point: Option<PathBuf>,

    /// Transform override; picked from the filename when absent
    pub compression: Option<Compression>,

    /// Milestone spacing of the checkpoint table, in decompressed bytes
    pub checkpoint_interval: usize,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,

    /// Create the mount point directory if it is missing
    pub create_mount_point: bool,
}

impl MountConfig {
    pub fn new(archive: PathBuf) -> Self {
        MountConfig {
            archive,
            mount_point: None,
            compression: None,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            allow_other: false,
            allow_root: false,
            create_mount_point: false,
        }
    }

    /// Transform to apply, honoring the explicit override first
    pub fn transform(&self) -> Compression {
        self.compression
            .unwrap_or_else(|| Compression::from_path(&self.archive))
    }

    /// Validate (and possibly create) the mount point directory
    pub fn resolve_mount_point(&self) -> Result<PathBuf> {
        let mount_point = match &self.mount_point {
            Some(path) => path.clone(),
            None => derive_mount_point(&self.archive)?,
        };

        if !mount_point.exists() {
            if self.create_mount_point {
                std::fs::create_dir_all(&mount_point)?;
                return Ok(mount_point);
            }
            return Err(Error::Config(format!(
                "mount point {} does not exist",
                mount_point.display()
            )));
        }
        if !mount_point.is_dir() {
            return Err(Error::Config(format!(
                "mount point {} is not a directory",
                mount_point.display()
            )));
        }
        Ok(mount_point)
    }
}

/// Strip archive extensions off the archive name: `src.tar.gz` → `src`
fn derive_mount_point(archive: &Path) -> Result<PathBuf> {
    let mut candidate = archive.to_path_buf();
    while let Some(ext) = candidate.extension().and_then(|e| e.to_str()) {
        if !is_archive_extension(ext) {
            break;
        }
        candidate.set_extension("");
    }

    if candidate.as_os_str().is_empty() || candidate == archive {
        return Err(Error::Config(format!(
            "cannot derive a mount point from {}; pass one explicitly",
            archive.display()
        )));
    }
    Ok(candidate)
}

fn is_archive_extension(ext: &str) -> bool {
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "tar" | "gz" | "tgz" | "bz2" | "tbz2" | "xz" | "txz" | "zst" | "tzst"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_point_derived_from_archive_name() {
        let cases = [
            ("/data/src.tar", "/data/src"),
            ("/data/src.tar.gz", "/data/src"),
            ("/data/src.tgz", "/data/src"),
            ("/data/src.tar.zst", "/data/src"),
        ];
        for (archive, expected) in cases {
            assert_eq!(
                derive_mount_point(Path::new(archive)).unwrap(),
                PathBuf::from(expected)
            );
        }
    }

    #[test]
    fn test_underivable_mount_point_rejected() {
        assert!(matches!(
            derive_mount_point(Path::new("/data/archive")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_mount_point_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MountConfig::new(dir.path().join("a.tar"));
        config.mount_point = Some(dir.path().join("absent"));

        match config.resolve_mount_point() {
            Err(Error::Config(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_mount_point_created_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MountConfig::new(dir.path().join("a.tar"));
        config.mount_point = Some(dir.path().join("fresh"));
        config.create_mount_point = true;

        let resolved = config.resolve_mount_point().unwrap();
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_mount_point_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("plain");
        std::fs::write(&file_path, b"x").unwrap();

        let mut config = MountConfig::new(dir.path().join("a.tar"));
        config.mount_point = Some(file_path);

        match config.resolve_mount_point() {
            Err(Error::Config(msg)) => assert!(msg.contains("not a directory")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_transform_override_wins() {
        let mut config = MountConfig::new(PathBuf::from("a.tar.gz"));
        assert_eq!(config.transform(), Compression::Gzip);

        config.compression = Some(Compression::None);
        assert_eq!(config.transform(), Compression::None);
    }
}
