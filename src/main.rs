//! tarmount - mount tar archives as read-only filesystems
//!
//! Usage:
//!   tarmount archive.tar.gz [mountpoint]
//!
//! Without a mount point the archive path minus its extensions is used
//! (archive.tar.gz mounts at ./archive).

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tarmount::{
    config::{MountConfig, DEFAULT_CHECKPOINT_INTERVAL},
    Compression, TarFs,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tarmount")]
#[command(author = "tarmount Contributors")]
#[command(version)]
#[command(about = "Mount tar archives (optionally compressed) as read-only filesystems")]
struct Cli {
    /// Archive to mount (.tar, .tar.gz, .tgz, .tar.bz2, .tar.xz, .tar.zst, ...)
    archive: PathBuf,

    /// Mount point; derived from the archive name when omitted
    mount_point: Option<PathBuf>,

    /// Force a decompression transform instead of guessing from the name
    #[arg(short, long, value_enum)]
    compression: Option<Compression>,

    /// Create the mount point directory if it does not exist
    #[arg(long)]
    create_mountpoint: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the mount
    #[arg(long)]
    allow_root: bool,

    /// Decompression checkpoint spacing in bytes
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_INTERVAL)]
    checkpoint_interval: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = run(cli) {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = MountConfig::new(cli.archive);
    config.mount_point = cli.mount_point;
    config.compression = cli.compression;
    config.checkpoint_interval = cli.checkpoint_interval;
    config.allow_other = cli.allow_other;
    config.allow_root = cli.allow_root;
    config.create_mount_point = cli.create_mountpoint;

    let mount_point = config.resolve_mount_point()?;

    info!(archive = %config.archive.display(), "indexing archive");
    let fs = TarFs::open(&config)
        .with_context(|| format!("failed to index {}", config.archive.display()))?;

    // Build mount options
    let mut options = vec![
        fuser::MountOption::RO,
        fuser::MountOption::FSName("tarmount".to_string()),
        fuser::MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if config.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }

    info!(mount_point = %mount_point.display(), "mounting");
    fuser::mount2(fs, &mount_point, &options)
        .with_context(|| format!("mount session at {} failed", mount_point.display()))?;

    info!("unmounted");
    Ok(())
}
