//! FUSE filesystem implementation
//!
//! Translates kernel filesystem operations into queries against the
//! archive index and offset resolver.

mod filesystem;
mod handle;

pub use filesystem::TarFs;
pub use handle::{Handle, HandleManager};
