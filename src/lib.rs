//! On-demand texture cache for interactive hosts with a bounded memory budget.
//!
//! Source textures on disk vastly outnumber what a session needs resident at
//! once. The [`TextureLoader`] indexes image assets under a root directory,
//! lazily block-compresses each texture the first time the live scene
//! references it, persists the compressed result as a DDS artifact named by a
//! hash of the source path (so later sessions skip recompression), and
//! periodically evicts textures that left the required set.
//!
//! The crate is cooperative and single-threaded by design: the host's frame
//! loop drives scanning, pre-caching and garbage collection through
//! [`TextureLoader::tick`], and injects scene state through [`SceneSource`].
//! No logger is installed here; hosts bring their own `log` backend.

mod codec;
mod config;
mod hash;
mod index;
mod loader;
mod pool;

pub use codec::{CompressVariant, Texture, TextureFormat};
pub use config::Config;
pub use index::AssetEntry;
pub use loader::{LoaderStats, SceneSource, TextureLoader};

use std::fmt;
use std::path::PathBuf;

/// Per-asset failure taxonomy. Every variant is locally recovered: the loader
/// logs it and the affected key simply stays unloaded until the next request.
#[derive(Debug)]
pub enum TexError {
    /// Malformed source image bytes.
    Decode(image::ImageError),
    /// Cache artifact too short, bad magic, or unrecognized format tag.
    CorruptCache(String),
    /// Indexed source path no longer exists on disk.
    SourceMissing(PathBuf),
    Io(std::io::Error),
}

impl fmt::Display for TexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "image decode failed: {e}"),
            Self::CorruptCache(why) => write!(f, "corrupt cache artifact: {why}"),
            Self::SourceMissing(p) => write!(f, "source file missing: {}", p.display()),
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for TexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for TexError {
    fn from(e: image::ImageError) -> Self {
        Self::Decode(e)
    }
}
