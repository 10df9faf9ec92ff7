//! Key material sources.
//!
//! The relay never reads certificates or private keys from its own
//! configuration. Every identity and signing key is fetched by name, per
//! request, through a [`KeyLoader`]. Which backend answers is decided once at
//! startup (see [`crate::config::Settings::key_loader`]).

use async_trait::async_trait;
use thiserror::Error;

mod fs;
mod gcp;
mod memory;

pub use fs::FsKeyLoader;
pub use gcp::GcpSecretManager;
pub use memory::MemoryKeyLoader;

/// Failure to resolve a key reference.
#[derive(Debug, Error)]
pub enum KeyLoadError {
    /// The backend has no secret under this name.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or answered with an error.
    #[error("key source unavailable: {0}")]
    Unavailable(String),
}

/// Resolves an opaque key reference to raw (usually PEM) bytes.
///
/// Implementations may block on network I/O and must be safe to share
/// between concurrently running requests.
#[async_trait]
pub trait KeyLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<Vec<u8>, KeyLoadError>;
}
