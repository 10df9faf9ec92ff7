use super::{KeyLoadError, KeyLoader};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Reads keys from files below a root directory.
///
/// Key references are relative paths. Absolute paths and references that
/// climb out of the root are reported as not found.
#[derive(Debug, Clone)]
pub struct FsKeyLoader {
    root: PathBuf,
}

impl FsKeyLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !contained {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl KeyLoader for FsKeyLoader {
    async fn load(&self, name: &str) -> Result<Vec<u8>, KeyLoadError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| KeyLoadError::NotFound(name.to_string()))?;

        debug!("Reading key {} from {}", name, path.display());

        tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => KeyLoadError::NotFound(name.to_string()),
            _ => KeyLoadError::Unavailable(format!("{}: {}", path.display(), err)),
        })
    }
}
