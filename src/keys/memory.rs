use super::{KeyLoadError, KeyLoader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed in-memory key source.
///
/// Counts every `load` call, which lets tests assert that a request was
/// rejected before the secret store was consulted.
#[derive(Debug, Default)]
pub struct MemoryKeyLoader {
    keys: HashMap<String, Vec<u8>>,
    loads: AtomicUsize,
}

impl MemoryKeyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a named key.
    pub fn with_key(mut self, name: impl Into<String>, material: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(name.into(), material.into());
        self
    }

    /// Number of `load` calls made so far, successful or not.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyLoader for MemoryKeyLoader {
    async fn load(&self, name: &str) -> Result<Vec<u8>, KeyLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.keys
            .get(name)
            .cloned()
            .ok_or_else(|| KeyLoadError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_known_and_unknown() {
        let loader = MemoryKeyLoader::new().with_key("test-key", b"pem".to_vec());

        assert_eq!(loader.load("test-key").await.unwrap(), b"pem");
        assert!(matches!(
            loader.load("missing").await,
            Err(KeyLoadError::NotFound(name)) if name == "missing"
        ));
        assert_eq!(loader.load_count(), 2);
    }
}
