//! Etag sources for condition evaluation
//!
//! The evaluator treats etags as opaque byte strings. Whatever produces
//! them for responses must produce the same strings here.

use crate::domain::resource_path::ResourcePath;
use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Source of the live etag of a resource
#[async_trait]
pub trait EtagOracle: Send + Sync {
    /// Current entity-tag (quotes included), `None` if the resource is absent
    async fn etag(&self, path: &ResourcePath) -> Result<Option<String>>;
}

/// Etags derived from filesystem metadata under a root directory
#[derive(Debug, Clone)]
pub struct FsEtagOracle {
    root: PathBuf,
}

impl FsEtagOracle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl EtagOracle for FsEtagOracle {
    async fn etag(&self, path: &ResourcePath) -> Result<Option<String>> {
        let metadata = match tokio::fs::metadata(path.to_fs_path(&self.root)).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(path.as_str().as_bytes());
        hasher.update(metadata.len().to_le_bytes());
        hasher.update(modified.to_le_bytes());
        let digest = hasher.finalize();

        Ok(Some(format!("\"{}\"", hex::encode(&digest[..12]))))
    }
}

/// Fixed etags, for tests and for callers that already know them
#[derive(Debug, Clone, Default)]
pub struct StaticEtags {
    etags: HashMap<ResourcePath, String>,
}

impl StaticEtags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: ResourcePath, etag: impl Into<String>) -> Self {
        self.etags.insert(path, etag.into());
        self
    }
}

#[async_trait]
impl EtagOracle for StaticEtags {
    async fn etag(&self, path: &ResourcePath) -> Result<Option<String>> {
        Ok(self.etags.get(path).cloned())
    }
}
