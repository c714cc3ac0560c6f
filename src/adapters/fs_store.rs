//! Filesystem artifact store.
//!
//! Maps artifact ids to files under a configured directory and hashes
//! their contents with SHA-256. An artifact is stale when its current
//! store hash differs from the hash the registry recorded at production.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;

use super::ArtifactStore;

/// Artifact store backed by files on disk
pub struct FsArtifactStore {
    /// Artifact id -> absolute file path
    paths: HashMap<String, PathBuf>,
}

impl FsArtifactStore {
    /// Create a store over the configured artifact-path mapping
    pub fn new(paths: HashMap<String, PathBuf>) -> Self {
        Self { paths }
    }

    /// Path for an artifact, if one is configured
    pub fn path_for(&self, artifact_id: &str) -> Option<&PathBuf> {
        self.paths.get(artifact_id)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, artifact_id: &str) -> Result<bool> {
        match self.paths.get(artifact_id) {
            Some(path) => Ok(path.exists()),
            None => Ok(false),
        }
    }

    async fn content_hash(&self, artifact_id: &str) -> Result<Option<String>> {
        let Some(path) = self.paths.get(artifact_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read(path)
            .await
            .with_context(|| format!("Failed to read artifact file: {}", path.display()))?;
        Ok(Some(hash_content(&content)))
    }
}

/// SHA-256 hash of content, hex encoded
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
