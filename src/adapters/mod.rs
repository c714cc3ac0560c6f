//! Boundary collaborators consumed as abstract capabilities.
//!
//! The engine never generates artifact content or runs builds itself;
//! it talks to an artifact store (for content-hash staleness checks)
//! and a verification channel (for branch pass/fail results).

pub mod fs_store;
pub mod verifier;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Verdict;

pub use fs_store::FsArtifactStore;
pub use verifier::CommandVerifier;

/// Artifact storage lookup: existence and content hashing
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether the store holds content for the artifact
    async fn exists(&self, artifact_id: &str) -> Result<bool>;

    /// Current content hash, or None if the artifact has no stored content
    async fn content_hash(&self, artifact_id: &str) -> Result<Option<String>>;
}

/// External executor verification channel
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Run verification for a branch and return the verdict
    async fn verify(&self, branch_id: &str) -> Result<Verdict>;
}
