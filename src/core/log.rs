//! Append-only transition log with file-based persistence.
//!
//! Transitions are stored as newline-delimited JSON (JSONL) for easy
//! inspection and auditing. Replay returns them in append order; state
//! is reconstructed by re-applying each literally.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::Transition;

/// File-backed append-only transition log
pub struct TransitionLog {
    /// Workflow state directory
    state_dir: PathBuf,

    /// Path to the transitions.jsonl file
    log_path: PathBuf,
}

impl TransitionLog {
    /// Create or open the log under a workflow state directory
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)
            .await
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

        let log_path = state_dir.join("transitions.jsonl");
        Ok(Self { state_dir, log_path })
    }

    /// The workflow state directory
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path to the transitions file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append one transition to the log
    pub async fn append(&self, transition: &Transition) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json = serde_json::to_string(transition).context("Failed to serialize transition")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write transition")?;
        file.flush().await.context("Failed to flush transition")?;

        Ok(())
    }

    /// Append several transitions in order
    pub async fn append_all(&self, transitions: &[Transition]) -> Result<()> {
        for t in transitions {
            self.append(t).await?;
        }
        Ok(())
    }

    /// Replay all transitions in append order
    pub async fn replay(&self) -> Result<Vec<Transition>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .await
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut transitions = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let transition: Transition = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse transition: {}", line))?;
            transitions.push(transition);
        }

        Ok(transitions)
    }

    /// The most recent `limit` transitions, oldest first
    pub async fn tail(&self, limit: usize) -> Result<Vec<Transition>> {
        let mut transitions = self.replay().await?;
        let skip = transitions.len().saturating_sub(limit);
        Ok(transitions.split_off(skip))
    }

    /// All transitions concerning an artifact, in append order
    pub async fn for_artifact(&self, artifact_id: &str) -> Result<Vec<Transition>> {
        let transitions = self.replay().await?;
        Ok(transitions
            .into_iter()
            .filter(|t| t.artifact_id.as_deref() == Some(artifact_id))
            .collect())
    }

    /// All transitions concerning a branch, in append order
    pub async fn for_branch(&self, branch_id: &str) -> Result<Vec<Transition>> {
        let transitions = self.replay().await?;
        Ok(transitions
            .into_iter()
            .filter(|t| t.branch_id.as_deref() == Some(branch_id))
            .collect())
    }
}
