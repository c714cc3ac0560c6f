//! Stage definitions.
//!
//! A stage is a unit of work with declared prerequisite and output
//! artifacts. Stages are static configuration; all dynamic state lives
//! in the artifact registry and branch coordinator.

use serde::{Deserialize, Serialize};

/// A single stage in the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage id (unique within the graph)
    pub id: String,

    /// Artifact ids that must exist, be non-stale, and carry no
    /// unresolved questions before this stage may run (ordered)
    #[serde(default)]
    pub prerequisites: Vec<String>,

    /// Artifact ids this stage produces
    #[serde(default)]
    pub outputs: Vec<String>,

    /// May run concurrently with sibling stages once forked
    #[serde(default)]
    pub parallelizable: bool,

    /// Marks the stage whose output is the contract artifact that
    /// triggers branch forking
    #[serde(default)]
    pub branch_root: bool,
}

impl Stage {
    /// Create a stage with the given prerequisites and outputs
    pub fn new(
        id: impl Into<String>,
        prerequisites: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            prerequisites,
            outputs,
            parallelizable: false,
            branch_root: false,
        }
    }

    /// Mark the stage parallelizable
    pub fn parallelizable(mut self) -> Self {
        self.parallelizable = true;
        self
    }

    /// Mark the stage as a branch root
    pub fn branch_root(mut self) -> Self {
        self.branch_root = true;
        self
    }

    /// Whether this stage produces the given artifact
    pub fn produces(&self, artifact_id: &str) -> bool {
        self.outputs.iter().any(|o| o == artifact_id)
    }

    /// Whether this stage consumes the given artifact
    pub fn consumes(&self, artifact_id: &str) -> bool {
        self.prerequisites.iter().any(|p| p == artifact_id)
    }
}
