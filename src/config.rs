//! Workflow configuration.
//!
//! The stage graph, branches, join barriers, artifact kinds, and
//! verifier commands are all declared in a YAML file, loaded once at
//! startup. A cycle or duplicate producer in this configuration is a
//! fatal configuration error, not a runtime fault.
//!
//! Config file discovery:
//! - Searches the current directory and parents for .convoy/workflow.yaml,
//!   then ~/.convoy/workflow.yaml
//! - Relative paths in the file resolve against the project root (the
//!   parent of the .convoy directory)
//! - CONVOY_HOME overrides the engine state directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::graph::StageGraph;
use crate::core::readiness::RuleTable;
use crate::domain::{Stage, WorkflowError};

/// Top-level workflow configuration (matches the YAML structure)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub version: String,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Stage dependency graph definition
    pub stages: Vec<Stage>,

    /// Execution branches forked from contract artifacts
    #[serde(default)]
    pub branches: Vec<BranchConfig>,

    /// Named join barriers over branch sets
    #[serde(default)]
    pub joins: Vec<JoinConfig>,

    /// Artifact kinds and their required fields (the rule table)
    #[serde(default)]
    pub kinds: Vec<KindConfig>,

    /// Per-artifact metadata: kind assignment and storage path
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,

    /// Per-branch external verification commands
    #[serde(default)]
    pub verifiers: HashMap<String, VerifierConfig>,

    /// Project root the config was loaded from (not serialized)
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to project root)
    pub state: Option<String>,

    /// Artifact store root (relative to project root)
    pub artifacts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    pub id: String,

    /// Contract artifact this branch forks from
    pub contract: String,

    /// Stage-graph subset the branch executes
    #[serde(default)]
    pub stages: Vec<String>,

    /// Artifacts the branch declares as its outputs
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    pub id: String,
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindConfig {
    pub id: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub id: String,
    pub kind: Option<String>,
    /// Path within the artifact store (for content-hash staleness checks)
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Shell command to run; exit status maps to pass/fail
    pub command: String,

    #[serde(default = "default_verifier_timeout")]
    pub timeout_seconds: u64,
}

fn default_verifier_timeout() -> u64 {
    300
}

impl WorkflowConfig {
    /// Discover and load the config from the current directory upward
    pub fn discover() -> Result<Self> {
        let path = find_config_file()
            .context("No .convoy/workflow.yaml found in this directory or any parent")?;
        Self::load(&path)
    }

    /// Load a config file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // Project root is the parent of the .convoy directory
        config.root = path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."))
            .to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration: graph structure plus reference checks.
    /// Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        // Graph validation rejects duplicate producers and cycles
        let graph = self.build_graph()?;

        for branch in &self.branches {
            match graph.producer_of(&branch.contract) {
                None => {
                    anyhow::bail!(
                        "branch '{}' forks from contract '{}', which no stage produces",
                        branch.id,
                        branch.contract
                    );
                }
                Some(producer) if !producer.branch_root => {
                    anyhow::bail!(
                        "branch '{}' forks from contract '{}', but its producing stage \
                         '{}' is not marked branch_root",
                        branch.id,
                        branch.contract,
                        producer.id
                    );
                }
                Some(_) => {}
            }
            for stage_id in &branch.stages {
                if graph.stage(stage_id).is_none() {
                    return Err(WorkflowError::UnknownStage {
                        id: stage_id.clone(),
                    })
                    .with_context(|| format!("branch '{}' references an unknown stage", branch.id));
                }
            }
            for output in &branch.outputs {
                if !graph.is_declared(output) {
                    anyhow::bail!(
                        "branch '{}' declares output '{}', which no stage produces",
                        branch.id,
                        output
                    );
                }
            }
        }

        let branch_ids: Vec<&str> = self.branches.iter().map(|b| b.id.as_str()).collect();
        for join in &self.joins {
            for member in &join.branches {
                if !branch_ids.contains(&member.as_str()) {
                    anyhow::bail!("join '{}' references unknown branch '{}'", join.id, member);
                }
            }
        }

        for branch_id in self.verifiers.keys() {
            if !branch_ids.contains(&branch_id.as_str()) {
                anyhow::bail!("verifier configured for unknown branch '{}'", branch_id);
            }
        }

        let kind_ids: Vec<&str> = self.kinds.iter().map(|k| k.id.as_str()).collect();
        for artifact in &self.artifacts {
            if let Some(kind) = &artifact.kind {
                if !kind_ids.contains(&kind.as_str()) {
                    anyhow::bail!(
                        "artifact '{}' references unknown kind '{}'",
                        artifact.id,
                        kind
                    );
                }
            }
        }

        Ok(())
    }

    /// Build the validated stage graph
    pub fn build_graph(&self) -> Result<StageGraph> {
        StageGraph::from_stages(self.stages.clone())
            .context("Invalid stage graph configuration")
    }

    /// Build the rule table from the declared kinds
    pub fn rule_table(&self) -> RuleTable {
        RuleTable::new(
            self.kinds
                .iter()
                .map(|k| (k.id.clone(), k.required_fields.clone()))
                .collect(),
        )
    }

    /// Engine state directory: CONVOY_HOME if set, else paths.state
    /// relative to the project root, else <root>/.convoy/state
    pub fn state_dir(&self) -> PathBuf {
        if let Ok(home) = std::env::var("CONVOY_HOME") {
            return PathBuf::from(home);
        }
        match &self.paths.state {
            Some(state) => resolve_path(&self.root, state),
            None => self.root.join(".convoy").join("state"),
        }
    }

    /// Artifact store root: paths.artifacts relative to the project root,
    /// else <root>/artifacts
    pub fn artifact_dir(&self) -> PathBuf {
        match &self.paths.artifacts {
            Some(artifacts) => resolve_path(&self.root, artifacts),
            None => self.root.join("artifacts"),
        }
    }

    /// Artifact id -> absolute store path, for configured artifacts
    pub fn artifact_paths(&self) -> HashMap<String, PathBuf> {
        let store = self.artifact_dir();
        self.artifacts
            .iter()
            .filter_map(|a| {
                a.path
                    .as_ref()
                    .map(|p| (a.id.clone(), store.join(p)))
            })
            .collect()
    }

    /// Verifier configured for a branch, if any
    pub fn verifier_for(&self, branch_id: &str) -> Option<&VerifierConfig> {
        self.verifiers.get(branch_id)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            paths: PathsConfig::default(),
            stages: Vec::new(),
            branches: Vec::new(),
            joins: Vec::new(),
            kinds: Vec::new(),
            artifacts: Vec::new(),
            verifiers: HashMap::new(),
            root: PathBuf::from("."),
        }
    }
}

/// Find the config file by searching the current directory and parents,
/// falling back to ~/.convoy/workflow.yaml
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".convoy").join("workflow.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home = dirs::home_dir()?.join(".convoy").join("workflow.yaml");
    home.exists().then_some(home)
}

/// Resolve a possibly-relative path against a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
