//! Static stage dependency graph.
//!
//! The graph is built once from configuration and validated there:
//! a duplicate producer or a dependency cycle is a fatal configuration
//! error, never a runtime fault. Edges between stages are mediated by
//! artifacts: stage P -> stage S exists when S consumes an artifact P
//! produces.

use std::collections::{HashMap, VecDeque};

use crate::domain::{Stage, WorkflowError};

/// Validated, immutable stage dependency graph
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Stages in declaration order
    stages: Vec<Stage>,

    /// Stage id -> index into `stages`
    index: HashMap<String, usize>,

    /// Artifact id -> index of its producing stage (at most one)
    producers: HashMap<String, usize>,
}

impl StageGraph {
    /// Build and validate a graph from stage definitions.
    ///
    /// Fails with `DuplicateProducer` if two stages declare the same
    /// output, and with `CyclicDependency` if the artifact-mediated
    /// stage graph contains a cycle.
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self, WorkflowError> {
        let mut index = HashMap::new();
        let mut producers: HashMap<String, usize> = HashMap::new();

        for (i, stage) in stages.iter().enumerate() {
            index.insert(stage.id.clone(), i);

            for output in &stage.outputs {
                if let Some(&prev) = producers.get(output) {
                    return Err(WorkflowError::DuplicateProducer {
                        artifact: output.clone(),
                        first: stages[prev].id.clone(),
                        second: stage.id.clone(),
                    });
                }
                producers.insert(output.clone(), i);
            }
        }

        let graph = Self {
            stages,
            index,
            producers,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Topological check (Kahn's algorithm) over stage-to-stage edges
    fn check_acyclic(&self) -> Result<(), WorkflowError> {
        let n = self.stages.len();
        let mut indegree = vec![0usize; n];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (to, stage) in self.stages.iter().enumerate() {
            for prereq in &stage.prerequisites {
                if let Some(&from) = self.producers.get(prereq) {
                    edges[from].push(to);
                    indegree[to] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0usize;

        while let Some(i) = queue.pop_front() {
            visited += 1;
            for &next in &edges[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited < n {
            let remaining = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.stages[i].id.clone())
                .collect();
            return Err(WorkflowError::CyclicDependency { stages: remaining });
        }

        Ok(())
    }

    /// All stages in declaration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Look up a stage by id
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// The stage producing the given artifact, if any
    pub fn producer_of(&self, artifact_id: &str) -> Option<&Stage> {
        self.producers.get(artifact_id).map(|&i| &self.stages[i])
    }

    /// Stages that list the given artifact as a prerequisite
    pub fn consumers_of(&self, artifact_id: &str) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|s| s.consumes(artifact_id))
            .collect()
    }

    /// Whether any stage declares the artifact as an output
    pub fn is_declared(&self, artifact_id: &str) -> bool {
        self.producers.contains_key(artifact_id)
    }
}
