//! Engine facade: wires the graph, registry, coordinator, and log.
//!
//! Mutations apply their effect, then re-run branch forking and join
//! evaluation (the join barrier is re-checked on every state transition)
//! and persist the full transition batch to the append-only log. Queries
//! are synchronous and pure; the engine never blocks waiting for external
//! facts, it expects to be re-invoked as they arrive.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument};

use crate::adapters::ArtifactStore;
use crate::config::WorkflowConfig;
use crate::domain::{
    Branch, BranchStatus, Transition, TransitionKind, Verdict, WorkflowError,
};

use super::coordinator::{BranchCoordinator, JoinBarrier, JoinStatus};
use super::graph::StageGraph;
use super::log::TransitionLog;
use super::readiness::{self, BlockedReason, RuleTable};
use super::registry::ArtifactRegistry;
use super::reporter::{self, StatusReport};

/// The workflow engine
pub struct Engine {
    graph: StageGraph,
    registry: ArtifactRegistry,
    coordinator: BranchCoordinator,
    rules: RuleTable,
    log: TransitionLog,
}

impl Engine {
    /// Open an engine for a workflow configuration: build and validate
    /// the graph (fatal on configuration errors), then reconstruct state
    /// by replaying the transition log.
    #[instrument(skip(config))]
    pub async fn open(config: &WorkflowConfig) -> Result<Self> {
        let graph = config.build_graph()?;
        let mut registry = ArtifactRegistry::new(&graph);

        for artifact in &config.artifacts {
            if let Some(kind) = &artifact.kind {
                registry.assign_kind(&artifact.id, kind.clone());
            }
        }

        let branches = config
            .branches
            .iter()
            .map(|b| Branch::new(b.id.clone(), b.contract.clone(), b.stages.clone(), b.outputs.clone()))
            .collect();
        let joins = config
            .joins
            .iter()
            .map(|j| JoinBarrier::new(j.id.clone(), j.branches.clone()))
            .collect();
        let mut coordinator = BranchCoordinator::new(branches, joins);

        let log = TransitionLog::open(config.state_dir()).await?;
        let history = log.replay().await?;
        for transition in &history {
            registry.apply(transition);
            coordinator.apply(transition);
        }
        if !history.is_empty() {
            info!(
                transitions = history.len(),
                log = %log.log_path().display(),
                "state reconstructed from log"
            );
        }

        // Catch up branches and joins the replayed log does not cover,
        // e.g. a branch added to configuration after its contract was
        // already produced. No-op when the log is current.
        let mut catchup = coordinator.refresh_forks(&registry);
        catchup.extend(coordinator.reevaluate_joins(&registry));
        log.append_all(&catchup).await?;

        Ok(Self {
            graph,
            registry,
            coordinator,
            rules: config.rule_table(),
            log,
        })
    }

    /// Mark an artifact produced with an optional content hash
    #[instrument(skip(self, content_hash))]
    pub async fn produce(&mut self, artifact_id: &str, content_hash: Option<String>) -> Result<()> {
        let t = self.registry.mark_produced(artifact_id, content_hash)?;
        self.settle(vec![t]).await?;
        Ok(())
    }

    /// Mark an artifact stale, cascading through its consumers and
    /// re-blocking branches whose contract was affected
    #[instrument(skip(self))]
    pub async fn invalidate(&mut self, artifact_id: &str) -> Result<()> {
        let mut transitions = self.registry.mark_stale(artifact_id)?;
        let affected = affected_artifacts(&transitions);
        transitions.extend(self.coordinator.apply_staleness(&affected));
        self.settle(transitions).await?;
        Ok(())
    }

    /// Explicitly reset (destroy) an artifact, cascading forward
    #[instrument(skip(self))]
    pub async fn reset(&mut self, artifact_id: &str) -> Result<()> {
        let mut transitions = self.registry.reset(artifact_id)?;
        let affected = affected_artifacts(&transitions);
        transitions.extend(self.coordinator.apply_staleness(&affected));
        self.settle(transitions).await?;
        Ok(())
    }

    /// Attach an open question to an artifact; returns the question id
    pub async fn raise_question(&mut self, artifact_id: &str, text: &str) -> Result<String> {
        let t = self.registry.raise_question(artifact_id, text)?;
        let question_id = t.question_id.clone().unwrap_or_default();
        self.settle(vec![t]).await?;
        Ok(question_id)
    }

    /// Resolve an open question through an explicit confirmation
    pub async fn resolve_question(
        &mut self,
        artifact_id: &str,
        question_id: &str,
        resolution: &str,
    ) -> Result<()> {
        let t = self
            .registry
            .resolve_question(artifact_id, question_id, resolution)?;
        self.settle(vec![t]).await?;
        Ok(())
    }

    /// Record a filled-in field on an artifact
    pub async fn record_field(&mut self, artifact_id: &str, key: &str, value: &str) -> Result<()> {
        let t = self.registry.record_field(artifact_id, key, value)?;
        self.settle(vec![t]).await?;
        Ok(())
    }

    /// Begin work on a branch
    #[instrument(skip(self))]
    pub async fn start_branch(&mut self, branch_id: &str) -> Result<()> {
        let t = self.coordinator.start(branch_id)?;
        self.settle(vec![t]).await?;
        Ok(())
    }

    /// A branch reports its declared outputs produced. Fails with
    /// `ContractViolation` when the contract changed underneath the
    /// branch; the violation is logged and the branch set to
    /// `ReworkRequired` before the error is surfaced.
    #[instrument(skip(self, output_hashes))]
    pub async fn report_branch(
        &mut self,
        branch_id: &str,
        output_hashes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let transitions = self
            .coordinator
            .report(branch_id, &mut self.registry, output_hashes)?;
        let violated = transitions
            .iter()
            .any(|t| t.kind == TransitionKind::ContractViolated);
        self.settle(transitions).await?;

        if violated {
            return Err(self.contract_violation(branch_id)?.into());
        }
        Ok(())
    }

    /// Supply an external verification result; returns the branch's
    /// resulting status. A contract that changed since fork fails the
    /// acceptance with `ContractViolation` even on a passing verdict.
    #[instrument(skip(self, verdict))]
    pub async fn verify_branch(&mut self, branch_id: &str, verdict: &Verdict) -> Result<BranchStatus> {
        let transitions =
            self.coordinator
                .submit_verification(branch_id, verdict, &self.registry)?;
        let violated = transitions
            .iter()
            .any(|t| t.kind == TransitionKind::ContractViolated);
        self.settle(transitions).await?;

        if violated {
            return Err(self.contract_violation(branch_id)?.into());
        }
        Ok(self.coordinator.branch(branch_id)?.status)
    }

    /// Resubmit a reworked branch
    #[instrument(skip(self))]
    pub async fn resubmit_branch(&mut self, branch_id: &str) -> Result<()> {
        let t = self.coordinator.resubmit(branch_id, &self.registry)?;
        self.settle(vec![t]).await?;
        Ok(())
    }

    /// Compare recorded hashes against the artifact store and invalidate
    /// every produced artifact whose content changed. Returns the ids
    /// found changed.
    #[instrument(skip(self, store))]
    pub async fn sync(&mut self, store: &dyn ArtifactStore) -> Result<Vec<String>> {
        let mut changed = Vec::new();

        let produced: Vec<(String, String)> = self
            .registry
            .records()
            .filter(|r| r.exists && !r.stale)
            .filter_map(|r| r.content_hash.clone().map(|h| (r.id.clone(), h)))
            .collect();

        for (id, recorded) in produced {
            let Some(current) = store.content_hash(&id).await? else {
                continue; // no configured path for this artifact
            };
            if current != recorded {
                changed.push(id);
            }
        }

        for id in &changed {
            // an earlier invalidation may already have cascaded here
            if !self.registry.is_stale(id) {
                self.invalidate(id).await?;
            }
        }

        Ok(changed)
    }

    /// Stages eligible to run now
    pub fn eligible(&self) -> BTreeSet<String> {
        readiness::next_eligible_stages(&self.graph, &self.registry, &self.rules)
    }

    /// Per-stage blocking diagnostics
    pub fn blocked(&self) -> BTreeMap<String, Vec<BlockedReason>> {
        readiness::blocked_report(&self.graph, &self.registry, &self.rules)
    }

    /// Full status projection
    pub fn status(&self) -> StatusReport {
        reporter::render_status(
            &self.graph,
            &self.registry,
            &self.coordinator,
            &self.rules,
            Utc::now(),
        )
    }

    /// Evaluate a named join barrier at this instant
    pub fn join(&self, join_id: &str) -> Result<JoinStatus, WorkflowError> {
        self.coordinator.evaluate_join(join_id, &self.registry)
    }

    /// The most recent transitions, oldest first
    pub async fn recent_transitions(&self, limit: usize) -> Result<Vec<Transition>> {
        self.log.tail(limit).await
    }

    /// Every logged transition concerning an artifact
    pub async fn transitions_for_artifact(&self, artifact_id: &str) -> Result<Vec<Transition>> {
        self.log.for_artifact(artifact_id).await
    }

    /// Every logged transition concerning a branch
    pub async fn transitions_for_branch(&self, branch_id: &str) -> Result<Vec<Transition>> {
        self.log.for_branch(branch_id).await
    }

    /// Registry access for inspection
    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Coordinator access for inspection
    pub fn coordinator(&self) -> &BranchCoordinator {
        &self.coordinator
    }

    /// Finish a mutation: re-run forking and join evaluation, then
    /// persist the whole transition batch in order.
    async fn settle(&mut self, mut transitions: Vec<Transition>) -> Result<Vec<Transition>> {
        transitions.extend(self.coordinator.refresh_forks(&self.registry));
        transitions.extend(self.coordinator.reevaluate_joins(&self.registry));
        self.log.append_all(&transitions).await?;
        Ok(transitions)
    }

    fn contract_violation(&self, branch_id: &str) -> Result<WorkflowError, WorkflowError> {
        let branch = self.coordinator.branch(branch_id)?;
        Ok(WorkflowError::ContractViolation {
            branch: branch_id.to_string(),
            contract: branch.contract.clone(),
            expected: branch.contract_hash.clone(),
            actual: self
                .registry
                .content_hash(&branch.contract)
                .map(String::from),
        })
    }
}

/// Artifact ids touched by a transition batch
fn affected_artifacts(transitions: &[Transition]) -> BTreeSet<String> {
    transitions
        .iter()
        .filter_map(|t| t.artifact_id.clone())
        .collect()
}
