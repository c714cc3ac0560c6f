//! Branch coordination: fork, progress, verification, join barriers.
//!
//! Branches fork once their contract artifact exists, progress
//! independently, and rejoin at named join barriers. The only cascade
//! the coordinator performs automatically is re-blocking branches whose
//! contract artifact went stale; everything else is driven by explicit
//! operator or executor events.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    Branch, BranchStatus, Transition, TransitionKind, Verdict, WorkflowError,
};

use super::registry::ArtifactRegistry;

/// A named join condition over a set of branches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinBarrier {
    /// Barrier name
    pub id: String,

    /// Branch ids that must all complete
    pub branches: Vec<String>,

    /// Whether the barrier fired at last evaluation
    pub satisfied: bool,
}

impl JoinBarrier {
    /// Create an unsatisfied barrier over the given branches
    pub fn new(id: impl Into<String>, branches: Vec<String>) -> Self {
        Self {
            id: id.into(),
            branches,
            satisfied: false,
        }
    }
}

/// Instantaneous evaluation of a join barrier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinStatus {
    /// Barrier name
    pub id: String,

    /// Whether every branch is completed with no stale artifacts
    pub satisfied: bool,

    /// Human-readable reasons the barrier has not fired
    pub waiting_on: Vec<String>,
}

/// Manages branch lifecycles and join barriers
#[derive(Debug, Clone)]
pub struct BranchCoordinator {
    branches: BTreeMap<String, Branch>,
    joins: BTreeMap<String, JoinBarrier>,
}

impl BranchCoordinator {
    /// Create a coordinator over the configured branches and barriers
    pub fn new(branches: Vec<Branch>, joins: Vec<JoinBarrier>) -> Self {
        Self {
            branches: branches.into_iter().map(|b| (b.id.clone(), b)).collect(),
            joins: joins.into_iter().map(|j| (j.id.clone(), j)).collect(),
        }
    }

    /// Look up a branch
    pub fn branch(&self, id: &str) -> Result<&Branch, WorkflowError> {
        self.branches
            .get(id)
            .ok_or_else(|| WorkflowError::UnknownBranch { id: id.to_string() })
    }

    /// All branches in id order
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// All join barriers in id order
    pub fn joins(&self) -> impl Iterator<Item = &JoinBarrier> {
        self.joins.values()
    }

    /// Fork every blocked branch whose contract artifact satisfies as a
    /// prerequisite (exists, non-stale, no unresolved questions),
    /// snapshotting the contract's content hash.
    pub fn refresh_forks(&mut self, registry: &ArtifactRegistry) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for branch in self.branches.values_mut() {
            if branch.status != BranchStatus::Blocked {
                continue;
            }
            let forkable = registry
                .get(&branch.contract)
                .map(|r| r.satisfies_prerequisite())
                .unwrap_or(false);
            if !forkable {
                continue;
            }

            let hash = registry.content_hash(&branch.contract).map(String::from);
            let t = Transition::new(
                TransitionKind::BranchForked,
                format!(
                    "branch '{}' forked: contract '{}' available",
                    branch.id, branch.contract
                ),
            )
            .with_branch(branch.id.clone())
            .with_artifact(branch.contract.clone())
            .with_hash(hash.clone());

            branch.contract_hash = hash;
            branch.current_stage = 0;
            branch.set_status(BranchStatus::Ready, t.timestamp);
            info!(branch = %branch.id, contract = %branch.contract, "branch forked");
            transitions.push(t);
        }

        transitions
    }

    /// Begin work on a branch: `Ready -> InProgress`
    pub fn start(&mut self, id: &str) -> Result<Transition, WorkflowError> {
        let branch = self.branch_mut(id)?;
        if branch.status != BranchStatus::Ready {
            return Err(WorkflowError::InvalidTransition {
                branch: id.to_string(),
                from: branch.status,
                action: "start",
            });
        }

        let t = Transition::new(
            TransitionKind::BranchStarted,
            format!("branch '{}' started", id),
        )
        .with_branch(id);
        branch.set_status(BranchStatus::InProgress, t.timestamp);
        Ok(t)
    }

    /// A branch reports its declared outputs produced:
    /// `InProgress -> AwaitingVerification`.
    ///
    /// The registry validates and applies each production. Before
    /// accepting the report, the branch's forked contract hash is checked
    /// against the registry's current hash; divergence yields a
    /// `ContractViolated` transition, moves the branch to
    /// `ReworkRequired`, and leaves the contract-or-implementation
    /// decision to the operator.
    pub fn report(
        &mut self,
        id: &str,
        registry: &mut ArtifactRegistry,
        output_hashes: &BTreeMap<String, String>,
    ) -> Result<Vec<Transition>, WorkflowError> {
        let branch = self.branch_mut(id)?;
        if branch.status != BranchStatus::InProgress {
            return Err(WorkflowError::InvalidTransition {
                branch: id.to_string(),
                from: branch.status,
                action: "report",
            });
        }

        if let Some(t) = Self::contract_check(branch, registry) {
            return Ok(vec![t]);
        }

        // Validate all outputs before producing any, so a mid-report
        // failure cannot leave a partial production applied.
        for output in &branch.outputs {
            registry.check_producible(output)?;
        }

        let mut transitions = Vec::new();
        for output in branch.outputs.clone() {
            let hash = output_hashes.get(&output).cloned();
            transitions.push(registry.mark_produced(&output, hash)?);
        }

        let t = Transition::new(
            TransitionKind::BranchReported,
            format!("branch '{}' reported outputs produced", id),
        )
        .with_branch(id);
        branch.current_stage = branch.stages.len();
        branch.set_status(BranchStatus::AwaitingVerification, t.timestamp);
        transitions.push(t);
        Ok(transitions)
    }

    /// Supply an external verification result for a branch in
    /// `AwaitingVerification`. A pass completes the branch (after a final
    /// contract check); a failure moves it to `ReworkRequired` with the
    /// diagnostic attached.
    pub fn submit_verification(
        &mut self,
        id: &str,
        verdict: &Verdict,
        registry: &ArtifactRegistry,
    ) -> Result<Vec<Transition>, WorkflowError> {
        let branch = self.branch_mut(id)?;
        if branch.status != BranchStatus::AwaitingVerification {
            return Err(WorkflowError::InvalidTransition {
                branch: id.to_string(),
                from: branch.status,
                action: "verify",
            });
        }

        if verdict.passed {
            if let Some(t) = Self::contract_check(branch, registry) {
                return Ok(vec![t]);
            }

            let t = Transition::new(
                TransitionKind::VerificationPassed,
                format!("branch '{}' verified", id),
            )
            .with_branch(id);
            branch.diagnostic = None;
            branch.set_status(BranchStatus::Completed, t.timestamp);
            info!(branch = %id, "branch completed");
            Ok(vec![t])
        } else {
            let diagnostic = verdict
                .diagnostic
                .clone()
                .unwrap_or_else(|| "verification failed".to_string());
            let t = Transition::new(
                TransitionKind::VerificationFailed,
                format!("branch '{}' failed verification", id),
            )
            .with_branch(id)
            .with_detail(diagnostic.clone());
            branch.diagnostic = Some(diagnostic);
            branch.set_status(BranchStatus::ReworkRequired, t.timestamp);
            warn!(branch = %id, "verification failed");
            Ok(vec![t])
        }
    }

    /// Operator resubmits a reworked branch: `ReworkRequired -> Ready`,
    /// or back to `Blocked` if the contract is no longer valid.
    pub fn resubmit(
        &mut self,
        id: &str,
        registry: &ArtifactRegistry,
    ) -> Result<Transition, WorkflowError> {
        let branch = self.branch_mut(id)?;
        if branch.status != BranchStatus::ReworkRequired {
            return Err(WorkflowError::InvalidTransition {
                branch: id.to_string(),
                from: branch.status,
                action: "resubmit",
            });
        }

        let contract_ok = registry
            .get(&branch.contract)
            .map(|r| r.satisfies_prerequisite())
            .unwrap_or(false);
        if !contract_ok {
            let t = Transition::new(
                TransitionKind::BranchReblocked,
                format!(
                    "branch '{}' blocked on resubmit: contract '{}' unavailable",
                    id, branch.contract
                ),
            )
            .with_branch(id)
            .with_artifact(branch.contract.clone());
            branch.contract_hash = None;
            branch.set_status(BranchStatus::Blocked, t.timestamp);
            return Ok(t);
        }

        let hash = registry.content_hash(&branch.contract).map(String::from);
        let t = Transition::new(
            TransitionKind::BranchResubmitted,
            format!("branch '{}' resubmitted", id),
        )
        .with_branch(id)
        .with_hash(hash.clone());
        branch.contract_hash = hash;
        branch.diagnostic = None;
        branch.current_stage = 0;
        branch.set_status(BranchStatus::Ready, t.timestamp);
        Ok(t)
    }

    /// The one automatic cascade: branches in `Completed` or `InProgress`
    /// whose contract artifact is in the affected set return to `Blocked`.
    pub fn apply_staleness(&mut self, affected: &BTreeSet<String>) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for branch in self.branches.values_mut() {
            let cascading = matches!(
                branch.status,
                BranchStatus::Completed | BranchStatus::InProgress
            );
            if !cascading || !affected.contains(&branch.contract) {
                continue;
            }

            let t = Transition::new(
                TransitionKind::BranchReblocked,
                format!(
                    "branch '{}' blocked: contract '{}' went stale",
                    branch.id, branch.contract
                ),
            )
            .with_branch(branch.id.clone())
            .with_artifact(branch.contract.clone());
            branch.contract_hash = None;
            branch.set_status(BranchStatus::Blocked, t.timestamp);
            warn!(branch = %branch.id, contract = %branch.contract, "branch re-blocked");
            transitions.push(t);
        }

        transitions
    }

    /// Evaluate a join barrier at this instant: satisfied iff every
    /// member branch is `Completed` and none of their declared artifacts
    /// (or contracts) are stale.
    pub fn evaluate_join(
        &self,
        id: &str,
        registry: &ArtifactRegistry,
    ) -> Result<JoinStatus, WorkflowError> {
        let barrier = self
            .joins
            .get(id)
            .ok_or_else(|| WorkflowError::UnknownJoin { id: id.to_string() })?;

        let mut waiting_on = Vec::new();

        for member in &barrier.branches {
            let branch = self.branch(member)?;
            if !branch.is_completed() {
                waiting_on.push(format!("waiting on {}", member));
                continue;
            }

            for artifact in branch.outputs.iter().chain(std::iter::once(&branch.contract)) {
                if registry.is_stale(artifact) {
                    waiting_on.push(format!("artifact '{}' is stale", artifact));
                }
            }
        }

        Ok(JoinStatus {
            id: id.to_string(),
            satisfied: waiting_on.is_empty(),
            waiting_on,
        })
    }

    /// Re-evaluate every barrier, logging `JoinSatisfied`/`JoinRetracted`
    /// on edges. Called after every state transition; a fired barrier is
    /// retracted as soon as any member falls out of `Completed`.
    pub fn reevaluate_joins(&mut self, registry: &ArtifactRegistry) -> Vec<Transition> {
        let mut transitions = Vec::new();

        let ids: Vec<String> = self.joins.keys().cloned().collect();
        for id in ids {
            let status = match self.evaluate_join(&id, registry) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let Some(barrier) = self.joins.get_mut(&id) else {
                continue;
            };

            if status.satisfied && !barrier.satisfied {
                barrier.satisfied = true;
                info!(join = %id, "join barrier satisfied");
                transitions.push(
                    Transition::new(
                        TransitionKind::JoinSatisfied,
                        format!("join '{}' satisfied: all branches completed", id),
                    )
                    .with_join(id.clone()),
                );
            } else if !status.satisfied && barrier.satisfied {
                barrier.satisfied = false;
                warn!(join = %id, "join barrier retracted");
                transitions.push(
                    Transition::new(
                        TransitionKind::JoinRetracted,
                        format!("join '{}' retracted: {}", id, status.waiting_on.join("; ")),
                    )
                    .with_join(id.clone()),
                );
            }
        }

        transitions
    }

    /// Re-apply a logged transition literally (replay path)
    pub fn apply(&mut self, transition: &Transition) {
        if let Some(join_id) = transition.join_id.as_deref() {
            if let Some(barrier) = self.joins.get_mut(join_id) {
                match transition.kind {
                    TransitionKind::JoinSatisfied => barrier.satisfied = true,
                    TransitionKind::JoinRetracted => barrier.satisfied = false,
                    _ => {}
                }
            }
            return;
        }

        let Some(branch_id) = transition.branch_id.as_deref() else {
            return;
        };
        let Some(branch) = self.branches.get_mut(branch_id) else {
            return;
        };

        match transition.kind {
            TransitionKind::BranchForked => {
                branch.contract_hash = transition.content_hash.clone();
                branch.current_stage = 0;
                branch.set_status(BranchStatus::Ready, transition.timestamp);
            }
            TransitionKind::BranchStarted => {
                branch.set_status(BranchStatus::InProgress, transition.timestamp);
            }
            TransitionKind::BranchReported => {
                branch.current_stage = branch.stages.len();
                branch.set_status(BranchStatus::AwaitingVerification, transition.timestamp);
            }
            TransitionKind::VerificationPassed => {
                branch.diagnostic = None;
                branch.set_status(BranchStatus::Completed, transition.timestamp);
            }
            TransitionKind::VerificationFailed | TransitionKind::ContractViolated => {
                branch.diagnostic = transition.detail.clone();
                branch.set_status(BranchStatus::ReworkRequired, transition.timestamp);
            }
            TransitionKind::BranchReblocked => {
                branch.contract_hash = None;
                branch.set_status(BranchStatus::Blocked, transition.timestamp);
            }
            TransitionKind::BranchResubmitted => {
                branch.contract_hash = transition.content_hash.clone();
                branch.diagnostic = None;
                branch.current_stage = 0;
                branch.set_status(BranchStatus::Ready, transition.timestamp);
            }
            _ => {}
        }
    }

    /// Check a branch's contract at an acceptance point: the contract
    /// record must still satisfy as a prerequisite (exists, non-stale,
    /// no unresolved questions) and its current hash must match the one
    /// snapshotted at fork. On either failure, set `ReworkRequired` and
    /// return the `ContractViolated` transition.
    fn contract_check(branch: &mut Branch, registry: &ArtifactRegistry) -> Option<Transition> {
        let usable = registry
            .get(&branch.contract)
            .map(|r| r.satisfies_prerequisite())
            .unwrap_or(false);
        let current = registry.content_hash(&branch.contract).map(String::from);
        if usable && branch.contract_hash == current {
            return None;
        }

        let detail = if !usable {
            format!(
                "contract '{}' is stale or unresolved; the branch must re-fork \
                 against a fresh contract before its work can be accepted",
                branch.contract
            )
        } else {
            format!(
                "built against contract hash {:?}, registry now records {:?}; \
                 decide whether the contract or the branch implementation changes",
                branch.contract_hash, current
            )
        };
        let t = Transition::new(
            TransitionKind::ContractViolated,
            format!(
                "branch '{}' diverged from contract '{}'",
                branch.id, branch.contract
            ),
        )
        .with_branch(branch.id.clone())
        .with_artifact(branch.contract.clone())
        .with_detail(detail.clone());

        branch.diagnostic = Some(detail);
        branch.set_status(BranchStatus::ReworkRequired, t.timestamp);
        debug!(branch = %branch.id, "contract divergence detected");
        Some(t)
    }

    fn branch_mut(&mut self, id: &str) -> Result<&mut Branch, WorkflowError> {
        self.branches
            .get_mut(id)
            .ok_or_else(|| WorkflowError::UnknownBranch { id: id.to_string() })
    }
}
