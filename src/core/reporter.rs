//! Progress reporting.
//!
//! A pure, idempotent projection of registry and branch state into a
//! human-facing status matrix. No side effects; safe to call at any
//! frequency.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coordinator::{BranchCoordinator, JoinStatus};
use super::graph::StageGraph;
use super::readiness::{self, BlockedReason, RuleTable};
use super::registry::ArtifactRegistry;
use crate::domain::BranchStatus;

/// Where a stage currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// All outputs produced and fresh
    Complete,

    /// May run now
    Eligible,

    /// Waiting on prerequisites
    Blocked,
}

/// One row of the stage matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRow {
    pub id: String,
    pub state: StageState,
    /// Stage may run concurrently with other eligible stages
    pub parallelizable: bool,
    pub blocked_on: Vec<BlockedReason>,
}

/// One row of the artifact matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub id: String,
    pub exists: bool,
    pub stale: bool,
    pub unresolved_questions: usize,
}

/// One row of the branch matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRow {
    pub id: String,
    pub status: BranchStatus,
    pub contract: String,
    pub diagnostic: Option<String>,
    /// Seconds since the branch last changed status
    pub seconds_since_transition: i64,
}

/// Full status projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub stages: Vec<StageRow>,
    pub artifacts: Vec<ArtifactRow>,
    pub branches: Vec<BranchRow>,
    pub joins: Vec<JoinStatus>,
}

/// Project the combined engine state into a status report
pub fn render_status(
    graph: &StageGraph,
    registry: &ArtifactRegistry,
    coordinator: &BranchCoordinator,
    rules: &RuleTable,
    now: DateTime<Utc>,
) -> StatusReport {
    let eligible = readiness::next_eligible_stages(graph, registry, rules);
    let blocked = readiness::blocked_report(graph, registry, rules);

    let stages = graph
        .stages()
        .iter()
        .map(|stage| {
            let state = if readiness::stage_complete(&stage.id, graph, registry) {
                StageState::Complete
            } else if eligible.contains(&stage.id) {
                StageState::Eligible
            } else {
                StageState::Blocked
            };
            StageRow {
                id: stage.id.clone(),
                state,
                parallelizable: stage.parallelizable,
                blocked_on: blocked.get(&stage.id).cloned().unwrap_or_default(),
            }
        })
        .collect();

    let artifacts = registry
        .records()
        .map(|r| ArtifactRow {
            id: r.id.clone(),
            exists: r.exists,
            stale: r.stale,
            unresolved_questions: r.unresolved_question_count(),
        })
        .collect();

    let branches = coordinator
        .branches()
        .map(|b| BranchRow {
            id: b.id.clone(),
            status: b.status,
            contract: b.contract.clone(),
            diagnostic: b.diagnostic.clone(),
            seconds_since_transition: (now - b.last_transition).num_seconds(),
        })
        .collect();

    let joins = coordinator
        .joins()
        .map(|j| {
            coordinator
                .evaluate_join(&j.id, registry)
                .unwrap_or(JoinStatus {
                    id: j.id.clone(),
                    satisfied: false,
                    waiting_on: Vec::new(),
                })
        })
        .collect();

    StatusReport {
        generated_at: now,
        stages,
        artifacts,
        branches,
        joins,
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stages:")?;
        for row in &self.stages {
            let state = match row.state {
                StageState::Complete => "complete",
                StageState::Eligible => "eligible",
                StageState::Blocked => "blocked",
            };
            write!(f, "  {:<24} {}", row.id, state)?;
            if row.parallelizable {
                write!(f, "  [parallel]")?;
            }
            if !row.blocked_on.is_empty() {
                let reasons: Vec<String> =
                    row.blocked_on.iter().map(|r| r.to_string()).collect();
                write!(f, "  ({})", reasons.join("; "))?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Artifacts:")?;
        for row in &self.artifacts {
            let state = if !row.exists {
                "missing"
            } else if row.stale {
                "stale"
            } else {
                "fresh"
            };
            write!(f, "  {:<24} {}", row.id, state)?;
            if row.unresolved_questions > 0 {
                write!(f, "  ({} open question(s))", row.unresolved_questions)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Branches:")?;
        for row in &self.branches {
            write!(
                f,
                "  {:<24} {}  (contract: {}, {}s since last transition)",
                row.id, row.status, row.contract, row.seconds_since_transition
            )?;
            if let Some(diag) = &row.diagnostic {
                write!(f, "\n    diagnostic: {}", diag)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Joins:")?;
        for join in &self.joins {
            if join.satisfied {
                writeln!(f, "  {:<24} satisfied", join.id)?;
            } else {
                writeln!(f, "  {:<24} pending  ({})", join.id, join.waiting_on.join("; "))?;
            }
        }

        Ok(())
    }
}
