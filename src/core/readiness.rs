//! Readiness evaluation.
//!
//! Pure, deterministic projections of registry state: which stages may
//! legally begin now, and why the others are blocked. Calling either
//! function twice on unchanged state yields identical results, and
//! neither ever fails; a blocked prerequisite is a normal operating
//! state, not an error.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::ArtifactRecord;

use super::graph::StageGraph;
use super::registry::ArtifactRegistry;

/// Declarative rule table mapping artifact kind -> required field set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleTable {
    kinds: BTreeMap<String, Vec<String>>,
}

impl RuleTable {
    /// Build a rule table from (kind, required fields) pairs
    pub fn new(kinds: BTreeMap<String, Vec<String>>) -> Self {
        Self { kinds }
    }

    /// Required fields for a kind (empty for unknown kinds)
    pub fn required_fields(&self, kind: &str) -> &[String] {
        self.kinds.get(kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Required fields the record has not filled in yet
    pub fn missing_fields(&self, record: &ArtifactRecord) -> Vec<String> {
        let Some(kind) = record.kind.as_deref() else {
            return Vec::new();
        };
        self.required_fields(kind)
            .iter()
            .filter(|f| !record.fields.contains_key(*f))
            .cloned()
            .collect()
    }
}

/// Why a stage cannot run right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum BlockedReason {
    /// Prerequisite artifact has not been produced
    Missing { artifact: String },

    /// Prerequisite artifact was invalidated upstream
    Stale { artifact: String },

    /// Prerequisite artifact carries unresolved open questions
    UnresolvedQuestions { artifact: String, count: usize },

    /// Prerequisite artifact's kind requires fields not yet filled in
    IncompleteFields {
        artifact: String,
        missing: Vec<String>,
    },
}

impl BlockedReason {
    /// The artifact this reason concerns
    pub fn artifact(&self) -> &str {
        match self {
            Self::Missing { artifact }
            | Self::Stale { artifact }
            | Self::UnresolvedQuestions { artifact, .. }
            | Self::IncompleteFields { artifact, .. } => artifact,
        }
    }
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { artifact } => write!(f, "'{}' is missing", artifact),
            Self::Stale { artifact } => write!(f, "'{}' is stale", artifact),
            Self::UnresolvedQuestions { artifact, count } => {
                write!(f, "'{}' has {} unresolved question(s)", artifact, count)
            }
            Self::IncompleteFields { artifact, missing } => {
                write!(f, "'{}' is missing fields: {}", artifact, missing.join(", "))
            }
        }
    }
}

/// Whether a stage has produced all of its outputs (all exist, none stale)
pub fn stage_complete(stage_id: &str, graph: &StageGraph, registry: &ArtifactRegistry) -> bool {
    match graph.stage(stage_id) {
        Some(stage) => stage
            .outputs
            .iter()
            .all(|o| registry.exists(o) && !registry.is_stale(o)),
        None => false,
    }
}

/// Reasons a single prerequisite fails to satisfy, in check order
fn prerequisite_reasons(
    artifact_id: &str,
    registry: &ArtifactRegistry,
    rules: &RuleTable,
) -> Vec<BlockedReason> {
    let mut reasons = Vec::new();

    let Some(record) = registry.get(artifact_id) else {
        reasons.push(BlockedReason::Missing {
            artifact: artifact_id.to_string(),
        });
        return reasons;
    };

    if !record.exists {
        reasons.push(BlockedReason::Missing {
            artifact: artifact_id.to_string(),
        });
        return reasons;
    }

    if record.stale {
        reasons.push(BlockedReason::Stale {
            artifact: artifact_id.to_string(),
        });
    }

    let unresolved = record.unresolved_question_count();
    if unresolved > 0 {
        reasons.push(BlockedReason::UnresolvedQuestions {
            artifact: artifact_id.to_string(),
            count: unresolved,
        });
    }

    let missing_fields = rules.missing_fields(record);
    if !missing_fields.is_empty() {
        reasons.push(BlockedReason::IncompleteFields {
            artifact: artifact_id.to_string(),
            missing: missing_fields,
        });
    }

    reasons
}

/// Stages eligible to run now: not yet complete, with every prerequisite
/// existing, non-stale, fully answered, and fully filled in.
pub fn next_eligible_stages(graph: &StageGraph, registry: &ArtifactRegistry, rules: &RuleTable) -> BTreeSet<String> {
    graph
        .stages()
        .iter()
        .filter(|stage| !stage_complete(&stage.id, graph, registry))
        .filter(|stage| {
            stage
                .prerequisites
                .iter()
                .all(|p| prerequisite_reasons(p, registry, rules).is_empty())
        })
        .map(|stage| stage.id.clone())
        .collect()
}

/// Per-stage blocking diagnostics. Stages that are complete or eligible
/// are omitted; the map never fails to build.
pub fn blocked_report(
    graph: &StageGraph,
    registry: &ArtifactRegistry,
    rules: &RuleTable,
) -> BTreeMap<String, Vec<BlockedReason>> {
    let mut report = BTreeMap::new();

    for stage in graph.stages() {
        if stage_complete(&stage.id, graph, registry) {
            continue;
        }

        let reasons: Vec<BlockedReason> = stage
            .prerequisites
            .iter()
            .flat_map(|p| prerequisite_reasons(p, registry, rules))
            .collect();

        if !reasons.is_empty() {
            report.insert(stage.id.clone(), reasons);
        }
    }

    report
}
