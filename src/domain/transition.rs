//! Transition log entries.
//!
//! Every mutation of registry or branch state appends one transition per
//! applied effect to an append-only log. Transitions carry enough detail
//! to be re-applied literally on replay, without re-running cascade logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in the append-only transition log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Unique identifier for this transition
    pub id: Uuid,

    /// When the transition occurred
    pub timestamp: DateTime<Utc>,

    /// What happened
    pub kind: TransitionKind,

    /// Artifact this transition concerns, if any
    pub artifact_id: Option<String>,

    /// Stage this transition concerns, if any
    pub stage_id: Option<String>,

    /// Branch this transition concerns, if any
    pub branch_id: Option<String>,

    /// Join barrier this transition concerns, if any
    pub join_id: Option<String>,

    /// Question id for question transitions
    pub question_id: Option<String>,

    /// Field key for field transitions (the value travels in `detail`)
    pub field_key: Option<String>,

    /// Content hash recorded with the transition (production, fork snapshot)
    pub content_hash: Option<String>,

    /// Human-readable cause
    pub cause: String,

    /// Diagnostic or payload text (question text, resolution, failure detail)
    pub detail: Option<String>,
}

impl Transition {
    /// Create a transition with the current timestamp
    pub fn new(kind: TransitionKind, cause: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            artifact_id: None,
            stage_id: None,
            branch_id: None,
            join_id: None,
            question_id: None,
            field_key: None,
            content_hash: None,
            cause: cause.into(),
            detail: None,
        }
    }

    /// Attach an artifact id
    pub fn with_artifact(mut self, id: impl Into<String>) -> Self {
        self.artifact_id = Some(id.into());
        self
    }

    /// Attach a stage id
    pub fn with_stage(mut self, id: impl Into<String>) -> Self {
        self.stage_id = Some(id.into());
        self
    }

    /// Attach a branch id
    pub fn with_branch(mut self, id: impl Into<String>) -> Self {
        self.branch_id = Some(id.into());
        self
    }

    /// Attach a join id
    pub fn with_join(mut self, id: impl Into<String>) -> Self {
        self.join_id = Some(id.into());
        self
    }

    /// Attach a question id
    pub fn with_question(mut self, id: impl Into<String>) -> Self {
        self.question_id = Some(id.into());
        self
    }

    /// Attach a field key
    pub fn with_field_key(mut self, key: impl Into<String>) -> Self {
        self.field_key = Some(key.into());
        self
    }

    /// Attach a content hash
    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.content_hash = hash;
        self
    }

    /// Attach diagnostic or payload text
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Kinds of transitions recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// An artifact was produced by its stage
    ArtifactProduced,

    /// An artifact was explicitly marked stale
    ArtifactInvalidated,

    /// Staleness propagated to a downstream artifact
    StalenessCascaded,

    /// An artifact was explicitly reset (destroyed)
    ArtifactReset,

    /// A reset propagated to a downstream artifact
    ResetCascaded,

    /// A required field was filled in on an artifact
    FieldRecorded,

    /// An open question was attached to an artifact
    QuestionRaised,

    /// An open question was explicitly resolved
    QuestionResolved,

    /// A branch forked: Blocked -> Ready (contract hash snapshotted)
    BranchForked,

    /// A branch started work: Ready -> InProgress
    BranchStarted,

    /// A branch reported its outputs: InProgress -> AwaitingVerification
    BranchReported,

    /// External verification passed: AwaitingVerification -> Completed
    VerificationPassed,

    /// External verification failed: AwaitingVerification -> ReworkRequired
    VerificationFailed,

    /// Branch output diverged from the shared contract: -> ReworkRequired
    ContractViolated,

    /// Contract staleness forced a branch back: -> Blocked
    BranchReblocked,

    /// Operator resubmitted a branch: ReworkRequired -> Ready
    BranchResubmitted,

    /// A join barrier's condition became true
    JoinSatisfied,

    /// A previously fired join barrier was retracted
    JoinRetracted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_serialization() {
        let t = Transition::new(TransitionKind::ArtifactProduced, "produced by architecture")
            .with_artifact("contract")
            .with_stage("architecture")
            .with_hash(Some("deadbeef".to_string()));

        let json = serde_json::to_string(&t).unwrap();
        let parsed: Transition = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind, TransitionKind::ArtifactProduced);
        assert_eq!(parsed.artifact_id.as_deref(), Some("contract"));
        assert_eq!(parsed.content_hash.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_question_transition_fields() {
        let t = Transition::new(TransitionKind::QuestionRaised, "question raised on contract")
            .with_artifact("contract")
            .with_question("q1")
            .with_detail("which pagination scheme?");

        assert_eq!(t.question_id.as_deref(), Some("q1"));
        assert_eq!(t.detail.as_deref(), Some("which pagination scheme?"));
    }
}
