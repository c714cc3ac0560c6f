//! Branch state and lifecycle.
//!
//! A branch is an independently progressing execution track forked from a
//! shared contract artifact. Branches never mutate artifacts directly;
//! they request production through the coordinator, which goes through
//! the registry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An independent execution track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Track name (e.g. "backend-track")
    pub id: String,

    /// The contract artifact this branch forks from
    pub contract: String,

    /// Stage-graph subset this branch executes, in order
    pub stages: Vec<String>,

    /// Index of the current stage within `stages`
    pub current_stage: usize,

    /// Lifecycle status
    pub status: BranchStatus,

    /// Artifact ids this branch declares as its outputs
    pub outputs: Vec<String>,

    /// Contract content hash snapshotted at fork time; divergence from
    /// the registry's current hash is a contract violation
    pub contract_hash: Option<String>,

    /// Diagnostic from the last verification failure or contract violation
    pub diagnostic: Option<String>,

    /// When the branch last changed status
    pub last_transition: DateTime<Utc>,
}

impl Branch {
    /// Create a branch in the `Blocked` state
    pub fn new(
        id: impl Into<String>,
        contract: impl Into<String>,
        stages: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            contract: contract.into(),
            stages,
            current_stage: 0,
            status: BranchStatus::Blocked,
            outputs,
            contract_hash: None,
            diagnostic: None,
            last_transition: Utc::now(),
        }
    }

    /// Record a status change with its timestamp
    pub fn set_status(&mut self, status: BranchStatus, at: DateTime<Utc>) {
        self.status = status;
        self.last_transition = at;
    }

    /// Whether the branch counts toward a fired join barrier
    pub fn is_completed(&self) -> bool {
        self.status == BranchStatus::Completed
    }
}

/// Per-branch state machine.
///
/// `Blocked -> Ready -> InProgress -> AwaitingVerification -> Completed`,
/// with `* -> ReworkRequired -> Ready` on verification failure or contract
/// violation, and `Completed/InProgress -> Blocked` when the contract
/// artifact goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Contract artifact missing or stale
    Blocked,

    /// Forked; work may begin
    Ready,

    /// Work underway
    InProgress,

    /// Outputs reported; waiting on an external verification result
    AwaitingVerification,

    /// Verification failed or contract violated; needs operator action
    ReworkRequired,

    /// Verified complete
    Completed,
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::AwaitingVerification => "awaiting_verification",
            Self::ReworkRequired => "rework_required",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Result supplied by the external verification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether verification passed
    pub passed: bool,

    /// Diagnostic text (attached to the branch on failure)
    pub diagnostic: Option<String>,
}

impl Verdict {
    /// A passing verdict
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostic: None,
        }
    }

    /// A failing verdict with a diagnostic
    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_starts_blocked() {
        let branch = Branch::new(
            "backend-track",
            "contract",
            vec!["backend-impl".to_string()],
            vec!["backend-api".to_string()],
        );
        assert_eq!(branch.status, BranchStatus::Blocked);
        assert!(branch.contract_hash.is_none());
        assert!(!branch.is_completed());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BranchStatus::AwaitingVerification.to_string(), "awaiting_verification");
        assert_eq!(BranchStatus::ReworkRequired.to_string(), "rework_required");
    }

    #[test]
    fn test_verdict_constructors() {
        assert!(Verdict::pass().passed);
        let fail = Verdict::fail("contract mismatch on /orders");
        assert!(!fail.passed);
        assert_eq!(fail.diagnostic.as_deref(), Some("contract mismatch on /orders"));
    }
}
