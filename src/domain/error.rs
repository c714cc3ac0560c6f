//! Error taxonomy for the workflow engine.
//!
//! Configuration-time errors (`DuplicateProducer`, `CyclicDependency`)
//! are fatal and abort startup. Missing or stale prerequisites are a
//! normal operating state reported through the blocked report; they only
//! become errors when production is attempted against them.

use thiserror::Error;

use super::branch::BranchStatus;

/// Errors raised by the workflow engine
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("unknown artifact '{id}': not declared as an output by any stage")]
    UnknownArtifact { id: String },

    #[error("unknown stage '{id}'")]
    UnknownStage { id: String },

    #[error("unknown branch '{id}'")]
    UnknownBranch { id: String },

    #[error("unknown join barrier '{id}'")]
    UnknownJoin { id: String },

    #[error("unknown question '{question}' on artifact '{artifact}'")]
    UnknownQuestion { artifact: String, question: String },

    #[error("artifact '{artifact}' declared as output by both '{first}' and '{second}'")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("cyclic dependency in stage graph involving: {stages:?}")]
    CyclicDependency { stages: Vec<String> },

    #[error("stage '{stage}' prerequisite '{artifact}' is {reason}")]
    MissingPrerequisite {
        stage: String,
        artifact: String,
        reason: String,
    },

    #[error("branch '{branch}' diverged from contract '{contract}': expected hash {expected:?}, found {actual:?}")]
    ContractViolation {
        branch: String,
        contract: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("verification failed for branch '{branch}': {diagnostic}")]
    VerificationFailure { branch: String, diagnostic: String },

    #[error("branch '{branch}' cannot {action} from state {from}")]
    InvalidTransition {
        branch: String,
        from: BranchStatus,
        action: &'static str,
    },

    #[error("question '{question}' on artifact '{artifact}' is already resolved")]
    QuestionAlreadyResolved { artifact: String, question: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = WorkflowError::MissingPrerequisite {
            stage: "storage".to_string(),
            artifact: "architecture".to_string(),
            reason: "stale".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "stage 'storage' prerequisite 'architecture' is stale"
        );

        let err = WorkflowError::InvalidTransition {
            branch: "backend-track".to_string(),
            from: BranchStatus::Blocked,
            action: "start",
        };
        assert!(err.to_string().contains("cannot start from state blocked"));
    }
}
