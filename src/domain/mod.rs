//! Domain types for the convoy orchestrator.
//!
//! This module contains the core data structures:
//! - Artifacts: existence/staleness state with open questions
//! - Stages: units of work with declared prerequisites and outputs
//! - Branches: independently progressing execution tracks
//! - Transitions: immutable records of state changes

pub mod artifact;
pub mod branch;
pub mod error;
pub mod stage;
pub mod transition;

// Re-export commonly used types
pub use artifact::{ArtifactRecord, OpenQuestion};
pub use branch::{Branch, BranchStatus, Verdict};
pub use error::WorkflowError;
pub use stage::Stage;
pub use transition::{Transition, TransitionKind};
