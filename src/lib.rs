//! convoy - Artifact-dependency workflow orchestrator
//!
//! Coordinates concurrent execution branches that share declared
//! artifact dependencies. Executors generate the artifacts; convoy
//! tracks which exist, which stages are unblocked, and when forked
//! branches may safely converge.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - Every state change is recorded as an immutable transition
//! - Current state is derived by replaying the transition log
//! - Staleness cascades and join edges are expanded into explicit
//!   transitions, so replay never re-runs derivation logic
//!
//! # Modules
//!
//! - `adapters`: Boundary collaborators (artifact store, verifiers)
//! - `core`: Registry, graph, readiness, coordination, log, engine
//! - `domain`: Data structures (Artifact, Stage, Branch, Transition)
//! - `config`: YAML workflow definition and discovery
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # What can run right now?
//! convoy eligible
//!
//! # Record an artifact and see what unblocked
//! convoy produce contract --file api/contract.md
//! convoy status
//!
//! # Drive a branch
//! convoy branch start backend-track
//! convoy branch report backend-track
//! convoy verify backend-track
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::Engine;
pub use config::WorkflowConfig;
pub use domain::{
    ArtifactRecord, Branch, BranchStatus, Stage, Transition, TransitionKind, Verdict,
    WorkflowError,
};
