//! Core workflow logic: dependency graph, artifact registry, readiness
//! evaluation, branch coordination, the transition log, and the engine
//! facade that ties them together.

pub mod coordinator;
pub mod engine;
pub mod graph;
pub mod log;
pub mod readiness;
pub mod registry;
pub mod reporter;

pub use coordinator::{BranchCoordinator, JoinBarrier, JoinStatus};
pub use engine::Engine;
pub use graph::StageGraph;
pub use log::TransitionLog;
pub use readiness::{BlockedReason, RuleTable};
pub use registry::ArtifactRegistry;
pub use reporter::StatusReport;
