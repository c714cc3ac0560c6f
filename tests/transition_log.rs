//! Transition Log Integration Tests
//!
//! The log is the source of truth: every state change appends a
//! transition, and reopening the engine replays the log to reconstruct
//! exactly the state it had when it closed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use convoy::adapters::fs_store::hash_content;
use convoy::core::Engine;
use convoy::domain::{BranchStatus, TransitionKind, Verdict};
use convoy::WorkflowConfig;
use tempfile::TempDir;

const CONFIG: &str = r#"
version: "1"
stages:
  - id: architecture
    outputs: [contract, storage]
    branch_root: true
  - id: backend-impl
    prerequisites: [contract, storage]
    outputs: [backend-api]
branches:
  - id: backend-track
    contract: contract
    stages: [backend-impl]
    outputs: [backend-api]
joins:
  - id: integration
    branches: [backend-track]
"#;

fn setup() -> (TempDir, WorkflowConfig) {
    let temp = TempDir::new().unwrap();
    let convoy_dir = temp.path().join(".convoy");
    std::fs::create_dir_all(&convoy_dir).unwrap();
    let path: PathBuf = convoy_dir.join("workflow.yaml");
    std::fs::write(&path, CONFIG).unwrap();
    let config = WorkflowConfig::load(&path).unwrap();
    (temp, config)
}

#[tokio::test]
async fn test_transitions_are_logged_in_order() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();

    engine
        .produce("contract", Some(hash_content(b"contract v1")))
        .await
        .unwrap();
    engine.produce("storage", None).await.unwrap();
    engine.start_branch("backend-track").await.unwrap();
    engine.invalidate("contract").await.unwrap();

    let transitions = engine.recent_transitions(100).await.unwrap();
    let kinds: Vec<TransitionKind> = transitions.iter().map(|t| t.kind).collect();

    // Production forks the branch in the same batch; invalidating the
    // contract re-blocks the in-flight branch in the same batch too
    assert_eq!(
        kinds,
        vec![
            TransitionKind::ArtifactProduced,
            TransitionKind::BranchForked,
            TransitionKind::ArtifactProduced,
            TransitionKind::BranchStarted,
            TransitionKind::ArtifactInvalidated,
            TransitionKind::BranchReblocked,
        ]
    );

    // Timestamps never go backwards
    for pair in transitions.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn test_reopen_reconstructs_state() {
    let (_temp, config) = setup();

    {
        let mut engine = Engine::open(&config).await.unwrap();
        engine
            .produce("contract", Some(hash_content(b"contract v1")))
            .await
            .unwrap();
        engine.produce("storage", None).await.unwrap();
        engine.record_field("contract", "endpoints", "/orders").await.unwrap();
        engine.start_branch("backend-track").await.unwrap();

        let mut outputs = BTreeMap::new();
        outputs.insert("backend-api".to_string(), hash_content(b"api v1"));
        engine.report_branch("backend-track", &outputs).await.unwrap();
        engine
            .verify_branch("backend-track", &Verdict::pass())
            .await
            .unwrap();
        assert!(engine.join("integration").unwrap().satisfied);
    }

    // Fresh engine, same state directory
    let engine = Engine::open(&config).await.unwrap();

    let branch = engine.coordinator().branch("backend-track").unwrap();
    assert_eq!(branch.status, BranchStatus::Completed);
    assert_eq!(
        branch.contract_hash.as_deref(),
        Some(hash_content(b"contract v1").as_str())
    );

    let contract = engine.registry().get("contract").unwrap();
    assert!(contract.exists && !contract.stale);
    assert_eq!(contract.fields.get("endpoints").map(String::as_str), Some("/orders"));

    assert!(engine.registry().exists("backend-api"));
    assert!(engine.join("integration").unwrap().satisfied);
    assert!(engine.eligible().is_empty()); // everything is built
}

#[tokio::test]
async fn test_replay_preserves_staleness() {
    let (_temp, config) = setup();

    {
        let mut engine = Engine::open(&config).await.unwrap();
        engine
            .produce("contract", Some(hash_content(b"contract v1")))
            .await
            .unwrap();
        engine.produce("storage", None).await.unwrap();
        engine.invalidate("storage").await.unwrap();
    }

    let engine = Engine::open(&config).await.unwrap();
    assert!(engine.registry().is_stale("storage"));
    assert!(!engine.registry().is_stale("contract"));
    assert_eq!(
        engine.coordinator().branch("backend-track").unwrap().status,
        BranchStatus::Ready
    );
}

#[tokio::test]
async fn test_reopen_on_empty_log_is_clean() {
    let (_temp, config) = setup();

    let engine = Engine::open(&config).await.unwrap();
    assert!(engine.recent_transitions(10).await.unwrap().is_empty());
    assert_eq!(
        engine.coordinator().branch("backend-track").unwrap().status,
        BranchStatus::Blocked
    );
    assert!(engine.eligible().contains("architecture"));
}

#[tokio::test]
async fn test_open_forks_branches_added_to_config_later() {
    const STAGES_ONLY_CONFIG: &str = r#"
version: "1"
stages:
  - id: architecture
    outputs: [contract, storage]
    branch_root: true
  - id: backend-impl
    prerequisites: [contract, storage]
    outputs: [backend-api]
"#;

    let temp = TempDir::new().unwrap();
    let convoy_dir = temp.path().join(".convoy");
    std::fs::create_dir_all(&convoy_dir).unwrap();
    let path: PathBuf = convoy_dir.join("workflow.yaml");

    // First deployment carries no branch configuration
    std::fs::write(&path, STAGES_ONLY_CONFIG).unwrap();
    {
        let config = WorkflowConfig::load(&path).unwrap();
        let mut engine = Engine::open(&config).await.unwrap();
        engine
            .produce("contract", Some(hash_content(b"contract v1")))
            .await
            .unwrap();
        engine.produce("storage", None).await.unwrap();
    }

    // The branch and join are added afterwards; opening must fork the
    // branch against the already-produced contract, without waiting for
    // the next mutation
    std::fs::write(&path, CONFIG).unwrap();
    let config = WorkflowConfig::load(&path).unwrap();
    let engine = Engine::open(&config).await.unwrap();
    assert_eq!(
        engine.coordinator().branch("backend-track").unwrap().status,
        BranchStatus::Ready
    );
    let forked = engine.transitions_for_branch("backend-track").await.unwrap();
    assert_eq!(forked.len(), 1);
    assert_eq!(forked[0].kind, TransitionKind::BranchForked);

    // Reopening is idempotent: the fork is not appended again
    let engine = Engine::open(&config).await.unwrap();
    let forked = engine.transitions_for_branch("backend-track").await.unwrap();
    assert_eq!(forked.len(), 1);
}

#[tokio::test]
async fn test_tail_returns_most_recent() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();

    engine.produce("contract", None).await.unwrap();
    engine.produce("storage", None).await.unwrap();

    let all = engine.recent_transitions(100).await.unwrap();
    let tail = engine.recent_transitions(2).await.unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].id, all[all.len() - 2].id);
    assert_eq!(tail[1].id, all[all.len() - 1].id);
}
