//! Staleness Cascade Integration Tests
//!
//! Invalidating an artifact must ripple through every transitive
//! consumer, re-block completed branches forked from it, retract
//! satisfied joins, and show up in the blocking diagnostics.

use std::collections::BTreeMap;
use std::path::PathBuf;

use convoy::adapters::fs_store::hash_content;
use convoy::core::{BlockedReason, Engine};
use convoy::domain::{BranchStatus, Verdict};
use convoy::WorkflowConfig;
use tempfile::TempDir;

const CONFIG: &str = r#"
version: "1"
stages:
  - id: requirements
    outputs: [requirements]
  - id: architecture
    prerequisites: [requirements]
    outputs: [contract, storage]
    branch_root: true
  - id: backend-impl
    prerequisites: [contract, storage]
    outputs: [backend-api]
    parallelizable: true
  - id: frontend-impl
    prerequisites: [contract, storage]
    outputs: [frontend-app]
    parallelizable: true
branches:
  - id: backend-track
    contract: contract
    stages: [backend-impl]
    outputs: [backend-api]
  - id: frontend-track
    contract: contract
    stages: [frontend-impl]
    outputs: [frontend-app]
joins:
  - id: integration
    branches: [backend-track, frontend-track]
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

/// Drive both branches to completion so the join is satisfied
async fn complete_both_branches(engine: &mut Engine) {
    engine.produce("requirements", None).await.unwrap();
    engine
        .produce("contract", Some(hash_content(b"contract v1")))
        .await
        .unwrap();
    engine
        .produce("storage", Some(hash_content(b"schema v1")))
        .await
        .unwrap();

    for (branch, output, content) in [
        ("backend-track", "backend-api", b"api v1".as_slice()),
        ("frontend-track", "frontend-app", b"app v1".as_slice()),
    ] {
        engine.start_branch(branch).await.unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert(output.to_string(), hash_content(content));
        engine.report_branch(branch, &outputs).await.unwrap();
        engine
            .verify_branch(branch, &Verdict::pass())
            .await
            .unwrap();
    }
    assert!(engine.join("integration").unwrap().satisfied);
}

#[tokio::test]
async fn test_invalidation_cascades_to_transitive_consumers() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();
    complete_both_branches(&mut engine).await;

    engine.invalidate("requirements").await.unwrap();

    // requirements -> {contract, storage} -> {backend-api, frontend-app}
    for artifact in ["requirements", "contract", "storage", "backend-api", "frontend-app"] {
        assert!(engine.registry().is_stale(artifact), "{} should be stale", artifact);
        assert!(engine.registry().exists(artifact)); // content is kept, trust is not
    }
}

#[tokio::test]
async fn test_contract_staleness_reblocks_completed_branches() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();
    complete_both_branches(&mut engine).await;

    engine.invalidate("contract").await.unwrap();

    for branch in ["backend-track", "frontend-track"] {
        assert_eq!(
            engine.coordinator().branch(branch).unwrap().status,
            BranchStatus::Blocked
        );
    }

    // The satisfied join is retracted
    let join = engine.join("integration").unwrap();
    assert!(!join.satisfied);

    // Diagnostics name the stale contract
    let blocked = engine.blocked();
    assert!(blocked["backend-impl"]
        .iter()
        .any(|r| matches!(r, BlockedReason::Stale { artifact } if artifact == "contract")));
}

#[tokio::test]
async fn test_reproduction_after_staleness_reforks_branches() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();
    complete_both_branches(&mut engine).await;

    engine.invalidate("contract").await.unwrap();
    engine
        .produce("contract", Some(hash_content(b"contract v2")))
        .await
        .unwrap();

    // Branches fork again against the new snapshot
    for branch in ["backend-track", "frontend-track"] {
        let b = engine.coordinator().branch(branch).unwrap();
        assert_eq!(b.status, BranchStatus::Ready);
        assert_eq!(
            b.contract_hash.as_deref(),
            Some(hash_content(b"contract v2").as_str())
        );
    }
}

#[tokio::test]
async fn test_stale_contract_blocks_verification_acceptance() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();

    engine.produce("requirements", None).await.unwrap();
    engine
        .produce("contract", Some(hash_content(b"contract v1")))
        .await
        .unwrap();
    engine
        .produce("storage", Some(hash_content(b"schema v1")))
        .await
        .unwrap();

    engine.start_branch("backend-track").await.unwrap();
    let mut outputs = BTreeMap::new();
    outputs.insert("backend-api".to_string(), hash_content(b"api v1"));
    engine.report_branch("backend-track", &outputs).await.unwrap();

    // The contract goes stale while the branch awaits verification; its
    // hash is unchanged, but a passing verdict must not complete the branch
    engine.invalidate("contract").await.unwrap();
    assert!(engine.registry().is_stale("contract"));

    let err = engine
        .verify_branch("backend-track", &Verdict::pass())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<convoy::domain::WorkflowError>(),
        Some(convoy::domain::WorkflowError::ContractViolation { branch, .. })
            if branch == "backend-track"
    ));
    assert_eq!(
        engine.coordinator().branch("backend-track").unwrap().status,
        BranchStatus::ReworkRequired
    );
}

#[tokio::test]
async fn test_reset_destroys_recorded_content() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();
    complete_both_branches(&mut engine).await;

    engine.reset("storage").await.unwrap();

    assert!(!engine.registry().exists("storage"));
    assert!(engine.registry().content_hash("storage").is_none());

    // Downstream of storage is reset too; contract is untouched
    assert!(!engine.registry().exists("backend-api"));
    assert!(!engine.registry().exists("frontend-app"));
    assert!(engine.registry().exists("contract"));
    assert!(!engine.registry().is_stale("contract"));
}

#[tokio::test]
async fn test_unrelated_staleness_leaves_branches_alone() {
    let (_temp, config) = setup();
    let mut engine = Engine::open(&config).await.unwrap();
    complete_both_branches(&mut engine).await;

    // storage is a prerequisite but not the fork contract
    engine.invalidate("storage").await.unwrap();

    for branch in ["backend-track", "frontend-track"] {
        assert_eq!(
            engine.coordinator().branch(branch).unwrap().status,
            BranchStatus::Completed
        );
    }

    // The join still cares: a stale artifact under the barrier holds it
    assert!(!engine.join("integration").unwrap().satisfied);
}
