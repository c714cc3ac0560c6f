//! Artifact registry: the single owner of artifact state.
//!
//! All existence/staleness mutation goes through the registry; branches
//! and stages request production, they never write artifact state
//! themselves. Every mutation yields transitions for the append-only
//! log, and the registry can re-apply logged transitions literally to
//! reconstruct state on startup.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    ArtifactRecord, OpenQuestion, Stage, Transition, TransitionKind, WorkflowError,
};

use super::graph::StageGraph;

/// Tracks existence, staleness, and producer/consumer relationships of
/// artifacts
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    /// All artifact records, keyed by id (deterministic iteration order)
    artifacts: BTreeMap<String, ArtifactRecord>,

    /// Stage id -> declared output artifact ids
    stage_outputs: BTreeMap<String, Vec<String>>,

    /// Stage id -> declared prerequisite artifact ids
    stage_prereqs: BTreeMap<String, Vec<String>>,
}

impl ArtifactRegistry {
    /// Build a registry from a validated stage graph
    pub fn new(graph: &StageGraph) -> Self {
        let mut registry = Self {
            artifacts: BTreeMap::new(),
            stage_outputs: BTreeMap::new(),
            stage_prereqs: BTreeMap::new(),
        };

        for stage in graph.stages() {
            registry.register_stage(stage);
        }

        registry
    }

    /// Declare a stage's outputs and prerequisite links.
    ///
    /// Output records get their producer set; prerequisite-only records
    /// are created without one so blocked reports can name them, but
    /// they can never be produced.
    pub fn register_stage(&mut self, stage: &Stage) {
        for output in &stage.outputs {
            let record = self
                .artifacts
                .entry(output.clone())
                .or_insert_with(|| ArtifactRecord::new(output.clone()));
            record.producer = Some(stage.id.clone());
        }

        for prereq in &stage.prerequisites {
            let record = self
                .artifacts
                .entry(prereq.clone())
                .or_insert_with(|| ArtifactRecord::new(prereq.clone()));
            record.consumers.insert(stage.id.clone());
        }

        self.stage_outputs
            .insert(stage.id.clone(), stage.outputs.clone());
        self.stage_prereqs
            .insert(stage.id.clone(), stage.prerequisites.clone());
    }

    /// Assign a kind to an artifact (from configuration)
    pub fn assign_kind(&mut self, artifact_id: &str, kind: impl Into<String>) {
        if let Some(record) = self.artifacts.get_mut(artifact_id) {
            record.kind = Some(kind.into());
        }
    }

    /// Whether the artifact currently exists
    pub fn exists(&self, artifact_id: &str) -> bool {
        self.artifacts
            .get(artifact_id)
            .map(|r| r.exists)
            .unwrap_or(false)
    }

    /// Whether the artifact is stale
    pub fn is_stale(&self, artifact_id: &str) -> bool {
        self.artifacts
            .get(artifact_id)
            .map(|r| r.stale)
            .unwrap_or(false)
    }

    /// Content hash recorded at last production
    pub fn content_hash(&self, artifact_id: &str) -> Option<&str> {
        self.artifacts
            .get(artifact_id)
            .and_then(|r| r.content_hash.as_deref())
    }

    /// Look up a record
    pub fn get(&self, artifact_id: &str) -> Option<&ArtifactRecord> {
        self.artifacts.get(artifact_id)
    }

    /// All records in id order
    pub fn records(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.artifacts.values()
    }

    /// Declared prerequisites of a stage
    pub fn prerequisites_of(&self, stage_id: &str) -> &[String] {
        self.stage_prereqs
            .get(stage_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Declared outputs of a stage
    pub fn outputs_of(&self, stage_id: &str) -> &[String] {
        self.stage_outputs
            .get(stage_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Check that an artifact could legally be produced right now:
    /// it must be declared as an output, and every prerequisite of its
    /// producing stage must exist and be non-stale (no production
    /// against stale inputs).
    pub fn check_producible(&self, artifact_id: &str) -> Result<(), WorkflowError> {
        let record = self
            .artifacts
            .get(artifact_id)
            .ok_or_else(|| WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            })?;

        let producer = record
            .producer
            .clone()
            .ok_or_else(|| WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            })?;

        for prereq in self.prerequisites_of(&producer) {
            let prereq_record = self.artifacts.get(prereq);
            let (exists, stale) = prereq_record
                .map(|r| (r.exists, r.stale))
                .unwrap_or((false, false));

            if !exists {
                return Err(WorkflowError::MissingPrerequisite {
                    stage: producer,
                    artifact: prereq.clone(),
                    reason: "missing".to_string(),
                });
            }
            if stale {
                return Err(WorkflowError::MissingPrerequisite {
                    stage: producer,
                    artifact: prereq.clone(),
                    reason: "stale".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Mark an artifact produced, recording its content hash.
    ///
    /// Fails with `UnknownArtifact` for ids no stage declares as output,
    /// and with `MissingPrerequisite` when any prerequisite of the
    /// producing stage is absent or stale at the moment of production.
    pub fn mark_produced(
        &mut self,
        artifact_id: &str,
        content_hash: Option<String>,
    ) -> Result<Transition, WorkflowError> {
        self.check_producible(artifact_id)?;

        let now = Utc::now();
        self.set_produced(artifact_id, content_hash.clone(), now);

        let producer = self
            .artifacts
            .get(artifact_id)
            .and_then(|r| r.producer.clone())
            .unwrap_or_default();

        debug!(artifact = artifact_id, stage = %producer, "artifact produced");

        Ok(Transition::new(
            TransitionKind::ArtifactProduced,
            format!("artifact '{}' produced by stage '{}'", artifact_id, producer),
        )
        .with_artifact(artifact_id)
        .with_stage(producer)
        .with_hash(content_hash))
    }

    /// Mark an artifact stale, cascading to every artifact whose
    /// producing stage consumed it (transitively).
    ///
    /// Returns one transition per affected artifact: the root gets
    /// `ArtifactInvalidated`, downstream artifacts `StalenessCascaded`.
    pub fn mark_stale(&mut self, artifact_id: &str) -> Result<Vec<Transition>, WorkflowError> {
        if !self.artifacts.contains_key(artifact_id) {
            return Err(WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            });
        }

        let mut transitions = Vec::new();

        self.set_stale(artifact_id);
        transitions.push(
            Transition::new(
                TransitionKind::ArtifactInvalidated,
                format!("artifact '{}' marked stale", artifact_id),
            )
            .with_artifact(artifact_id),
        );

        for downstream in self.downstream_of(artifact_id) {
            // Only artifacts that were actually produced can go stale
            if self.artifacts.get(&downstream).map(|r| r.exists) == Some(true) {
                self.set_stale(&downstream);
                transitions.push(
                    Transition::new(
                        TransitionKind::StalenessCascaded,
                        format!(
                            "artifact '{}' stale: upstream '{}' changed",
                            downstream, artifact_id
                        ),
                    )
                    .with_artifact(downstream),
                );
            }
        }

        Ok(transitions)
    }

    /// Explicitly reset (destroy) an artifact, cascading forward through
    /// every artifact whose producing stage consumed it.
    pub fn reset(&mut self, artifact_id: &str) -> Result<Vec<Transition>, WorkflowError> {
        if !self.artifacts.contains_key(artifact_id) {
            return Err(WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            });
        }

        let mut transitions = Vec::new();

        self.clear(artifact_id);
        transitions.push(
            Transition::new(
                TransitionKind::ArtifactReset,
                format!("artifact '{}' explicitly reset", artifact_id),
            )
            .with_artifact(artifact_id),
        );

        for downstream in self.downstream_of(artifact_id) {
            if self.artifacts.get(&downstream).map(|r| r.exists) == Some(true) {
                self.clear(&downstream);
                transitions.push(
                    Transition::new(
                        TransitionKind::ResetCascaded,
                        format!(
                            "artifact '{}' reset: upstream '{}' was reset",
                            downstream, artifact_id
                        ),
                    )
                    .with_artifact(downstream),
                );
            }
        }

        Ok(transitions)
    }

    /// Attach an open question to an artifact
    pub fn raise_question(
        &mut self,
        artifact_id: &str,
        text: impl Into<String>,
    ) -> Result<Transition, WorkflowError> {
        let record = self
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            })?;

        let text = text.into();
        let question_id = format!("q{}", record.open_questions.len() + 1);
        let now = Utc::now();
        record
            .open_questions
            .push(OpenQuestion::new(question_id.clone(), text.clone(), now));

        Ok(Transition::new(
            TransitionKind::QuestionRaised,
            format!("question '{}' raised on artifact '{}'", question_id, artifact_id),
        )
        .with_artifact(artifact_id)
        .with_question(question_id)
        .with_detail(text))
    }

    /// Resolve an open question through an explicit confirmation
    pub fn resolve_question(
        &mut self,
        artifact_id: &str,
        question_id: &str,
        resolution: impl Into<String>,
    ) -> Result<Transition, WorkflowError> {
        let record = self
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            })?;

        let question = record
            .open_questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or_else(|| WorkflowError::UnknownQuestion {
                artifact: artifact_id.to_string(),
                question: question_id.to_string(),
            })?;

        if question.is_resolved() {
            return Err(WorkflowError::QuestionAlreadyResolved {
                artifact: artifact_id.to_string(),
                question: question_id.to_string(),
            });
        }

        let resolution = resolution.into();
        question.resolution = Some(resolution.clone());

        Ok(Transition::new(
            TransitionKind::QuestionResolved,
            format!(
                "question '{}' on artifact '{}' resolved",
                question_id, artifact_id
            ),
        )
        .with_artifact(artifact_id)
        .with_question(question_id)
        .with_detail(resolution))
    }

    /// Record a filled-in field on an artifact (rule-table input)
    pub fn record_field(
        &mut self,
        artifact_id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Transition, WorkflowError> {
        let record = self
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| WorkflowError::UnknownArtifact {
                id: artifact_id.to_string(),
            })?;

        let key = key.into();
        let value = value.into();
        record.fields.insert(key.clone(), value.clone());

        Ok(Transition::new(
            TransitionKind::FieldRecorded,
            format!("field '{}' recorded on artifact '{}'", key, artifact_id),
        )
        .with_artifact(artifact_id)
        .with_field_key(key)
        .with_detail(value))
    }

    /// Re-apply a logged transition literally (replay path).
    ///
    /// Cascades were expanded into per-artifact transitions when first
    /// applied, so replay never re-runs cascade logic.
    pub fn apply(&mut self, transition: &Transition) {
        let Some(artifact_id) = transition.artifact_id.as_deref() else {
            return;
        };

        match transition.kind {
            TransitionKind::ArtifactProduced => {
                self.set_produced(
                    artifact_id,
                    transition.content_hash.clone(),
                    transition.timestamp,
                );
            }
            TransitionKind::ArtifactInvalidated | TransitionKind::StalenessCascaded => {
                self.set_stale(artifact_id);
            }
            TransitionKind::ArtifactReset | TransitionKind::ResetCascaded => {
                self.clear(artifact_id);
            }
            TransitionKind::QuestionRaised => {
                if let (Some(record), Some(qid)) = (
                    self.artifacts.get_mut(artifact_id),
                    transition.question_id.as_deref(),
                ) {
                    record.open_questions.push(OpenQuestion::new(
                        qid,
                        transition.detail.clone().unwrap_or_default(),
                        transition.timestamp,
                    ));
                }
            }
            TransitionKind::QuestionResolved => {
                if let (Some(record), Some(qid)) = (
                    self.artifacts.get_mut(artifact_id),
                    transition.question_id.as_deref(),
                ) {
                    if let Some(q) = record.open_questions.iter_mut().find(|q| q.id == qid) {
                        q.resolution = Some(transition.detail.clone().unwrap_or_default());
                    }
                }
            }
            TransitionKind::FieldRecorded => {
                if let (Some(record), Some(key)) = (
                    self.artifacts.get_mut(artifact_id),
                    transition.field_key.clone(),
                ) {
                    record
                        .fields
                        .insert(key, transition.detail.clone().unwrap_or_default());
                }
            }
            _ => {}
        }
    }

    /// Artifact ids downstream of the given artifact, breadth-first:
    /// outputs of stages that consume it, then their consumers, and so on.
    fn downstream_of(&self, artifact_id: &str) -> Vec<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(artifact_id.to_string());
        visited.insert(artifact_id.to_string());

        while let Some(current) = queue.pop_front() {
            let consumers: Vec<String> = self
                .artifacts
                .get(&current)
                .map(|r| r.consumers.iter().cloned().collect())
                .unwrap_or_default();

            for stage_id in consumers {
                for output in self.outputs_of(&stage_id).to_vec() {
                    if visited.insert(output.clone()) {
                        order.push(output.clone());
                        queue.push_back(output);
                    }
                }
            }
        }

        order
    }

    fn set_produced(&mut self, artifact_id: &str, hash: Option<String>, at: DateTime<Utc>) {
        if let Some(record) = self.artifacts.get_mut(artifact_id) {
            record.exists = true;
            record.stale = false;
            record.content_hash = hash;
            record.produced_at = Some(at);
        }
    }

    fn set_stale(&mut self, artifact_id: &str) {
        if let Some(record) = self.artifacts.get_mut(artifact_id) {
            record.stale = true;
        }
    }

    fn clear(&mut self, artifact_id: &str) {
        if let Some(record) = self.artifacts.get_mut(artifact_id) {
            record.exists = false;
            record.stale = false;
            record.content_hash = None;
            record.produced_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;

    fn stage(id: &str, prereqs: &[&str], outputs: &[&str]) -> Stage {
        Stage::new(
            id,
            prereqs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn test_registry() -> ArtifactRegistry {
        let graph = StageGraph::from_stages(vec![
            stage("requirements", &[], &["requirements"]),
            stage("architecture", &["requirements"], &["architecture", "contract"]),
            stage("storage", &["architecture"], &["storage"]),
            stage("backend-impl", &["contract", "storage"], &["backend-api"]),
        ])
        .unwrap();
        ArtifactRegistry::new(&graph)
    }

    #[test]
    fn test_unknown_artifact_rejected() {
        let mut registry = test_registry();
        let result = registry.mark_produced("no-such-artifact", None);
        assert!(matches!(result, Err(WorkflowError::UnknownArtifact { .. })));
    }

    #[test]
    fn test_prereq_only_artifact_cannot_be_produced() {
        let graph =
            StageGraph::from_stages(vec![stage("a", &["external"], &["out-a"])]).unwrap();
        let mut registry = ArtifactRegistry::new(&graph);

        // "external" has a record (it can be named in blocked reports)
        // but no producer, so producing it is rejected.
        assert!(registry.get("external").is_some());
        let result = registry.mark_produced("external", None);
        assert!(matches!(result, Err(WorkflowError::UnknownArtifact { .. })));
    }

    #[test]
    fn test_no_production_against_missing_prereq() {
        let mut registry = test_registry();
        let result = registry.mark_produced("architecture", None);
        match result {
            Err(WorkflowError::MissingPrerequisite { stage, artifact, reason }) => {
                assert_eq!(stage, "architecture");
                assert_eq!(artifact, "requirements");
                assert_eq!(reason, "missing");
            }
            other => panic!("expected MissingPrerequisite, got {:?}", other),
        }
    }

    #[test]
    fn test_no_production_against_stale_prereq() {
        let mut registry = test_registry();
        registry.mark_produced("requirements", None).unwrap();
        registry.mark_produced("architecture", None).unwrap();
        registry.mark_stale("requirements").unwrap();

        let result = registry.mark_produced("contract", None);
        match result {
            Err(WorkflowError::MissingPrerequisite { reason, .. }) => {
                assert_eq!(reason, "stale");
            }
            other => panic!("expected MissingPrerequisite, got {:?}", other),
        }
    }

    #[test]
    fn test_staleness_cascades_to_existing_downstream() {
        let mut registry = test_registry();
        registry.mark_produced("requirements", None).unwrap();
        registry.mark_produced("architecture", None).unwrap();
        registry.mark_produced("contract", None).unwrap();
        registry.mark_produced("storage", None).unwrap();
        registry.mark_produced("backend-api", None).unwrap();

        let transitions = registry.mark_stale("architecture").unwrap();

        // architecture itself, then storage and backend-api downstream.
        // contract is a sibling output, not downstream, so unaffected.
        assert!(registry.is_stale("architecture"));
        assert!(registry.is_stale("storage"));
        assert!(registry.is_stale("backend-api"));
        assert!(!registry.is_stale("contract"));

        let kinds: Vec<_> = transitions.iter().map(|t| t.kind).collect();
        assert_eq!(kinds[0], TransitionKind::ArtifactInvalidated);
        assert!(kinds[1..]
            .iter()
            .all(|k| *k == TransitionKind::StalenessCascaded));
    }

    #[test]
    fn test_unproduced_downstream_not_marked() {
        let mut registry = test_registry();
        registry.mark_produced("requirements", None).unwrap();
        registry.mark_produced("architecture", None).unwrap();

        let transitions = registry.mark_stale("architecture").unwrap();
        // storage was never produced, so only the root transition appears
        assert_eq!(transitions.len(), 1);
        assert!(!registry.is_stale("storage"));
    }

    #[test]
    fn test_reset_destroys_and_cascades() {
        let mut registry = test_registry();
        registry.mark_produced("requirements", None).unwrap();
        registry.mark_produced("architecture", None).unwrap();
        registry.mark_produced("storage", None).unwrap();

        let transitions = registry.reset("architecture").unwrap();

        assert!(!registry.exists("architecture"));
        assert!(!registry.exists("storage"));
        assert!(registry.exists("requirements"));
        assert_eq!(transitions[0].kind, TransitionKind::ArtifactReset);
        assert_eq!(transitions[1].kind, TransitionKind::ResetCascaded);
    }

    #[test]
    fn test_question_lifecycle() {
        let mut registry = test_registry();
        registry.mark_produced("requirements", None).unwrap();
        registry.mark_produced("architecture", None).unwrap();
        registry.mark_produced("contract", None).unwrap();

        let raised = registry.raise_question("contract", "auth scheme?").unwrap();
        assert_eq!(raised.question_id.as_deref(), Some("q1"));
        assert!(registry.get("contract").unwrap().has_unresolved_questions());

        registry
            .resolve_question("contract", "q1", "bearer tokens")
            .unwrap();
        assert!(!registry.get("contract").unwrap().has_unresolved_questions());

        // Resolving twice is rejected
        let again = registry.resolve_question("contract", "q1", "again");
        assert!(matches!(
            again,
            Err(WorkflowError::QuestionAlreadyResolved { .. })
        ));
    }

    #[test]
    fn test_replay_reconstructs_state() {
        let mut registry = test_registry();
        let mut log = Vec::new();
        log.push(registry.mark_produced("requirements", None).unwrap());
        log.push(
            registry
                .mark_produced("architecture", Some("hash-a".to_string()))
                .unwrap(),
        );
        log.push(registry.raise_question("architecture", "sync or async?").unwrap());
        log.extend(registry.mark_stale("requirements").unwrap());

        let mut replayed = test_registry();
        for t in &log {
            replayed.apply(t);
        }

        assert_eq!(replayed.exists("requirements"), registry.exists("requirements"));
        assert_eq!(replayed.is_stale("architecture"), registry.is_stale("architecture"));
        assert_eq!(
            replayed.content_hash("architecture"),
            registry.content_hash("architecture")
        );
        assert_eq!(
            replayed.get("architecture").unwrap().unresolved_question_count(),
            1
        );
    }
}
