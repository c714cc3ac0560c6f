//! Artifact records tracked by the registry.
//!
//! An artifact is a unit of produced content with existence and staleness
//! state. Records also carry the open questions attached to an artifact;
//! an artifact with unresolved questions is provisionally complete and
//! cannot satisfy a prerequisite.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry record for a single artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Stable artifact identifier
    pub id: String,

    /// Stage that declares this artifact as an output (at most one)
    pub producer: Option<String>,

    /// Stages that list this artifact as a prerequisite
    pub consumers: BTreeSet<String>,

    /// Artifact kind, for the required-field rule table
    pub kind: Option<String>,

    /// Whether the artifact has been produced
    pub exists: bool,

    /// Whether an upstream change has invalidated the artifact
    pub stale: bool,

    /// Content hash recorded at production time
    pub content_hash: Option<String>,

    /// Fields filled in on the artifact (checked against its kind's rule table)
    pub fields: BTreeMap<String, String>,

    /// Open questions attached to this artifact
    pub open_questions: Vec<OpenQuestion>,

    /// When the artifact was last produced
    pub produced_at: Option<DateTime<Utc>>,
}

impl ArtifactRecord {
    /// Create an empty record for an artifact id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            producer: None,
            consumers: BTreeSet::new(),
            kind: None,
            exists: false,
            stale: false,
            content_hash: None,
            fields: BTreeMap::new(),
            open_questions: Vec::new(),
            produced_at: None,
        }
    }

    /// Whether any attached question is still unresolved
    pub fn has_unresolved_questions(&self) -> bool {
        self.open_questions.iter().any(|q| !q.is_resolved())
    }

    /// Count of unresolved questions
    pub fn unresolved_question_count(&self) -> usize {
        self.open_questions.iter().filter(|q| !q.is_resolved()).count()
    }

    /// Whether this artifact can satisfy a prerequisite right now
    pub fn satisfies_prerequisite(&self) -> bool {
        self.exists && !self.stale && !self.has_unresolved_questions()
    }
}

/// A clarification question attached to an artifact.
///
/// Questions are resolved only through an explicit confirmation
/// transition, never implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenQuestion {
    /// Question id, unique within the artifact
    pub id: String,

    /// The question text
    pub text: String,

    /// When the question was raised
    pub raised_at: DateTime<Utc>,

    /// Resolution text, if the question has been answered
    pub resolution: Option<String>,
}

impl OpenQuestion {
    /// Create an unresolved question
    pub fn new(id: impl Into<String>, text: impl Into<String>, raised_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            raised_at,
            resolution: None,
        }
    }

    /// Whether the question has been answered
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}
