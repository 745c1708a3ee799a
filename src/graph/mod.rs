//! Curriculum knowledge graph: data model, extractor-record validation,
//! normalization (synonyms, dedup, cycle elimination) and bounded traversal.
//!
//! Edge direction is uniform across the crate: `PREDECESSOR_TASK(head, tail)`
//! and `DEPENDENT_TASK(head, tail)` both read "head is completed before tail".

mod dag;
mod extraction;
mod normalize;
mod synonyms;
mod traversal;

pub use dag::PrerequisiteGraph;
use extraction::derive_entity_id;
pub use extraction::{
    parse_extraction_output, ExtractedEntity, ExtractionOutput, RawEntity, RawRelation, RecordError,
};
pub use normalize::{
    dedup_entities, dedup_relations, eliminate_cycles, BuildBatch, GraphNormalizer, NormalizationReport,
    NormalizedGraph,
};
pub use synonyms::SynonymMap;
pub use traversal::bounded_traverse;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Node label in the curriculum graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Module,
    KnowledgePoint,
    CognitiveSkill,
    TeachingTask,
    TeachingActivity,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Module,
        EntityType::KnowledgePoint,
        EntityType::CognitiveSkill,
        EntityType::TeachingTask,
        EntityType::TeachingActivity,
    ];

    /// Types that can serve as learning anchors.
    pub const ANCHORABLE: [EntityType; 3] = [
        EntityType::TeachingTask,
        EntityType::CognitiveSkill,
        EntityType::KnowledgePoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Module => "Module",
            EntityType::KnowledgePoint => "KnowledgePoint",
            EntityType::CognitiveSkill => "CognitiveSkill",
            EntityType::TeachingTask => "TeachingTask",
            EntityType::TeachingActivity => "TeachingActivity",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| RecordError::UnknownEntityType(s.to_string()))
    }
}

/// Relation label in the curriculum graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    BelongsToModule,
    SupportsUnderstanding,
    ConstitutesSkill,
    PredecessorTask,
    DependentTask,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        RelationType::BelongsToModule,
        RelationType::SupportsUnderstanding,
        RelationType::ConstitutesSkill,
        RelationType::PredecessorTask,
        RelationType::DependentTask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::BelongsToModule => "BELONGS_TO_MODULE",
            RelationType::SupportsUnderstanding => "SUPPORTS_UNDERSTANDING",
            RelationType::ConstitutesSkill => "CONSTITUTES_SKILL",
            RelationType::PredecessorTask => "PREDECESSOR_TASK",
            RelationType::DependentTask => "DEPENDENT_TASK",
        }
    }

    /// Relations that constrain learning order.
    pub fn is_ordering(&self) -> bool {
        matches!(self, RelationType::PredecessorTask | RelationType::DependentTask)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationType::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| RecordError::UnknownRelationType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Low,
    #[default]
    Medium,
    High,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Low => "low",
            Difficulty::Medium => "medium",
            Difficulty::High => "high",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Difficulty::Low),
            "medium" => Ok(Difficulty::Medium),
            "high" => Ok(Difficulty::High),
            _ => Err(RecordError::UnknownDifficulty(s.to_string())),
        }
    }
}

/// A canonical curriculum entity. Identity for deduplication is
/// `(canonical_name, entity_type)`, not `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub canonical_name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub source_refs: BTreeSet<String>,
}

/// Mutable node attributes written by `GraphStore::upsert_node`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFields {
    pub name: String,
    pub definition: String,
    pub module: String,
    pub difficulty: Difficulty,
    pub source_refs: BTreeSet<String>,
}

impl Entity {
    pub fn dedup_key(&self) -> (&str, EntityType) {
        (&self.canonical_name, self.entity_type)
    }

    pub fn fields(&self) -> NodeFields {
        NodeFields {
            name: self.canonical_name.clone(),
            definition: self.definition.clone(),
            module: self.module.clone(),
            difficulty: self.difficulty,
            source_refs: self.source_refs.clone(),
        }
    }

    pub fn from_fields(entity_type: EntityType, id: impl Into<String>, fields: NodeFields) -> Self {
        Self {
            id: id.into(),
            canonical_name: fields.name,
            entity_type,
            definition: fields.definition,
            module: fields.module,
            difficulty: fields.difficulty,
            source_refs: fields.source_refs,
        }
    }

    /// Source references flattened for single-column storage and export.
    pub fn source_ref(&self) -> String {
        self.source_refs.iter().cloned().collect::<Vec<_>>().join(";")
    }
}

/// Split a stored `source_ref` column back into its references.
pub fn split_source_refs(source_ref: &str) -> BTreeSet<String> {
    source_ref
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// A typed edge between two canonical names (head --rel--> tail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub head: String,
    pub rel: RelationType,
    pub tail: String,
    pub confidence: f64,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub source_ref: String,
}

/// Edge attributes written by `GraphStore::upsert_edge`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFields {
    pub confidence: f64,
    pub justification: String,
    pub source_ref: String,
}

impl Relation {
    pub fn new(head: impl Into<String>, rel: RelationType, tail: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            rel,
            tail: tail.into(),
            confidence: 1.0,
            justification: String::new(),
            source_ref: String::new(),
        }
    }

    pub fn key(&self) -> (&str, RelationType, &str) {
        (&self.head, self.rel, &self.tail)
    }

    pub fn fields(&self) -> EdgeFields {
        EdgeFields {
            confidence: self.confidence,
            justification: self.justification.clone(),
            source_ref: self.source_ref.clone(),
        }
    }

    pub fn from_fields(head: impl Into<String>, rel: RelationType, tail: impl Into<String>, fields: EdgeFields) -> Self {
        Self {
            head: head.into(),
            rel,
            tail: tail.into(),
            confidence: fields.confidence,
            justification: fields.justification,
            source_ref: fields.source_ref,
        }
    }
}

/// Query-scoped working set of node names and the edges between them.
///
/// Edges are kept sorted by `(head, rel, tail)` and unique on that key, so two
/// subgraphs built from the same store state compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subgraph {
    pub nodes: BTreeSet<String>,
    pub edges: Vec<Relation>,
}

impl Subgraph {
    /// Build a subgraph whose node set is the endpoints of `edges`.
    pub fn from_edges(edges: Vec<Relation>) -> Self {
        let mut subgraph = Self::default();
        subgraph.extend_edges(edges);
        subgraph
    }

    pub fn insert_node(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    /// Add edges and their endpoints, keeping edges unique by key.
    pub fn extend_edges(&mut self, edges: impl IntoIterator<Item = Relation>) {
        for edge in edges {
            self.nodes.insert(edge.head.clone());
            self.nodes.insert(edge.tail.clone());
            self.edges.push(edge);
        }
        self.edges.sort_by(|a, b| a.key().cmp(&b.key()));
        self.edges.dedup_by(|a, b| a.key() == b.key());
    }

    /// Set union with another subgraph.
    pub fn merge(&mut self, other: Subgraph) {
        self.nodes.extend(other.nodes);
        self.extend_edges(other.edges);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
