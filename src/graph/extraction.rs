//! Ingestion boundary for triple-extractor output.
//!
//! Extractor responses are untrusted: every field is optional on the wire and
//! each record is validated on its own. A malformed record becomes a
//! [`RecordError`] and the rest of the batch carries on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;

use super::{Difficulty, Entity, EntityType, Relation, RelationType};
use crate::error::{CurriculumError, Result};
use crate::json::extract_json;

/// Why a single extractor record was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("{kind} record missing required field `{field}`")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("unknown relation type: {0}")]
    UnknownRelationType(String),

    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("malformed {kind} record: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Entity record as emitted by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntity {
    pub id: Option<String>,
    /// Surface form found in the text.
    pub temp_name: Option<String>,
    pub canonical_name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub definition: Option<String>,
    pub module: Option<String>,
    pub difficulty: Option<String>,
    #[serde(alias = "source_ref")]
    pub source_chunk: Option<String>,
    #[serde(default, alias = "aliases")]
    pub alias: Vec<String>,
}

/// Relation record as emitted by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRelation {
    pub head: Option<String>,
    pub rel: Option<String>,
    pub tail: Option<String>,
    pub confidence: Option<f64>,
    pub justification: Option<String>,
    #[serde(alias = "source_ref")]
    pub source_chunk: Option<String>,
}

/// A validated entity plus the surface names that should resolve to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub entity: Entity,
    pub surface_names: Vec<String>,
}

impl From<Entity> for ExtractedEntity {
    fn from(entity: Entity) -> Self {
        Self {
            entity,
            surface_names: Vec::new(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Stable id for entities the extractor left unnamed.
pub(crate) fn derive_entity_id(entity_type: EntityType, canonical_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(canonical_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl RawEntity {
    pub fn validate(self) -> std::result::Result<ExtractedEntity, RecordError> {
        let canonical_name = non_empty(self.canonical_name).ok_or(RecordError::MissingField {
            kind: "entity",
            field: "canonical_name",
        })?;
        let entity_type: EntityType = non_empty(self.entity_type)
            .ok_or(RecordError::MissingField { kind: "entity", field: "type" })?
            .parse()?;
        let difficulty = match non_empty(self.difficulty) {
            Some(d) => d.parse()?,
            None => Difficulty::default(),
        };
        let id = non_empty(self.id).unwrap_or_else(|| derive_entity_id(entity_type, &canonical_name));

        let mut surface_names = Vec::new();
        for name in non_empty(self.temp_name).into_iter().chain(self.alias) {
            let name = name.trim().to_string();
            if !name.is_empty() && name != canonical_name && !surface_names.contains(&name) {
                surface_names.push(name);
            }
        }

        Ok(ExtractedEntity {
            entity: Entity {
                id,
                canonical_name,
                entity_type,
                definition: non_empty(self.definition).unwrap_or_default(),
                module: non_empty(self.module).unwrap_or_default(),
                difficulty,
                source_refs: non_empty(self.source_chunk).into_iter().collect::<BTreeSet<_>>(),
            },
            surface_names,
        })
    }
}

impl From<&Entity> for RawEntity {
    fn from(entity: &Entity) -> Self {
        Self {
            id: Some(entity.id.clone()),
            temp_name: Some(entity.canonical_name.clone()),
            canonical_name: Some(entity.canonical_name.clone()),
            entity_type: Some(entity.entity_type.as_str().to_string()),
            definition: Some(entity.definition.clone()),
            module: Some(entity.module.clone()),
            difficulty: Some(entity.difficulty.as_str().to_string()),
            source_chunk: Some(entity.source_ref()).filter(|s| !s.is_empty()),
            alias: Vec::new(),
        }
    }
}

impl RawRelation {
    pub fn validate(self) -> std::result::Result<Relation, RecordError> {
        let head = non_empty(self.head).ok_or(RecordError::MissingField { kind: "relation", field: "head" })?;
        let rel: RelationType = non_empty(self.rel)
            .ok_or(RecordError::MissingField { kind: "relation", field: "rel" })?
            .parse()?;
        let tail = non_empty(self.tail).ok_or(RecordError::MissingField { kind: "relation", field: "tail" })?;
        let confidence = self.confidence.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(RecordError::InvalidConfidence(confidence));
        }

        Ok(Relation {
            head,
            rel,
            tail,
            confidence,
            justification: non_empty(self.justification).unwrap_or_default(),
            source_ref: non_empty(self.source_chunk).unwrap_or_default(),
        })
    }
}

impl From<&Relation> for RawRelation {
    fn from(relation: &Relation) -> Self {
        Self {
            head: Some(relation.head.clone()),
            rel: Some(relation.rel.as_str().to_string()),
            tail: Some(relation.tail.clone()),
            confidence: Some(relation.confidence),
            justification: Some(relation.justification.clone()),
            source_chunk: Some(relation.source_ref.clone()),
        }
    }
}

/// One extractor response, split into records that deserialized and those that did not.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub entities: Vec<RawEntity>,
    pub relations: Vec<RawRelation>,
    pub rejected: Vec<RecordError>,
}

fn split_records<T: serde::de::DeserializeOwned>(
    value: Option<&Value>,
    kind: &'static str,
    rejected: &mut Vec<RecordError>,
) -> Vec<T> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                rejected.push(RecordError::Malformed { kind, reason: e.to_string() });
                None
            }
        })
        .collect()
}

/// Parse an extractor response of the form `{"entities": [...], "relations": [...]}`.
///
/// The object may be wrapped in prose or a code fence. Records that do not fit the
/// schema are reported in `rejected` rather than failing the whole response.
pub fn parse_extraction_output(text: &str) -> Result<ExtractionOutput> {
    let value = extract_json(text).ok_or_else(|| {
        CurriculumError::InvalidRecord(RecordError::Malformed {
            kind: "extraction",
            reason: "no JSON object found".to_string(),
        })
    })?;

    let mut rejected = Vec::new();
    let entities = split_records(value.get("entities"), "entity", &mut rejected);
    let relations = split_records(value.get("relations"), "relation", &mut rejected);

    Ok(ExtractionOutput { entities, relations, rejected })
}
