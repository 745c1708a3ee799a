//! Batch normalization: validate, resolve synonyms, deduplicate, then drop
//! prerequisite edges that would close a cycle. The steps run in that order and
//! each one assumes the previous ones have run.

use std::collections::{HashMap, HashSet};

use super::{
    derive_entity_id, Entity, EntityType, ExtractedEntity, ExtractionOutput, PrerequisiteGraph, RawEntity, RawRelation,
    RecordError, Relation, RelationType, SynonymMap,
};

/// Raw records accumulated for one build pass. Each build gets a fresh batch.
#[derive(Debug, Clone, Default)]
pub struct BuildBatch {
    entities: Vec<RawEntity>,
    relations: Vec<RawRelation>,
    rejected: Vec<RecordError>,
}

impl BuildBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&mut self, output: ExtractionOutput) {
        self.entities.extend(output.entities);
        self.relations.extend(output.relations);
        self.rejected.extend(output.rejected);
    }

    pub fn push_entity(&mut self, entity: RawEntity) {
        self.entities.push(entity);
    }

    pub fn push_relation(&mut self, relation: RawRelation) {
        self.relations.push(relation);
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Counts from one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    pub raw_entities: usize,
    pub raw_relations: usize,
    pub rejected: usize,
    pub duplicate_entities: usize,
    pub duplicate_relations: usize,
    pub cyclic_relations: usize,
}

/// Canonical, deduplicated graph with an acyclic prerequisite relation.
#[derive(Debug, Clone, Default)]
pub struct NormalizedGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub synonyms: SynonymMap,
    pub report: NormalizationReport,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphNormalizer;

impl GraphNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Run the full pass over a batch. Malformed records are counted and dropped.
    pub fn normalize(&self, batch: BuildBatch) -> NormalizedGraph {
        let mut report = NormalizationReport {
            raw_entities: batch.entities.len(),
            raw_relations: batch.relations.len(),
            rejected: batch.rejected.len(),
            ..Default::default()
        };

        for err in &batch.rejected {
            log::debug!("Rejected extractor record: {}", err);
        }

        let mut extracted = Vec::with_capacity(batch.entities.len());
        for raw in batch.entities {
            match raw.validate() {
                Ok(entity) => extracted.push(entity),
                Err(e) => {
                    log::warn!("Dropping entity record: {}", e);
                    report.rejected += 1;
                }
            }
        }

        let mut relations = Vec::with_capacity(batch.relations.len());
        for raw in batch.relations {
            match raw.validate() {
                Ok(relation) => relations.push(relation),
                Err(e) => {
                    log::warn!("Dropping relation record: {}", e);
                    report.rejected += 1;
                }
            }
        }

        let graph = self.normalize_validated(extracted, relations);
        report.duplicate_entities = graph.report.duplicate_entities;
        report.duplicate_relations = graph.report.duplicate_relations;
        report.cyclic_relations = graph.report.cyclic_relations;

        log::info!(
            "Normalized {} raw entities / {} raw relations into {} entities / {} relations ({} rejected, {} synonyms, {} cyclic dropped)",
            report.raw_entities,
            report.raw_relations,
            graph.entities.len(),
            graph.relations.len(),
            report.rejected,
            graph.synonyms.len(),
            report.cyclic_relations
        );

        NormalizedGraph { report, ..graph }
    }

    /// Pass over records that already passed validation.
    pub fn normalize_validated(&self, entities: Vec<ExtractedEntity>, mut relations: Vec<Relation>) -> NormalizedGraph {
        let raw_entities = entities.len();
        let raw_relations = relations.len();

        let synonyms = SynonymMap::from_entities(&entities);
        for relation in &mut relations {
            synonyms.rewrite(relation);
        }

        let entities = dedup_entities(entities.into_iter().map(|e| e.entity).collect());
        let relations = dedup_relations(relations);
        let duplicate_entities = raw_entities - entities.len();
        let duplicate_relations = raw_relations - relations.len();

        let (relations, dropped) = eliminate_cycles(relations);
        for relation in &dropped {
            log::debug!(
                "Dropped cyclic prerequisite {} -[{}]-> {}",
                relation.head,
                relation.rel,
                relation.tail
            );
        }

        NormalizedGraph {
            entities,
            relations,
            synonyms,
            report: NormalizationReport {
                raw_entities,
                raw_relations,
                rejected: 0,
                duplicate_entities,
                duplicate_relations,
                cyclic_relations: dropped.len(),
            },
        }
    }
}

/// Collapse entities sharing `(canonical_name, type)`. The first one seen is kept;
/// a later duplicate only contributes its definition when the kept one has none.
///
/// Extractor ids are only unique per response, so a kept entity whose id is
/// already taken gets one derived from its type and name.
pub fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut index: HashMap<(String, EntityType), usize> = HashMap::new();
    let mut ids: HashSet<String> = HashSet::new();
    let mut kept: Vec<Entity> = Vec::new();

    for mut entity in entities {
        let key = (entity.canonical_name.clone(), entity.entity_type);
        match index.get(&key) {
            Some(&i) => {
                let representative = &mut kept[i];
                if representative.definition.is_empty() && !entity.definition.is_empty() {
                    representative.definition = entity.definition;
                }
            }
            None => {
                if ids.contains(&entity.id) {
                    let reassigned = unused_id(&ids, derive_entity_id(entity.entity_type, &entity.canonical_name));
                    log::warn!(
                        "Entity id {} reused by {} {:?}; reassigned to {}",
                        entity.id,
                        entity.entity_type,
                        entity.canonical_name,
                        reassigned
                    );
                    entity.id = reassigned;
                }
                ids.insert(entity.id.clone());
                index.insert(key, kept.len());
                kept.push(entity);
            }
        }
    }
    kept
}

fn unused_id(ids: &HashSet<String>, base: String) -> String {
    let mut candidate = base.clone();
    let mut n = 0;
    while ids.contains(&candidate) {
        n += 1;
        candidate = format!("{}-{}", base, n);
    }
    candidate
}

/// Keep the first relation per `(head, rel, tail)`.
pub fn dedup_relations(relations: Vec<Relation>) -> Vec<Relation> {
    let mut seen: HashSet<(String, RelationType, String)> = HashSet::new();
    relations
        .into_iter()
        .filter(|r| seen.insert((r.head.clone(), r.rel, r.tail.clone())))
        .collect()
}

/// Greedily accept `PREDECESSOR_TASK` edges in input order, dropping any edge
/// that would close a cycle. Other relation types pass through untouched.
///
/// Returns `(kept, dropped)`, both in input order.
pub fn eliminate_cycles(relations: Vec<Relation>) -> (Vec<Relation>, Vec<Relation>) {
    let mut graph = PrerequisiteGraph::new();
    let mut kept = Vec::with_capacity(relations.len());
    let mut dropped = Vec::new();

    for relation in relations {
        if relation.rel != RelationType::PredecessorTask || graph.try_insert(&relation.head, &relation.tail) {
            kept.push(relation);
        } else {
            dropped.push(relation);
        }
    }
    debug_assert!(graph.is_acyclic());
    log::debug!(
        "Accepted {} prerequisite edges, dropped {}",
        graph.edge_count(),
        dropped.len()
    );
    (kept, dropped)
}
