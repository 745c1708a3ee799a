//! Graph store capability.
//!
//! The engine reaches persisted graph state only through [`GraphStore`]:
//!
//! - [`SqliteGraphStore`]: SQLite-backed system of record
//! - [`MemoryGraphStore`]: in-process store with the same semantics, for tests and dry runs

use async_trait::async_trait;

use crate::error::Result;
use crate::graph::{EdgeFields, Entity, EntityType, NodeFields, Relation, RelationType, Subgraph};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;

/// Node attribute a substring match runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Name,
    Definition,
}

impl MatchField {
    pub fn column(&self) -> &'static str {
        match self {
            MatchField::Name => "name",
            MatchField::Definition => "definition",
        }
    }
}

/// Counts from committing a normalized graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub nodes: usize,
    pub edges: usize,
    /// Edges not written because an endpoint name has no node.
    pub skipped_edges: usize,
}

/// Persistence and query capability for the canonical graph.
///
/// Implementations must be safe to share across tasks. Substring matches are
/// case-sensitive and an empty keyword matches every node. Results of the
/// match operations are ordered by `(name, id)` so repeated calls agree.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update the node with this `id`.
    async fn upsert_node(&self, node_type: EntityType, id: &str, fields: &NodeFields) -> Result<()>;

    /// Insert or update the `(head, rel, tail)` edge. Returns `false` without
    /// writing when either endpoint name has no node.
    async fn upsert_edge(&self, head: &str, rel: RelationType, tail: &str, fields: &EdgeFields) -> Result<bool>;

    /// Nodes of the given types whose `field` contains `keyword`.
    /// An empty `types` slice matches every type.
    async fn match_by_substring(
        &self,
        field: MatchField,
        keyword: &str,
        types: &[EntityType],
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Nodes whose `module` contains `keyword`.
    async fn match_by_module(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>>;

    /// Every edge on an undirected path of at most `max_hops` edges from `anchor`.
    async fn traverse(&self, anchor: &str, max_hops: usize) -> Result<Subgraph>;

    /// Node named `name`. When several nodes share a name the lowest id wins.
    async fn get_node(&self, name: &str) -> Result<Option<Entity>>;

    async fn node_count(&self) -> Result<usize>;

    /// Write a normalized graph, nodes first.
    async fn commit_graph(&self, entities: &[Entity], relations: &[Relation]) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        for entity in entities {
            self.upsert_node(entity.entity_type, &entity.id, &entity.fields()).await?;
            report.nodes += 1;
        }
        for relation in relations {
            if self
                .upsert_edge(&relation.head, relation.rel, &relation.tail, &relation.fields())
                .await?
            {
                report.edges += 1;
            } else {
                log::debug!(
                    "Skipping edge {} -[{}]-> {}: endpoint missing",
                    relation.head,
                    relation.rel,
                    relation.tail
                );
                report.skipped_edges += 1;
            }
        }
        Ok(report)
    }
}
