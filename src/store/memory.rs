use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{GraphStore, MatchField};
use crate::error::{CurriculumError, Result};
use crate::graph::{bounded_traverse, EdgeFields, Entity, EntityType, NodeFields, Relation, RelationType, Subgraph};

type EdgeKey = (String, RelationType, String);

#[derive(Debug, Default)]
struct GraphState {
    /// Keyed by node id.
    nodes: BTreeMap<String, Entity>,
    edges: BTreeMap<EdgeKey, EdgeFields>,
}

impl GraphState {
    fn has_name(&self, name: &str) -> bool {
        self.nodes.values().any(|n| n.canonical_name == name)
    }

    /// Matching nodes ordered by `(name, id)`, truncated to `limit`.
    fn select<P>(&self, limit: usize, predicate: P) -> Vec<Entity>
    where
        P: Fn(&Entity) -> bool,
    {
        let mut matches: Vec<&Entity> = self.nodes.values().filter(|n| predicate(n)).collect();
        matches.sort_by(|a, b| (&a.canonical_name, &a.id).cmp(&(&b.canonical_name, &b.id)));
        matches.into_iter().take(limit).cloned().collect()
    }

    fn incident(&self, node: &str) -> Vec<Relation> {
        self.edges
            .iter()
            .filter(|((head, _, tail), _)| head == node || tail == node)
            .map(|((head, rel, tail), fields)| Relation::from_fields(head.clone(), *rel, tail.clone(), fields.clone()))
            .collect()
    }
}

/// In-process graph store with the same semantics as the SQLite store.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.state
            .read()
            .map_err(|_| CurriculumError::Store("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.state
            .write()
            .map_err(|_| CurriculumError::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node_type: EntityType, id: &str, fields: &NodeFields) -> Result<()> {
        let entity = Entity::from_fields(node_type, id, fields.clone());
        self.write()?.nodes.insert(id.to_string(), entity);
        Ok(())
    }

    async fn upsert_edge(&self, head: &str, rel: RelationType, tail: &str, fields: &EdgeFields) -> Result<bool> {
        let mut state = self.write()?;
        if !state.has_name(head) || !state.has_name(tail) {
            return Ok(false);
        }
        state
            .edges
            .insert((head.to_string(), rel, tail.to_string()), fields.clone());
        Ok(true)
    }

    async fn match_by_substring(
        &self,
        field: MatchField,
        keyword: &str,
        types: &[EntityType],
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let state = self.read()?;
        Ok(state.select(limit, |n| {
            let haystack = match field {
                MatchField::Name => &n.canonical_name,
                MatchField::Definition => &n.definition,
            };
            (types.is_empty() || types.contains(&n.entity_type)) && haystack.contains(keyword)
        }))
    }

    async fn match_by_module(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>> {
        let state = self.read()?;
        Ok(state.select(limit, |n| n.module.contains(keyword)))
    }

    async fn traverse(&self, anchor: &str, max_hops: usize) -> Result<Subgraph> {
        let state = self.read()?;
        bounded_traverse(anchor, max_hops, |node| Ok(state.incident(node)))
    }

    async fn get_node(&self, name: &str) -> Result<Option<Entity>> {
        let state = self.read()?;
        // BTreeMap iterates in id order
        Ok(state.nodes.values().find(|n| n.canonical_name == name).cloned())
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.read()?.nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{entity, exercise_store};

    #[tokio::test]
    async fn test_store_contract() {
        let store = MemoryGraphStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_edge_requires_both_endpoints() {
        let store = MemoryGraphStore::new();
        let a = entity("A", EntityType::TeachingTask);
        store.upsert_node(a.entity_type, &a.id, &a.fields()).await.unwrap();

        let rel = Relation::new("A", RelationType::PredecessorTask, "B");
        assert!(!store.upsert_edge("A", rel.rel, "B", &rel.fields()).await.unwrap());
        assert!(store.traverse("A", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_resolve_to_lowest_id() {
        let store = MemoryGraphStore::new();
        let mut first = entity("Tempo Run", EntityType::TeachingTask);
        first.id = "b".to_string();
        let mut second = entity("Tempo Run", EntityType::TeachingActivity);
        second.id = "a".to_string();
        store.commit_graph(&[first, second], &[]).await.unwrap();

        let fetched = store.get_node("Tempo Run").await.unwrap().unwrap();
        assert_eq!(fetched.id, "a");
        assert_eq!(fetched.entity_type, EntityType::TeachingActivity);
    }
}
