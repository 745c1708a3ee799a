//! End-to-end passes over the curriculum graph.
//!
//! - [`GraphBuilder`]: extractor batch -> normalize -> commit -> CSV export
//! - [`CurriculumEngine`]: objective -> retrieve -> sequence -> instantiate

use std::path::PathBuf;
use std::sync::Arc;

use crate::chain::{ChainInstantiator, TaskChain};
use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::export::{export_graph, ExportPaths};
use crate::generation::LearnerState;
use crate::graph::{BuildBatch, GraphNormalizer, NormalizationReport};
use crate::retrieval::{GraphContext, SubgraphRetriever};
use crate::sequence::TopologicalSequencer;
use crate::store::{CommitReport, GraphStore};

/// Outcome of one build pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    /// The store already held nodes and the build was not forced.
    pub skipped: bool,
    pub normalization: NormalizationReport,
    pub commit: CommitReport,
    pub export: Option<ExportPaths>,
}

pub struct GraphBuilder {
    store: Arc<dyn GraphStore>,
    normalizer: GraphNormalizer,
    export_dir: Option<PathBuf>,
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            normalizer: GraphNormalizer::new(),
            export_dir: None,
        }
    }

    /// Write CSV exports to `dir` after every successful commit.
    pub fn with_export_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Normalize `batch` and commit it. Unless `force` is set, a store that
    /// already holds nodes is left untouched.
    pub async fn build(&self, batch: BuildBatch, force: bool) -> Result<BuildReport> {
        if !force {
            let existing = self.store.node_count().await?;
            if existing > 0 {
                log::info!("Graph store already holds {} nodes; skipping build", existing);
                return Ok(BuildReport {
                    skipped: true,
                    ..Default::default()
                });
            }
        }

        let graph = self.normalizer.normalize(batch);
        let commit = self.store.commit_graph(&graph.entities, &graph.relations).await?;
        log::info!(
            "Committed {} nodes and {} edges ({} edges skipped for missing endpoints)",
            commit.nodes,
            commit.edges,
            commit.skipped_edges
        );

        let export = match &self.export_dir {
            Some(dir) => Some(export_graph(dir, &graph.entities, &graph.relations).await?),
            None => None,
        };

        Ok(BuildReport {
            skipped: false,
            normalization: graph.report,
            commit,
            export,
        })
    }
}

/// Turns learning objectives into task chains over a populated graph store.
pub struct CurriculumEngine {
    store: Arc<dyn GraphStore>,
    retriever: SubgraphRetriever,
    instantiator: ChainInstantiator,
}

impl CurriculumEngine {
    pub fn new(store: Arc<dyn GraphStore>, retrieval: RetrievalConfig, instantiator: ChainInstantiator) -> Self {
        Self {
            retriever: SubgraphRetriever::new(Arc::clone(&store), retrieval),
            store,
            instantiator,
        }
    }

    pub async fn generate_chain(&self, objective: &str, learner_state: &LearnerState) -> Result<TaskChain> {
        let retrieved = self.retriever.retrieve(objective).await?;
        let sequence = TopologicalSequencer::new(self.store.as_ref())
            .sequence(&retrieved.subgraph)
            .await?;
        let mode = sequence.mode();

        let mut chain = self
            .instantiator
            .instantiate(sequence.nodes(), objective, learner_state)
            .await;
        chain.anchor_tier = Some(retrieved.tier);
        chain.sequencing = Some(mode);

        let defaults = chain.default_script_count();
        if defaults > 0 {
            log::warn!(
                "Chain {} for {:?}: {} of {} nodes use the default script",
                chain.chain_id,
                objective,
                defaults,
                chain.nodes.len()
            );
        }
        Ok(chain)
    }

    pub async fn neighbourhood(&self, current: &str) -> Result<GraphContext> {
        self.retriever.neighbourhood(current).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ScriptSource;
    use crate::error::CurriculumError;
    use crate::generation::testing::EchoGenerator;
    use crate::graph::{RawEntity, RawRelation};
    use crate::retrieval::AnchorTier;
    use crate::sequence::SequencingMode;
    use crate::store::testing::UnreachableStore;
    use crate::store::{MemoryGraphStore, SqliteGraphStore};
    use tempfile::TempDir;

    fn raw_task(name: &str) -> RawEntity {
        RawEntity {
            canonical_name: Some(name.to_string()),
            entity_type: Some("TeachingTask".to_string()),
            module: Some("Endurance".to_string()),
            ..Default::default()
        }
    }

    fn raw_relation(head: &str, rel: &str, tail: &str) -> RawRelation {
        RawRelation {
            head: Some(head.to_string()),
            rel: Some(rel.to_string()),
            tail: Some(tail.to_string()),
            ..Default::default()
        }
    }

    fn running_batch() -> BuildBatch {
        let mut batch = BuildBatch::new();
        for name in ["Easy Run", "Tempo Run", "Interval Session", "Tempo Run"] {
            batch.push_entity(raw_task(name));
        }
        batch.push_entity(RawEntity {
            canonical_name: Some("Lesson".to_string()),
            entity_type: Some("Lecture".to_string()),
            ..Default::default()
        });
        batch.push_relation(raw_relation("Easy Run", "PREDECESSOR_TASK", "Tempo Run"));
        batch.push_relation(raw_relation("Tempo Run", "PREDECESSOR_TASK", "Interval Session"));
        batch.push_relation(raw_relation("Tempo Run", "DEPENDENT_TASK", "Interval Session"));
        batch.push_relation(raw_relation("Interval Session", "PREDECESSOR_TASK", "Easy Run"));
        batch
    }

    #[tokio::test]
    async fn test_build_commits_and_exports() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryGraphStore::new());
        let builder = GraphBuilder::new(store.clone()).with_export_dir(dir.path().join("kg_export"));

        let report = builder.build(running_batch(), false).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.normalization.rejected, 1);
        assert_eq!(report.normalization.duplicate_entities, 1);
        assert_eq!(report.normalization.cyclic_relations, 1);
        assert_eq!(report.commit.nodes, 3);
        assert_eq!(report.commit.edges, 3);
        assert_eq!(store.node_count().await.unwrap(), 3);

        let export = report.export.unwrap();
        let nodes = std::fs::read_to_string(export.nodes).unwrap();
        assert_eq!(nodes.lines().count(), 4);
    }

    fn chunk_local_ids_batch() -> BuildBatch {
        let mut batch = BuildBatch::new();
        for name in ["Easy Run", "Tempo Run"] {
            batch.push_entity(RawEntity { id: Some("e1".to_string()), ..raw_task(name) });
        }
        batch.push_relation(raw_relation("Easy Run", "PREDECESSOR_TASK", "Tempo Run"));
        batch
    }

    async fn assert_both_tasks_committed(store: Arc<dyn GraphStore>) {
        let report = GraphBuilder::new(store.clone())
            .build(chunk_local_ids_batch(), false)
            .await
            .unwrap();
        assert_eq!(report.commit.nodes, 2);
        assert_eq!(report.commit.edges, 1);
        assert_eq!(report.commit.skipped_edges, 0);
        assert_eq!(store.node_count().await.unwrap(), 2);
        assert!(store.get_node("Easy Run").await.unwrap().is_some());
        assert!(store.get_node("Tempo Run").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reused_extractor_ids_keep_every_node() {
        assert_both_tasks_committed(Arc::new(MemoryGraphStore::new())).await;

        let dir = TempDir::new().unwrap();
        let migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let sqlite = SqliteGraphStore::open(dir.path().join("graph.db"), &migrations).await.unwrap();
        assert_both_tasks_committed(Arc::new(sqlite)).await;
    }

    #[tokio::test]
    async fn test_build_skips_populated_store_unless_forced() {
        let store = Arc::new(MemoryGraphStore::new());
        let builder = GraphBuilder::new(store.clone());
        builder.build(running_batch(), false).await.unwrap();

        let mut extra = BuildBatch::new();
        extra.push_entity(raw_task("Long Run"));

        let skipped = builder.build(extra.clone(), false).await.unwrap();
        assert!(skipped.skipped);
        assert_eq!(store.node_count().await.unwrap(), 3);

        let forced = builder.build(extra, true).await.unwrap();
        assert!(!forced.skipped);
        assert_eq!(store.node_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_build_against_unreachable_store_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let export_dir = dir.path().join("kg_export");
        let builder = GraphBuilder::new(Arc::new(UnreachableStore)).with_export_dir(&export_dir);

        let err = builder.build(running_batch(), true).await.unwrap_err();
        assert!(matches!(err, CurriculumError::Store(_)));
        assert!(!export_dir.exists());
    }

    #[tokio::test]
    async fn test_generate_chain_orders_prerequisites_first() {
        let store = Arc::new(MemoryGraphStore::new());
        GraphBuilder::new(store.clone()).build(running_batch(), false).await.unwrap();

        let generator = Arc::new(EchoGenerator::default());
        let engine = CurriculumEngine::new(
            store.clone(),
            RetrievalConfig::default(),
            ChainInstantiator::new(generator, 2),
        );

        let chain = engine
            .generate_chain("Plan an Interval Session", &LearnerState::new())
            .await
            .unwrap();

        let names: Vec<&str> = chain.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Easy Run", "Tempo Run", "Interval Session"]);
        assert_eq!(chain.anchor_tier, Some(AnchorTier::Keyword));
        assert_eq!(chain.sequencing, Some(SequencingMode::Topological));
        assert!(chain.nodes.iter().all(|n| n.script_source == ScriptSource::Generated));
        assert_eq!(chain.nodes[2].presentation, "P:Plan an Interval Session");
    }

    #[tokio::test]
    async fn test_generate_chain_on_empty_store_has_no_anchor() {
        let engine = CurriculumEngine::new(
            Arc::new(MemoryGraphStore::new()),
            RetrievalConfig::default(),
            ChainInstantiator::new(Arc::new(EchoGenerator::default()), 2),
        );
        let err = engine
            .generate_chain("Plan an Interval Session", &LearnerState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CurriculumError::NoAnchor(_)));
    }

    #[tokio::test]
    async fn test_neighbourhood_passthrough() {
        let store = Arc::new(MemoryGraphStore::new());
        GraphBuilder::new(store.clone()).build(running_batch(), false).await.unwrap();
        let engine = CurriculumEngine::new(
            store,
            RetrievalConfig::default(),
            ChainInstantiator::new(Arc::new(EchoGenerator::default()), 1),
        );

        let context = engine.neighbourhood("Tempo Run").await.unwrap();
        assert_eq!(context.current.unwrap().canonical_name, "Tempo Run");
        assert_eq!(context.neighbourhood.prerequisites, vec!["Easy Run".to_string()]);
        assert_eq!(context.neighbourhood.allowed_next, vec!["Interval Session".to_string()]);
    }
}
