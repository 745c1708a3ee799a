//! Objective -> anchors -> bounded working subgraph.
//!
//! Anchors are resolved through three tiers, stopping at the first that yields
//! anything: keyword match on name/definition, keyword match on module, then a
//! bounded sample. Only when all three are empty does retrieval fail with
//! [`CurriculumError::NoAnchor`].

mod keywords;

pub use keywords::extract_keywords;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{CurriculumError, Result};
use crate::graph::{Entity, EntityType, RelationType, Subgraph};
use crate::store::{GraphStore, MatchField};

/// Which anchor tier produced the anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorTier {
    Keyword,
    Module,
    Sample,
}

impl AnchorTier {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, AnchorTier::Keyword)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorResolution {
    pub tier: AnchorTier,
    pub keywords: Vec<String>,
    /// Unique by name, ordered by name.
    pub anchors: Vec<Entity>,
}

/// Prerequisites and allowed next steps of one node, read from a subgraph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeNeighbourhood {
    pub node: String,
    /// Heads of `PREDECESSOR_TASK` edges ending at the node.
    pub prerequisites: Vec<String>,
    /// Tails of `DEPENDENT_TASK` edges starting at the node.
    pub allowed_next: Vec<String>,
}

impl NodeNeighbourhood {
    pub fn from_subgraph(node: &str, subgraph: &Subgraph) -> Self {
        let mut prerequisites = Vec::new();
        let mut allowed_next = Vec::new();
        for edge in &subgraph.edges {
            match edge.rel {
                RelationType::PredecessorTask if edge.tail == node => prerequisites.push(edge.head.clone()),
                RelationType::DependentTask if edge.head == node => allowed_next.push(edge.tail.clone()),
                _ => {}
            }
        }
        Self {
            node: node.to_string(),
            prerequisites,
            allowed_next,
        }
    }
}

/// Working subgraph for one objective.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedSubgraph {
    pub objective: String,
    pub tier: AnchorTier,
    pub anchors: Vec<String>,
    pub subgraph: Subgraph,
    pub neighbourhoods: Vec<NodeNeighbourhood>,
}

/// 2-hop context around the node a learner is currently on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphContext {
    pub current: Option<Entity>,
    pub subgraph: Subgraph,
    pub neighbourhood: NodeNeighbourhood,
}

pub struct SubgraphRetriever {
    store: Arc<dyn GraphStore>,
    config: RetrievalConfig,
}

impl SubgraphRetriever {
    pub fn new(store: Arc<dyn GraphStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    pub async fn resolve_anchors(&self, objective: &str) -> Result<AnchorResolution> {
        let keywords: Vec<String> = extract_keywords(objective, &self.config).into_iter().collect();
        log::debug!("Objective {:?} -> keywords {:?}", objective, keywords);

        let mut anchors: BTreeMap<String, Entity> = BTreeMap::new();

        for keyword in &keywords {
            for field in [MatchField::Name, MatchField::Definition] {
                let matches = self
                    .store
                    .match_by_substring(field, keyword, &EntityType::ANCHORABLE, self.config.anchor_limit)
                    .await?;
                collect_by_name(&mut anchors, matches);
            }
        }
        if !anchors.is_empty() {
            return Ok(resolution(AnchorTier::Keyword, keywords, anchors));
        }

        for keyword in &keywords {
            let matches = self.store.match_by_module(keyword, self.config.module_limit).await?;
            collect_by_name(&mut anchors, matches);
        }
        if !anchors.is_empty() {
            log::info!("No direct match for {:?}; anchored by module", objective);
            return Ok(resolution(AnchorTier::Module, keywords, anchors));
        }

        let sample = self
            .store
            .match_by_substring(MatchField::Name, "", &EntityType::ANCHORABLE, self.config.sample_limit)
            .await?;
        collect_by_name(&mut anchors, sample);
        if anchors.is_empty() {
            return Err(CurriculumError::NoAnchor(objective.to_string()));
        }

        log::warn!(
            "No keyword or module match for {:?}; falling back to a sample of {} nodes",
            objective,
            anchors.len()
        );
        Ok(resolution(AnchorTier::Sample, keywords, anchors))
    }

    /// Union of the bounded neighbourhoods of every anchor. Anchors are always
    /// part of the node set, even when they have no edges.
    pub async fn expand(&self, anchors: &[String]) -> Result<Subgraph> {
        let store = &self.store;
        let max_hops = self.config.max_hops;

        let mut subgraph = stream::iter(anchors)
            .map(|anchor| async move { store.traverse(anchor, max_hops).await })
            .buffer_unordered(self.config.anchor_concurrency)
            .try_fold(Subgraph::default(), |mut acc, part| async move {
                acc.merge(part);
                Ok(acc)
            })
            .await?;

        for anchor in anchors {
            subgraph.insert_node(anchor.as_str());
        }
        Ok(subgraph)
    }

    pub async fn retrieve(&self, objective: &str) -> Result<RetrievedSubgraph> {
        let resolution = self.resolve_anchors(objective).await?;
        let anchors: Vec<String> = resolution.anchors.iter().map(|e| e.canonical_name.clone()).collect();

        let subgraph = self.expand(&anchors).await?;
        let neighbourhoods = anchors
            .iter()
            .map(|anchor| NodeNeighbourhood::from_subgraph(anchor, &subgraph))
            .collect();

        log::info!(
            "Retrieved {} nodes / {} edges from {} anchors ({:?} tier)",
            subgraph.nodes.len(),
            subgraph.edges.len(),
            anchors.len(),
            resolution.tier
        );

        Ok(RetrievedSubgraph {
            objective: objective.to_string(),
            tier: resolution.tier,
            anchors,
            subgraph,
            neighbourhoods,
        })
    }

    /// Graph context for a single node, independent of any objective.
    pub async fn neighbourhood(&self, current: &str) -> Result<GraphContext> {
        let node = self.store.get_node(current).await?;
        let subgraph = self.store.traverse(current, self.config.max_hops).await?;
        let neighbourhood = NodeNeighbourhood::from_subgraph(current, &subgraph);
        Ok(GraphContext {
            current: node,
            subgraph,
            neighbourhood,
        })
    }
}

fn collect_by_name(anchors: &mut BTreeMap<String, Entity>, matches: Vec<Entity>) {
    for entity in matches {
        anchors.entry(entity.canonical_name.clone()).or_insert(entity);
    }
}

fn resolution(tier: AnchorTier, keywords: Vec<String>, anchors: BTreeMap<String, Entity>) -> AnchorResolution {
    AnchorResolution {
        tier,
        keywords,
        anchors: anchors.into_values().collect(),
    }
}
