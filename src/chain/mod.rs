//! Task chains: sequenced nodes with a G-P-F script attached to each.

mod repository;

pub use repository::{load_chain, objective_slug, ChainRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::generation::{default_script, ContentGenerator, GenerationError, LearnerState, Script};
use crate::graph::{Difficulty, Entity, EntityType};
use crate::retrieval::AnchorTier;
use crate::sequence::SequencingMode;

/// Where a node's script came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
    Generated,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiatedNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: EntityType,
    pub definition: String,
    pub module: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub guidance: String,
    pub presentation: String,
    pub feedback: String,
    pub script_source: ScriptSource,
}

impl InstantiatedNode {
    pub fn new(entity: &Entity, script: Script, script_source: ScriptSource) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.canonical_name.clone(),
            node_type: entity.entity_type,
            definition: entity.definition.clone(),
            module: entity.module.clone(),
            difficulty: entity.difficulty,
            guidance: script.guidance,
            presentation: script.presentation,
            feedback: script.feedback,
            script_source,
        }
    }
}

/// Immutable curriculum artifact for one objective. Regenerating produces a
/// new chain with a new `chain_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskChain {
    pub chain_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub target_objective: String,
    pub learner_state: LearnerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_tier: Option<AnchorTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequencing: Option<SequencingMode>,
    pub nodes: Vec<InstantiatedNode>,
}

impl TaskChain {
    pub fn new(target_objective: &str, learner_state: LearnerState, nodes: Vec<InstantiatedNode>) -> Self {
        Self {
            chain_id: Uuid::new_v4(),
            created_at: Utc::now(),
            target_objective: target_objective.to_string(),
            learner_state,
            anchor_tier: None,
            sequencing: None,
            nodes,
        }
    }

    pub fn default_script_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.script_source == ScriptSource::Default)
            .count()
    }
}

/// Attaches scripts to an ordered node list.
///
/// Nodes are generated concurrently, at most `max_concurrency` at a time, and
/// each result is written to the node's own slot so the chain keeps the input
/// order. Any per-node failure is replaced by [`default_script`].
pub struct ChainInstantiator {
    generator: Arc<dyn ContentGenerator>,
    max_concurrency: usize,
    cancel: CancellationToken,
}

type SlotResult = (usize, Result<Script, GenerationError>);

impl ChainInstantiator {
    pub fn new(generator: Arc<dyn ContentGenerator>, max_concurrency: usize) -> Self {
        Self {
            generator,
            max_concurrency: max_concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop submitting new nodes once `cancel` fires. Calls already in flight finish.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn instantiate(&self, nodes: &[Entity], objective: &str, learner_state: &LearnerState) -> TaskChain {
        let mut slots: Vec<Option<Result<Script, GenerationError>>> = vec![None; nodes.len()];
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let objective_shared: Arc<str> = Arc::from(objective);
        let state_shared = Arc::new(learner_state.clone());
        let mut tasks: JoinSet<SlotResult> = JoinSet::new();

        for (slot, node) in nodes.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                log::warn!(
                    "Chain generation cancelled; {} of {} nodes not submitted",
                    nodes.len() - slot,
                    nodes.len()
                );
                break;
            };

            let generator = Arc::clone(&self.generator);
            let objective = Arc::clone(&objective_shared);
            let state = Arc::clone(&state_shared);
            let node = node.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = generator.generate_script(&node, &objective, &state).await;
                (slot, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => log::warn!("Script generation task failed: {}", e),
            }
        }

        let instantiated: Vec<InstantiatedNode> = nodes
            .iter()
            .zip(slots)
            .map(|(node, slot)| match slot {
                Some(Ok(script)) => InstantiatedNode::new(node, script, ScriptSource::Generated),
                Some(Err(e)) => {
                    log::warn!("Using default script for {:?}: {}", node.canonical_name, e);
                    InstantiatedNode::new(node, default_script(node, objective), ScriptSource::Default)
                }
                None => InstantiatedNode::new(node, default_script(node, objective), ScriptSource::Default),
            })
            .collect();

        TaskChain::new(objective, learner_state.clone(), instantiated)
    }
}
