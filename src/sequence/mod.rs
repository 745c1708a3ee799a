//! Linear learning order over a retrieved subgraph.
//!
//! Only `PREDECESSOR_TASK` and `DEPENDENT_TASK` edges with both endpoints in the
//! node set constrain the order, each read head -> tail. Kahn's algorithm picks
//! the lexicographically smallest ready node at every step, so the order is
//! reproducible. A residual cycle switches to plain lexicographic order and the
//! outcome says so.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::graph::{Entity, Subgraph};
use crate::store::GraphStore;

/// How the final order was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencingMode {
    Topological,
    LexicographicFallback,
}

/// Node names in learning order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Ordered(Vec<String>),
    /// The ordering edges still contained a cycle. `unordered` lists the nodes
    /// Kahn's pass could not place: those on a cycle and everything downstream.
    OrderedWithFallback {
        order: Vec<String>,
        unordered: Vec<String>,
    },
}

impl OrderOutcome {
    pub fn order(&self) -> &[String] {
        match self {
            OrderOutcome::Ordered(order) => order,
            OrderOutcome::OrderedWithFallback { order, .. } => order,
        }
    }

    pub fn mode(&self) -> SequencingMode {
        match self {
            OrderOutcome::Ordered(_) => SequencingMode::Topological,
            OrderOutcome::OrderedWithFallback { .. } => SequencingMode::LexicographicFallback,
        }
    }
}

/// Entities in learning order, with the mode that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    Ordered(Vec<Entity>),
    OrderedWithFallback {
        nodes: Vec<Entity>,
        unordered: Vec<String>,
    },
}

impl SequenceOutcome {
    pub fn nodes(&self) -> &[Entity] {
        match self {
            SequenceOutcome::Ordered(nodes) => nodes,
            SequenceOutcome::OrderedWithFallback { nodes, .. } => nodes,
        }
    }

    pub fn into_nodes(self) -> Vec<Entity> {
        match self {
            SequenceOutcome::Ordered(nodes) => nodes,
            SequenceOutcome::OrderedWithFallback { nodes, .. } => nodes,
        }
    }

    pub fn mode(&self) -> SequencingMode {
        match self {
            SequenceOutcome::Ordered(_) => SequencingMode::Topological,
            SequenceOutcome::OrderedWithFallback { .. } => SequencingMode::LexicographicFallback,
        }
    }
}

/// Order the nodes of `subgraph` without touching the store.
pub fn order_nodes(subgraph: &Subgraph) -> OrderOutcome {
    let mut successors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = subgraph.nodes.iter().map(|n| (n.as_str(), 0)).collect();

    for edge in &subgraph.edges {
        if !edge.rel.is_ordering()
            || !subgraph.nodes.contains(&edge.head)
            || !subgraph.nodes.contains(&edge.tail)
        {
            continue;
        }
        // parallel PREDECESSOR/DEPENDENT edges count once
        if successors.entry(edge.head.as_str()).or_default().insert(edge.tail.as_str()) {
            *in_degree.entry(edge.tail.as_str()).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(subgraph.nodes.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());
        if let Some(next) = successors.get(node) {
            for tail in next {
                if let Some(degree) = in_degree.get_mut(tail) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*tail);
                    }
                }
            }
        }
    }

    if order.len() == subgraph.nodes.len() {
        return OrderOutcome::Ordered(order);
    }

    let unordered: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(node, _)| node.to_string())
        .collect();
    OrderOutcome::OrderedWithFallback {
        order: subgraph.nodes.iter().cloned().collect(),
        unordered,
    }
}

/// Orders a subgraph and fetches the entity record of every node.
pub struct TopologicalSequencer<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> TopologicalSequencer<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Nodes whose record cannot be found are left out of the result.
    pub async fn sequence(&self, subgraph: &Subgraph) -> Result<SequenceOutcome> {
        let outcome = order_nodes(subgraph);
        if let OrderOutcome::OrderedWithFallback { unordered, .. } = &outcome {
            log::warn!(
                "Ordering edges contain a cycle blocking {:?}; using lexicographic order",
                unordered
            );
        }

        let mut nodes = Vec::with_capacity(outcome.order().len());
        for name in outcome.order() {
            match self.store.get_node(name).await? {
                Some(entity) => nodes.push(entity),
                None => log::warn!("No record for node {:?}; leaving it out of the sequence", name),
            }
        }

        Ok(match outcome {
            OrderOutcome::Ordered(_) => SequenceOutcome::Ordered(nodes),
            OrderOutcome::OrderedWithFallback { unordered, .. } => {
                SequenceOutcome::OrderedWithFallback { nodes, unordered }
            }
        })
    }
}
