//! Bounded BFS over relations, ignoring edge direction.

use std::collections::{HashSet, VecDeque};

use crate::error::Result;
use crate::graph::{Relation, Subgraph};

/// Collect every edge on a path of at most `max_hops` edges from `start`.
///
/// `incident` returns all relations that have the given node as head or tail.
/// The returned node set is the endpoints of the collected edges, so a start
/// node without relations yields an empty subgraph.
pub fn bounded_traverse<F>(start: &str, max_hops: usize, mut incident: F) -> Result<Subgraph>
where
    F: FnMut(&str) -> Result<Vec<Relation>>,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut edges = Vec::new();

    queue.push_back((start.to_string(), 0));
    visited.insert(start.to_string());

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_hops {
            continue;
        }

        for rel in incident(&node)? {
            let neighbour = if rel.head == node { rel.tail.clone() } else { rel.head.clone() };
            if visited.insert(neighbour.clone()) {
                queue.push_back((neighbour, depth + 1));
            }
            edges.push(rel);
        }
    }

    Ok(Subgraph::from_edges(edges))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RelationType;

    fn fixture() -> Vec<Relation> {
        vec![
            Relation::new("A", RelationType::PredecessorTask, "B"),
            Relation::new("B", RelationType::PredecessorTask, "C"),
            Relation::new("C", RelationType::PredecessorTask, "D"),
            Relation::new("X", RelationType::SupportsUnderstanding, "A"),
        ]
    }

    fn incident_in(edges: Vec<Relation>) -> impl FnMut(&str) -> Result<Vec<Relation>> {
        move |node| Ok(edges.iter().filter(|r| r.head == node || r.tail == node).cloned().collect())
    }

    #[test]
    fn test_two_hops_undirected() {
        let subgraph = bounded_traverse("B", 2, incident_in(fixture())).unwrap();
        let names: Vec<&str> = subgraph.nodes.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["A", "B", "C", "D", "X"]);
        assert_eq!(subgraph.edges.len(), 4);
    }

    #[test]
    fn test_hop_bound_is_respected() {
        let subgraph = bounded_traverse("A", 1, incident_in(fixture())).unwrap();
        assert_eq!(subgraph.nodes.len(), 3);
        assert!(!subgraph.nodes.contains("C"));
    }

    #[test]
    fn test_isolated_start_is_empty() {
        let subgraph = bounded_traverse("Z", 2, incident_in(fixture())).unwrap();
        assert!(subgraph.is_empty());
    }

    #[test]
    fn test_zero_hops_fetches_nothing() {
        let mut calls = 0;
        let subgraph = bounded_traverse("A", 0, |_| {
            calls += 1;
            Ok(Vec::new())
        })
        .unwrap();
        assert!(subgraph.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_self_loop_does_not_requeue() {
        let edges = vec![Relation::new("A", RelationType::BelongsToModule, "A")];
        let subgraph = bounded_traverse("A", 2, incident_in(edges)).unwrap();
        assert_eq!(subgraph.nodes.len(), 1);
        assert_eq!(subgraph.edges.len(), 1);
    }
}
