use std::collections::{BTreeSet, HashMap, HashSet};

/// Prerequisite edges accepted so far, stored head -> tail.
///
/// Every check is an explicit-stack depth-first walk so large graphs do not
/// grow the call stack.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    successors: HashMap<String, BTreeSet<String>>,
    edge_count: usize,
}

impl PrerequisiteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tentatively add `head -> tail`, keeping it only if the graph stays acyclic.
    ///
    /// Returns `false` (and leaves the graph as it was) when the edge closes a
    /// cycle. An edge that is already present is accepted without change.
    pub fn try_insert(&mut self, head: &str, tail: &str) -> bool {
        let newly_inserted = self
            .successors
            .entry(head.to_string())
            .or_default()
            .insert(tail.to_string());

        if !newly_inserted {
            return true;
        }

        if self.reaches(tail, head) {
            self.remove(head, tail);
            return false;
        }

        self.edge_count += 1;
        true
    }

    fn remove(&mut self, head: &str, tail: &str) {
        if let Some(tails) = self.successors.get_mut(head) {
            tails.remove(tail);
            if tails.is_empty() {
                self.successors.remove(head);
            }
        }
    }

    /// Whether `to` is reachable from `from` along accepted edges.
    /// A node always reaches itself.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack = vec![from];

        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = self.successors.get(node) {
                stack.extend(next.iter().map(String::as_str).filter(|n| !visited.contains(n)));
            }
        }
        false
    }

    /// Full three-colour cycle check over every accepted edge.
    pub fn is_acyclic(&self) -> bool {
        let mut finished: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();

        for root in self.successors.keys() {
            if finished.contains(root.as_str()) {
                continue;
            }

            // (node, successors still to visit)
            let mut stack: Vec<(&str, Vec<&str>)> = vec![(root.as_str(), self.children(root))];
            in_progress.insert(root.as_str());

            while let Some((node, pending)) = stack.last_mut() {
                let Some(child) = pending.pop() else {
                    in_progress.remove(*node);
                    finished.insert(*node);
                    stack.pop();
                    continue;
                };

                if in_progress.contains(child) {
                    return false;
                }
                if !finished.contains(child) {
                    in_progress.insert(child);
                    stack.push((child, self.children(child)));
                }
            }
        }
        true
    }

    fn children(&self, node: &str) -> Vec<&str> {
        self.successors
            .get(node)
            .map(|tails| tails.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
