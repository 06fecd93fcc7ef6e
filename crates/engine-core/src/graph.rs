//! Dependency graph: edge bookkeeping, cycle detection, topological order,
//! critical path, and parallelizable grouping.

use std::collections::{HashMap, HashSet, VecDeque};

use engine_model::{EdgeType, TaskId};

#[derive(Debug, Clone)]
struct Edge {
    to: TaskId,
    edge_type: EdgeType,
}

/// Adjacency-map view of the dependency edges. Mirrors `engine_model::Task::dependencies`/
/// `dependents`, but keeps edge *types* so callers can distinguish BLOCKS/CONFLICTS (gating)
/// from ENABLES/ENHANCES (non-gating) without walking every task.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    forward: HashMap<TaskId, Vec<Edge>>,
    reverse: HashMap<TaskId, Vec<Edge>>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("adding dependency {from} -> {to} would create a cycle")]
pub struct CycleError {
    pub from: TaskId,
    pub to: TaskId,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &TaskId) {
        self.forward.entry(id.clone()).or_default();
        self.reverse.entry(id.clone()).or_default();
    }

    pub fn remove_node(&mut self, id: &TaskId) {
        self.forward.remove(id);
        self.reverse.remove(id);
        for edges in self.forward.values_mut() {
            edges.retain(|e| &e.to != id);
        }
        for edges in self.reverse.values_mut() {
            edges.retain(|e| &e.to != id);
        }
    }

    /// Adds `from` depends-on `to` (i.e. edge `from -> to` in dependency direction). Rejects
    /// the edge with [`CycleError`] if it would create a cycle, leaving the graph unchanged.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId, edge_type: EdgeType) -> Result<(), CycleError> {
        self.add_node(from);
        self.add_node(to);

        if self.would_cycle(from, to) {
            return Err(CycleError { from: from.clone(), to: to.clone() });
        }

        self.forward.entry(from.clone()).or_default().push(Edge { to: to.clone(), edge_type });
        self.reverse.entry(to.clone()).or_default().push(Edge { to: from.clone(), edge_type });
        Ok(())
    }

    pub fn remove_dependency(&mut self, from: &TaskId, to: &TaskId) {
        if let Some(edges) = self.forward.get_mut(from) {
            edges.retain(|e| &e.to != to);
        }
        if let Some(edges) = self.reverse.get_mut(to) {
            edges.retain(|e| &e.to != from);
        }
    }

    /// Would adding `from -> to` create a cycle, i.e. can `from` already be reached from `to`?
    /// DFS with an explicit recursion stack, as specified, rather than a generic
    /// graph-library cycle check, so future edge-type filtering stays obvious at the call site.
    fn would_cycle(&self, from: &TaskId, to: &TaskId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![to.clone()];
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        while let Some(node) = stack.pop() {
            if &node == from {
                return true;
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            on_stack.insert(node.clone());
            if let Some(edges) = self.forward.get(&node) {
                for edge in edges {
                    stack.push(edge.to.clone());
                }
            }
        }
        let _ = on_stack;
        false
    }

    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.forward.get(id).map(|edges| edges.iter().map(|e| &e.to).collect()).unwrap_or_default()
    }

    pub fn dependents_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.reverse.get(id).map(|edges| edges.iter().map(|e| &e.to).collect()).unwrap_or_default()
    }

    pub fn gating_dependencies_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.forward
            .get(id)
            .map(|edges| edges.iter().filter(|e| e.edge_type.gates_eligibility()).map(|e| &e.to).collect())
            .unwrap_or_default()
    }

    pub fn edge_type(&self, from: &TaskId, to: &TaskId) -> Option<EdgeType> {
        self.forward.get(from)?.iter().find(|e| &e.to == to).map(|e| e.edge_type)
    }

    /// True iff the whole graph is acyclic. `add_dependency` already prevents cycles from
    /// entering, so this is primarily a defensive check used by tests and by recovery.
    pub fn is_acyclic(&self) -> bool {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        for node in self.forward.keys() {
            if !visited.contains(node) && self.has_cycle_from(node, &mut visited, &mut on_stack) {
                return false;
            }
        }
        true
    }

    fn has_cycle_from(&self, node: &TaskId, visited: &mut HashSet<TaskId>, on_stack: &mut HashSet<TaskId>) -> bool {
        visited.insert(node.clone());
        on_stack.insert(node.clone());
        if let Some(edges) = self.forward.get(node) {
            for edge in edges {
                if on_stack.contains(&edge.to) {
                    return true;
                }
                if !visited.contains(&edge.to) && self.has_cycle_from(&edge.to, visited, on_stack) {
                    return true;
                }
            }
        }
        on_stack.remove(node);
        false
    }

    /// Kahn's algorithm: assigns every node a topological level (distance from a source with
    /// no unresolved dependencies). Ties at the same level are broken by the caller using
    /// dynamic priority, then creation time.
    pub fn topological_levels(&self) -> HashMap<TaskId, u32> {
        let mut indegree: HashMap<TaskId, usize> = HashMap::new();
        for node in self.forward.keys() {
            indegree.entry(node.clone()).or_insert(0);
        }
        for edges in self.forward.values() {
            for edge in edges {
                *indegree.entry(edge.to.clone()).or_insert(0) += 1;
            }
        }

        // Invert: we want level = longest chain of *unsatisfied* dependencies, so walk from
        // nodes with no outgoing (no further) dependencies upward via the reverse map.
        let mut level = HashMap::new();
        let mut queue: VecDeque<TaskId> = self
            .forward
            .iter()
            .filter(|(_, edges)| edges.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &queue {
            level.insert(id.clone(), 0u32);
        }

        while let Some(node) = queue.pop_front() {
            let node_level = *level.get(&node).unwrap_or(&0);
            if let Some(dependents) = self.reverse.get(&node) {
                for edge in dependents {
                    let candidate = node_level + 1;
                    let entry = level.entry(edge.to.clone()).or_insert(0);
                    if candidate > *entry {
                        *entry = candidate;
                        queue.push_back(edge.to.clone());
                    }
                }
            }
        }

        for node in self.forward.keys() {
            level.entry(node.clone()).or_insert(0);
        }
        level
    }

    /// Longest path by estimated duration, given a duration lookup.
    pub fn critical_path(&self, duration_ms: impl Fn(&TaskId) -> u64) -> Vec<TaskId> {
        let levels = self.topological_levels();
        let mut nodes: Vec<&TaskId> = levels.keys().collect();
        nodes.sort_by_key(|id| levels[*id]);

        let mut best_duration: HashMap<TaskId, u64> = HashMap::new();
        let mut best_prev: HashMap<TaskId, Option<TaskId>> = HashMap::new();
        for node in &nodes {
            let own = duration_ms(node);
            let mut best = own;
            let mut prev = None;
            for dep in self.dependencies_of(node) {
                let candidate = best_duration.get(dep).copied().unwrap_or(0) + own;
                if candidate > best {
                    best = candidate;
                    prev = Some(dep.clone());
                }
            }
            best_duration.insert((*node).clone(), best);
            best_prev.insert((*node).clone(), prev);
        }

        let Some(tail) = best_duration.iter().max_by_key(|(_, d)| **d).map(|(id, _)| id.clone()) else {
            return Vec::new();
        };

        let mut path = vec![tail.clone()];
        let mut cursor = tail;
        while let Some(Some(prev)) = best_prev.get(&cursor) {
            path.push(prev.clone());
            cursor = prev.clone();
        }
        path.reverse();
        path
    }

    pub fn node_count(&self) -> usize {
        self.forward.len()
    }
}
