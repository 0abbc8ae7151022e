//! Dependency graph over workflow steps.
//!
//! Nodes are stored in an arena indexed by declaration order; edges are adjacency lists
//! of indices. Unknown dependency ids and duplicate step ids are recorded rather than
//! rejected, so the same graph serves both validation and execution.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    /// First occurrence of each id
    index: HashMap<String, usize>,
    /// `dependencies[i]`: nodes `i` waits for
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes waiting for `i`
    dependents: Vec<Vec<usize>>,
    /// Dependency ids that name no step, per node
    unresolved: Vec<Vec<String>>,
    duplicates: Vec<String>,
}

impl DependencyGraph {
    /// Build from `(step_id, depends_on)` pairs in declaration order
    pub fn new<'a, I, D>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let nodes: Vec<(&str, Vec<&str>)> = nodes
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect();

        let mut graph = Self::default();
        for (i, (id, _)) in nodes.iter().enumerate() {
            graph.ids.push(id.to_string());
            if graph.index.contains_key(*id) {
                graph.duplicates.push(id.to_string());
            } else {
                graph.index.insert(id.to_string(), i);
            }
        }

        graph.dependencies = vec![Vec::new(); nodes.len()];
        graph.dependents = vec![Vec::new(); nodes.len()];
        graph.unresolved = vec![Vec::new(); nodes.len()];

        for (i, (_, deps)) in nodes.iter().enumerate() {
            for dep in deps {
                match graph.index.get(*dep) {
                    Some(&j) => {
                        graph.dependencies[i].push(j);
                        graph.dependents[j].push(i);
                    }
                    None => graph.unresolved[i].push(dep.to_string()),
                }
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, node: usize) -> &str {
        &self.ids[node]
    }

    /// Ids declared more than once
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// `(step_id, missing_dependency)` pairs
    pub fn missing_dependencies(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.unresolved.iter().enumerate().flat_map(move |(i, deps)| {
            deps.iter().map(move |dep| (self.ids[i].as_str(), dep.as_str()))
        })
    }

    /// Number of unmet dependencies per node, unresolved ones included
    fn in_degrees(&self) -> Vec<usize> {
        self.dependencies
            .iter()
            .zip(&self.unresolved)
            .map(|(resolved, unresolved)| resolved.len() + unresolved.len())
            .collect()
    }

    /// First dependency cycle found by depth-first search, as a closed path of step ids
    /// (`a -> b -> a` is returned as `["a", "b", "a"]`).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[node] = Mark::OnStack;
            stack.push(node);

            for &next in &graph.dependencies[node] {
                match marks[next] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|&n| graph.ids[n].clone()).collect();
                        path.push(graph.ids[next].clone());
                        return Some(path);
                    }
                    Mark::Unvisited => {
                        if let Some(path) = visit(graph, next, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut stack = Vec::new();
        for node in 0..self.len() {
            if marks[node] == Mark::Unvisited {
                if let Some(path) = visit(self, node, &mut marks, &mut stack) {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Incremental Kahn traversal over this graph
    pub fn ready_set(&self) -> ReadySet<'_> {
        let remaining = self.in_degrees();
        let ready = (0..self.len()).filter(|&n| remaining[n] == 0).collect();
        ReadySet {
            graph: self,
            remaining,
            completed: vec![false; self.len()],
            ready,
            done: 0,
        }
    }
}

/// Nodes whose dependencies have all completed.
///
/// Callers take the ready nodes as a batch, run them, and report each success with
/// [`complete`](Self::complete), which unlocks dependents for the next batch. Nodes waiting
/// on an unknown id or on a cycle never become ready.
#[derive(Debug, Clone)]
pub struct ReadySet<'g> {
    graph: &'g DependencyGraph,
    remaining: Vec<usize>,
    completed: Vec<bool>,
    ready: Vec<usize>,
    done: usize,
}

impl ReadySet<'_> {
    /// Every node has completed
    pub fn is_finished(&self) -> bool {
        self.done == self.graph.len()
    }

    /// Ready nodes in declaration order, leaving the set empty until more complete
    pub fn take_batch(&mut self) -> Vec<usize> {
        let mut batch = std::mem::take(&mut self.ready);
        batch.sort_unstable();
        batch
    }

    pub fn complete(&mut self, node: usize) {
        if std::mem::replace(&mut self.completed[node], true) {
            return;
        }
        self.done += 1;
        for &dependent in &self.graph.dependents[node] {
            self.remaining[dependent] -= 1;
            if self.remaining[dependent] == 0 {
                self.ready.push(dependent);
            }
        }
    }

    /// Ids of the nodes that have not completed
    pub fn outstanding(&self) -> Vec<&str> {
        (0..self.graph.len())
            .filter(|&n| !self.completed[n])
            .map(|n| self.graph.id(n))
            .collect()
    }
}
