//! Graph walks over the task DAG: transitive dependency enumeration and
//! topological ordering.
//!
//! The DAG is acyclic by construction (a task can only depend on tasks
//! that existed when it was built), but diamond-heavy graphs are common,
//! so both walks memoize by digest to bound work.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;

use crate::digest::Digest;
use crate::task::{Node, TaskHandle};

/// Enumerates the transitive dependencies of `node`, each yielded once,
/// with an optional depth cap (`None` = unlimited).
pub fn recursive_dependencies(node: &Node, max_level: Option<usize>) -> Vec<Node> {
    let mut seen: HashSet<Digest> = HashSet::new();
    let mut out = Vec::new();
    walk(node, max_level, &mut seen, &mut out);
    out
}

fn walk(node: &Node, level: Option<usize>, seen: &mut HashSet<Digest>, out: &mut Vec<Node>) {
    if level == Some(0) {
        return;
    }
    for dep in node.dependencies() {
        if seen.insert(dep.digest()) {
            out.push(dep.clone());
            walk(&dep, level.map(|l| l - 1), seen, out);
        }
    }
}

/// Sorts tasks so that every dependency precedes its dependents.
///
/// Edges to tasks outside `tasks` are ignored. Ties are broken by
/// registry order, which petgraph's stable node indices preserve for
/// equal-depth nodes.
pub fn topological_sort(tasks: &[TaskHandle]) -> Vec<TaskHandle> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut index_of: HashMap<Digest, petgraph::graph::NodeIndex> = HashMap::new();

    for (position, task) in tasks.iter().enumerate() {
        let idx = graph.add_node(position);
        index_of.insert(task.digest(), idx);
    }
    for task in tasks {
        let to = index_of[&task.digest()];
        for dep in recursive_dependencies(&Node::Task(task.clone()), Some(1)) {
            let dep_digest = dep.base_task().digest();
            if let Some(&from) = index_of.get(&dep_digest) {
                if from != to {
                    graph.add_edge(from, to, ());
                }
            }
        }
    }

    match petgraph::algo::toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|idx| tasks[graph[idx]].clone()).collect(),
        // Cannot happen for graphs built through the registry; fall back
        // to registry order rather than panicking.
        Err(_) => tasks.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Arg, Task, TaskFn, TaskRegistry};
    use crate::value::Value;
    use std::sync::Arc;

    fn unit_fn() -> TaskFn {
        Arc::new(|_| Ok(Value::Unit))
    }

    /// a -> b, a -> c, (b, c) -> d
    fn diamond(registry: &mut TaskRegistry) -> Vec<TaskHandle> {
        let a = registry.submit(Task::new("demo.a", unit_fn(), vec![]).unwrap());
        let b = registry.submit(Task::new("demo.b", unit_fn(), vec![Arg::Task(a.clone())]).unwrap());
        let c = registry.submit(Task::new("demo.c", unit_fn(), vec![Arg::Task(a.clone())]).unwrap());
        let d = registry.submit(
            Task::new(
                "demo.d",
                unit_fn(),
                vec![Arg::Task(b.clone()), Arg::Task(c.clone())],
            )
            .unwrap(),
        );
        vec![a, b, c, d]
    }

    #[test]
    fn test_recursive_dependencies_deduplicates_diamond() {
        let mut registry = TaskRegistry::new();
        let tasks = diamond(&mut registry);
        let deps = recursive_dependencies(&Node::Task(tasks[3].clone()), None);
        // b, c, and a exactly once despite the diamond.
        assert_eq!(deps.len(), 3);
    }

    #[test]
    fn test_recursive_dependencies_depth_cap() {
        let mut registry = TaskRegistry::new();
        let tasks = diamond(&mut registry);
        let deps = recursive_dependencies(&Node::Task(tasks[3].clone()), Some(1));
        assert_eq!(deps.len(), 2, "depth 1 must stop at b and c");
    }

    #[test]
    fn test_topological_sort_orders_dependencies_first() {
        let mut registry = TaskRegistry::new();
        let tasks = diamond(&mut registry);
        // Reverse so the sort has real work to do.
        let reversed: Vec<TaskHandle> = tasks.iter().rev().cloned().collect();
        let sorted = topological_sort(&reversed);

        let position: HashMap<Digest, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, t)| (t.digest(), i))
            .collect();
        for task in &sorted {
            for dep in recursive_dependencies(&Node::Task(task.clone()), Some(1)) {
                let dep_digest = dep.base_task().digest();
                assert!(
                    position[&dep_digest] < position[&task.digest()],
                    "dependency must sort before dependent"
                );
            }
        }
    }
}
