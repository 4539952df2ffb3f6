//! Deterministic topological ordering with cycle detection.
//!
//! Used for constant-dependency ordering and for rejecting recursive call
//! graphs. Iteration follows the insertion order of the input map, so the
//! produced order (and the first reported cycle) is deterministic.

use crate::map::{FxHashSet, FxIndexMap};
use std::hash::Hash;

/// Result of [`topo_sort`].
pub enum TopoResult<T> {
    /// All nodes ordered such that every node appears after its dependencies.
    Sorted(Vec<T>),
    /// A dependency cycle was found; the value is a node on the cycle.
    Cycle(T),
}

/// Topologically sorts the nodes of `graph`, where each entry maps a node to
/// the nodes it depends on. Edges to unknown nodes are ignored.
pub fn topo_sort<T: Clone + Eq + Hash>(graph: &FxIndexMap<T, Vec<T>>) -> TopoResult<T> {
    let mut order = Vec::with_capacity(graph.len());
    let mut done = FxHashSet::default();
    let mut in_progress = FxHashSet::default();

    for node in graph.keys() {
        if let Some(cycle) = visit(node, graph, &mut order, &mut done, &mut in_progress) {
            return TopoResult::Cycle(cycle);
        }
    }
    TopoResult::Sorted(order)
}

fn visit<T: Clone + Eq + Hash>(
    node: &T,
    graph: &FxIndexMap<T, Vec<T>>,
    order: &mut Vec<T>,
    done: &mut FxHashSet<T>,
    in_progress: &mut FxHashSet<T>,
) -> Option<T> {
    if done.contains(node) {
        return None;
    }
    if !in_progress.insert(node.clone()) {
        return Some(node.clone());
    }
    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if graph.contains_key(dep) {
                if let Some(cycle) = visit(dep, graph, order, done, in_progress) {
                    return Some(cycle);
                }
            }
        }
    }
    in_progress.remove(node);
    done.insert(node.clone());
    order.push(node.clone());
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> FxIndexMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let g = graph(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        match topo_sort(&g) {
            TopoResult::Sorted(order) => assert_eq!(order, ["a", "b", "c"]),
            TopoResult::Cycle(_) => panic!("unexpected cycle"),
        }
    }

    #[test]
    fn detects_self_cycle() {
        let g = graph(&[("a", &["a"])]);
        assert!(matches!(topo_sort(&g), TopoResult::Cycle(_)));
    }

    #[test]
    fn detects_mutual_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(topo_sort(&g), TopoResult::Cycle(_)));
    }

    #[test]
    fn ignores_unknown_edges() {
        let g = graph(&[("a", &["zzz"]), ("b", &["a"])]);
        match topo_sort(&g) {
            TopoResult::Sorted(order) => assert_eq!(order, ["a", "b"]),
            TopoResult::Cycle(_) => panic!("unexpected cycle"),
        }
    }
}
