use ahash::{HashMap, HashSet};
use smallvec::{smallvec, SmallVec};

use super::Execution;

/// `dependent` waits for `dependency`; both are indices into [`SortedGraph::nodes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    pub dependent: usize,
    pub dependency: usize,
}

/// The nodes reachable from a root, every dependency before its dependents and the root last.
pub struct SortedGraph {
    pub nodes: Vec<Execution>,
    /// Grouped by dependent, in node order.
    pub edges: Vec<Edge>,
}

impl SortedGraph {
    pub fn root(&self) -> usize {
        self.nodes.len() - 1
    }
    pub fn position(&self, node: &Execution) -> Option<usize> {
        self.nodes.iter().position(|n| n.ptr_eq(node))
    }
}

struct Frame {
    node: Execution,
    next: usize,
}

/// Post-order depth-first walk from `root`, visiting every node once by identity.
///
/// Uses an explicit stack so arbitrarily long dependency chains don't overflow.
pub fn sort(root: &Execution) -> SortedGraph {
    let mut index: HashMap<usize, usize> = HashMap::default();
    let mut visited: HashSet<usize> = HashSet::default();
    let mut nodes = Vec::new();

    let mut stack: SmallVec<[Frame; 16]> = smallvec![Frame {
        node: root.clone(),
        next: 0
    }];
    visited.insert(root.id());

    while let Some(frame) = stack.last_mut() {
        match frame.node.dependencies().get(frame.next) {
            Some(dependency) => {
                frame.next += 1;
                if visited.insert(dependency.id()) {
                    let node = dependency.clone();
                    stack.push(Frame { node, next: 0 });
                }
            }
            None => {
                if let Some(frame) = stack.pop() {
                    index.insert(frame.node.id(), nodes.len());
                    nodes.push(frame.node);
                }
            }
        }
    }

    let mut edges = Vec::new();
    for (dependent, node) in nodes.iter().enumerate() {
        for dependency in node.dependencies() {
            edges.push(Edge {
                dependent,
                dependency: index[&dependency.id()],
            });
        }
    }

    SortedGraph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use pumice::vk;

    use super::*;
    use crate::{device::fake::FakeDevice, error::Result, graph::execute};

    fn noop(_: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn assert_topological(graph: &SortedGraph) {
        for edge in &graph.edges {
            assert!(edge.dependency < edge.dependent);
        }
        for (i, node) in graph.nodes.iter().enumerate() {
            assert_eq!(graph.position(node), Some(i));
        }
    }

    #[test]
    fn single_node() {
        let device = FakeDevice::new();
        let a = execute(noop, device.queue(0));

        let graph = sort(&a);
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.root(), 0);
    }

    #[test]
    fn chain() {
        let device = FakeDevice::new();
        let a = execute(noop, device.queue(0));
        let b = a.then(noop, device.queue(0));

        let graph = sort(&b);
        assert!(graph.nodes[0].ptr_eq(&a));
        assert!(graph.nodes[1].ptr_eq(&b));
        assert_eq!(
            graph.edges,
            vec![Edge {
                dependent: 1,
                dependency: 0
            }]
        );
    }

    #[test]
    fn diamond_visits_shared_node_once() {
        let device = FakeDevice::new();
        let q = device.queue(0);

        let a = execute(noop, q.clone());
        let b = execute(noop, q.clone()).wait_for([a.clone()]);
        let c = execute(noop, q.clone()).wait_for([a.clone()]);
        let d = execute(noop, q.clone()).wait_for([b.clone(), c.clone()]);

        let graph = sort(&d);
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.edges.len(), 4);
        assert_topological(&graph);

        assert!(graph.nodes[0].ptr_eq(&a));
        assert!(graph.nodes[3].ptr_eq(&d));
        let middle = [&graph.nodes[1], &graph.nodes[2]];
        assert!(
            (middle[0].ptr_eq(&b) && middle[1].ptr_eq(&c))
                || (middle[0].ptr_eq(&c) && middle[1].ptr_eq(&b))
        );
    }

    #[test]
    fn equal_but_distinct_nodes_are_both_kept() {
        let device = FakeDevice::new();
        let q = device.queue(0);

        // same builder and queue, still two nodes
        let a1 = execute(noop, q.clone());
        let a2 = execute(noop, q.clone());
        let root = execute(noop, q).wait_for([a1, a2]);

        let graph = sort(&root);
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let device = FakeDevice::new();
        let q = device.queue(0);

        let mut node = execute(noop, q.clone());
        let first = node.clone();
        for _ in 0..100_000 {
            node = node.then(noop, q.clone());
        }

        let graph = sort(&node);
        assert_eq!(graph.nodes.len(), 100_001);
        assert_eq!(graph.edges.len(), 100_000);
        assert!(graph.nodes[0].ptr_eq(&first));
        assert!(graph
            .edges
            .iter()
            .all(|edge| edge.dependency < edge.dependent));

        drop(graph);
        drop(first);
        drop(node);
    }
}
