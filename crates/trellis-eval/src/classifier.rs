//! Dependency classification of network nodes.
//!
//! Nodes are partitioned into communication groups ordered topologically
//! over the condensation of the node graph. A group is a *singleton* when
//! its node can take deltas in any order without phases; everything else
//! becomes a *recursive* group with phased delivery, even a lone node.

use petgraph::algo::{condensation, toposort};
use petgraph::graph::DiGraph;

use crate::network::{NodeId, NodeTraits};

/// Handle of a communication group. Group handles follow the topological
/// order, so a smaller handle is never downstream of a larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Strongly connected components in topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Components {
    pub order: Vec<Vec<NodeId>>,
    /// Per component: whether its nodes lie on a cycle.
    pub cyclic: Vec<bool>,
}

impl Components {
    /// Nodes lying on some cycle.
    pub fn cyclic_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order
            .iter()
            .zip(&self.cyclic)
            .filter(|(_, cyclic)| **cyclic)
            .flat_map(|(members, _)| members.iter().copied())
    }
}

pub(crate) fn components(node_count: usize, edges: &[(NodeId, NodeId)]) -> Components {
    let mut graph = DiGraph::<NodeId, ()>::new();
    let nodes: Vec<_> = (0..node_count)
        .map(|i| graph.add_node(NodeId(i as u32)))
        .collect();
    let mut self_loop = vec![false; node_count];
    for &(from, to) in edges {
        if from == to {
            self_loop[from.0 as usize] = true;
        }
        graph.add_edge(nodes[from.0 as usize], nodes[to.0 as usize], ());
    }

    let condensed = condensation(graph, true);
    let order = toposort(&condensed, None).expect("condensation is always a DAG");

    let order: Vec<Vec<NodeId>> = order
        .iter()
        .map(|&idx| {
            let mut members = condensed[idx].clone();
            members.sort();
            members
        })
        .collect();
    let cyclic = order
        .iter()
        .map(|members| members.len() > 1 || self_loop[members[0].0 as usize])
        .collect();
    Components { order, cyclic }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupLayout {
    pub members: Vec<NodeId>,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Classification {
    /// Groups in processing order.
    pub groups: Vec<GroupLayout>,
    pub group_of: Vec<GroupId>,
    /// Nodes whose mailbox separates deletions from insertions.
    pub split: Vec<bool>,
}

pub(crate) fn classify(
    components: &Components,
    edges: &[(NodeId, NodeId)],
    traits: &[NodeTraits],
) -> Classification {
    let mut groups = Vec::with_capacity(components.order.len());
    let mut group_of = vec![GroupId(0); traits.len()];
    for (members, &cyclic) in components.order.iter().zip(&components.cyclic) {
        let recursive = cyclic
            || members.iter().any(|n| {
                let t = traits[n.0 as usize];
                (t.receiver && !t.order_indifferent) || t.rederiving
            });
        let id = GroupId(groups.len() as u32);
        for n in members {
            group_of[n.0 as usize] = id;
        }
        groups.push(GroupLayout {
            members: members.clone(),
            recursive,
        });
    }

    let mut split = vec![false; traits.len()];
    for &(from, to) in edges {
        let target = group_of[to.0 as usize];
        if groups[target.0 as usize].recursive && group_of[from.0 as usize] != target {
            split[to.0 as usize] = true;
        }
    }

    tracing::debug!(
        groups = groups.len(),
        recursive = groups.iter().filter(|g| g.recursive).count(),
        "classified network"
    );
    Classification {
        groups,
        group_of,
        split,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCTION: NodeTraits = NodeTraits {
        receiver: true,
        order_indifferent: true,
        rederiving: false,
    };

    fn n(i: u32) -> NodeId {
        NodeId(i)
    }

    #[test]
    fn test_mutual_recursion_precedes_dependent() {
        // P = 0, Q = 1, R = 2; an input 3 feeds P
        let edges = [(n(3), n(0)), (n(0), n(1)), (n(1), n(0)), (n(0), n(2))];
        let comps = components(4, &edges);
        let mut traits = [PRODUCTION; 4];
        for node in comps.cyclic_nodes() {
            traits[node.0 as usize].rederiving = true;
        }
        let c = classify(&comps, &edges, &traits);

        let pq = c.group_of[0];
        assert_eq!(c.group_of[1], pq);
        assert!(c.groups[pq.0 as usize].recursive);
        assert_eq!(c.groups[pq.0 as usize].members, vec![n(0), n(1)]);

        let r = c.group_of[2];
        assert!(!c.groups[r.0 as usize].recursive);
        assert!(pq < r);
        assert!(c.group_of[3] < pq);

        assert_eq!(c.split, vec![true, false, false, false]);
    }

    #[test]
    fn test_self_loop_is_recursive() {
        let edges = [(n(0), n(1)), (n(1), n(1))];
        let comps = components(2, &edges);
        assert_eq!(comps.cyclic, vec![false, true]);
        let c = classify(&comps, &edges, &[PRODUCTION; 2]);
        assert!(!c.groups[0].recursive);
        assert!(c.groups[1].recursive);
        assert_eq!(c.groups[1].members, vec![n(1)]);
        assert_eq!(c.split, vec![false, true]);
    }

    #[test]
    fn test_order_sensitive_receiver_gets_recursive_group() {
        let closure = NodeTraits {
            receiver: true,
            order_indifferent: false,
            rederiving: false,
        };
        let filter = NodeTraits {
            receiver: false,
            order_indifferent: true,
            rederiving: false,
        };
        let edges = [(n(0), n(1)), (n(1), n(2))];
        let comps = components(3, &edges);
        assert_eq!(comps.order, vec![vec![n(0)], vec![n(1)], vec![n(2)]]);
        let c = classify(&comps, &edges, &[PRODUCTION, closure, filter]);
        let kinds: Vec<bool> = c.groups.iter().map(|g| g.recursive).collect();
        assert_eq!(kinds, vec![false, true, false]);
        assert!(c.split[1]);
    }
}
