//! The operator network: an arena of nodes connected by delta edges.
//!
//! Nodes are addressed by [`NodeId`] and never removed. Inputs, productions
//! and transitive closures are shared by name across every compiled clause;
//! all other nodes belong to exactly one clause.

mod compile;
mod node;

use rustc_hash::FxHashMap;

use crate::reachability::ClosureStrategy;
use crate::Tuple;
pub(crate) use compile::Extension;
pub(crate) use node::{Emitter, NodeKind, ProductionNode};
pub use node::{NodeTraits, Slot};

/// Handle of a node in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct Network {
    nodes: Vec<NodeKind>,
    children: Vec<Vec<(NodeId, Slot)>>,
    inputs: FxHashMap<String, NodeId>,
    productions: FxHashMap<String, NodeId>,
    closures: FxHashMap<String, NodeId>,
    strategy: ClosureStrategy,
}

impl Network {
    pub fn new(strategy: ClosureStrategy) -> Self {
        Self {
            nodes: Vec::new(),
            children: Vec::new(),
            inputs: FxHashMap::default(),
            productions: FxHashMap::default(),
            closures: FxHashMap::default(),
            strategy,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0 as usize]
    }

    pub fn children(&self, id: NodeId) -> &[(NodeId, Slot)] {
        &self.children[id.0 as usize]
    }

    /// Every `(producer, consumer)` pair, one per connection.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.children
            .iter()
            .enumerate()
            .flat_map(|(i, cs)| cs.iter().map(move |(c, _)| (NodeId(i as u32), *c)))
            .collect()
    }

    pub fn traits(&self) -> Vec<NodeTraits> {
        self.nodes.iter().map(NodeKind::traits).collect()
    }

    pub fn input(&self, relation: &str) -> Option<NodeId> {
        self.inputs.get(relation).copied()
    }

    pub fn production(&self, query: &str) -> Option<NodeId> {
        self.productions.get(query).copied()
    }

    pub fn production_node(&self, query: &str) -> Option<&ProductionNode> {
        match self.node(self.production(query)?) {
            NodeKind::Production(p) => Some(p),
            _ => None,
        }
    }

    /// Switch the production or closure at `id` into delete-and-rederive
    /// mode.
    pub fn enable_rederive(&mut self, id: NodeId) {
        match &mut self.nodes[id.0 as usize] {
            NodeKind::Production(p) => p.set_rederive(true),
            NodeKind::Closure(c) => c.set_rederive(true),
            _ => {}
        }
    }

    /// Multiplicity of `tuple` in the memory of input node `id`.
    pub fn input_count(&self, id: NodeId, tuple: &Tuple) -> i32 {
        match self.node(id) {
            NodeKind::Input { memory, .. } => memory.count(tuple),
            _ => 0,
        }
    }

    pub fn update(
        &mut self,
        id: NodeId,
        slot: Slot,
        tuple: &Tuple,
        count: i32,
        out: &mut Emitter,
    ) -> Result<(), String> {
        self.nodes[id.0 as usize].update(slot, tuple, count, out)
    }

    pub fn rederive_one(&mut self, id: NodeId, out: &mut Emitter) {
        self.nodes[id.0 as usize].rederive_one(out);
    }

    pub fn has_rederivables(&self, id: NodeId) -> bool {
        self.node(id).has_rederivables()
    }

    pub(crate) fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        tracing::trace!(%id, node = %kind.label(), "node created");
        self.nodes.push(kind);
        self.children.push(Vec::new());
        id
    }

    /// Connect `parent → child`. A parent that existed before `ext` began
    /// already holds state, so the child is initialised with its contents.
    pub(crate) fn connect(&mut self, parent: NodeId, child: NodeId, slot: Slot, ext: &mut Extension) {
        self.children[parent.0 as usize].push((child, slot));
        if parent < ext.first_new {
            for (tuple, count) in self.node(parent).pull() {
                ext.initial.push((child, slot, tuple, count));
            }
        }
    }
}
