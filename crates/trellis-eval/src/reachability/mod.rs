//! Incremental transitive closure over a directed multigraph.
//!
//! [`ReachabilityMaintainer`] keeps the set of pairs `(u, v)` such that `v`
//! is reachable from `u` over a path of length ≥ 1, and reports every pair
//! entering or leaving that set to its attached [`ClosureObserver`]s.
//! Self-loop edges are ignored; a vertex still reaches itself through a
//! longer cycle.
//!
//! Two deletion strategies are available ([`ClosureStrategy`]). They agree
//! on every observable result and differ only in bookkeeping cost.

mod counting;
mod dred;
mod graph;
mod pairs;

use std::fmt::Debug;
use std::hash::Hash;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use counting::CountingClosure;
use dred::DredClosure;
pub use graph::EdgeGraph;
use pairs::PairSet;

/// Types usable as closure vertices.
pub trait Vertex: Clone + Eq + Hash + Ord + Debug {}

impl<T: Clone + Eq + Hash + Ord + Debug> Vertex for T {}

/// How deletions are propagated through the closure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ClosureStrategy {
    /// Track derivation counts and retract pairs whose count reaches zero.
    #[default]
    Counting,
    /// Over-delete every pair the edge could have supported, then rederive
    /// from the remaining edges.
    DeleteAndRederive,
}

/// Receives closure pairs as they appear and disappear.
pub trait ClosureObserver<V> {
    fn tuple_derived(&mut self, source: &V, target: &V);
    fn tuple_retracted(&mut self, source: &V, target: &V);
}

/// Handle returned by [`ReachabilityMaintainer::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClosureChange<V> {
    Derived(V, V),
    Retracted(V, V),
}

#[derive(Debug, Clone)]
enum Closure<V> {
    Counting(CountingClosure<V>),
    Dred(DredClosure<V>),
}

impl<V: Vertex> Closure<V> {
    fn pairs(&self) -> &PairSet<V> {
        match self {
            Closure::Counting(c) => c.pairs(),
            Closure::Dred(d) => d.pairs(),
        }
    }
}

/// Maintains the transitive closure of an edge multiset.
pub struct ReachabilityMaintainer<V> {
    graph: EdgeGraph<V>,
    closure: Closure<V>,
    observers: Vec<(ObserverHandle, Box<dyn ClosureObserver<V>>)>,
    next_observer: u32,
    changes: Vec<ClosureChange<V>>,
}

impl<V: Vertex> ReachabilityMaintainer<V> {
    pub fn new(strategy: ClosureStrategy) -> Self {
        let closure = match strategy {
            ClosureStrategy::Counting => Closure::Counting(CountingClosure::default()),
            ClosureStrategy::DeleteAndRederive => Closure::Dred(DredClosure::default()),
        };
        Self {
            graph: EdgeGraph::default(),
            closure,
            observers: Vec::new(),
            next_observer: 0,
            changes: Vec::new(),
        }
    }

    /// Build the closure of an initial edge list.
    pub fn from_edges(strategy: ClosureStrategy, edges: impl IntoIterator<Item = (V, V)>) -> Self {
        let mut maintainer = Self::new(strategy);
        for (s, t) in edges {
            maintainer.insert_edge(s, t);
        }
        maintainer
    }

    pub fn strategy(&self) -> ClosureStrategy {
        match self.closure {
            Closure::Counting(_) => ClosureStrategy::Counting,
            Closure::Dred(_) => ClosureStrategy::DeleteAndRederive,
        }
    }

    pub fn graph(&self) -> &EdgeGraph<V> {
        &self.graph
    }

    /// Add one instance of `source → target`.
    pub fn insert_edge(&mut self, source: V, target: V) {
        if source == target {
            return;
        }
        let multiplicity = self.graph.insert(&source, &target);
        match &mut self.closure {
            Closure::Counting(c) => c.edge_inserted(&self.graph, &source, &target, &mut self.changes),
            Closure::Dred(d) => {
                if multiplicity == 1 {
                    d.edge_inserted(&source, &target, &mut self.changes);
                }
            }
        }
        tracing::trace!(?source, ?target, changes = self.changes.len(), "edge inserted");
        self.notify();
    }

    /// Remove one instance of `source → target`. Removing an edge that is
    /// not present does nothing.
    pub fn delete_edge(&mut self, source: &V, target: &V) {
        if source == target {
            return;
        }
        let Some(remaining) = self.graph.remove(source, target) else {
            return;
        };
        match &mut self.closure {
            Closure::Counting(c) => c.edge_deleted(&self.graph, source, target, &mut self.changes),
            Closure::Dred(d) => {
                if remaining == 0 {
                    d.edge_deleted(&self.graph, source, target, &mut self.changes);
                }
            }
        }
        tracing::trace!(?source, ?target, changes = self.changes.len(), "edge deleted");
        self.notify();
    }

    pub fn is_reachable(&self, source: &V, target: &V) -> bool {
        self.closure.pairs().contains(source, target)
    }

    /// Every vertex reachable from `source`, sorted.
    pub fn reachable_targets(&self, source: &V) -> Vec<V> {
        let mut out: Vec<V> = self.closure.pairs().targets(source).cloned().collect();
        out.sort();
        out
    }

    /// Every vertex that reaches `target`, sorted.
    pub fn reachable_sources(&self, target: &V) -> Vec<V> {
        let mut out: Vec<V> = self.closure.pairs().sources(target).cloned().collect();
        out.sort();
        out
    }

    /// Every closure pair, sorted.
    pub fn pairs(&self) -> Vec<(V, V)> {
        let mut out: Vec<(V, V)> = self
            .closure
            .pairs()
            .iter()
            .map(|(s, t)| (s.clone(), t.clone()))
            .collect();
        out.sort();
        out
    }

    /// Number of pairs in the closure.
    pub fn relation_size(&self) -> usize {
        self.closure.pairs().len()
    }

    /// Register an observer; it is notified after observers attached earlier.
    pub fn attach(&mut self, observer: Box<dyn ClosureObserver<V>>) -> ObserverHandle {
        let handle = ObserverHandle(self.next_observer);
        self.next_observer += 1;
        self.observers.push((handle, observer));
        handle
    }

    pub fn detach(&mut self, handle: ObserverHandle) -> Option<Box<dyn ClosureObserver<V>>> {
        let pos = self.observers.iter().position(|(h, _)| *h == handle)?;
        Some(self.observers.remove(pos).1)
    }

    /// Drop all edges, pairs and observers without notifying anyone.
    pub fn dispose(&mut self) {
        self.graph.clear();
        match &mut self.closure {
            Closure::Counting(c) => c.clear(),
            Closure::Dred(d) => d.clear(),
        }
        self.observers.clear();
        self.changes.clear();
    }

    fn notify(&mut self) {
        let changes = std::mem::take(&mut self.changes);
        for change in &changes {
            for (_, observer) in &mut self.observers {
                match change {
                    ClosureChange::Derived(s, t) => observer.tuple_derived(s, t),
                    ClosureChange::Retracted(s, t) => observer.tuple_retracted(s, t),
                }
            }
        }
    }
}

impl<V: Vertex> Debug for ReachabilityMaintainer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityMaintainer")
            .field("strategy", &self.strategy())
            .field("edges", &self.graph.len())
            .field("pairs", &self.relation_size())
            .field("observers", &self.observers.len())
            .finish()
    }
}
