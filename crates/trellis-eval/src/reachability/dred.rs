//! Transitive closure maintained by delete-and-rederive.
//!
//! Only pair membership is stored. Deleting the last instance of an edge
//! drops every pair that could have depended on it, then rebuilds the
//! closure rows of the affected sources from the base graph.

use rustc_hash::FxHashSet;

use super::graph::EdgeGraph;
use super::pairs::PairSet;
use super::{ClosureChange, Vertex};

#[derive(Debug, Clone)]
pub struct DredClosure<V> {
    pairs: PairSet<V>,
}

impl<V> Default for DredClosure<V> {
    fn default() -> Self {
        Self {
            pairs: PairSet::default(),
        }
    }
}

impl<V: Vertex> DredClosure<V> {
    pub fn pairs(&self) -> &PairSet<V> {
        &self.pairs
    }

    /// `source` and everything reaching it; `target` and everything it
    /// reaches.
    fn affected(&self, source: &V, target: &V) -> (Vec<V>, Vec<V>) {
        let mut starts: Vec<V> = self.pairs.sources(source).cloned().collect();
        starts.push(source.clone());
        starts.sort();
        starts.dedup();
        let mut ends: Vec<V> = self.pairs.targets(target).cloned().collect();
        ends.push(target.clone());
        ends.sort();
        ends.dedup();
        (starts, ends)
    }

    /// The first instance of `source → target` was added to the graph.
    pub fn edge_inserted(&mut self, source: &V, target: &V, changes: &mut Vec<ClosureChange<V>>) {
        let (starts, ends) = self.affected(source, target);
        for a in &starts {
            for b in &ends {
                if self.pairs.insert(a, b) {
                    changes.push(ClosureChange::Derived(a.clone(), b.clone()));
                }
            }
        }
    }

    /// The last instance of `source → target` was removed from the graph.
    pub fn edge_deleted(
        &mut self,
        graph: &EdgeGraph<V>,
        source: &V,
        target: &V,
        changes: &mut Vec<ClosureChange<V>>,
    ) {
        let (starts, ends) = self.affected(source, target);
        let mut removed = Vec::new();
        for a in &starts {
            for b in &ends {
                if self.pairs.remove(a, b) {
                    removed.push((a.clone(), b.clone()));
                }
            }
        }
        tracing::trace!(overestimate = removed.len(), "closure pairs dropped for rederivation");

        // Rows outside `starts` are untouched, so rederivation only needs to
        // extend the rows of the affected sources.
        let mut rederived = FxHashSet::default();
        for a in &starts {
            let succ: Vec<V> = graph.targets(a).map(|(t, _)| t.clone()).collect();
            for y in succ {
                if self.pairs.insert(a, &y) {
                    rederived.insert((a.clone(), y));
                }
            }
        }
        let mut delta: Vec<(V, V)> = starts
            .iter()
            .flat_map(|a| self.pairs.targets(a).map(move |y| (a.clone(), y.clone())))
            .collect();
        while !delta.is_empty() {
            let current = std::mem::take(&mut delta);
            for (x, y) in current {
                let succ: Vec<V> = graph.targets(&y).map(|(z, _)| z.clone()).collect();
                for z in succ {
                    if self.pairs.insert(&x, &z) {
                        rederived.insert((x.clone(), z.clone()));
                        delta.push((x.clone(), z));
                    }
                }
            }
        }

        for (a, b) in removed {
            if !rederived.contains(&(a.clone(), b.clone())) {
                changes.push(ClosureChange::Retracted(a, b));
            }
        }
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}
