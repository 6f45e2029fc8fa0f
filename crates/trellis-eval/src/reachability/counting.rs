//! Transitive closure with derivation counts.
//!
//! Every closure pair carries the number of ways it is derived:
//! `count(p, y) = mult(p, y) + Σ mult(p, z) · [tc(z, y)]` over direct
//! successors `z` of `p`. A pair is visible iff its count is positive.
//! Insertions and deletions adjust counts with the same three rule shapes and
//! report pairs whose count crosses zero.
//!
//! On cyclic graphs pairs can keep each other alive after their last
//! well-founded derivation disappears. Deletion therefore ends with a repair
//! pass: any pair whose count was decremented but stayed positive is checked
//! against the base graph, and unsupported pairs are retracted along with
//! their contributions to other counts.

use rustc_hash::{FxHashMap, FxHashSet};

use super::graph::EdgeGraph;
use super::pairs::PairSet;
use super::{ClosureChange, Vertex};

enum Decrement {
    Absent,
    Positive,
    Zero,
}

#[derive(Debug, Clone)]
pub struct CountingClosure<V> {
    pairs: PairSet<V>,
    counts: FxHashMap<(V, V), usize>,
}

impl<V> Default for CountingClosure<V> {
    fn default() -> Self {
        Self {
            pairs: PairSet::default(),
            counts: FxHashMap::default(),
        }
    }
}

impl<V: Vertex> CountingClosure<V> {
    pub fn pairs(&self) -> &PairSet<V> {
        &self.pairs
    }

    pub fn count(&self, source: &V, target: &V) -> usize {
        self.counts
            .get(&(source.clone(), target.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Returns true if the pair became present.
    fn add(&mut self, source: &V, target: &V, by: usize) -> bool {
        let c = self
            .counts
            .entry((source.clone(), target.clone()))
            .or_insert(0);
        let was_absent = *c == 0;
        *c += by;
        if was_absent {
            self.pairs.insert(source, target);
        }
        was_absent
    }

    fn sub(&mut self, source: &V, target: &V, by: usize) -> Decrement {
        let key = (source.clone(), target.clone());
        let Some(c) = self.counts.get_mut(&key) else {
            return Decrement::Absent;
        };
        debug_assert!(*c >= by, "derivation count underflow");
        *c = c.saturating_sub(by);
        if *c > 0 {
            return Decrement::Positive;
        }
        self.counts.remove(&key);
        self.pairs.remove(source, target);
        Decrement::Zero
    }

    /// Account for one new instance of `source → target`, which the graph
    /// already contains.
    pub fn edge_inserted(
        &mut self,
        graph: &EdgeGraph<V>,
        source: &V,
        target: &V,
        changes: &mut Vec<ClosureChange<V>>,
    ) {
        let mut delta = Vec::new();
        if self.add(source, target, 1) {
            delta.push((source.clone(), target.clone()));
        }
        let ends: Vec<V> = self.pairs.targets(target).cloned().collect();
        for y in ends {
            if self.add(source, &y, 1) {
                delta.push((source.clone(), y));
            }
        }
        while !delta.is_empty() {
            let current = std::mem::take(&mut delta);
            for (x, y) in current {
                let preds: Vec<(V, usize)> =
                    graph.sources(&x).map(|(p, m)| (p.clone(), m)).collect();
                for (p, m) in preds {
                    if self.add(&p, &y, m) {
                        delta.push((p, y.clone()));
                    }
                }
                changes.push(ClosureChange::Derived(x, y));
            }
        }
    }

    /// Account for one removed instance of `source → target`, which the graph
    /// no longer contains.
    pub fn edge_deleted(
        &mut self,
        graph: &EdgeGraph<V>,
        source: &V,
        target: &V,
        changes: &mut Vec<ClosureChange<V>>,
    ) {
        let mut delta = Vec::new();
        let mut suspects = Vec::new();
        let ends: Vec<V> = self.pairs.targets(target).cloned().collect();
        for y in std::iter::once(target.clone()).chain(ends) {
            match self.sub(source, &y, 1) {
                Decrement::Zero => delta.push((source.clone(), y)),
                Decrement::Positive => suspects.push((source.clone(), y)),
                Decrement::Absent => {}
            }
        }
        while !delta.is_empty() {
            let current = std::mem::take(&mut delta);
            for (x, y) in current {
                self.retract_contributions(graph, &x, &y, &mut delta, &mut suspects);
                changes.push(ClosureChange::Retracted(x, y));
            }
        }
        self.repair(graph, suspects, changes);
    }

    /// Subtract the support `(x, y)` lent to `(p, y)` for every predecessor
    /// `p` of `x`.
    fn retract_contributions(
        &mut self,
        graph: &EdgeGraph<V>,
        x: &V,
        y: &V,
        zeroed: &mut Vec<(V, V)>,
        suspects: &mut Vec<(V, V)>,
    ) {
        let preds: Vec<(V, usize)> = graph.sources(x).map(|(p, m)| (p.clone(), m)).collect();
        for (p, m) in preds {
            match self.sub(&p, y, m) {
                Decrement::Zero => zeroed.push((p, y.clone())),
                Decrement::Positive => suspects.push((p, y.clone())),
                Decrement::Absent => {}
            }
        }
    }

    fn repair(
        &mut self,
        graph: &EdgeGraph<V>,
        mut suspects: Vec<(V, V)>,
        changes: &mut Vec<ClosureChange<V>>,
    ) {
        let mut reach: FxHashMap<V, FxHashSet<V>> = FxHashMap::default();
        while let Some((a, b)) = suspects.pop() {
            if !self.pairs.contains(&a, &b) {
                continue;
            }
            let reachable = reach
                .entry(a.clone())
                .or_insert_with(|| graph.reachable_from(&a));
            if reachable.contains(&b) {
                continue;
            }
            tracing::trace!(source = ?a, target = ?b, "retracting cyclically supported pair");
            self.counts.remove(&(a.clone(), b.clone()));
            self.pairs.remove(&a, &b);
            let mut zeroed = vec![(a, b)];
            while let Some((x, y)) = zeroed.pop() {
                self.retract_contributions(graph, &x, &y, &mut zeroed, &mut suspects);
                changes.push(ClosureChange::Retracted(x, y));
            }
        }
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.counts.clear();
    }
}
