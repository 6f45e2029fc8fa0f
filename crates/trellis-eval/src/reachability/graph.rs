//! Directed multigraph of base edges.

use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

/// Edge multiset with forward and backward adjacency. Self-loops are
/// rejected by the caller before they reach here.
#[derive(Debug, Clone)]
pub struct EdgeGraph<V> {
    forward: FxHashMap<V, FxHashMap<V, usize>>,
    backward: FxHashMap<V, FxHashMap<V, usize>>,
    edge_count: usize,
}

impl<V> Default for EdgeGraph<V> {
    fn default() -> Self {
        Self {
            forward: FxHashMap::default(),
            backward: FxHashMap::default(),
            edge_count: 0,
        }
    }
}

impl<V: Clone + Eq + Hash> EdgeGraph<V> {
    /// Add one instance of `source → target`. Returns the new multiplicity.
    pub fn insert(&mut self, source: &V, target: &V) -> usize {
        *self
            .backward
            .entry(target.clone())
            .or_default()
            .entry(source.clone())
            .or_default() += 1;
        let m = self
            .forward
            .entry(source.clone())
            .or_default()
            .entry(target.clone())
            .or_default();
        *m += 1;
        self.edge_count += 1;
        *m
    }

    /// Remove one instance of `source → target`. Returns the remaining
    /// multiplicity, or `None` if the edge was absent.
    pub fn remove(&mut self, source: &V, target: &V) -> Option<usize> {
        let remaining = decrement(&mut self.forward, source, target)?;
        decrement(&mut self.backward, target, source);
        self.edge_count -= 1;
        Some(remaining)
    }

    pub fn multiplicity(&self, source: &V, target: &V) -> usize {
        self.forward
            .get(source)
            .and_then(|ts| ts.get(target))
            .copied()
            .unwrap_or(0)
    }

    /// Direct successors of `source` with edge multiplicities.
    pub fn targets<'a>(&'a self, source: &V) -> impl Iterator<Item = (&'a V, usize)> + use<'a, V> {
        self.forward
            .get(source)
            .into_iter()
            .flat_map(|ts| ts.iter().map(|(t, m)| (t, *m)))
    }

    /// Direct predecessors of `target` with edge multiplicities.
    pub fn sources<'a>(&'a self, target: &V) -> impl Iterator<Item = (&'a V, usize)> + use<'a, V> {
        self.backward
            .get(target)
            .into_iter()
            .flat_map(|ss| ss.iter().map(|(s, m)| (s, *m)))
    }

    /// Vertices reachable from `source` over paths of length ≥ 1.
    pub fn reachable_from(&self, source: &V) -> FxHashSet<V> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<&V> = self.targets(source).map(|(t, _)| t).collect();
        while let Some(v) = stack.pop() {
            if seen.insert(v.clone()) {
                stack.extend(self.targets(v).map(|(t, _)| t));
            }
        }
        seen
    }

    /// Every distinct edge with its multiplicity.
    pub fn edges(&self) -> impl Iterator<Item = (&V, &V, usize)> {
        self.forward
            .iter()
            .flat_map(|(s, ts)| ts.iter().map(move |(t, m)| (s, t, *m)))
    }

    /// Total number of edge instances.
    pub fn len(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count == 0
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
        self.edge_count = 0;
    }
}

fn decrement<V: Eq + Hash>(
    index: &mut FxHashMap<V, FxHashMap<V, usize>>,
    from: &V,
    to: &V,
) -> Option<usize> {
    let inner = index.get_mut(from)?;
    let m = inner.get_mut(to)?;
    *m -= 1;
    let remaining = *m;
    if remaining == 0 {
        inner.remove(to);
        if inner.is_empty() {
            index.remove(from);
        }
    }
    Some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplicity_tracking() {
        let mut g = EdgeGraph::default();
        assert_eq!(g.insert(&1, &2), 1);
        assert_eq!(g.insert(&1, &2), 2);
        assert_eq!(g.len(), 2);
        assert_eq!(g.remove(&1, &2), Some(1));
        assert_eq!(g.remove(&1, &2), Some(0));
        assert_eq!(g.remove(&1, &2), None);
        assert!(g.is_empty());
        assert_eq!(g.sources(&2).count(), 0);
    }

    #[test]
    fn test_reachable_from_follows_cycles() {
        let mut g = EdgeGraph::default();
        g.insert(&1, &2);
        g.insert(&2, &1);
        g.insert(&2, &3);
        let reach = g.reachable_from(&1);
        assert!(reach.contains(&1));
        assert!(reach.contains(&2));
        assert!(reach.contains(&3));
        assert!(g.reachable_from(&3).is_empty());
    }
}
