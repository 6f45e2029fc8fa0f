//! Set of (source, target) pairs indexed in both directions.

use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone)]
pub struct PairSet<V> {
    forward: FxHashMap<V, FxHashSet<V>>,
    backward: FxHashMap<V, FxHashSet<V>>,
    len: usize,
}

impl<V> Default for PairSet<V> {
    fn default() -> Self {
        Self {
            forward: FxHashMap::default(),
            backward: FxHashMap::default(),
            len: 0,
        }
    }
}

impl<V: Clone + Eq + Hash> PairSet<V> {
    /// Returns true if the pair was not present.
    pub fn insert(&mut self, source: &V, target: &V) -> bool {
        if !self
            .forward
            .entry(source.clone())
            .or_default()
            .insert(target.clone())
        {
            return false;
        }
        self.backward
            .entry(target.clone())
            .or_default()
            .insert(source.clone());
        self.len += 1;
        true
    }

    /// Returns true if the pair was present.
    pub fn remove(&mut self, source: &V, target: &V) -> bool {
        if !unlink(&mut self.forward, source, target) {
            return false;
        }
        unlink(&mut self.backward, target, source);
        self.len -= 1;
        true
    }

    pub fn contains(&self, source: &V, target: &V) -> bool {
        self.forward
            .get(source)
            .is_some_and(|ts| ts.contains(target))
    }

    pub fn targets<'a>(&'a self, source: &V) -> impl Iterator<Item = &'a V> + use<'a, V> {
        self.forward.get(source).into_iter().flatten()
    }

    pub fn sources<'a>(&'a self, target: &V) -> impl Iterator<Item = &'a V> + use<'a, V> {
        self.backward.get(target).into_iter().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&V, &V)> {
        self.forward
            .iter()
            .flat_map(|(s, ts)| ts.iter().map(move |t| (s, t)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
        self.len = 0;
    }
}

fn unlink<V: Eq + Hash>(index: &mut FxHashMap<V, FxHashSet<V>>, from: &V, to: &V) -> bool {
    let Some(inner) = index.get_mut(from) else {
        return false;
    };
    if !inner.remove(to) {
        return false;
    }
    if inner.is_empty() {
        index.remove(from);
    }
    true
}
