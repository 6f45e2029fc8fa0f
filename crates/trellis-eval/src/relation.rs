//! Counted tuple storage for network nodes.
//!
//! A [`RelationMemory`] is a multiset of tuples partitioned by a key mask, so
//! joins can look up every stored tuple agreeing with a lookup tuple on the key
//! columns.

use rustc_hash::FxHashMap;

use crate::{Tuple, Value};

/// Multiset of tuples partitioned by the values at `key` columns.
#[derive(Debug, Clone, Default)]
pub struct RelationMemory {
    /// Columns forming the partition key; empty for a single partition.
    key: Vec<usize>,
    /// key values → tuple → multiplicity.
    partitions: FxHashMap<Tuple, FxHashMap<Tuple, i32>>,
    len: usize,
}

impl RelationMemory {
    pub fn new(key: Vec<usize>) -> Self {
        Self {
            key,
            partitions: FxHashMap::default(),
            len: 0,
        }
    }

    /// Number of distinct tuples with a non-zero count.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Project `tuple` onto the key columns.
    pub fn key_of(&self, tuple: &[Value]) -> Tuple {
        self.key.iter().map(|&c| tuple[c].clone()).collect()
    }

    /// Adjust the count of `tuple` by `delta`. Returns `(old, new)` counts.
    /// Entries are dropped once their count returns to zero.
    pub fn add(&mut self, tuple: &Tuple, delta: i32) -> (i32, i32) {
        let key = self.key_of(tuple);
        let partition = self.partitions.entry(key.clone()).or_default();
        let old = partition.get(tuple).copied().unwrap_or(0);
        let new = old + delta;
        if new == 0 {
            partition.remove(tuple);
            if partition.is_empty() {
                self.partitions.remove(&key);
            }
        } else {
            partition.insert(tuple.clone(), new);
        }
        match (old == 0, new == 0) {
            (true, false) => self.len += 1,
            (false, true) => self.len -= 1,
            _ => {}
        }
        (old, new)
    }

    pub fn count(&self, tuple: &Tuple) -> i32 {
        let key = self.key_of(tuple);
        self.partitions
            .get(&key)
            .and_then(|p| p.get(tuple))
            .copied()
            .unwrap_or(0)
    }

    /// All tuples whose key columns equal `key`, with their counts.
    pub fn lookup<'a>(&'a self, key: &Tuple) -> impl Iterator<Item = (&'a Tuple, i32)> + use<'a> {
        self.partitions
            .get(key)
            .into_iter()
            .flat_map(|p| p.iter().map(|(t, c)| (t, *c)))
    }

    /// Iterate over all tuples with their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, i32)> {
        self.partitions
            .values()
            .flat_map(|p| p.iter().map(|(t, c)| (t, *c)))
    }
}
