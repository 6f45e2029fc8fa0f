//! Base facts consumed by the engine.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::error::EvalError;
use crate::Tuple;

/// Read access to the current base relations.
pub trait FactBase {
    /// Arity of `relation`, or `None` if the fact base does not know it.
    fn arity(&self, relation: &str) -> Option<usize>;

    /// Every tuple currently in `relation`.
    fn scan(&self, relation: &str) -> Vec<Tuple>;
}

/// One base fact appearing or disappearing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactChange {
    pub relation: String,
    pub tuple: Tuple,
    pub inserted: bool,
}

impl FactChange {
    pub fn insert(relation: &str, tuple: Tuple) -> Self {
        Self {
            relation: relation.to_string(),
            tuple,
            inserted: true,
        }
    }

    pub fn remove(relation: &str, tuple: Tuple) -> Self {
        Self {
            relation: relation.to_string(),
            tuple,
            inserted: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StoredRelation {
    arity: usize,
    tuples: FxHashSet<Tuple>,
}

/// In-memory set-semantics fact base that records its own changes, so an
/// [`Engine`](crate::Engine) can catch up with [`Engine::sync`](crate::Engine::sync).
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    relations: BTreeMap<String, StoredRelation>,
    changes: Vec<FactChange>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `relation`. Declaring it again with the same arity is a no-op.
    pub fn declare(&mut self, relation: &str, arity: usize) -> Result<(), EvalError> {
        let stored = self
            .relations
            .entry(relation.to_string())
            .or_insert_with(|| StoredRelation {
                arity,
                tuples: FxHashSet::default(),
            });
        if stored.arity != arity {
            return Err(EvalError::ArityMismatch {
                relation: relation.to_string(),
                expected: stored.arity,
                found: arity,
            });
        }
        Ok(())
    }

    fn relation_mut(&mut self, relation: &str, tuple: &Tuple) -> Result<&mut StoredRelation, EvalError> {
        let stored = self
            .relations
            .get_mut(relation)
            .ok_or_else(|| EvalError::UnknownRelation(relation.to_string()))?;
        if stored.arity != tuple.len() {
            return Err(EvalError::ArityMismatch {
                relation: relation.to_string(),
                expected: stored.arity,
                found: tuple.len(),
            });
        }
        Ok(stored)
    }

    /// Add a fact. Returns whether it was new.
    pub fn insert(&mut self, relation: &str, tuple: Tuple) -> Result<bool, EvalError> {
        let added = self.relation_mut(relation, &tuple)?.tuples.insert(tuple.clone());
        if added {
            self.changes.push(FactChange::insert(relation, tuple));
        }
        Ok(added)
    }

    /// Remove a fact. Returns whether it was present.
    pub fn remove(&mut self, relation: &str, tuple: &Tuple) -> Result<bool, EvalError> {
        let removed = self.relation_mut(relation, tuple)?.tuples.remove(tuple);
        if removed {
            self.changes.push(FactChange::remove(relation, tuple.clone()));
        }
        Ok(removed)
    }

    pub fn contains(&self, relation: &str, tuple: &Tuple) -> bool {
        self.relations
            .get(relation)
            .is_some_and(|r| r.tuples.contains(tuple))
    }

    pub fn len(&self, relation: &str) -> usize {
        self.relations.get(relation).map_or(0, |r| r.tuples.len())
    }

    /// Changes since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<FactChange> {
        std::mem::take(&mut self.changes)
    }
}

impl FactBase for FactStore {
    fn arity(&self, relation: &str) -> Option<usize> {
        self.relations.get(relation).map(|r| r.arity)
    }

    fn scan(&self, relation: &str) -> Vec<Tuple> {
        let mut tuples: Vec<Tuple> = self
            .relations
            .get(relation)
            .map(|r| r.tuples.iter().cloned().collect())
            .unwrap_or_default();
        tuples.sort();
        tuples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn test_store_records_effective_changes() {
        let mut store = FactStore::new();
        store.declare("edge", 2).unwrap();
        let e = vec![Value::Int(1), Value::Int(2)];
        assert!(store.insert("edge", e.clone()).unwrap());
        assert!(!store.insert("edge", e.clone()).unwrap());
        assert!(store.remove("edge", &e).unwrap());
        assert!(!store.remove("edge", &e).unwrap());
        assert_eq!(
            store.take_changes(),
            vec![FactChange::insert("edge", e.clone()), FactChange::remove("edge", e)]
        );
        assert!(store.take_changes().is_empty());
    }

    #[test]
    fn test_store_rejects_bad_facts() {
        let mut store = FactStore::new();
        store.declare("node", 1).unwrap();
        assert!(store.declare("node", 2).is_err());
        assert_eq!(
            store.insert("edge", vec![Value::Int(1)]),
            Err(EvalError::UnknownRelation("edge".to_string()))
        );
        assert!(matches!(
            store.insert("node", vec![Value::Int(1), Value::Int(2)]),
            Err(EvalError::ArityMismatch { expected: 1, found: 2, .. })
        ));
        assert_eq!(store.arity("node"), Some(1));
        assert_eq!(store.arity("edge"), None);
    }
}
