//! Operator nodes and their delta semantics.
//!
//! Every node consumes signed tuple deltas and produces signed tuple deltas.
//! Multiplicities are counts of derivations; only productions collapse them
//! back to set semantics.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::reachability::{ClosureObserver, ClosureStrategy, ReachabilityMaintainer};
use crate::relation::RelationMemory;
use crate::{Tuple, Value};

/// Input port of a node. Single-input nodes only use `Primary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Primary,
    Secondary,
}

/// Collects what a node produced while handling one delta.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    /// Deltas for every child of the node.
    pub messages: Vec<(Tuple, i32)>,
    /// Match-set changes of a production.
    pub changes: Vec<(Tuple, bool)>,
}

impl Emitter {
    fn emit(&mut self, tuple: Tuple, count: i32) {
        if count != 0 {
            self.messages.push((tuple, count));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Predicate {
    /// Every pair of columns holds equal values.
    ColumnsEqual(Vec<(usize, usize)>),
    ColumnsDiffer(usize, usize),
    ColumnIs(usize, Value),
}

impl Predicate {
    fn holds(&self, tuple: &[Value]) -> bool {
        match self {
            Predicate::ColumnsEqual(pairs) => pairs.iter().all(|&(a, b)| tuple[a] == tuple[b]),
            Predicate::ColumnsDiffer(a, b) => tuple[*a] != tuple[*b],
            Predicate::ColumnIs(col, value) => tuple[*col] == *value,
        }
    }
}

#[derive(Debug)]
pub(crate) struct JoinNode {
    primary: RelationMemory,
    secondary: RelationMemory,
    /// Secondary columns appended to the primary tuple.
    secondary_rest: Vec<usize>,
}

impl JoinNode {
    pub fn new(primary_key: Vec<usize>, secondary_key: Vec<usize>, secondary_rest: Vec<usize>) -> Self {
        Self {
            primary: RelationMemory::new(primary_key),
            secondary: RelationMemory::new(secondary_key),
            secondary_rest,
        }
    }

    fn combine(&self, left: &Tuple, right: &Tuple) -> Tuple {
        let mut out = left.clone();
        out.extend(self.secondary_rest.iter().map(|&c| right[c].clone()));
        out
    }

    fn update(&mut self, slot: Slot, tuple: &Tuple, count: i32, out: &mut Emitter) {
        match slot {
            Slot::Primary => {
                self.primary.add(tuple, count);
                let key = self.primary.key_of(tuple);
                for (right, rc) in self.secondary.lookup(&key) {
                    out.emit(self.combine(tuple, right), count * rc);
                }
            }
            Slot::Secondary => {
                self.secondary.add(tuple, count);
                let key = self.secondary.key_of(tuple);
                for (left, lc) in self.primary.lookup(&key) {
                    out.emit(self.combine(left, tuple), lc * count);
                }
            }
        }
    }
}

/// Passes primary tuples that have no secondary tuple with the same key.
#[derive(Debug)]
pub(crate) struct AntiJoinNode {
    primary: RelationMemory,
    secondary_key: Vec<usize>,
    secondary: FxHashMap<Tuple, i32>,
}

impl AntiJoinNode {
    pub fn new(primary_key: Vec<usize>, secondary_key: Vec<usize>) -> Self {
        Self {
            primary: RelationMemory::new(primary_key),
            secondary_key,
            secondary: FxHashMap::default(),
        }
    }

    fn blocked(&self, key: &Tuple) -> bool {
        self.secondary.get(key).is_some_and(|&c| c > 0)
    }

    fn update(&mut self, slot: Slot, tuple: &Tuple, count: i32, out: &mut Emitter) {
        match slot {
            Slot::Primary => {
                self.primary.add(tuple, count);
                if !self.blocked(&self.primary.key_of(tuple)) {
                    out.emit(tuple.clone(), count);
                }
            }
            Slot::Secondary => {
                let key: Tuple = self.secondary_key.iter().map(|&c| tuple[c].clone()).collect();
                let old = self.secondary.get(&key).copied().unwrap_or(0);
                let new = old + count;
                if new == 0 {
                    self.secondary.remove(&key);
                } else {
                    self.secondary.insert(key.clone(), new);
                }
                let sign = match (old > 0, new > 0) {
                    (false, true) => -1,
                    (true, false) => 1,
                    _ => return,
                };
                for (left, lc) in self.primary.lookup(&key) {
                    out.emit(left.clone(), sign * lc);
                }
            }
        }
    }
}

type PendingPairs = Rc<RefCell<Vec<(Tuple, i32)>>>;

struct PairForwarder(PendingPairs);

impl ClosureObserver<Value> for PairForwarder {
    fn tuple_derived(&mut self, source: &Value, target: &Value) {
        self.0
            .borrow_mut()
            .push((vec![source.clone(), target.clone()], 1));
    }

    fn tuple_retracted(&mut self, source: &Value, target: &Value) {
        self.0
            .borrow_mut()
            .push((vec![source.clone(), target.clone()], -1));
    }
}

/// Transitive closure of the binary tuples it receives.
///
/// On a recursive cycle its edges may be supported by its own pairs, so it
/// runs delete-and-rederive like a production: removing the last instance
/// of an edge first retracts every pair from a vertex reaching the edge to
/// a vertex reached from it, and those pairs are re-inserted in the
/// rederive phase only if the remaining edges still connect them.
pub(crate) struct ClosureNode {
    maintainer: ReachabilityMaintainer<Value>,
    pending: PendingPairs,
    /// Pairs retracted downstream but still present in the maintainer.
    parked: BTreeSet<Tuple>,
    rederive: bool,
}

impl std::fmt::Debug for ClosureNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.maintainer, f)
    }
}

impl ClosureNode {
    pub fn new(strategy: ClosureStrategy) -> Self {
        let pending = PendingPairs::default();
        let mut maintainer = ReachabilityMaintainer::new(strategy);
        maintainer.attach(Box::new(PairForwarder(pending.clone())));
        Self {
            maintainer,
            pending,
            parked: BTreeSet::new(),
            rederive: false,
        }
    }

    pub fn set_rederive(&mut self, rederive: bool) {
        self.rederive = rederive;
    }

    pub fn is_rederiving(&self) -> bool {
        self.rederive
    }

    pub fn has_rederivables(&self) -> bool {
        !self.parked.is_empty()
    }

    fn update(&mut self, tuple: &Tuple, count: i32, out: &mut Emitter) -> Result<(), String> {
        let [source, target] = tuple.as_slice() else {
            return Err(format!("closure edge must be binary, got {tuple:?}"));
        };
        for _ in 0..count.unsigned_abs() {
            if count > 0 {
                self.maintainer.insert_edge(source.clone(), target.clone());
            } else {
                if self.rederive && self.maintainer.graph().multiplicity(source, target) == 1 {
                    self.overdelete(source, target, out);
                }
                self.maintainer.delete_edge(source, target);
            }
            self.forward(out);
        }
        Ok(())
    }

    /// Pass the maintainer's zero crossings on, except for parked pairs,
    /// which downstream already saw retracted.
    fn forward(&mut self, out: &mut Emitter) {
        let changes: Vec<(Tuple, i32)> = self.pending.borrow_mut().drain(..).collect();
        for (pair, sign) in changes {
            if self.parked.contains(&pair) {
                if sign < 0 {
                    self.parked.remove(&pair);
                }
                continue;
            }
            out.emit(pair, sign);
        }
    }

    fn overdelete(&mut self, source: &Value, target: &Value, out: &mut Emitter) {
        let mut sources = self.maintainer.reachable_sources(source);
        sources.push(source.clone());
        let mut targets = self.maintainer.reachable_targets(target);
        targets.push(target.clone());
        for a in &sources {
            for b in &targets {
                if !self.maintainer.is_reachable(a, b) {
                    continue;
                }
                let pair = vec![a.clone(), b.clone()];
                if self.parked.insert(pair.clone()) {
                    out.emit(pair, -1);
                }
            }
        }
    }

    fn rederive_one(&mut self, out: &mut Emitter) {
        if let Some(pair) = self.parked.pop_first()
            && self.maintainer.is_reachable(&pair[0], &pair[1])
        {
            out.emit(pair, 1);
        }
    }

    /// Pairs downstream currently sees.
    fn visible(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.maintainer
            .pairs()
            .into_iter()
            .map(|(s, t)| vec![s, t])
            .filter(|pair| !self.parked.contains(pair))
    }
}

/// The match set of one query: a uniqueness enforcer over the union of its
/// clause roots. On a recursive cycle it runs delete-and-rederive: a
/// retracted tuple with remaining derivations is parked and re-inserted in
/// the rederive phase, so that support flowing only through the cycle
/// drains away first.
#[derive(Debug)]
pub(crate) struct ProductionNode {
    pub query: String,
    memory: FxHashMap<Tuple, u32>,
    rederivable: BTreeMap<Tuple, u32>,
    rederive: bool,
}

impl ProductionNode {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            memory: FxHashMap::default(),
            rederivable: BTreeMap::new(),
            rederive: false,
        }
    }

    pub fn set_rederive(&mut self, rederive: bool) {
        self.rederive = rederive;
    }

    pub fn is_rederiving(&self) -> bool {
        self.rederive
    }

    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.memory.keys()
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.memory.contains_key(tuple)
    }

    pub fn has_rederivables(&self) -> bool {
        !self.rederivable.is_empty()
    }

    fn update(&mut self, tuple: &Tuple, count: i32, out: &mut Emitter) -> Result<(), String> {
        for _ in 0..count.unsigned_abs() {
            if count > 0 {
                self.insert(tuple, out);
            } else {
                self.delete(tuple, out)?;
            }
        }
        Ok(())
    }

    fn insert(&mut self, tuple: &Tuple, out: &mut Emitter) {
        if self.rederive
            && let Some(parked) = self.rederivable.get_mut(tuple)
        {
            *parked += 1;
            return;
        }
        let c = self.memory.entry(tuple.clone()).or_insert(0);
        *c += 1;
        if *c == 1 {
            out.emit(tuple.clone(), 1);
            out.changes.push((tuple.clone(), true));
        }
    }

    fn delete(&mut self, tuple: &Tuple, out: &mut Emitter) -> Result<(), String> {
        if self.rederive {
            if let Some(parked) = self.rederivable.get_mut(tuple) {
                if self.memory.contains_key(tuple) {
                    return Err(format!(
                        "{tuple:?} of `{}` is both derived and awaiting rederivation",
                        self.query
                    ));
                }
                *parked -= 1;
                if *parked == 0 {
                    self.rederivable.remove(tuple);
                }
                return Ok(());
            }
            let Some(c) = self.memory.remove(tuple) else {
                return Err(format!("retracting underived {tuple:?} of `{}`", self.query));
            };
            if c > 1 {
                self.rederivable.insert(tuple.clone(), c - 1);
            }
        } else {
            let Some(c) = self.memory.get_mut(tuple) else {
                return Err(format!("retracting underived {tuple:?} of `{}`", self.query));
            };
            *c -= 1;
            if *c > 0 {
                return Ok(());
            }
            self.memory.remove(tuple);
        }
        out.emit(tuple.clone(), -1);
        out.changes.push((tuple.clone(), false));
        Ok(())
    }

    fn rederive_one(&mut self, out: &mut Emitter) {
        if let Some((tuple, c)) = self.rederivable.pop_first() {
            self.memory.insert(tuple.clone(), c);
            out.emit(tuple.clone(), 1);
            out.changes.push((tuple, true));
        }
    }
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Input { relation: String, memory: RelationMemory },
    Constant(Tuple),
    Project(Vec<usize>),
    Filter(Predicate),
    Join(JoinNode),
    AntiJoin(AntiJoinNode),
    Closure(ClosureNode),
    Production(ProductionNode),
}

/// What the dependency classifier needs to know about a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTraits {
    /// Keeps state across deltas.
    pub receiver: bool,
    /// Produces the same result whatever order its deltas arrive in.
    pub order_indifferent: bool,
    /// Currently running delete-and-rederive.
    pub rederiving: bool,
}

impl NodeKind {
    pub fn label(&self) -> String {
        match self {
            NodeKind::Input { relation, .. } => format!("input {relation}"),
            NodeKind::Constant(t) => format!("constant {t:?}"),
            NodeKind::Project(mask) => format!("project {mask:?}"),
            NodeKind::Filter(p) => format!("filter {p:?}"),
            NodeKind::Join(_) => "join".to_string(),
            NodeKind::AntiJoin(_) => "antijoin".to_string(),
            NodeKind::Closure(_) => "closure".to_string(),
            NodeKind::Production(p) => format!("production {}", p.query),
        }
    }

    pub fn traits(&self) -> NodeTraits {
        let (receiver, order_indifferent) = match self {
            NodeKind::Constant(_) | NodeKind::Project(_) | NodeKind::Filter(_) => (false, true),
            NodeKind::Input { .. }
            | NodeKind::Join(_)
            | NodeKind::AntiJoin(_)
            | NodeKind::Production(_) => (true, true),
            // deleting an edge before its insertion arrived would be lost
            NodeKind::Closure(_) => (true, false),
        };
        let rederiving = match self {
            NodeKind::Production(p) => p.is_rederiving(),
            NodeKind::Closure(c) => c.is_rederiving(),
            _ => false,
        };
        NodeTraits {
            receiver,
            order_indifferent,
            rederiving,
        }
    }

    pub(crate) fn update(
        &mut self,
        slot: Slot,
        tuple: &Tuple,
        count: i32,
        out: &mut Emitter,
    ) -> Result<(), String> {
        match self {
            NodeKind::Input { memory, .. } => {
                memory.add(tuple, count);
                out.emit(tuple.clone(), count);
            }
            NodeKind::Constant(_) => out.emit(tuple.clone(), count),
            NodeKind::Project(mask) => {
                out.emit(mask.iter().map(|&c| tuple[c].clone()).collect(), count)
            }
            NodeKind::Filter(predicate) => {
                if predicate.holds(tuple) {
                    out.emit(tuple.clone(), count);
                }
            }
            NodeKind::Join(join) => join.update(slot, tuple, count, out),
            NodeKind::AntiJoin(anti) => anti.update(slot, tuple, count, out),
            NodeKind::Closure(closure) => closure.update(tuple, count, out)?,
            NodeKind::Production(production) => production.update(tuple, count, out)?,
        }
        Ok(())
    }

    pub(crate) fn rederive_one(&mut self, out: &mut Emitter) {
        match self {
            NodeKind::Production(production) => production.rederive_one(out),
            NodeKind::Closure(closure) => closure.rederive_one(out),
            _ => {}
        }
    }

    pub(crate) fn has_rederivables(&self) -> bool {
        match self {
            NodeKind::Production(p) => p.has_rederivables(),
            NodeKind::Closure(c) => c.has_rederivables(),
            _ => false,
        }
    }

    /// Current contents, for initialising a newly attached child.
    pub(crate) fn pull(&self) -> Vec<(Tuple, i32)> {
        match self {
            NodeKind::Input { memory, .. } => memory.iter().map(|(t, c)| (t.clone(), c)).collect(),
            NodeKind::Production(p) => p.tuples().map(|t| (t.clone(), 1)).collect(),
            NodeKind::Closure(c) => c.visible().map(|pair| (pair, 1)).collect(),
            _ => Vec::new(),
        }
    }
}
