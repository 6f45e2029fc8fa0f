//! The evaluation session: program, network, scheduler and listeners.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rustc_hash::FxHashMap;
use trellis_ir::{ConstraintKind, Program};

use crate::cancel::CancellationToken;
use crate::classifier::{classify, components, GroupId};
use crate::error::{EvalError, PlanError};
use crate::facts::{FactBase, FactChange, FactStore};
use crate::network::{Network, NodeId, NodeKind, Slot};
use crate::options::EngineOptions;
use crate::planner::{check_negation, plan_query, ClausePlan};
use crate::scheduler::{FlushStats, GroupKind, Scheduler};
use crate::{Tuple, Value};

/// Receives net changes of one query's match set after each flush.
pub trait MatchListener {
    fn on_change(&mut self, tuple: &Tuple, inserted: bool);
}

impl<F: FnMut(&Tuple, bool)> MatchListener for F {
    fn on_change(&mut self, tuple: &Tuple, inserted: bool) {
        self(tuple, inserted)
    }
}

/// Handle returned by [`Engine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

struct Subscription {
    id: ListenerId,
    query: String,
    listener: Box<dyn MatchListener>,
}

/// Incrementally maintained match sets of a program's queries.
///
/// Base fact changes are posted with [`apply_change`](Self::apply_change)
/// and propagated by [`flush`](Self::flush); queries always reflect the
/// state after the last completed flush.
pub struct Engine {
    program: Program,
    options: EngineOptions,
    plans: BTreeMap<String, Vec<ClausePlan>>,
    network: Network,
    scheduler: Scheduler,
    subscriptions: Vec<Subscription>,
    next_listener: u32,
    poisoned: Option<String>,
}

impl Engine {
    /// Compile `program` and evaluate it over the facts in `facts`.
    pub fn new(program: Program, facts: &impl FactBase, options: EngineOptions) -> Result<Self, EvalError> {
        let mut engine = Self {
            program: Program::default(),
            options,
            plans: BTreeMap::new(),
            network: Network::new(options.closure),
            scheduler: Scheduler::default(),
            subscriptions: Vec::new(),
            next_listener: 0,
            poisoned: None,
        };
        engine.add_queries(program, facts)?;
        Ok(engine)
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Add the views and queries of `program`. New queries may call queries
    /// added earlier. Either every query compiles and is added, or the
    /// engine is left as it was.
    pub fn add_queries(&mut self, program: Program, facts: &impl FactBase) -> Result<(), EvalError> {
        self.check_usable()?;
        let mut merged = self.program.clone();
        merged.merge(program.clone()).map_err(PlanError::from)?;
        check_negation(&merged)?;

        let mut plans = Vec::with_capacity(program.queries().len());
        for query in program.queries() {
            plans.push((
                query.name.clone(),
                plan_query(&merged, query, self.options.planner)?,
            ));
        }

        let mut seeds: BTreeMap<String, Vec<Tuple>> = BTreeMap::new();
        for query in program.queries() {
            for clause in &query.clauses {
                for constraint in &clause.constraints {
                    if let ConstraintKind::Relation { view, .. } = &constraint.kind
                        && self.network.input(view).is_none()
                        && !seeds.contains_key(view)
                    {
                        seeds.insert(view.clone(), scan_view(&merged, facts, view)?);
                    }
                }
            }
        }

        self.program = merged;
        let mut ext = self.network.begin_extension();
        for (name, _) in &plans {
            self.network.add_production(name);
        }
        for (_, clause_plans) in &plans {
            for plan in clause_plans {
                if let Err(message) = self.network.compile_clause(plan, &mut ext) {
                    return Err(self.poison(EvalError::Internal {
                        node: ext.first_new.0,
                        group: None,
                        message,
                    }));
                }
            }
        }
        for (view, node) in &ext.new_inputs {
            for tuple in seeds.remove(view).unwrap_or_default() {
                ext.initial.push((*node, Slot::Primary, tuple, 1));
            }
        }
        tracing::debug!(
            queries = plans.len(),
            nodes = self.network.len() - ext.first_new.0 as usize,
            "queries compiled"
        );

        self.reclassify();
        for (node, slot, tuple, count) in ext.initial {
            self.scheduler.post(node, slot, tuple, count);
        }
        self.plans.extend(plans);
        self.flush()
    }

    fn reclassify(&mut self) {
        let edges = self.network.edges();
        let comps = components(self.network.len(), &edges);
        let cyclic: Vec<NodeId> = comps.cyclic_nodes().collect();
        for node in cyclic {
            self.network.enable_rederive(node);
        }
        let classification = classify(&comps, &edges, &self.network.traits());
        self.scheduler.rebuild(&classification, &self.network);
    }

    /// Post one base fact change. It takes effect at the next flush.
    /// Base relations are sets: inserting a present fact or removing an
    /// absent one does nothing. Changes to declared relations no query
    /// reads are ignored.
    pub fn apply_change(&mut self, change: &FactChange) -> Result<(), EvalError> {
        self.check_usable()?;
        let view = self
            .program
            .view(&change.relation)
            .ok_or_else(|| EvalError::UnknownRelation(change.relation.clone()))?;
        if view.arity != change.tuple.len() {
            return Err(EvalError::ArityMismatch {
                relation: change.relation.clone(),
                expected: view.arity,
                found: change.tuple.len(),
            });
        }
        if let Some(node) = self.network.input(&change.relation) {
            let present = self.network.input_count(node, &change.tuple)
                + self.scheduler.queued(node, Slot::Primary, &change.tuple)
                > 0;
            if present == change.inserted {
                tracing::debug!(
                    relation = %change.relation,
                    tuple = ?change.tuple,
                    inserted = change.inserted,
                    "redundant fact change ignored"
                );
                return Ok(());
            }
            let count = if change.inserted { 1 } else { -1 };
            self.scheduler
                .post(node, Slot::Primary, change.tuple.clone(), count);
        }
        Ok(())
    }

    /// Apply and flush every change `store` recorded since the last sync.
    pub fn sync(&mut self, store: &mut FactStore) -> Result<(), EvalError> {
        for change in store.take_changes() {
            self.apply_change(&change)?;
        }
        self.flush()
    }

    /// Propagate every posted change to a fixpoint.
    pub fn flush(&mut self) -> Result<(), EvalError> {
        self.run_flush(None)
    }

    /// Like [`flush`](Self::flush), but gives up between group activations
    /// once `token` is cancelled. A later flush resumes where this one
    /// stopped.
    pub fn flush_with(&mut self, token: &CancellationToken) -> Result<(), EvalError> {
        self.run_flush(Some(token))
    }

    fn run_flush(&mut self, token: Option<&CancellationToken>) -> Result<(), EvalError> {
        self.check_usable()?;
        match self.scheduler.flush(&mut self.network, token) {
            Ok(()) => {}
            Err(err @ EvalError::Internal { .. }) => return Err(self.poison(err)),
            Err(err) => return Err(err),
        }
        self.notify_listeners();
        Ok(())
    }

    fn notify_listeners(&mut self) {
        let changes = self.scheduler.take_changes();
        if changes.is_empty() {
            return;
        }
        let mut order: Vec<(NodeId, Tuple)> = Vec::new();
        let mut net: FxHashMap<(NodeId, Tuple), i32> = FxHashMap::default();
        for (node, tuple, inserted) in changes {
            let key = (node, tuple);
            let entry = net.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                0
            });
            *entry += if inserted { 1 } else { -1 };
        }
        for key in order {
            let delta = net[&key];
            if delta == 0 {
                continue;
            }
            let (node, tuple) = key;
            let NodeKind::Production(production) = self.network.node(node) else {
                continue;
            };
            for sub in &mut self.subscriptions {
                if sub.query == production.query {
                    sub.listener.on_change(&tuple, delta > 0);
                }
            }
        }
    }

    fn poison(&mut self, err: EvalError) -> EvalError {
        tracing::error!(error = %err, "engine poisoned");
        self.poisoned = Some(err.to_string());
        err
    }

    fn check_usable(&self) -> Result<(), EvalError> {
        match &self.poisoned {
            Some(message) => Err(EvalError::Poisoned(message.clone())),
            None => Ok(()),
        }
    }

    fn matches<'a>(
        &'a self,
        query: &str,
        prefix: &'a [Option<Value>],
    ) -> Result<impl Iterator<Item = &'a Tuple> + use<'a>, EvalError> {
        let production = self
            .network
            .production_node(query)
            .ok_or_else(|| EvalError::UnknownQuery(query.to_string()))?;
        let arity = self.program.query(query).map_or(0, |q| q.arity());
        if prefix.len() > arity {
            return Err(EvalError::ArityMismatch {
                relation: query.to_string(),
                expected: arity,
                found: prefix.len(),
            });
        }
        Ok(production.tuples().filter(move |tuple| {
            prefix
                .iter()
                .zip(tuple.iter())
                .all(|(bound, value)| bound.as_ref().is_none_or(|b| b == value))
        }))
    }

    /// Whether some match agrees with every bound position of `prefix`.
    /// Positions past the end of `prefix` are unbound.
    pub fn has_match(&self, query: &str, prefix: &[Option<Value>]) -> Result<bool, EvalError> {
        Ok(self.matches(query, prefix)?.next().is_some())
    }

    pub fn count_matches(&self, query: &str, prefix: &[Option<Value>]) -> Result<usize, EvalError> {
        Ok(self.matches(query, prefix)?.count())
    }

    /// Matching tuples, sorted.
    pub fn all_matches(&self, query: &str, prefix: &[Option<Value>]) -> Result<Vec<Tuple>, EvalError> {
        let mut out: Vec<Tuple> = self.matches(query, prefix)?.cloned().collect();
        out.sort();
        Ok(out)
    }

    /// Notify `listener` of every later change to the matches of `query`.
    /// Listeners of the same query are called in subscription order.
    pub fn subscribe(
        &mut self,
        query: &str,
        listener: Box<dyn MatchListener>,
    ) -> Result<ListenerId, EvalError> {
        if self.network.production(query).is_none() {
            return Err(EvalError::UnknownQuery(query.to_string()));
        }
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.subscriptions.push(Subscription {
            id,
            query: query.to_string(),
            listener,
        });
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> Option<Box<dyn MatchListener>> {
        let pos = self.subscriptions.iter().position(|s| s.id == id)?;
        Some(self.subscriptions.remove(pos).listener)
    }

    /// The join trees of every clause of `query`.
    pub fn describe_plans(&self, query: &str) -> Result<String, EvalError> {
        let plans = self
            .plans
            .get(query)
            .ok_or_else(|| EvalError::UnknownQuery(query.to_string()))?;
        Ok(plans.iter().map(ClausePlan::describe).collect())
    }

    pub fn plans(&self, query: &str) -> Option<&[ClausePlan]> {
        self.plans.get(query).map(Vec::as_slice)
    }

    /// The communication group holding the production of `query`.
    pub fn query_group(&self, query: &str) -> Option<(GroupId, GroupKind)> {
        let group = self.scheduler.group_of(self.network.production(query)?)?;
        Some((group, self.scheduler.group_kind(group)?))
    }

    /// Groups activated by the last flush, in activation order.
    pub fn last_flush_trace(&self) -> &[GroupId] {
        self.scheduler.trace()
    }

    pub fn last_flush_stats(&self) -> FlushStats {
        self.scheduler.stats()
    }

    pub fn node_count(&self) -> usize {
        self.network.len()
    }

    pub fn group_count(&self) -> usize {
        self.scheduler.group_count()
    }

    /// Whether changes are waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.scheduler.is_idle()
    }

    /// Queries in declaration order.
    pub fn query_names(&self) -> Vec<&str> {
        self.program.queries().iter().map(|q| q.name.as_str()).collect()
    }

    /// Relations read by some query.
    pub fn used_relations(&self) -> BTreeSet<&str> {
        self.program
            .views()
            .iter()
            .map(|v| v.name.as_str())
            .filter(|name| self.network.input(name).is_some())
            .collect()
    }
}

fn scan_view(program: &Program, facts: &impl FactBase, view: &str) -> Result<Vec<Tuple>, EvalError> {
    let arity = program
        .view(view)
        .map(|v| v.arity)
        .ok_or_else(|| EvalError::UnknownRelation(view.to_string()))?;
    if let Some(found) = facts.arity(view)
        && found != arity
    {
        return Err(EvalError::ArityMismatch {
            relation: view.to_string(),
            expected: arity,
            found,
        });
    }
    let tuples = facts.scan(view);
    if let Some(bad) = tuples.iter().find(|t| t.len() != arity) {
        return Err(EvalError::ArityMismatch {
            relation: view.to_string(),
            expected: arity,
            found: bad.len(),
        });
    }
    Ok(tuples)
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("queries", &self.query_names())
            .field("nodes", &self.network.len())
            .field("groups", &self.scheduler.group_count())
            .field("subscriptions", &self.subscriptions.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use trellis_ir::ProgramBuilder;

    use super::*;
    use crate::options::ClosureStrategy;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    fn pair(a: i64, b: i64) -> Tuple {
        vec![int(a), int(b)]
    }

    fn path_program() -> Program {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("path", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]);
            });
            q.clause(|c| {
                c.relation("edge", &["x", "z"]).call("path", &["z", "y"]);
            });
        })
        .unwrap();
        b.build()
    }

    fn store_with_edges(edges: &[(i64, i64)]) -> FactStore {
        let mut store = FactStore::new();
        store.declare("edge", 2).unwrap();
        for &(a, b) in edges {
            store.insert("edge", pair(a, b)).unwrap();
        }
        store.take_changes();
        store
    }

    #[test]
    fn test_recursive_path_follows_deletions() {
        let mut store = store_with_edges(&[(1, 2), (2, 3), (3, 1)]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        assert_eq!(engine.count_matches("path", &[]).unwrap(), 9);
        assert!(matches!(engine.query_group("path"), Some((_, GroupKind::Recursive))));

        store.remove("edge", &pair(3, 1)).unwrap();
        engine.sync(&mut store).unwrap();
        assert_eq!(
            engine.all_matches("path", &[]).unwrap(),
            vec![pair(1, 2), pair(1, 3), pair(2, 3)]
        );
        assert!(engine.has_match("path", &[Some(int(1)), Some(int(3))]).unwrap());
        assert!(!engine.has_match("path", &[Some(int(3))]).unwrap());
        assert_eq!(engine.count_matches("path", &[None, Some(int(3))]).unwrap(), 2);
    }

    #[test]
    fn test_listener_sees_net_changes_only() {
        let mut store = store_with_edges(&[(1, 2)]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        let log: Rc<RefCell<Vec<(Tuple, bool)>>> = Rc::default();
        let sink = log.clone();
        let id = engine
            .subscribe(
                "path",
                Box::new(move |t: &Tuple, inserted: bool| sink.borrow_mut().push((t.clone(), inserted))),
            )
            .unwrap();

        store.insert("edge", pair(2, 3)).unwrap();
        engine.sync(&mut store).unwrap();
        let mut seen = log.borrow_mut().drain(..).collect::<Vec<_>>();
        seen.sort();
        assert_eq!(seen, vec![(pair(1, 3), true), (pair(2, 3), true)]);

        // inserted and removed before the flush: nothing to report
        store.insert("edge", pair(3, 4)).unwrap();
        store.remove("edge", &pair(3, 4)).unwrap();
        engine.sync(&mut store).unwrap();
        assert!(log.borrow().is_empty());

        assert!(engine.unsubscribe(id).is_some());
        store.remove("edge", &pair(1, 2)).unwrap();
        engine.sync(&mut store).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_negation_and_transitive_call() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.relation("node", 1).unwrap();
        b.query("link", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("unreachable", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("node", &["x"])
                    .relation("node", &["y"])
                    .negated_call("reach", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("reach", &["x", "y"], |q| {
            q.clause(|c| {
                c.transitive_call("link", &["x", "y"]);
            });
        })
        .unwrap();
        let program = b.build();

        let mut store = FactStore::new();
        store.declare("edge", 2).unwrap();
        store.declare("node", 1).unwrap();
        for n in 1..=3 {
            store.insert("node", vec![int(n)]).unwrap();
        }
        store.insert("edge", pair(1, 2)).unwrap();
        store.insert("edge", pair(2, 3)).unwrap();
        store.take_changes();

        for strategy in [ClosureStrategy::Counting, ClosureStrategy::DeleteAndRederive] {
            let mut store = store.clone();
            let options = EngineOptions {
                closure: strategy,
                ..Default::default()
            };
            let mut engine = Engine::new(program.clone(), &store, options).unwrap();
            assert_eq!(
                engine.all_matches("reach", &[]).unwrap(),
                vec![pair(1, 2), pair(1, 3), pair(2, 3)]
            );
            assert_eq!(engine.count_matches("unreachable", &[]).unwrap(), 6);
            assert!(!engine.has_match("unreachable", &[Some(int(1)), Some(int(3))]).unwrap());

            store.remove("edge", &pair(2, 3)).unwrap();
            engine.sync(&mut store).unwrap();
            assert_eq!(engine.all_matches("reach", &[]).unwrap(), vec![pair(1, 2)]);
            assert!(engine.has_match("unreachable", &[Some(int(1)), Some(int(3))]).unwrap());
            assert_eq!(engine.count_matches("unreachable", &[]).unwrap(), 8);
        }
    }

    #[test]
    fn test_failed_compilation_leaves_engine_untouched() {
        let store = store_with_edges(&[(1, 2)]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        let nodes = engine.node_count();

        let mut b = ProgramBuilder::new();
        b.query("bad", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x"]);
            });
        })
        .unwrap();
        let err = engine.add_queries(b.build(), &store).unwrap_err();
        assert!(matches!(err, EvalError::Plan(PlanError::ArityMismatch { .. })));
        assert_eq!(engine.node_count(), nodes);
        assert!(engine.program().query("bad").is_none());

        let mut b = ProgramBuilder::new();
        b.query("path", &["x"], |_| {}).unwrap();
        let err = engine.add_queries(b.build(), &store).unwrap_err();
        assert!(matches!(err, EvalError::Plan(PlanError::Program(_))));
    }

    #[test]
    fn test_negation_through_recursion_leaves_engine_untouched() {
        let mut store = store_with_edges(&[(1, 2)]);
        store.declare("node", 1).unwrap();
        store.insert("node", vec![int(1)]).unwrap();
        store.take_changes();
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        let nodes = engine.node_count();

        let mut b = ProgramBuilder::new();
        b.relation("node", 1).unwrap();
        b.query("odd", &["x"], |q| {
            q.clause(|c| {
                c.relation("node", &["x"]).negated_call("odd", &["x"]);
            });
        })
        .unwrap();
        let err = engine.add_queries(b.build(), &store).unwrap_err();
        assert!(matches!(err, EvalError::Plan(PlanError::NegatedRecursiveCall { .. })));
        assert_eq!(engine.node_count(), nodes);
        assert!(engine.program().query("odd").is_none());
        assert!(engine.program().view("node").is_none());

        let mut b = ProgramBuilder::new();
        b.query("one_way", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).negated_call("path", &["y", "x"]);
            });
        })
        .unwrap();
        engine.add_queries(b.build(), &store).unwrap();
        assert_eq!(engine.all_matches("one_way", &[]).unwrap(), vec![pair(1, 2)]);
    }

    #[test]
    fn test_added_query_sees_existing_state() {
        let mut store = store_with_edges(&[(1, 2), (2, 3)]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        store.insert("edge", pair(3, 4)).unwrap();
        engine.sync(&mut store).unwrap();

        let mut b = ProgramBuilder::new();
        b.query("from_one", &["y"], |q| {
            q.clause(|c| {
                c.call("path", &["x", "y"]).constant("x", 1);
            });
        })
        .unwrap();
        engine.add_queries(b.build(), &store).unwrap();
        assert_eq!(
            engine.all_matches("from_one", &[]).unwrap(),
            vec![vec![int(2)], vec![int(3)], vec![int(4)]]
        );
        let (path_group, _) = engine.query_group("path").unwrap();
        let (from_group, kind) = engine.query_group("from_one").unwrap();
        assert!(path_group < from_group);
        assert_eq!(kind, GroupKind::Singleton);
    }

    #[test]
    fn test_change_validation() {
        let store = store_with_edges(&[]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        assert_eq!(
            engine.apply_change(&FactChange::insert("missing", pair(1, 2))),
            Err(EvalError::UnknownRelation("missing".to_string()))
        );
        assert!(matches!(
            engine.apply_change(&FactChange::insert("edge", vec![int(1)])),
            Err(EvalError::ArityMismatch { expected: 2, found: 1, .. })
        ));
        assert_eq!(
            engine.has_match("nope", &[]),
            Err(EvalError::UnknownQuery("nope".to_string()))
        );
        assert!(engine.has_match("path", &[None, None, None]).is_err());
    }

    fn hop_program() -> Program {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.relation("mark", 1).unwrap();
        b.query("hop", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).relation("mark", &["x"]);
            });
            q.clause(|c| {
                c.transitive_call("hop", &["x", "z"]).relation("edge", &["z", "y"]);
            });
        })
        .unwrap();
        b.build()
    }

    #[test]
    fn test_transitive_call_into_own_cycle_follows_deletions() {
        for strategy in [ClosureStrategy::Counting, ClosureStrategy::DeleteAndRederive] {
            let options = EngineOptions {
                closure: strategy,
                ..Default::default()
            };
            let mut store = FactStore::new();
            store.declare("edge", 2).unwrap();
            store.declare("mark", 1).unwrap();
            let mut engine = Engine::new(hop_program(), &store, options).unwrap();

            for (a, b) in [(2, 1), (3, 0), (1, 4), (0, 1), (4, 3)] {
                store.insert("edge", pair(a, b)).unwrap();
            }
            store.insert("mark", vec![int(3)]).unwrap();
            store.insert("mark", vec![int(1)]).unwrap();
            engine.sync(&mut store).unwrap();
            assert_eq!(engine.count_matches("hop", &[]).unwrap(), 8);

            store.remove("mark", &vec![int(1)]).unwrap();
            engine.sync(&mut store).unwrap();
            let expected = vec![pair(3, 0), pair(3, 1), pair(3, 3), pair(3, 4)];
            assert_eq!(engine.all_matches("hop", &[]).unwrap(), expected, "{strategy:?}");

            store.take_changes();
            let fresh = Engine::new(hop_program(), &store, options).unwrap();
            assert_eq!(fresh.all_matches("hop", &[]).unwrap(), expected, "{strategy:?}");

            store.insert("mark", vec![int(1)]).unwrap();
            store.remove("edge", &pair(4, 3)).unwrap();
            engine.sync(&mut store).unwrap();
            store.take_changes();
            let fresh = Engine::new(hop_program(), &store, options).unwrap();
            assert_eq!(
                engine.all_matches("hop", &[]).unwrap(),
                fresh.all_matches("hop", &[]).unwrap(),
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn test_redundant_fact_changes_are_ignored() {
        let store = store_with_edges(&[(1, 2)]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();

        engine.apply_change(&FactChange::remove("edge", pair(5, 6))).unwrap();
        engine.flush().unwrap();
        assert!(!engine.has_pending());
        assert_eq!(engine.all_matches("path", &[]).unwrap(), vec![pair(1, 2)]);

        // a second insertion of a present fact does not need a second removal
        engine.apply_change(&FactChange::insert("edge", pair(1, 2))).unwrap();
        engine.apply_change(&FactChange::remove("edge", pair(1, 2))).unwrap();
        engine.apply_change(&FactChange::remove("edge", pair(1, 2))).unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.count_matches("path", &[]).unwrap(), 0);

        // removing a fact still waiting to be flushed cancels it
        engine.apply_change(&FactChange::insert("edge", pair(2, 3))).unwrap();
        engine.apply_change(&FactChange::remove("edge", pair(2, 3))).unwrap();
        engine.apply_change(&FactChange::remove("edge", pair(2, 3))).unwrap();
        engine.apply_change(&FactChange::insert("edge", pair(2, 3))).unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.all_matches("path", &[]).unwrap(), vec![pair(2, 3)]);
    }

    #[test]
    fn test_replaying_recorded_changes_is_harmless() {
        let mut store = FactStore::new();
        store.declare("edge", 2).unwrap();
        store.insert("edge", pair(1, 2)).unwrap();
        store.insert("edge", pair(2, 3)).unwrap();
        store.remove("edge", &pair(1, 2)).unwrap();
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        engine.sync(&mut store).unwrap();
        assert_eq!(engine.all_matches("path", &[]).unwrap(), vec![pair(2, 3)]);
    }

    #[test]
    fn test_cancelled_flush_resumes() {
        let mut store = store_with_edges(&[]);
        let mut engine = Engine::new(path_program(), &store, EngineOptions::default()).unwrap();
        store.insert("edge", pair(1, 2)).unwrap();
        for change in store.take_changes() {
            engine.apply_change(&change).unwrap();
        }
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(engine.flush_with(&token), Err(EvalError::Cancelled));
        assert!(engine.has_pending());
        assert_eq!(engine.count_matches("path", &[]).unwrap(), 0);
        engine.flush().unwrap();
        assert_eq!(engine.count_matches("path", &[]).unwrap(), 1);
    }
}
