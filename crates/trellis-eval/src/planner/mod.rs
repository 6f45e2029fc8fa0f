//! Greedy join planning for single clauses.
//!
//! The planner keeps a *frontier* of sub-plans, seeded with one enumeration
//! per enumerable constraint. It repeatedly joins the best-ranked pair of
//! frontier members (see [`candidate::compare`]) until one sub-plan remains,
//! then projects it onto the query parameters. Every sub-plan entering the
//! frontier first picks up constant filters, drops variables nothing
//! downstream needs, and applies the deferred checks (equalities,
//! inequalities, negated calls) that became checkable.

mod candidate;
mod dependencies;
mod plan;

use std::collections::BTreeSet;

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use rustc_hash::{FxHashMap, FxHashSet};
use trellis_ir::{Constraint, ConstraintId, ConstraintKind, Program, Query, VarId};

use crate::error::PlanError;
use crate::options::PlannerOptions;
use candidate::JoinCandidate;
use dependencies::Dependencies;
pub use plan::{ClausePlan, JoinReason, Operation, SubPlan, SubPlanId};

/// Compile every clause of `query`.
pub fn plan_query(
    program: &Program,
    query: &Query,
    options: PlannerOptions,
) -> Result<Vec<ClausePlan>, PlanError> {
    (0..query.clauses.len())
        .map(|i| plan_clause(program, query, i, options))
        .collect()
}

/// Compile clause `clause` of `query` into a plan whose root outputs the
/// query parameters in declaration order.
pub fn plan_clause(
    program: &Program,
    query: &Query,
    clause: usize,
    options: PlannerOptions,
) -> Result<ClausePlan, PlanError> {
    let plan = ClausePlan::new(query, clause);
    for constraint in &plan.constraints {
        validate(program, query, constraint)?;
    }
    tracing::debug!(query = %query.name, clause, "planning clause");
    let mut planner = Planner::new(program, query, options, plan);
    planner.run()?;
    Ok(planner.plan)
}

/// Reject a negated call whose callee depends on the calling query. Such a
/// query has no stable match set: each retraction re-enables what caused it.
pub fn check_negation(program: &Program) -> Result<(), PlanError> {
    let queries = program.queries();
    let index: FxHashMap<&str, usize> = queries
        .iter()
        .enumerate()
        .map(|(i, q)| (q.name.as_str(), i))
        .collect();

    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..queries.len()).map(|i| graph.add_node(i)).collect();
    for (i, query) in queries.iter().enumerate() {
        for (_, callee, _) in calls(query, &index) {
            graph.add_edge(nodes[i], nodes[callee], ());
        }
    }
    let mut component = vec![0; queries.len()];
    for (c, members) in tarjan_scc(&graph).into_iter().enumerate() {
        for node in members {
            component[graph[node]] = c;
        }
    }

    for (i, query) in queries.iter().enumerate() {
        for (constraint, callee, negated) in calls(query, &index) {
            if negated && component[callee] == component[i] {
                return Err(PlanError::NegatedRecursiveCall {
                    query: query.name.clone(),
                    constraint: query.render(constraint),
                    callee: queries[callee].name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Calls made by `query`, with the callee's position and whether negated.
fn calls<'q>(query: &'q Query, index: &FxHashMap<&str, usize>) -> Vec<(&'q Constraint, usize, bool)> {
    query
        .clauses
        .iter()
        .flat_map(|clause| &clause.constraints)
        .filter_map(|constraint| match &constraint.kind {
            ConstraintKind::Call { query: callee, negated, .. } => index
                .get(callee.as_str())
                .map(|&callee| (constraint, callee, *negated)),
            _ => None,
        })
        .collect()
}

fn validate(program: &Program, query: &Query, constraint: &Constraint) -> Result<(), PlanError> {
    let text = || query.render(constraint);
    match &constraint.kind {
        ConstraintKind::Relation { view, args } => {
            let Some(decl) = program.view(view) else {
                return Err(PlanError::UnknownRelation {
                    query: query.name.clone(),
                    constraint: text(),
                    view: view.clone(),
                });
            };
            if decl.arity != args.len() {
                return Err(PlanError::ArityMismatch {
                    query: query.name.clone(),
                    constraint: text(),
                    expected: decl.arity,
                    found: args.len(),
                });
            }
        }
        ConstraintKind::Call {
            query: callee,
            args,
            negated,
            transitive,
        } => {
            if *transitive && *negated {
                return Err(PlanError::NegatedTransitiveCall {
                    query: query.name.clone(),
                    constraint: text(),
                });
            }
            let Some(decl) = program.query(callee) else {
                return Err(PlanError::UnknownQuery {
                    query: query.name.clone(),
                    constraint: text(),
                    callee: callee.clone(),
                });
            };
            if *transitive {
                if args.len() != 2 || decl.arity() != 2 {
                    return Err(PlanError::NonBinaryTransitiveCall {
                        query: query.name.clone(),
                        constraint: text(),
                    });
                }
            } else if decl.arity() != args.len() {
                return Err(PlanError::ArityMismatch {
                    query: query.name.clone(),
                    constraint: text(),
                    expected: decl.arity(),
                    found: args.len(),
                });
            }
        }
        ConstraintKind::Constant { .. } | ConstraintKind::Equal(..) | ConstraintKind::NotEqual(..) => {}
    }
    Ok(())
}

/// Variables of a negated call that must be bound before it can be checked:
/// those also mentioned by another constraint of the clause.
pub(crate) fn deferring_variables(constraints: &[Constraint], negated: &Constraint) -> Vec<VarId> {
    let elsewhere: FxHashSet<VarId> = constraints
        .iter()
        .filter(|c| c.id != negated.id)
        .flat_map(Constraint::variables)
        .collect();
    negated
        .variables()
        .into_iter()
        .filter(|v| elsewhere.contains(v))
        .collect()
}

struct Planner<'a> {
    query: &'a Query,
    options: PlannerOptions,
    plan: ClausePlan,
    dependencies: Dependencies,
    exported: BTreeSet<VarId>,
    /// Deferred constraints with the variables they need.
    deferred: Vec<(ConstraintId, Vec<VarId>)>,
    constants: Vec<(ConstraintId, VarId)>,
    frontier: Vec<SubPlanId>,
}

impl<'a> Planner<'a> {
    fn new(program: &Program, query: &'a Query, options: PlannerOptions, plan: ClausePlan) -> Self {
        let dependencies = if options.functional_dependencies {
            Dependencies::analyze(program, &plan.constraints)
        } else {
            Dependencies::default()
        };
        let mut deferred = Vec::new();
        let mut constants = Vec::new();
        for c in &plan.constraints {
            match &c.kind {
                ConstraintKind::Equal(a, b) | ConstraintKind::NotEqual(a, b) => {
                    deferred.push((c.id, vec![*a, *b]))
                }
                ConstraintKind::Call { negated: true, .. } => {
                    deferred.push((c.id, deferring_variables(&plan.constraints, c)))
                }
                ConstraintKind::Constant { var, .. } => constants.push((c.id, *var)),
                _ => {}
            }
        }
        Self {
            query,
            options,
            dependencies,
            exported: query.parameters.iter().copied().collect(),
            deferred,
            constants,
            frontier: Vec::new(),
            plan,
        }
    }

    fn run(&mut self) -> Result<(), PlanError> {
        let seeds: Vec<Constraint> = self
            .plan
            .constraints
            .iter()
            .filter(|c| c.is_enumerable())
            .cloned()
            .collect();
        if seeds.is_empty() {
            let start = self
                .plan
                .intern(Operation::Start, Vec::new(), Vec::new(), BTreeSet::new());
            self.admit(start);
        }
        for constraint in &seeds {
            let enumerate = self.plan.intern(
                Operation::Enumerate(constraint.id),
                Vec::new(),
                constraint.variables(),
                BTreeSet::from([constraint.id]),
            );
            self.admit(enumerate);
        }

        while self.frontier.len() > 1 {
            self.join_best();
        }

        let root = self.frontier[0];
        self.final_check(root)?;
        let root = self.project(root, self.query.parameters.clone());
        self.plan.set_root(root);
        tracing::debug!(
            query = %self.query.name,
            clause = self.plan.clause,
            joins = self.plan.join_count(),
            "clause planned"
        );
        Ok(())
    }

    fn join_best(&mut self) {
        let mut candidates = Vec::new();
        for (j, &b) in self.frontier.iter().enumerate() {
            for &a in &self.frontier[..j] {
                candidates.push(JoinCandidate::new(&self.plan, a, b));
            }
        }
        let deps = self
            .options
            .functional_dependencies
            .then_some(&self.dependencies);
        candidates.sort_by(|a, b| candidate::compare(a, b, deps).0);
        let best = &candidates[0];
        let reason = match candidates.get(1) {
            Some(runner_up) => candidate::compare(best, runner_up, deps).1,
            None => JoinReason::OnlyCandidate,
        };
        tracing::trace!(
            primary = best.primary.0,
            secondary = best.secondary.0,
            shared = best.common().len(),
            %reason,
            "join selected"
        );

        let (primary, secondary) = (best.primary, best.secondary);
        let joined = match best.collapses_to() {
            Some(kept) => kept,
            None => {
                let (p, s) = (self.plan.get(primary), self.plan.get(secondary));
                let mut visible = p.visible.clone();
                visible.extend(s.visible.iter().copied().filter(|v| !p.sees(*v)));
                let enforced = p.enforced.union(&s.enforced).copied().collect();
                let join = self
                    .plan
                    .intern(Operation::Join, vec![primary, secondary], visible, enforced);
                self.plan.record_reason(join, reason);
                join
            }
        };
        self.frontier.retain(|&id| id != primary && id != secondary);
        self.admit(joined);
    }

    fn admit(&mut self, mut id: SubPlanId) {
        loop {
            if self.options.prioritize_constant_filtering {
                for (c, var) in self.constants.clone() {
                    let plan = self.plan.get(id);
                    if plan.sees(var) && !plan.enforced.contains(&c) {
                        id = self.apply(id, c);
                    }
                }
            }
            id = self.trim(id);
            let plan = self.plan.get(id);
            let ready = self.deferred.iter().find(|(c, needs)| {
                !plan.enforced.contains(c) && needs.iter().all(|v| plan.sees(*v))
            });
            match ready {
                Some(&(c, _)) => id = self.apply(id, c),
                None => break,
            }
        }
        if !self.frontier.contains(&id) {
            self.frontier.push(id);
        }
    }

    fn apply(&mut self, parent: SubPlanId, constraint: ConstraintId) -> SubPlanId {
        let plan = self.plan.get(parent);
        let visible = plan.visible.clone();
        let mut enforced = plan.enforced.clone();
        enforced.insert(constraint);
        self.plan
            .intern(Operation::Apply(constraint), vec![parent], visible, enforced)
    }

    fn project(&mut self, parent: SubPlanId, vars: Vec<VarId>) -> SubPlanId {
        let plan = self.plan.get(parent);
        if plan.visible == vars {
            return parent;
        }
        let enforced = plan.enforced.clone();
        self.plan
            .intern(Operation::Project(vars.clone()), vec![parent], vars, enforced)
    }

    /// Drop visible variables that are not exported and whose constraints
    /// are all enforced, unless the kept ones determine them anyway.
    fn trim(&mut self, id: SubPlanId) -> SubPlanId {
        let plan = self.plan.get(id);
        let needed = |v: VarId| {
            self.exported.contains(&v)
                || self
                    .plan
                    .constraints
                    .iter()
                    .any(|c| !plan.enforced.contains(&c.id) && c.variables().contains(&v))
        };
        let (kept, trimmed): (Vec<VarId>, Vec<VarId>) =
            plan.visible.iter().copied().partition(|v| needed(*v));
        if trimmed.is_empty() {
            return id;
        }
        if self.options.functional_dependencies {
            let determined = self
                .dependencies
                .closure(kept.iter().copied(), plan.enforced.iter());
            if trimmed.iter().all(|v| determined.contains(v)) {
                return id;
            }
        }
        self.project(id, kept)
    }

    fn final_check(&self, root: SubPlanId) -> Result<(), PlanError> {
        let plan = self.plan.get(root);
        if let Some(c) = self
            .plan
            .constraints
            .iter()
            .find(|c| !plan.enforced.contains(&c.id))
        {
            return Err(PlanError::UnenforcedConstraint {
                query: self.query.name.clone(),
                clause: self.plan.clause,
                constraint: self.query.render(c),
            });
        }
        if let Some(&v) = self.query.parameters.iter().find(|v| !plan.sees(**v)) {
            return Err(PlanError::UnboundParameter {
                query: self.query.name.clone(),
                clause: self.plan.clause,
                variable: self.query.variable_name(v).to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use trellis_ir::{FunctionalDependency, ProgramBuilder};

    use super::*;

    fn plan_of(program: &Program, name: &str) -> ClausePlan {
        let query = program.query(name).unwrap();
        plan_clause(program, query, 0, PlannerOptions::default()).unwrap()
    }

    fn joins(plan: &ClausePlan) -> Vec<(Vec<VarId>, Vec<VarId>)> {
        let mut out = Vec::new();
        let mut stack = vec![plan.root().unwrap()];
        while let Some(id) = stack.pop() {
            let p = plan.get(id);
            if p.operation == Operation::Join {
                out.push((
                    plan.get(p.parents[0]).visible.clone(),
                    plan.get(p.parents[1]).visible.clone(),
                ));
            }
            stack.extend(p.parents.iter().copied());
        }
        out
    }

    fn abc_program() -> Program {
        let mut b = ProgramBuilder::new();
        b.relation("a", 1).unwrap();
        b.relation("b", 2).unwrap();
        b.relation("c", 1).unwrap();
        b.query("q", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("a", &["x"])
                    .relation("b", &["x", "y"])
                    .relation("c", &["y"]);
            });
        })
        .unwrap();
        b.build()
    }

    #[test]
    fn test_no_cross_product_while_shared_variables_exist() {
        let program = abc_program();
        let plan = plan_of(&program, "q");
        let js = joins(&plan);
        assert_eq!(js.len(), 2);
        for (left, right) in js {
            assert!(left.iter().any(|v| right.contains(v)), "{}", plan.describe());
        }
    }

    #[test]
    fn test_describe_renders_every_sub_plan() {
        let program = abc_program();
        let plan = plan_of(&program, "q");
        let mut visited = 0;
        let mut stack = vec![plan.root().unwrap()];
        while let Some(id) = stack.pop() {
            visited += 1;
            stack.extend(plan.get(id).parents.iter().copied());
        }

        let text = plan.describe();
        assert_eq!(text, plan.to_string());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "q clause 0:");
        assert_eq!(lines.len(), visited + 1);
        assert!(lines[1..].iter().all(|line| line.starts_with("  ")));
        assert!(text.contains("enumerate a(x)"));
        assert!(text.contains("join on [x]"));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let program = abc_program();
        let first = plan_of(&program, "q").describe();
        let second = plan_of(&program, "q").describe();
        assert_eq!(first, second);
    }

    #[test]
    fn test_root_projects_parameters_in_order() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("rev", &["y", "x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]);
            });
        })
        .unwrap();
        let program = b.build();
        let plan = plan_of(&program, "rev");
        let root = plan.get(plan.root().unwrap());
        assert_eq!(root.operation, Operation::Project(vec![0, 1]));
        assert_eq!(root.visible, vec![0, 1]);
    }

    #[test]
    fn test_unused_variables_are_trimmed_early() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.relation("node", 1).unwrap();
        b.query("src", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).relation("node", &["x"]);
            });
        })
        .unwrap();
        let program = b.build();
        let plan = plan_of(&program, "src");
        let description = plan.describe();
        assert!(description.contains("project [x]"), "{description}");
        // edge is trimmed to x, then joined check-only with node
        assert!(description.contains("check-only") || description.contains("only candidate"));
        assert!(joins(&plan).iter().all(|(l, r)| l.len() == 1 && r.len() == 1));
    }

    #[test]
    fn test_constant_filter_subsumes_enumeration() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("from_one", &["y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).constant("x", 1);
            });
        })
        .unwrap();
        let program = b.build();
        let plan = plan_of(&program, "from_one");
        assert_eq!(plan.join_count(), 0, "{}", plan.describe());
        let description = plan.describe();
        assert!(description.contains("check x = 1"), "{description}");
    }

    #[test]
    fn test_deferred_check_applied_once_bound() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("q", &["x", "y"], |q| {
            q.clause(|c| {
                c.not_equal("x", "y").relation("edge", &["x", "y"]);
            });
        })
        .unwrap();
        let program = b.build();
        let plan = plan_of(&program, "q");
        let root = plan.get(plan.root().unwrap());
        assert!(matches!(root.operation, Operation::Apply(_)));
        assert_eq!(root.enforced.len(), 2);
    }

    #[test]
    fn test_negated_call_defers_on_shared_variables_only() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("has_out", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("sink", &["y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).negated_call("has_out", &["y"]);
            });
        })
        .unwrap();
        b.query("dead", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).negated_call("edge_pair", &["z"]);
            });
        })
        .unwrap();
        let program = b.build();
        let sink = program.query("sink").unwrap();
        let clause = &sink.clauses[0].constraints;
        assert_eq!(deferring_variables(clause, &clause[1]), vec![0]);
        let plan = plan_of(&program, "sink");
        assert!(plan.describe().contains("check !has_out(y)"));

        let dead = program.query("dead").unwrap();
        assert!(matches!(
            plan_clause(&program, dead, 0, PlannerOptions::default()),
            Err(PlanError::UnknownQuery { .. })
        ));
    }

    #[test]
    fn test_plan_errors() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("ternary", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y", "z"]);
            });
        })
        .unwrap();
        b.query("triple", &["x", "y", "z"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).relation("edge", &["y", "z"]);
            });
        })
        .unwrap();
        b.query("tc3", &["x", "y"], |q| {
            q.clause(|c| {
                c.transitive_call("triple", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("neg_tc", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"])
                    .negated_transitive_call("tc3", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("unbound", &["x", "w"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("unchecked", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).not_equal("y", "v");
            });
        })
        .unwrap();
        b.query("missing", &["x"], |q| {
            q.clause(|c| {
                c.relation("nope", &["x"]);
            });
        })
        .unwrap();
        let program = b.build();
        let err = |name: &str| {
            let query = program.query(name).unwrap();
            plan_clause(&program, query, 0, PlannerOptions::default()).unwrap_err()
        };
        assert_eq!(
            err("ternary"),
            PlanError::ArityMismatch {
                query: "ternary".into(),
                constraint: "edge(x, y, z)".into(),
                expected: 2,
                found: 3,
            }
        );
        assert!(matches!(err("tc3"), PlanError::NonBinaryTransitiveCall { .. }));
        assert!(matches!(err("neg_tc"), PlanError::NegatedTransitiveCall { .. }));
        assert_eq!(
            err("unbound"),
            PlanError::UnboundParameter {
                query: "unbound".into(),
                clause: 0,
                variable: "w".into(),
            }
        );
        assert!(matches!(err("unchecked"), PlanError::UnenforcedConstraint { .. }));
        assert!(matches!(err("missing"), PlanError::UnknownRelation { .. }));
    }

    #[test]
    fn test_negation_through_recursion_is_rejected() {
        let mut b = ProgramBuilder::new();
        b.relation("node", 1).unwrap();
        b.query("odd", &["x"], |q| {
            q.clause(|c| {
                c.relation("node", &["x"]).negated_call("odd", &["x"]);
            });
        })
        .unwrap();
        assert_eq!(
            check_negation(&b.build()),
            Err(PlanError::NegatedRecursiveCall {
                query: "odd".into(),
                constraint: "!odd(x)".into(),
                callee: "odd".into(),
            })
        );

        let mut b = ProgramBuilder::new();
        b.relation("node", 1).unwrap();
        b.query("win", &["x"], |q| {
            q.clause(|c| {
                c.relation("node", &["x"]).negated_call("lose", &["x"]);
            });
        })
        .unwrap();
        b.query("lose", &["x"], |q| {
            q.clause(|c| {
                c.call("win", &["x"]);
            });
        })
        .unwrap();
        assert!(matches!(
            check_negation(&b.build()),
            Err(PlanError::NegatedRecursiveCall { query, .. }) if query == "win"
        ));

        // negating a lower stratum is fine, even from a recursive query
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("link", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]);
            });
        })
        .unwrap();
        b.query("detour", &["x", "y"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "y"]).negated_call("link", &["y", "x"]);
            });
            q.clause(|c| {
                c.call("detour", &["x", "z"]).relation("edge", &["z", "y"]);
            });
        })
        .unwrap();
        assert_eq!(check_negation(&b.build()), Ok(()));
    }

    #[test]
    fn test_functional_dependency_prefers_key_join() {
        let mut b = ProgramBuilder::new();
        b.relation("likes", 2).unwrap();
        b.relation("knows", 2).unwrap();
        b.relation_with_dependencies("rating", 2, vec![FunctionalDependency::new([0], [1])])
            .unwrap();
        b.query("q", &["p", "o", "f", "r"], |q| {
            q.clause(|c| {
                c.relation("likes", &["p", "o"])
                    .relation("knows", &["p", "f"])
                    .relation("rating", &["o", "r"]);
            });
        })
        .unwrap();
        let program = b.build();
        let plan = plan_of(&program, "q");
        let description = plan.describe();
        assert!(
            description.contains("dependency-preserving"),
            "{description}"
        );

        let query = program.query("q").unwrap();
        let options = PlannerOptions {
            functional_dependencies: false,
            ..PlannerOptions::default()
        };
        let plain = plan_clause(&program, query, 0, options).unwrap().describe();
        assert!(!plain.contains("dependency-preserving"), "{plain}");
    }

    #[test]
    fn test_clause_without_enumerables_starts_from_unit() {
        let mut b = ProgramBuilder::new();
        b.query("base", &["x"], |q| {
            q.clause(|c| {
                c.constant("x", 1);
            });
        })
        .unwrap();
        b.query("never", &[], |q| {
            q.clause(|c| {
                c.negated_call("base", &["z"]);
            });
        })
        .unwrap();
        let program = b.build();
        let plan = plan_of(&program, "never");
        let description = plan.describe();
        assert!(description.contains("start"), "{description}");
        assert!(description.contains("check !base(z)"), "{description}");
    }
}
