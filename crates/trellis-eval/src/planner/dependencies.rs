//! Functional dependencies between clause variables.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use trellis_ir::{Constraint, ConstraintId, ConstraintKind, Program, VarId};

type Dependency = (Vec<VarId>, Vec<VarId>);

/// Variable-level dependencies contributed by each constraint of a clause.
#[derive(Debug, Default)]
pub(crate) struct Dependencies {
    by_constraint: FxHashMap<ConstraintId, Vec<Dependency>>,
}

impl Dependencies {
    pub fn analyze(program: &Program, constraints: &[Constraint]) -> Self {
        let mut by_constraint = FxHashMap::default();
        for constraint in constraints {
            let deps: Vec<Dependency> = match &constraint.kind {
                ConstraintKind::Relation { view, args } => program
                    .view(view)
                    .map(|view| {
                        view.functional_dependencies
                            .iter()
                            .filter_map(|fd| {
                                let map = |cols: &[usize]| -> Option<Vec<VarId>> {
                                    cols.iter().map(|&c| args.get(c).copied()).collect()
                                };
                                Some((map(&fd.determining)?, map(&fd.dependent)?))
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                ConstraintKind::Constant { var, .. } => vec![(Vec::new(), vec![*var])],
                ConstraintKind::Equal(a, b) => vec![(vec![*a], vec![*b]), (vec![*b], vec![*a])],
                ConstraintKind::Call { .. } | ConstraintKind::NotEqual(..) => Vec::new(),
            };
            if !deps.is_empty() {
                by_constraint.insert(constraint.id, deps);
            }
        }
        Self { by_constraint }
    }

    /// Every variable determined by `start` under the dependencies of the
    /// `enforced` constraints.
    pub fn closure<'a>(
        &self,
        start: impl IntoIterator<Item = VarId>,
        enforced: impl IntoIterator<Item = &'a ConstraintId>,
    ) -> BTreeSet<VarId> {
        let deps: Vec<&Dependency> = enforced
            .into_iter()
            .filter_map(|id| self.by_constraint.get(id))
            .flatten()
            .collect();
        let mut known: BTreeSet<VarId> = start.into_iter().collect();
        loop {
            let mut changed = false;
            for (from, to) in &deps {
                if from.iter().all(|v| known.contains(v)) {
                    for v in to {
                        changed |= known.insert(*v);
                    }
                }
            }
            if !changed {
                return known;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use trellis_ir::{FunctionalDependency, ProgramBuilder};

    use super::*;

    #[test]
    fn test_view_and_equality_dependencies_chain() {
        let mut b = ProgramBuilder::new();
        b.relation_with_dependencies("parent", 2, vec![FunctionalDependency::new([0], [1])])
            .unwrap();
        b.query("q", &["a"], |q| {
            q.clause(|c| {
                c.relation("parent", &["a", "b"]).equal("b", "c").constant("d", 1);
            });
        })
        .unwrap();
        let program = b.build();
        let constraints = &program.query("q").unwrap().clauses[0].constraints;
        let deps = Dependencies::analyze(&program, constraints);
        let all: Vec<ConstraintId> = constraints.iter().map(|c| c.id).collect();

        let closure = deps.closure([0], &all);
        assert_eq!(closure, BTreeSet::from([0, 1, 2, 3]));

        // without the equality only the view dependency and the constant apply
        let closure = deps.closure([0], &[all[0], all[2]]);
        assert_eq!(closure, BTreeSet::from([0, 1, 3]));

        assert_eq!(deps.closure([1], &all[..1]), BTreeSet::from([1]));
    }
}
