//! Candidate joins between two frontier sub-plans and their ranking.

use std::cell::OnceCell;
use std::cmp::Ordering;

use trellis_ir::{ConstraintId, VarId};

use super::dependencies::Dependencies;
use super::plan::{ClausePlan, JoinReason, SubPlanId};

#[derive(Debug, Clone, Copy)]
struct Classes {
    trivial: bool,
    subsumption: bool,
    check_only: bool,
    descartes: bool,
}

/// A possible join of `primary` with `secondary`, where `primary` entered
/// the frontier first.
#[derive(Debug)]
pub(crate) struct JoinCandidate {
    pub primary: SubPlanId,
    pub secondary: SubPlanId,
    primary_constraints: Vec<ConstraintId>,
    secondary_constraints: Vec<ConstraintId>,
    primary_vars: Vec<VarId>,
    secondary_vars: Vec<VarId>,
    common: Vec<VarId>,
    classes: OnceCell<Classes>,
    dependency_preserving: OnceCell<bool>,
}

impl JoinCandidate {
    pub fn new(plan: &ClausePlan, primary: SubPlanId, secondary: SubPlanId) -> Self {
        let (p, s) = (plan.get(primary), plan.get(secondary));
        let common = p
            .visible
            .iter()
            .copied()
            .filter(|v| s.sees(*v))
            .collect();
        Self {
            primary,
            secondary,
            primary_constraints: p.constraint_list(),
            secondary_constraints: s.constraint_list(),
            primary_vars: p.visible.clone(),
            secondary_vars: s.visible.clone(),
            common,
            classes: OnceCell::new(),
            dependency_preserving: OnceCell::new(),
        }
    }

    pub fn common(&self) -> &[VarId] {
        &self.common
    }

    fn classes(&self) -> Classes {
        *self.classes.get_or_init(|| {
            let contains = |big: &[ConstraintId], small: &[ConstraintId]| {
                small.iter().all(|c| big.binary_search(c).is_ok())
            };
            let covers = |big: &[VarId], small: &[VarId]| small.iter().all(|v| big.contains(v));
            Classes {
                trivial: self.primary == self.secondary,
                subsumption: contains(&self.primary_constraints, &self.secondary_constraints)
                    || contains(&self.secondary_constraints, &self.primary_constraints),
                check_only: covers(&self.primary_vars, &self.secondary_vars)
                    || covers(&self.secondary_vars, &self.primary_vars),
                descartes: self.common.is_empty(),
            }
        })
    }

    pub fn is_trivial(&self) -> bool {
        self.classes().trivial
    }

    pub fn is_subsumption(&self) -> bool {
        self.classes().subsumption
    }

    pub fn is_check_only(&self) -> bool {
        self.classes().check_only
    }

    pub fn is_descartes(&self) -> bool {
        self.classes().descartes
    }

    /// Whether the shared variables determine every variable of one side.
    pub fn is_dependency_preserving(&self, deps: &Dependencies) -> bool {
        *self.dependency_preserving.get_or_init(|| {
            let closure = deps.closure(
                self.common.iter().copied(),
                self.primary_constraints
                    .iter()
                    .chain(&self.secondary_constraints),
            );
            self.primary_vars.iter().all(|v| closure.contains(v))
                || self.secondary_vars.iter().all(|v| closure.contains(v))
        })
    }

    /// Whether the joined sub-plan is just the one with more constraints.
    pub fn collapses_to(&self) -> Option<SubPlanId> {
        if self.is_trivial() {
            return Some(self.primary);
        }
        if self.is_subsumption() {
            return Some(
                if self.secondary_constraints.len() > self.primary_constraints.len() {
                    self.secondary
                } else {
                    self.primary
                },
            );
        }
        None
    }
}

fn prefer_true(a: bool, b: bool) -> Ordering {
    b.cmp(&a)
}

/// Total order over candidates; the smaller one is joined first. Also
/// returns the first criterion that separated the two.
pub(crate) fn compare(
    a: &JoinCandidate,
    b: &JoinCandidate,
    deps: Option<&Dependencies>,
) -> (Ordering, JoinReason) {
    let criteria: [(JoinReason, &dyn Fn() -> Ordering); 5] = [
        (JoinReason::Trivial, &|| {
            prefer_true(a.is_trivial(), b.is_trivial())
        }),
        (JoinReason::Subsumption, &|| {
            prefer_true(a.is_subsumption(), b.is_subsumption())
        }),
        (JoinReason::CheckOnly, &|| {
            prefer_true(a.is_check_only(), b.is_check_only())
        }),
        (JoinReason::DependencyPreserving, &|| match deps {
            Some(deps) => prefer_true(
                a.is_dependency_preserving(deps),
                b.is_dependency_preserving(deps),
            ),
            None => Ordering::Equal,
        }),
        (JoinReason::SharedVariables, &|| {
            prefer_true(!a.is_descartes(), !b.is_descartes())
        }),
    ];
    for (reason, criterion) in criteria {
        let ord = criterion();
        if ord != Ordering::Equal {
            return (ord, reason);
        }
    }
    let ord = a
        .primary_constraints
        .cmp(&b.primary_constraints)
        .then_with(|| a.secondary_constraints.cmp(&b.secondary_constraints))
        .then_with(|| (a.primary, a.secondary).cmp(&(b.primary, b.secondary)));
    (ord, JoinReason::TieBreak)
}
