//! Sub-plan arena for one clause.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;
use trellis_ir::{Constraint, ConstraintId, Query, VarId};

/// Handle of a sub-plan within its [`ClausePlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubPlanId(pub u32);

/// What a sub-plan does to its parents' output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// The single empty binding.
    Start,
    /// Produce the bindings of an enumerable constraint.
    Enumerate(ConstraintId),
    /// Keep the parent's bindings that satisfy a constraint.
    Apply(ConstraintId),
    /// Keep only these variables, in this order.
    Project(Vec<VarId>),
    /// Natural join of two parents on their shared variables.
    Join,
}

/// The criterion that decided a join selection over the runner-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinReason {
    Trivial,
    Subsumption,
    CheckOnly,
    DependencyPreserving,
    SharedVariables,
    TieBreak,
    OnlyCandidate,
}

impl fmt::Display for JoinReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinReason::Trivial => "trivial",
            JoinReason::Subsumption => "subsumption",
            JoinReason::CheckOnly => "check-only",
            JoinReason::DependencyPreserving => "dependency-preserving",
            JoinReason::SharedVariables => "shared-variables",
            JoinReason::TieBreak => "tie-break",
            JoinReason::OnlyCandidate => "only candidate",
        })
    }
}

/// One node of a clause plan. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPlan {
    pub operation: Operation,
    pub parents: Vec<SubPlanId>,
    /// Output columns.
    pub visible: Vec<VarId>,
    pub enforced: BTreeSet<ConstraintId>,
}

impl SubPlan {
    pub fn sees(&self, var: VarId) -> bool {
        self.visible.contains(&var)
    }

    /// Enforced constraints in sequence order.
    pub fn constraint_list(&self) -> Vec<ConstraintId> {
        self.enforced.iter().copied().collect()
    }
}

/// The compiled plan of one clause: a hash-consed arena of sub-plans and
/// the root producing exactly the query parameters.
#[derive(Debug, Clone)]
pub struct ClausePlan {
    pub query: String,
    pub clause: usize,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) variables: Vec<String>,
    labels: FxHashMap<ConstraintId, String>,
    plans: Vec<SubPlan>,
    interned: FxHashMap<(Operation, Vec<SubPlanId>), SubPlanId>,
    reasons: FxHashMap<SubPlanId, JoinReason>,
    root: Option<SubPlanId>,
}

impl ClausePlan {
    pub(crate) fn new(query: &Query, clause: usize) -> Self {
        let mut constraints = query.clauses[clause].constraints.clone();
        constraints.sort_by_key(|c| c.id);
        let labels = constraints
            .iter()
            .map(|c| (c.id, query.render(c)))
            .collect();
        Self {
            query: query.name.clone(),
            clause,
            constraints,
            variables: query.variables.clone(),
            labels,
            plans: Vec::new(),
            interned: FxHashMap::default(),
            reasons: FxHashMap::default(),
            root: None,
        }
    }

    /// Return the sub-plan for `operation` over `parents`, creating it with
    /// the given output if it does not exist yet.
    pub(crate) fn intern(
        &mut self,
        operation: Operation,
        parents: Vec<SubPlanId>,
        visible: Vec<VarId>,
        enforced: BTreeSet<ConstraintId>,
    ) -> SubPlanId {
        let key = (operation, parents);
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }
        let id = SubPlanId(self.plans.len() as u32);
        let (operation, parents) = key.clone();
        self.plans.push(SubPlan {
            operation,
            parents,
            visible,
            enforced,
        });
        self.interned.insert(key, id);
        id
    }

    pub(crate) fn record_reason(&mut self, join: SubPlanId, reason: JoinReason) {
        self.reasons.entry(join).or_insert(reason);
    }

    pub(crate) fn set_root(&mut self, root: SubPlanId) {
        self.root = Some(root);
    }

    pub fn get(&self, id: SubPlanId) -> &SubPlan {
        &self.plans[id.0 as usize]
    }

    pub fn root(&self) -> Option<SubPlanId> {
        self.root
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn reason(&self, join: SubPlanId) -> Option<JoinReason> {
        self.reasons.get(&join).copied()
    }

    /// Number of join operators reachable from the root.
    pub fn join_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<SubPlanId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            let plan = self.get(id);
            if plan.operation == Operation::Join {
                count += 1;
            }
            stack.extend(plan.parents.iter().copied());
        }
        count
    }

    fn variable_name(&self, var: VarId) -> &str {
        self.variables
            .get(var as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    fn render_vars(&self, vars: &[VarId]) -> String {
        vars.iter()
            .map(|v| self.variable_name(*v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_constraint(&self, id: ConstraintId) -> String {
        self.labels
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Render the plan rooted at the clause root as an indented tree.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    fn fmt_tree(&self, id: SubPlanId, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.get(id);
        let indent = "  ".repeat(depth);
        match &plan.operation {
            Operation::Start => writeln!(f, "{indent}start")?,
            Operation::Enumerate(c) => writeln!(f, "{indent}enumerate {}", self.render_constraint(*c))?,
            Operation::Apply(c) => writeln!(f, "{indent}check {}", self.render_constraint(*c))?,
            Operation::Project(vars) => writeln!(f, "{indent}project [{}]", self.render_vars(vars))?,
            Operation::Join => {
                let shared: Vec<VarId> = self
                    .get(plan.parents[0])
                    .visible
                    .iter()
                    .copied()
                    .filter(|v| self.get(plan.parents[1]).sees(*v))
                    .collect();
                let reason = self
                    .reason(id)
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default();
                writeln!(f, "{indent}join on [{}]{reason}", self.render_vars(&shared))?
            }
        }
        for parent in &plan.parents {
            self.fmt_tree(*parent, depth + 1, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for ClausePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} clause {}:", self.query, self.clause)?;
        match self.root {
            Some(root) => self.fmt_tree(root, 1, f),
            None => Ok(()),
        }
    }
}
