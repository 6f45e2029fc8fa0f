//! Constraint trees for incremental queries.
//!
//! A [`Program`] declares the relation views facts are read from and the
//! queries whose matches are maintained. Each query is a disjunction of
//! [`Clause`]s; each clause is a conjunction of [`Constraint`]s over the
//! query's variables. Every constraint carries a [`ConstraintId`] assigned in
//! creation order, which downstream planning uses as its tie-breaker.
//!
//! Programs are assembled with [`ProgramBuilder`]:
//!
//! ```
//! use trellis_ir::ProgramBuilder;
//!
//! let mut builder = ProgramBuilder::new();
//! builder.relation("edge", 2).unwrap();
//! builder
//!     .query("path", &["x", "y"], |q| {
//!         q.clause(|c| {
//!             c.relation("edge", &["x", "y"]);
//!         });
//!         q.clause(|c| {
//!             c.relation("edge", &["x", "z"]).call("path", &["z", "y"]);
//!         });
//!     })
//!     .unwrap();
//! let program = builder.build();
//! assert_eq!(program.query("path").unwrap().clauses.len(), 2);
//! ```

mod value;

use std::fmt;

use rustc_hash::FxHashMap;

pub use value::{OrderedFloat, Tuple, Value};

/// Index of a variable within its query.
pub type VarId = u32;

/// Creation-order sequence number of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub u32);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised while assembling a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("relation view `{0}` is declared more than once")]
    DuplicateRelation(String),
    #[error("query `{0}` is declared more than once")]
    DuplicateQuery(String),
    #[error("query `{query}` lists parameter `{variable}` more than once")]
    DuplicateParameter { query: String, variable: String },
}

/// Column-level functional dependency of a relation view: the `determining`
/// columns fix the values of the `dependent` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionalDependency {
    pub determining: Vec<usize>,
    pub dependent: Vec<usize>,
}

impl FunctionalDependency {
    pub fn new(determining: impl Into<Vec<usize>>, dependent: impl Into<Vec<usize>>) -> Self {
        Self {
            determining: determining.into(),
            dependent: dependent.into(),
        }
    }
}

/// A base relation facts are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationView {
    pub name: String,
    pub arity: usize,
    pub functional_dependencies: Vec<FunctionalDependency>,
}

/// What a constraint asserts about its variables.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    /// `view(args..)` holds in the fact base.
    Relation { view: String, args: Vec<VarId> },
    /// `query(args..)` is (or, when `negated`, is not) a match of another
    /// query. A `transitive` call matches the transitive closure of a binary
    /// query.
    Call {
        query: String,
        args: Vec<VarId>,
        negated: bool,
        transitive: bool,
    },
    /// `var = value`.
    Constant { var: VarId, value: Value },
    /// `a == b`.
    Equal(VarId, VarId),
    /// `a != b`.
    NotEqual(VarId, VarId),
}

/// A single constraint of a clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Variables the constraint mentions, in first-occurrence order.
    pub fn variables(&self) -> Vec<VarId> {
        let raw: Vec<VarId> = match &self.kind {
            ConstraintKind::Relation { args, .. } | ConstraintKind::Call { args, .. } => {
                args.clone()
            }
            ConstraintKind::Constant { var, .. } => vec![*var],
            ConstraintKind::Equal(a, b) | ConstraintKind::NotEqual(a, b) => vec![*a, *b],
        };
        let mut seen = Vec::with_capacity(raw.len());
        for v in raw {
            if !seen.contains(&v) {
                seen.push(v);
            }
        }
        seen
    }

    /// Whether the constraint can produce bindings on its own.
    pub fn is_enumerable(&self) -> bool {
        match &self.kind {
            ConstraintKind::Relation { .. } | ConstraintKind::Constant { .. } => true,
            ConstraintKind::Call { negated, .. } => !negated,
            ConstraintKind::Equal(..) | ConstraintKind::NotEqual(..) => false,
        }
    }
}

/// A conjunction of constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clause {
    pub constraints: Vec<Constraint>,
}

/// A named query: a disjunction of clauses exporting `parameters`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub name: String,
    pub parameters: Vec<VarId>,
    /// Variable names, indexed by [`VarId`].
    pub variables: Vec<String>,
    pub clauses: Vec<Clause>,
}

impl Query {
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn variable_name(&self, var: VarId) -> &str {
        self.variables
            .get(var as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    /// Render a constraint with this query's variable names.
    pub fn render(&self, constraint: &Constraint) -> String {
        let args = |args: &[VarId]| {
            args.iter()
                .map(|v| self.variable_name(*v))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &constraint.kind {
            ConstraintKind::Relation { view, args: a } => format!("{view}({})", args(a)),
            ConstraintKind::Call {
                query,
                args: a,
                negated,
                transitive,
            } => format!(
                "{}{query}{}({})",
                if *negated { "!" } else { "" },
                if *transitive { "+" } else { "" },
                args(a)
            ),
            ConstraintKind::Constant { var, value } => {
                format!("{} = {value:?}", self.variable_name(*var))
            }
            ConstraintKind::Equal(a, b) => {
                format!("{} == {}", self.variable_name(*a), self.variable_name(*b))
            }
            ConstraintKind::NotEqual(a, b) => {
                format!("{} != {}", self.variable_name(*a), self.variable_name(*b))
            }
        }
    }
}

/// A set of relation views and queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    views: Vec<RelationView>,
    queries: Vec<Query>,
}

impl Program {
    pub fn views(&self) -> &[RelationView] {
        &self.views
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn view(&self, name: &str) -> Option<&RelationView> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn query(&self, name: &str) -> Option<&Query> {
        self.queries.iter().find(|q| q.name == name)
    }

    /// Add the views and queries of `other`. Views declared identically in
    /// both programs are shared; any other name clash is rejected and leaves
    /// `self` untouched.
    pub fn merge(&mut self, other: Program) -> Result<(), IrError> {
        for view in &other.views {
            if let Some(existing) = self.view(&view.name)
                && existing != view
            {
                return Err(IrError::DuplicateRelation(view.name.clone()));
            }
        }
        for query in &other.queries {
            if self.query(&query.name).is_some() {
                return Err(IrError::DuplicateQuery(query.name.clone()));
            }
        }
        for view in other.views {
            if self.view(&view.name).is_none() {
                self.views.push(view);
            }
        }
        self.queries.extend(other.queries);
        Ok(())
    }
}

/// Assembles a [`Program`], assigning constraint sequence ids in creation
/// order.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    next_constraint: u32,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relation(&mut self, name: &str, arity: usize) -> Result<(), IrError> {
        self.relation_with_dependencies(name, arity, Vec::new())
    }

    pub fn relation_with_dependencies(
        &mut self,
        name: &str,
        arity: usize,
        functional_dependencies: Vec<FunctionalDependency>,
    ) -> Result<(), IrError> {
        if self.program.view(name).is_some() {
            return Err(IrError::DuplicateRelation(name.to_string()));
        }
        self.program.views.push(RelationView {
            name: name.to_string(),
            arity,
            functional_dependencies,
        });
        Ok(())
    }

    /// Declare a query exporting `parameters`; `build` adds its clauses.
    pub fn query(
        &mut self,
        name: &str,
        parameters: &[&str],
        build: impl FnOnce(&mut QueryBuilder<'_>),
    ) -> Result<(), IrError> {
        if self.program.query(name).is_some() {
            return Err(IrError::DuplicateQuery(name.to_string()));
        }
        let mut query = QueryBuilder {
            next_constraint: &mut self.next_constraint,
            variables: Vec::new(),
            interner: FxHashMap::default(),
            clauses: Vec::new(),
        };
        let mut params = Vec::with_capacity(parameters.len());
        for p in parameters {
            let id = query.var(p);
            if params.contains(&id) {
                return Err(IrError::DuplicateParameter {
                    query: name.to_string(),
                    variable: p.to_string(),
                });
            }
            params.push(id);
        }
        build(&mut query);
        let QueryBuilder {
            variables, clauses, ..
        } = query;
        self.program.queries.push(Query {
            name: name.to_string(),
            parameters: params,
            variables,
            clauses,
        });
        Ok(())
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Adds clauses to a query under construction. Variables are identified by
/// name within the query.
pub struct QueryBuilder<'a> {
    next_constraint: &'a mut u32,
    variables: Vec<String>,
    interner: FxHashMap<String, VarId>,
    clauses: Vec<Clause>,
}

impl QueryBuilder<'_> {
    fn var(&mut self, name: &str) -> VarId {
        if let Some(&id) = self.interner.get(name) {
            return id;
        }
        let id = self.variables.len() as VarId;
        self.variables.push(name.to_string());
        self.interner.insert(name.to_string(), id);
        id
    }

    fn vars(&mut self, names: &[&str]) -> Vec<VarId> {
        names.iter().map(|n| self.var(n)).collect()
    }

    pub fn clause(&mut self, build: impl FnOnce(&mut ClauseBuilder<'_, '_>)) -> &mut Self {
        let mut clause = ClauseBuilder {
            query: self,
            constraints: Vec::new(),
        };
        build(&mut clause);
        let constraints = clause.constraints;
        self.clauses.push(Clause { constraints });
        self
    }
}

/// Adds constraints to a clause under construction.
pub struct ClauseBuilder<'q, 'a> {
    query: &'q mut QueryBuilder<'a>,
    constraints: Vec<Constraint>,
}

impl ClauseBuilder<'_, '_> {
    fn push(&mut self, kind: ConstraintKind) -> &mut Self {
        let id = ConstraintId(*self.query.next_constraint);
        *self.query.next_constraint += 1;
        self.constraints.push(Constraint { id, kind });
        self
    }

    fn call_with(&mut self, query: &str, args: &[&str], negated: bool, transitive: bool) -> &mut Self {
        let args = self.query.vars(args);
        self.push(ConstraintKind::Call {
            query: query.to_string(),
            args,
            negated,
            transitive,
        })
    }

    pub fn relation(&mut self, view: &str, args: &[&str]) -> &mut Self {
        let args = self.query.vars(args);
        self.push(ConstraintKind::Relation {
            view: view.to_string(),
            args,
        })
    }

    pub fn call(&mut self, query: &str, args: &[&str]) -> &mut Self {
        self.call_with(query, args, false, false)
    }

    pub fn negated_call(&mut self, query: &str, args: &[&str]) -> &mut Self {
        self.call_with(query, args, true, false)
    }

    pub fn transitive_call(&mut self, query: &str, args: &[&str]) -> &mut Self {
        self.call_with(query, args, false, true)
    }

    /// A negated transitive call; accepted here, rejected by the planner.
    pub fn negated_transitive_call(&mut self, query: &str, args: &[&str]) -> &mut Self {
        self.call_with(query, args, true, true)
    }

    pub fn constant(&mut self, var: &str, value: impl Into<Value>) -> &mut Self {
        let var = self.query.var(var);
        self.push(ConstraintKind::Constant {
            var,
            value: value.into(),
        })
    }

    pub fn equal(&mut self, a: &str, b: &str) -> &mut Self {
        let (a, b) = (self.query.var(a), self.query.var(b));
        self.push(ConstraintKind::Equal(a, b))
    }

    pub fn not_equal(&mut self, a: &str, b: &str) -> &mut Self {
        let (a, b) = (self.query.var(a), self.query.var(b));
        self.push(ConstraintKind::NotEqual(a, b))
    }
}
