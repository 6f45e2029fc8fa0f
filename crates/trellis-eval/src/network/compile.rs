//! Translation of clause plans into network nodes.

use rustc_hash::FxHashMap;
use trellis_ir::{ConstraintKind, VarId};

use super::node::{AntiJoinNode, ClosureNode, JoinNode, NodeKind, Predicate, ProductionNode, Slot};
use super::{Network, NodeId};
use crate::planner::{deferring_variables, ClausePlan, Operation, SubPlanId};
use crate::relation::RelationMemory;
use crate::Tuple;

/// Nodes added to the network in one batch, and the deltas that bring them
/// up to date with the state already in the network.
#[derive(Debug)]
pub(crate) struct Extension {
    pub first_new: NodeId,
    pub initial: Vec<(NodeId, Slot, Tuple, i32)>,
    /// Input nodes created by this batch; they still need the base facts.
    pub new_inputs: Vec<(String, NodeId)>,
}

impl Network {
    pub fn begin_extension(&self) -> Extension {
        Extension {
            first_new: NodeId(self.len() as u32),
            initial: Vec::new(),
            new_inputs: Vec::new(),
        }
    }

    /// Create the production of a query before any clause refers to it.
    pub fn add_production(&mut self, query: &str) -> NodeId {
        let id = self.add_node(NodeKind::Production(ProductionNode::new(query)));
        self.productions.insert(query.to_string(), id);
        id
    }

    /// Build the nodes for `plan` and connect its root to its production.
    pub fn compile_clause(&mut self, plan: &ClausePlan, ext: &mut Extension) -> Result<NodeId, String> {
        let production = self
            .production(&plan.query)
            .ok_or_else(|| format!("no production for `{}`", plan.query))?;
        let root = plan
            .root()
            .ok_or_else(|| format!("{} clause {} has no root", plan.query, plan.clause))?;
        let mut compiler = ClauseCompiler {
            network: self,
            plan,
            ext,
            built: FxHashMap::default(),
        };
        let node = compiler.build(root)?;
        compiler.network.connect(node, production, Slot::Primary, compiler.ext);
        Ok(node)
    }

    fn input_node(&mut self, relation: &str, ext: &mut Extension) -> NodeId {
        if let Some(id) = self.input(relation) {
            return id;
        }
        let id = self.add_node(NodeKind::Input {
            relation: relation.to_string(),
            memory: RelationMemory::new(Vec::new()),
        });
        self.inputs.insert(relation.to_string(), id);
        ext.new_inputs.push((relation.to_string(), id));
        id
    }

    fn closure_node(&mut self, query: &str, ext: &mut Extension) -> Result<NodeId, String> {
        if let Some(&id) = self.closures.get(query) {
            return Ok(id);
        }
        let production = self
            .production(query)
            .ok_or_else(|| format!("no production for `{query}`"))?;
        let id = self.add_node(NodeKind::Closure(ClosureNode::new(self.strategy)));
        self.closures.insert(query.to_string(), id);
        self.connect(production, id, Slot::Primary, ext);
        Ok(id)
    }

    fn constant_node(&mut self, tuple: Tuple, ext: &mut Extension) -> NodeId {
        let id = self.add_node(NodeKind::Constant(tuple.clone()));
        ext.initial.push((id, Slot::Primary, tuple, 1));
        id
    }

    fn child(&mut self, kind: NodeKind, parent: NodeId, ext: &mut Extension) -> NodeId {
        let id = self.add_node(kind);
        self.connect(parent, id, Slot::Primary, ext);
        id
    }
}

fn position(columns: &[VarId], var: VarId) -> Result<usize, String> {
    columns
        .iter()
        .position(|v| *v == var)
        .ok_or_else(|| format!("variable {var} is not visible"))
}

struct ClauseCompiler<'a> {
    network: &'a mut Network,
    plan: &'a ClausePlan,
    ext: &'a mut Extension,
    built: FxHashMap<SubPlanId, NodeId>,
}

impl ClauseCompiler<'_> {
    fn build(&mut self, id: SubPlanId) -> Result<NodeId, String> {
        if let Some(&node) = self.built.get(&id) {
            return Ok(node);
        }
        let plan = self.plan;
        let sub = plan.get(id);
        let node = match &sub.operation {
            Operation::Start => self.network.constant_node(Vec::new(), self.ext),
            Operation::Enumerate(c) => {
                let constraint = self
                    .plan
                    .constraint(*c)
                    .ok_or_else(|| format!("unknown constraint {c}"))?;
                match &constraint.kind {
                    ConstraintKind::Relation { view, args } => {
                        let source = self.network.input_node(view, self.ext);
                        self.adapt(source, args)
                    }
                    ConstraintKind::Call {
                        query,
                        args,
                        negated: false,
                        transitive,
                    } => {
                        let source = if *transitive {
                            self.network.closure_node(query, self.ext)?
                        } else {
                            self.network
                                .production(query)
                                .ok_or_else(|| format!("no production for `{query}`"))?
                        };
                        self.adapt(source, args)
                    }
                    ConstraintKind::Constant { value, .. } => {
                        self.network.constant_node(vec![value.clone()], self.ext)
                    }
                    _ => return Err(format!("constraint {c} cannot be enumerated")),
                }
            }
            Operation::Apply(c) => {
                let parent = self.build(sub.parents[0])?;
                let columns = &plan.get(sub.parents[0]).visible;
                let constraint = self
                    .plan
                    .constraint(*c)
                    .ok_or_else(|| format!("unknown constraint {c}"))?;
                let predicate = match &constraint.kind {
                    ConstraintKind::Constant { var, value } => {
                        Predicate::ColumnIs(position(columns, *var)?, value.clone())
                    }
                    ConstraintKind::Equal(a, b) => {
                        Predicate::ColumnsEqual(vec![(position(columns, *a)?, position(columns, *b)?)])
                    }
                    ConstraintKind::NotEqual(a, b) => {
                        Predicate::ColumnsDiffer(position(columns, *a)?, position(columns, *b)?)
                    }
                    ConstraintKind::Call {
                        query,
                        args,
                        negated: true,
                        transitive: false,
                    } => {
                        let keys = deferring_variables(&plan.constraints, constraint);
                        let primary_key = keys
                            .iter()
                            .map(|v| position(columns, *v))
                            .collect::<Result<Vec<_>, _>>()?;
                        let secondary_key = keys
                            .iter()
                            .map(|v| position(args, *v))
                            .collect::<Result<Vec<_>, _>>()?;
                        let callee = self
                            .network
                            .production(query)
                            .ok_or_else(|| format!("no production for `{query}`"))?;
                        let blocker = self.repeated_filter(callee, args);
                        let anti = self.network.add_node(NodeKind::AntiJoin(AntiJoinNode::new(
                            primary_key,
                            secondary_key,
                        )));
                        self.network.connect(parent, anti, Slot::Primary, self.ext);
                        self.network.connect(blocker, anti, Slot::Secondary, self.ext);
                        self.built.insert(id, anti);
                        return Ok(anti);
                    }
                    _ => return Err(format!("constraint {c} cannot be checked")),
                };
                self.network.child(NodeKind::Filter(predicate), parent, self.ext)
            }
            Operation::Project(vars) => {
                let parent = self.build(sub.parents[0])?;
                let columns = &plan.get(sub.parents[0]).visible;
                let mask = vars
                    .iter()
                    .map(|v| position(columns, *v))
                    .collect::<Result<Vec<_>, _>>()?;
                if mask.iter().copied().eq(0..columns.len()) {
                    parent
                } else {
                    self.network.child(NodeKind::Project(mask), parent, self.ext)
                }
            }
            Operation::Join => {
                let (left_id, right_id) = (sub.parents[0], sub.parents[1]);
                let left = self.build(left_id)?;
                let right = self.build(right_id)?;
                let left_cols = &plan.get(left_id).visible;
                let right_cols = &plan.get(right_id).visible;
                let mut primary_key = Vec::new();
                let mut secondary_key = Vec::new();
                for (i, v) in left_cols.iter().enumerate() {
                    if let Some(j) = right_cols.iter().position(|w| w == v) {
                        primary_key.push(i);
                        secondary_key.push(j);
                    }
                }
                let rest = (0..right_cols.len())
                    .filter(|j| !secondary_key.contains(j))
                    .collect();
                let join = self.network.add_node(NodeKind::Join(JoinNode::new(
                    primary_key,
                    secondary_key,
                    rest,
                )));
                self.network.connect(left, join, Slot::Primary, self.ext);
                self.network.connect(right, join, Slot::Secondary, self.ext);
                join
            }
        };
        self.built.insert(id, node);
        Ok(node)
    }

    /// Keep only tuples agreeing on every repeated argument.
    fn repeated_filter(&mut self, source: NodeId, args: &[VarId]) -> NodeId {
        let mut pairs = Vec::new();
        for (i, v) in args.iter().enumerate() {
            if let Some(first) = args[..i].iter().position(|w| w == v) {
                pairs.push((first, i));
            }
        }
        if pairs.is_empty() {
            source
        } else {
            self.network
                .child(NodeKind::Filter(Predicate::ColumnsEqual(pairs)), source, self.ext)
        }
    }

    /// Turn the raw tuples of a relation or call into bindings of its
    /// distinct argument variables, in order of first occurrence.
    fn adapt(&mut self, source: NodeId, args: &[VarId]) -> NodeId {
        let filtered = self.repeated_filter(source, args);
        let mask: Vec<usize> = (0..args.len())
            .filter(|&i| !args[..i].contains(&args[i]))
            .collect();
        if mask.len() == args.len() {
            filtered
        } else {
            self.network
                .child(NodeKind::Project(mask), filtered, self.ext)
        }
    }
}

#[cfg(test)]
mod tests {
    use trellis_ir::ProgramBuilder;

    use super::*;
    use crate::options::PlannerOptions;
    use crate::planner::plan_clause;

    #[test]
    fn test_repeated_arguments_filter_and_project() {
        let mut b = ProgramBuilder::new();
        b.relation("edge", 2).unwrap();
        b.query("loop_node", &["x"], |q| {
            q.clause(|c| {
                c.relation("edge", &["x", "x"]);
            });
        })
        .unwrap();
        let program = b.build();
        let query = program.query("loop_node").unwrap();
        let plan = plan_clause(&program, query, 0, PlannerOptions::default()).unwrap();

        let mut network = Network::new(Default::default());
        let mut ext = network.begin_extension();
        network.add_production("loop_node");
        let root = network.compile_clause(&plan, &mut ext).unwrap();

        assert!(matches!(network.node(root), NodeKind::Project(mask) if *mask == vec![0]));
        let labels: Vec<String> = (0..network.len())
            .map(|i| network.node(NodeId(i as u32)).label())
            .collect();
        assert_eq!(
            labels,
            vec![
                "production loop_node",
                "input edge",
                "filter ColumnsEqual([(0, 1)])",
                "project [0]",
            ]
        );
        assert_eq!(ext.new_inputs, vec![("edge".to_string(), NodeId(1))]);
        assert!(ext.initial.is_empty());
    }

    #[test]
    fn test_existing_nodes_are_pulled_into_new_children() {
        let mut network = Network::new(Default::default());
        let production = network.add_production("step");
        let tuple = vec![crate::Value::Int(1), crate::Value::Int(2)];
        let mut out = crate::network::Emitter::default();
        network.update(production, Slot::Primary, &tuple, 1, &mut out).unwrap();

        let mut ext = network.begin_extension();
        let closure = network.closure_node("step", &mut ext).unwrap();
        assert_eq!(ext.initial, vec![(closure, Slot::Primary, tuple, 1)]);
        assert_eq!(network.closure_node("step", &mut ext), Ok(closure));
        assert_eq!(network.children(production), &[(closure, Slot::Primary)]);
    }
}
