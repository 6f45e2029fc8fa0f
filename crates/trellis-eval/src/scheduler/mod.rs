//! Delta scheduler.
//!
//! Every node owns a [`Mailbox`]; every node belongs to one communication
//! group. Groups are activated in topological order, lowest handle first,
//! and each activation runs until the group is settled:
//!
//! - a singleton group drains its one default mailbox;
//! - a recursive group repeats three phases until nothing is left: drain
//!   anti-monotone (then default) mailboxes, let every rederivable node
//!   rederive one tuple at a time, drain monotone (then default) mailboxes.
//!
//! Messages posted during an activation go to the receiving mailbox's fresh
//! buffer; downstream groups are merely enqueued, never run inline.

mod group;
mod mailbox;

use std::collections::BTreeSet;

use crate::cancel::CancellationToken;
use crate::classifier::{Classification, GroupId};
use crate::error::EvalError;
use crate::network::{Emitter, Network, NodeId, Slot};
use crate::Tuple;
pub use group::GroupKind;
use group::{Group, GroupState};
use mailbox::{Mailbox, Phase};

/// Counters for the most recent flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub activations: usize,
    pub messages: usize,
    pub rederivations: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    mailboxes: Vec<Mailbox>,
    group_of: Vec<GroupId>,
    groups: Vec<Group>,
    queue: BTreeSet<GroupId>,
    trace: Vec<GroupId>,
    stats: FlushStats,
    /// Match-set changes of productions, in the order they happened.
    changes: Vec<(NodeId, Tuple, bool)>,
}

impl Scheduler {
    pub fn group_of(&self, node: NodeId) -> Option<GroupId> {
        self.group_of.get(node.0 as usize).copied()
    }

    pub fn group_kind(&self, group: GroupId) -> Option<GroupKind> {
        self.groups.get(group.0 as usize).map(|g| g.kind)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Groups activated by the last flush, in activation order.
    pub fn trace(&self) -> &[GroupId] {
        &self.trace
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn take_changes(&mut self) -> Vec<(NodeId, Tuple, bool)> {
        std::mem::take(&mut self.changes)
    }

    /// Adopt a new classification. Pending messages and rederivable nodes
    /// are carried over into the new groups.
    pub fn rebuild(&mut self, classification: &Classification, network: &Network) {
        self.mailboxes.resize_with(network.len(), Mailbox::default);
        for (mailbox, &split) in self.mailboxes.iter_mut().zip(&classification.split) {
            mailbox.reshape(split);
        }
        self.group_of = classification.group_of.clone();
        self.groups = classification.groups.iter().map(Group::new).collect();
        self.queue.clear();
        for (i, mailbox) in self.mailboxes.iter().enumerate() {
            let node = NodeId(i as u32);
            let group = &mut self.groups[self.group_of[i].0 as usize];
            group.mark(node, &mailbox.pending());
            if network.has_rederivables(node) {
                group.rederivables.insert(node);
            }
        }
        for (i, group) in self.groups.iter_mut().enumerate() {
            if !group.is_settled() {
                group.state = GroupState::Enqueued;
                self.queue.insert(GroupId(i as u32));
            }
        }
        tracing::debug!(
            groups = self.groups.len(),
            pending = self.queue.len(),
            "scheduler rebuilt"
        );
    }

    /// Net count of `tuple` waiting in the mailbox of `node`.
    pub fn queued(&self, node: NodeId, slot: Slot, tuple: &Tuple) -> i32 {
        self.mailboxes
            .get(node.0 as usize)
            .map_or(0, |mailbox| mailbox.queued(slot, tuple))
    }

    pub fn post(&mut self, node: NodeId, slot: Slot, tuple: Tuple, count: i32) {
        let mailbox = &mut self.mailboxes[node.0 as usize];
        mailbox.post(slot, tuple, count);
        let pending = mailbox.pending();
        let id = self.group_of[node.0 as usize];
        let group = &mut self.groups[id.0 as usize];
        group.mark(node, &pending);
        if group.state == GroupState::Idle && !group.is_settled() {
            group.state = GroupState::Enqueued;
            self.queue.insert(id);
        }
    }

    /// Deliver until every group is idle. With a token, cancellation is
    /// checked before each group activation; cancelled groups stay queued.
    pub fn flush(
        &mut self,
        network: &mut Network,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), EvalError> {
        self.trace.clear();
        self.stats = FlushStats::default();
        while let Some(&id) = self.queue.first() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::debug!(remaining = self.queue.len(), "flush cancelled");
                return Err(EvalError::Cancelled);
            }
            self.queue.remove(&id);
            self.deliver(network, id)?;
        }
        tracing::debug!(
            activations = self.stats.activations,
            messages = self.stats.messages,
            rederivations = self.stats.rederivations,
            "flush complete"
        );
        Ok(())
    }

    fn deliver(&mut self, network: &mut Network, id: GroupId) -> Result<(), EvalError> {
        let g = id.0 as usize;
        self.groups[g].state = GroupState::Delivering;
        self.trace.push(id);
        self.stats.activations += 1;
        tracing::trace!(group = %id, kind = ?self.groups[g].kind, "delivering group");
        match self.groups[g].kind {
            GroupKind::Singleton => {
                while let Some(node) = self.groups[g].next(Phase::Default) {
                    self.drain(network, id, node, Phase::Default)?;
                }
            }
            GroupKind::Recursive => loop {
                self.settle(network, id, Phase::AntiMonotone)?;
                while !self.groups[g].rederivables.is_empty() {
                    let nodes: Vec<NodeId> = self.groups[g].rederivables.iter().copied().collect();
                    for node in nodes {
                        let mut out = Emitter::default();
                        network.rederive_one(node, &mut out);
                        self.stats.rederivations += 1;
                        self.dispatch(network, node, out);
                        self.sync_rederivable(network, id, node)?;
                    }
                }
                self.settle(network, id, Phase::Monotone)?;
                if self.groups[g].is_settled() {
                    break;
                }
            },
        }
        if !self.groups[g].is_settled() {
            return Err(EvalError::Internal {
                node: self.groups[g].members[0].0,
                group: Some(id.0),
                message: "group left unsettled after delivery".to_string(),
            });
        }
        self.groups[g].state = GroupState::Idle;
        Ok(())
    }

    /// Drain `phase` mailboxes, falling back to default ones, until both
    /// are empty.
    fn settle(&mut self, network: &mut Network, id: GroupId, phase: Phase) -> Result<(), EvalError> {
        loop {
            let group = &self.groups[id.0 as usize];
            if let Some(node) = group.next(phase) {
                self.drain(network, id, node, phase)?;
            } else if let Some(node) = group.next(Phase::Default) {
                self.drain(network, id, node, Phase::Default)?;
            } else {
                return Ok(());
            }
        }
    }

    fn drain(
        &mut self,
        network: &mut Network,
        id: GroupId,
        node: NodeId,
        phase: Phase,
    ) -> Result<(), EvalError> {
        let mailbox = &mut self.mailboxes[node.0 as usize];
        let queue = mailbox.take(phase);
        let pending = mailbox.pending();
        self.groups[id.0 as usize].mark(node, &pending);
        for ((slot, tuple), count) in queue {
            let mut out = Emitter::default();
            network
                .update(node, slot, &tuple, count, &mut out)
                .map_err(|message| EvalError::Internal {
                    node: node.0,
                    group: Some(id.0),
                    message,
                })?;
            self.stats.messages += 1;
            self.dispatch(network, node, out);
        }
        self.sync_rederivable(network, id, node)
    }

    fn dispatch(&mut self, network: &Network, node: NodeId, out: Emitter) {
        self.changes
            .extend(out.changes.into_iter().map(|(t, inserted)| (node, t, inserted)));
        for (tuple, count) in out.messages {
            for &(child, slot) in network.children(node) {
                self.post(child, slot, tuple.clone(), count);
            }
        }
    }

    fn sync_rederivable(&mut self, network: &Network, id: GroupId, node: NodeId) -> Result<(), EvalError> {
        let group = &mut self.groups[id.0 as usize];
        if !network.has_rederivables(node) {
            group.rederivables.remove(&node);
            return Ok(());
        }
        if group.kind == GroupKind::Singleton {
            return Err(EvalError::Internal {
                node: node.0,
                group: Some(id.0),
                message: "rederivable node in a singleton group".to_string(),
            });
        }
        group.rederivables.insert(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, components};
    use crate::reachability::ClosureStrategy;
    use crate::Value;

    /// P and Q feed each other; R reads P.
    fn mutual_recursion() -> (Network, Scheduler, [NodeId; 3]) {
        let mut network = Network::new(ClosureStrategy::Counting);
        let mut ext = network.begin_extension();
        let p = network.add_production("p");
        let q = network.add_production("q");
        let r = network.add_production("r");
        network.connect(p, q, Slot::Primary, &mut ext);
        network.connect(q, p, Slot::Primary, &mut ext);
        network.connect(p, r, Slot::Primary, &mut ext);

        let edges = network.edges();
        let comps = components(network.len(), &edges);
        for node in comps.cyclic_nodes() {
            network.enable_rederive(node);
        }
        let classification = classify(&comps, &edges, &network.traits());
        let mut scheduler = Scheduler::default();
        scheduler.rebuild(&classification, &network);
        (network, scheduler, [p, q, r])
    }

    fn contents(network: &Network, query: &str) -> Vec<Tuple> {
        let mut out: Vec<Tuple> = network
            .production_node(query)
            .map(|p| p.tuples().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    #[test]
    fn test_dependent_group_runs_after_recursive_group() {
        let (mut network, mut scheduler, [p, q, r]) = mutual_recursion();
        let pq = scheduler.group_of(p).unwrap();
        assert_eq!(scheduler.group_of(q), Some(pq));
        assert_eq!(scheduler.group_kind(pq), Some(GroupKind::Recursive));
        let rg = scheduler.group_of(r).unwrap();
        assert_eq!(scheduler.group_kind(rg), Some(GroupKind::Singleton));

        scheduler.post(p, Slot::Primary, vec![Value::Int(1)], 1);
        scheduler.flush(&mut network, None).unwrap();
        assert_eq!(scheduler.trace(), &[pq, rg]);
        assert_eq!(contents(&network, "q"), vec![vec![Value::Int(1)]]);
        assert_eq!(contents(&network, "r"), vec![vec![Value::Int(1)]]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_cyclic_support_is_retracted() {
        let (mut network, mut scheduler, [p, ..]) = mutual_recursion();
        scheduler.post(p, Slot::Primary, vec![Value::Int(1)], 1);
        scheduler.flush(&mut network, None).unwrap();
        scheduler.take_changes();

        scheduler.post(p, Slot::Primary, vec![Value::Int(1)], -1);
        scheduler.flush(&mut network, None).unwrap();
        for query in ["p", "q", "r"] {
            assert!(contents(&network, query).is_empty(), "{query} still holds tuples");
        }
        let retracted: Vec<bool> = scheduler.take_changes().into_iter().map(|(_, _, i)| i).collect();
        assert_eq!(retracted, vec![false; 3]);
    }

    #[test]
    fn test_second_support_survives_rederivation() {
        let (mut network, mut scheduler, [p, q, _]) = mutual_recursion();
        scheduler.post(p, Slot::Primary, vec![Value::Int(1)], 1);
        scheduler.post(q, Slot::Secondary, vec![Value::Int(1)], 1);
        scheduler.flush(&mut network, None).unwrap();

        scheduler.post(p, Slot::Primary, vec![Value::Int(1)], -1);
        scheduler.flush(&mut network, None).unwrap();
        assert_eq!(contents(&network, "p"), vec![vec![Value::Int(1)]]);
        assert_eq!(contents(&network, "r"), vec![vec![Value::Int(1)]]);
        assert!(scheduler.stats().rederivations > 0);
    }

    #[test]
    fn test_cancelled_flush_keeps_work_queued() {
        let (mut network, mut scheduler, [p, ..]) = mutual_recursion();
        scheduler.post(p, Slot::Primary, vec![Value::Int(1)], 1);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(scheduler.flush(&mut network, Some(&token)), Err(EvalError::Cancelled));
        assert!(!scheduler.is_idle());
        scheduler.flush(&mut network, None).unwrap();
        assert_eq!(contents(&network, "r"), vec![vec![Value::Int(1)]]);
    }
}
