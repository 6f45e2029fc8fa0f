//! Communication groups and their delivery state.

use std::collections::BTreeSet;

use super::mailbox::Phase;
use crate::classifier::GroupLayout;
use crate::network::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// One node, drained once per activation.
    Singleton,
    /// Phased delivery until every mailbox and rederivable node is settled.
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupState {
    Idle,
    Enqueued,
    Delivering,
}

#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub kind: GroupKind,
    pub members: Vec<NodeId>,
    pub state: GroupState,
    anti: BTreeSet<NodeId>,
    mono: BTreeSet<NodeId>,
    default: BTreeSet<NodeId>,
    pub rederivables: BTreeSet<NodeId>,
}

impl Group {
    pub fn new(layout: &GroupLayout) -> Self {
        Self {
            kind: if layout.recursive {
                GroupKind::Recursive
            } else {
                GroupKind::Singleton
            },
            members: layout.members.clone(),
            state: GroupState::Idle,
            anti: BTreeSet::new(),
            mono: BTreeSet::new(),
            default: BTreeSet::new(),
            rederivables: BTreeSet::new(),
        }
    }

    fn set(&mut self, phase: Phase) -> &mut BTreeSet<NodeId> {
        match phase {
            Phase::AntiMonotone => &mut self.anti,
            Phase::Monotone => &mut self.mono,
            Phase::Default => &mut self.default,
        }
    }

    /// Record which phases `node` has messages for.
    pub fn mark(&mut self, node: NodeId, pending: &[Phase]) {
        for phase in [Phase::AntiMonotone, Phase::Monotone, Phase::Default] {
            if pending.contains(&phase) {
                self.set(phase).insert(node);
            } else {
                self.set(phase).remove(&node);
            }
        }
    }

    pub fn next(&self, phase: Phase) -> Option<NodeId> {
        match phase {
            Phase::AntiMonotone => self.anti.first(),
            Phase::Monotone => self.mono.first(),
            Phase::Default => self.default.first(),
        }
        .copied()
    }

    pub fn is_settled(&self) -> bool {
        self.anti.is_empty()
            && self.mono.is_empty()
            && self.default.is_empty()
            && self.rederivables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_tracks_pending_phases() {
        let mut group = Group::new(&GroupLayout {
            members: vec![NodeId(3), NodeId(4)],
            recursive: true,
        });
        assert_eq!(group.kind, GroupKind::Recursive);
        group.mark(NodeId(4), &[Phase::AntiMonotone, Phase::Monotone]);
        group.mark(NodeId(3), &[Phase::Monotone]);
        assert_eq!(group.next(Phase::Monotone), Some(NodeId(3)));
        assert_eq!(group.next(Phase::AntiMonotone), Some(NodeId(4)));
        group.mark(NodeId(4), &[]);
        group.mark(NodeId(3), &[]);
        assert!(group.is_settled());
        group.rederivables.insert(NodeId(3));
        assert!(!group.is_settled());
    }
}
