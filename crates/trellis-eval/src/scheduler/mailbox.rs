//! Per-node message queues.
//!
//! Messages aggregate by `(slot, tuple)` into a net signed count, so an
//! insertion and a deletion of the same tuple cancel before delivery.

use std::collections::BTreeMap;

use crate::network::Slot;
use crate::Tuple;

pub(crate) type Queue = BTreeMap<(Slot, Tuple), i32>;

/// Which phase of a recursive group may drain a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    AntiMonotone,
    Monotone,
    Default,
}

fn add(queue: &mut Queue, key: (Slot, Tuple), count: i32) {
    let net = queue.get(&key).copied().unwrap_or(0) + count;
    if net == 0 {
        queue.remove(&key);
    } else {
        queue.insert(key, net);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mailbox {
    Default(Queue),
    /// Deletions wait for the anti-monotone phase, insertions for the
    /// monotone phase.
    Splitting { anti: Queue, mono: Queue },
}

impl Default for Mailbox {
    fn default() -> Self {
        Mailbox::Default(Queue::new())
    }
}

impl Mailbox {
    pub fn splitting() -> Self {
        Mailbox::Splitting {
            anti: Queue::new(),
            mono: Queue::new(),
        }
    }

    pub fn is_splitting(&self) -> bool {
        matches!(self, Mailbox::Splitting { .. })
    }

    pub fn post(&mut self, slot: Slot, tuple: Tuple, count: i32) {
        match self {
            Mailbox::Default(queue) => add(queue, (slot, tuple), count),
            Mailbox::Splitting { anti, mono } => {
                let key = (slot, tuple);
                let net = anti.remove(&key).unwrap_or(0) + mono.remove(&key).unwrap_or(0) + count;
                if net < 0 {
                    anti.insert(key, net);
                } else if net > 0 {
                    mono.insert(key, net);
                }
            }
        }
    }

    /// Phases with pending messages.
    pub fn pending(&self) -> Vec<Phase> {
        match self {
            Mailbox::Default(queue) if !queue.is_empty() => vec![Phase::Default],
            Mailbox::Default(_) => Vec::new(),
            Mailbox::Splitting { anti, mono } => {
                let mut out = Vec::new();
                if !anti.is_empty() {
                    out.push(Phase::AntiMonotone);
                }
                if !mono.is_empty() {
                    out.push(Phase::Monotone);
                }
                out
            }
        }
    }

    /// Net count queued for `tuple` on `slot`, across phases.
    pub fn queued(&self, slot: Slot, tuple: &Tuple) -> i32 {
        let key = (slot, tuple.clone());
        let count = |queue: &Queue| queue.get(&key).copied().unwrap_or(0);
        match self {
            Mailbox::Default(queue) => count(queue),
            Mailbox::Splitting { anti, mono } => count(anti) + count(mono),
        }
    }

    /// Take everything queued for `phase`, leaving an empty buffer behind
    /// for messages posted during delivery.
    pub fn take(&mut self, phase: Phase) -> Queue {
        match (self, phase) {
            (Mailbox::Default(queue), Phase::Default) => std::mem::take(queue),
            (Mailbox::Splitting { anti, .. }, Phase::AntiMonotone) => std::mem::take(anti),
            (Mailbox::Splitting { mono, .. }, Phase::Monotone) => std::mem::take(mono),
            _ => Queue::new(),
        }
    }

    /// Rebuild as a splitting or default mailbox keeping the queued messages.
    pub fn reshape(&mut self, splitting: bool) {
        if self.is_splitting() == splitting {
            return;
        }
        let old = std::mem::replace(
            self,
            if splitting {
                Mailbox::splitting()
            } else {
                Mailbox::default()
            },
        );
        let messages: Vec<((Slot, Tuple), i32)> = match old {
            Mailbox::Default(queue) => queue.into_iter().collect(),
            Mailbox::Splitting { anti, mono } => anti.into_iter().chain(mono).collect(),
        };
        for ((slot, tuple), count) in messages {
            self.post(slot, tuple, count);
        }
    }
}
