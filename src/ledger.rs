//! Per-pass bookkeeping for broadcast accounting

use crate::node::{InternalId, MemberId};

/// "Already handled" flags for one re-key pass
///
/// One flag per leaf (member already notified) and one per internal node
/// (new public key already announced). Only meaningful between `begin` and
/// `finish`.
#[derive(Clone, Debug, Default)]
pub struct BroadcastLedger {
    notified_members: Vec<bool>,
    announced_nodes: Vec<bool>,
}

impl BroadcastLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the ledger for the current id spaces and clear every flag.
    pub fn begin(&mut self, member_slots: usize, internal_slots: usize) {
        self.notified_members.clear();
        self.notified_members.resize(member_slots, false);
        self.announced_nodes.clear();
        self.announced_nodes.resize(internal_slots, false);
    }

    /// Mark a member notified. Returns `false` if it already was this pass.
    pub fn notify(&mut self, member: MemberId) -> bool {
        mark(&mut self.notified_members, member.0 as usize)
    }

    /// Mark an internal node's public key announced. Returns `false` if it already was.
    pub fn announce(&mut self, node: InternalId) -> bool {
        mark(&mut self.announced_nodes, node.0 as usize)
    }

    pub fn is_notified(&self, member: MemberId) -> bool {
        self.notified_members
            .get(member.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_announced(&self, node: InternalId) -> bool {
        self.announced_nodes
            .get(node.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn notified_count(&self) -> usize {
        self.notified_members.iter().filter(|flag| **flag).count()
    }

    /// Reset all flags so the next pass starts clean.
    pub fn finish(&mut self) {
        self.notified_members.iter_mut().for_each(|flag| *flag = false);
        self.announced_nodes.iter_mut().for_each(|flag| *flag = false);
    }
}

fn mark(flags: &mut Vec<bool>, index: usize) -> bool {
    if index >= flags.len() {
        flags.resize(index + 1, false);
    }
    !std::mem::replace(&mut flags[index], true)
}
