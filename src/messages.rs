use serde::{Deserialize, Serialize};

use crate::node::{MemberId, NodeRef};

/// Membership change that triggered a re-key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipEvent {
    Join(MemberId),
    Leave(MemberId),
}

/// New blinded key for one node on the sponsor's key path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdate {
    pub node: NodeRef,
    pub node_public: [u8; 32], // X25519 public of the refreshed node
}

/// What the sponsor publishes after re-keying
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyBroadcast {
    pub event: MembershipEvent,
    pub sponsor: MemberId,
    pub updates: Vec<KeyUpdate>, // leaf-to-root
    pub dh_operations: usize,    // spent on this event
    pub recipients: Vec<MemberId>,
}

impl RekeyBroadcast {
    /// Nodes whose keys changed, leaf-to-root
    pub fn refreshed_nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.updates.iter().map(|update| update.node)
    }
}
