//! Key tree vertices and their identifiers

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{KeyPair, Secret};

/// Identifier of a group member (a leaf). Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u32);

/// Identifier of an internal node. Drawn from a counter independent of `MemberId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalId(pub u32);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Public identity of a tree node
///
/// Leaf and internal ids overlap numerically, so paths are reported as
/// `NodeRef`s rather than bare integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Leaf(MemberId),
    Internal(InternalId),
}

impl NodeRef {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeRef::Leaf(_))
    }

    /// The member id, if this is a leaf
    pub fn member(&self) -> Option<MemberId> {
        match self {
            NodeRef::Leaf(id) => Some(*id),
            NodeRef::Internal(_) => None,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Leaf(id) => id.fmt(f),
            NodeRef::Internal(id) => id.fmt(f),
        }
    }
}

impl From<MemberId> for NodeRef {
    fn from(id: MemberId) -> Self {
        NodeRef::Leaf(id)
    }
}

impl From<InternalId> for NodeRef {
    fn from(id: InternalId) -> Self {
        NodeRef::Internal(id)
    }
}

/// Index of a node slot in the tree arena
///
/// Handles are only meaningful for the tree that issued them and only while
/// the node is alive; a freed slot may be handed out again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

/// A single key tree vertex
///
/// A node has either no children (leaf) or two (internal). `parent` is a
/// plain index back into the arena and never owns anything.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeRef,
    pub level: usize,
    pub left: Option<NodeHandle>,
    pub right: Option<NodeHandle>,
    pub parent: Option<NodeHandle>,
    pub key_pair: KeyPair,
    pub group_key: Secret,
}

impl Node {
    /// Create a detached leaf; its group key is its own private key.
    pub fn leaf(id: MemberId, key_pair: KeyPair) -> Self {
        let group_key = key_pair.sk;
        Self {
            id: NodeRef::Leaf(id),
            level: 0,
            left: None,
            right: None,
            parent: None,
            key_pair,
            group_key,
        }
    }

    /// Create an internal node over two children.
    ///
    /// The key material is a placeholder until the re-key pass derives it
    /// from the children.
    pub fn internal(id: InternalId, left: NodeHandle, right: NodeHandle) -> Self {
        Self {
            id: NodeRef::Internal(id),
            level: 0,
            left: Some(left),
            right: Some(right),
            parent: None,
            key_pair: KeyPair::empty(),
            group_key: [0u8; 32],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Blinded key, safe to broadcast
    pub fn public_key(&self) -> [u8; 32] {
        self.key_pair.pk
    }

    /// Both children, if this is a well-formed internal node
    pub fn children(&self) -> Option<(NodeHandle, NodeHandle)> {
        match (self.left, self.right) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.group_key.zeroize();
    }
}
