//! Key tree structure: membership changes, rebalancing, paths and sponsors
//!
//! Nodes live in an arena and refer to each other by `NodeHandle`. Children
//! are owned by position in the arena; the parent link is a plain index used
//! only for navigation.
//!
//! Placement of a joining member:
//! 1. Empty tree: the new leaf becomes the root.
//! 2. Otherwise start at the leaf with the largest live member id and climb
//!    while the parent's subtree is still perfect. A new internal node takes
//!    the position of the node reached, with that node as left child and the
//!    new leaf as right child. When the whole tree is perfect this is the root,
//!    so the tree grows a new root.
//!
//! A leaving member's sibling subtree takes the place of their common parent.

use std::fmt;

use tracing::{debug, trace, warn};

use crate::config::TreeConfig;
use crate::crypto::{KeyPrimitive, Secret, X25519};
use crate::directory::{InternalNodeDirectory, MemberDirectory};
use crate::error::{TreeError, TreeResult};
use crate::ledger::BroadcastLedger;
use crate::messages::{MembershipEvent, RekeyBroadcast};
use crate::node::{InternalId, MemberId, Node, NodeHandle, NodeRef};

/// Group key tree
pub struct KeyTree<P: KeyPrimitive = X25519> {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    root: Option<NodeHandle>,
    members: MemberDirectory,
    internals: InternalNodeDirectory,
    next_leaf_id: u32,
    next_internal_id: u32,
    pub(crate) dh_operations: usize,
    pub(crate) broadcasts: usize,
    pub(crate) ledger: BroadcastLedger,
    pub(crate) last_rekey: Option<RekeyBroadcast>,
    pub(crate) primitive: P,
}

impl Default for KeyTree<X25519> {
    fn default() -> Self {
        Self::new(X25519::new())
    }
}

impl KeyTree<X25519> {
    /// Build the initial group described by `config`, using the primitive it asks for
    pub fn with_config(config: &TreeConfig) -> TreeResult<Self> {
        Self::from_config(config.primitive(), config)
    }
}

impl<P: KeyPrimitive> KeyTree<P> {
    /// Create an empty tree
    pub fn new(primitive: P) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            members: MemberDirectory::new(),
            internals: InternalNodeDirectory::new(),
            next_leaf_id: 0,
            next_internal_id: 0,
            dh_operations: 0,
            broadcasts: 0,
            ledger: BroadcastLedger::new(),
            last_rekey: None,
            primitive,
        }
    }

    /// Create a tree with `members` members and zeroed metrics
    pub fn bootstrap(primitive: P, members: usize) -> TreeResult<Self> {
        let config = TreeConfig {
            initial_members: members,
            ..TreeConfig::default()
        };
        Self::from_config(primitive, &config)
    }

    /// Create a tree following `config`
    pub fn from_config(primitive: P, config: &TreeConfig) -> TreeResult<Self> {
        config.validate()?;

        let mut tree = Self::new(primitive);
        for _ in 0..config.initial_members {
            tree.add_member()?;
        }
        if config.reset_metrics_after_bootstrap {
            tree.reset_metrics();
        }

        debug!(members = tree.leaf_count(), "key tree bootstrapped");
        Ok(tree)
    }

    // ===== Membership =====

    /// Add a member and re-key its path to the root.
    ///
    /// Returns the new member's id.
    pub fn add_member(&mut self) -> TreeResult<MemberId> {
        // Key generation comes first so a primitive failure leaves the tree untouched
        let key_pair = self.primitive.generate_keypair()?;
        self.dh_operations += 1;

        let target = match self.root {
            Some(_) => Some(self.insertion_target()?),
            None => None,
        };

        let id = MemberId(self.next_leaf_id);
        self.next_leaf_id += 1;
        let leaf = self.alloc(Node::leaf(id, key_pair));
        self.members.insert(id, leaf);

        let insertion_point = match target {
            None => {
                self.root = Some(leaf);
                leaf
            }
            Some(target) => {
                let (target_parent, target_level) = {
                    let node = self.node(target)?;
                    (node.parent, node.level)
                };

                let internal_id = InternalId(self.next_internal_id);
                self.next_internal_id += 1;
                let joined = self.alloc(Node::internal(internal_id, target, leaf));
                self.internals.insert(internal_id, joined);

                self.replace_child(target_parent, target, joined)?;
                self.node_mut(target)?.parent = Some(joined);
                self.node_mut(leaf)?.parent = Some(joined);
                self.relevel(joined, target_level)?;
                joined
            }
        };

        let sponsor = self.sponsor_from(insertion_point)?;
        let anchor = self.node(insertion_point)?.id;
        debug!(
            member = %id,
            insertion_point = %anchor,
            leaves = self.leaf_count(),
            "member joined"
        );

        self.rekey(MembershipEvent::Join(id), sponsor)?;
        Ok(id)
    }

    /// Remove a member; its sibling subtree takes the place of their parent.
    ///
    /// Fails with `NotFound` and changes nothing if `id` is not a live member.
    pub fn remove_member(&mut self, id: MemberId) -> TreeResult<()> {
        let Some(leaf) = self.members.get(id) else {
            warn!(member = %id, "removal of unknown member rejected");
            return Err(TreeError::NotFound(id));
        };

        let Some(parent) = self.node(leaf)?.parent else {
            // Last member: the tree becomes empty, nobody is left to re-key
            self.members.remove(id);
            self.release(leaf)?;
            self.root = None;
            self.last_rekey = None;
            debug!(member = %id, "last member left");
            return Ok(());
        };

        let sibling = self.sibling_handle(leaf)?;
        let sponsor = self.sponsor_from(sibling)?;

        // Sponsor key before any mutation, as in add_member
        let key_pair = self.primitive.generate_keypair()?;
        self.dh_operations += 1;

        let (grandparent, parent_level, parent_id) = {
            let node = self.node(parent)?;
            (node.parent, node.level, node.id)
        };

        self.replace_child(grandparent, parent, sibling)?;
        self.relevel(sibling, parent_level)?;

        self.members.remove(id);
        if let NodeRef::Internal(parent_id) = parent_id {
            self.internals.remove(parent_id);
        }
        self.release(leaf)?;
        self.release(parent)?;
        self.install_leaf_key(sponsor, key_pair)?;

        let promoted = self.node(sibling)?.id;
        debug!(
            member = %id,
            promoted = %promoted,
            leaves = self.leaf_count(),
            "member left"
        );

        self.rekey(MembershipEvent::Leave(id), sponsor)
    }

    // ===== Metrics =====

    /// floor(log2(leaf_count)), 0 for a tree with at most one leaf
    pub fn tree_height(&self) -> usize {
        match self.leaf_count() {
            0 | 1 => 0,
            n => n.ilog2() as usize,
        }
    }

    /// Depth of the deepest leaf
    pub fn depth(&self) -> usize {
        self.members
            .iter()
            .filter_map(|(_, handle)| self.node(handle).ok())
            .map(|node| node.level)
            .max()
            .unwrap_or(0)
    }

    pub fn dh_operation_count(&self) -> usize {
        self.dh_operations
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts
    }

    /// Zero the DH and broadcast counters
    pub fn reset_metrics(&mut self) {
        self.dh_operations = 0;
        self.broadcasts = 0;
    }

    /// The sponsor's broadcast for the most recent membership event
    pub fn last_rekey(&self) -> Option<&RekeyBroadcast> {
        self.last_rekey.as_ref()
    }

    // ===== Inspection =====

    pub fn leaf_count(&self) -> usize {
        self.members.len()
    }

    pub fn internal_count(&self) -> usize {
        self.internals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn contains_member(&self, id: MemberId) -> bool {
        self.members.contains(id)
    }

    /// Live member ids in ascending order
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|(id, _)| id).collect()
    }

    pub fn max_member_id(&self) -> Option<MemberId> {
        self.members.max_id()
    }

    pub fn max_internal_id(&self) -> Option<InternalId> {
        self.internals.max_id()
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.root.and_then(|root| self.node(root).ok()).map(|node| node.id)
    }

    /// Root group key, shared by all members
    pub fn group_key(&self) -> Option<Secret> {
        self.root
            .and_then(|root| self.node(root).ok())
            .map(|node| node.group_key)
    }

    pub fn node_level(&self, node: NodeRef) -> TreeResult<usize> {
        Ok(self.node(self.handle_of(node)?)?.level)
    }

    pub fn parent_of(&self, node: NodeRef) -> TreeResult<Option<NodeRef>> {
        match self.node(self.handle_of(node)?)?.parent {
            Some(parent) => Ok(Some(self.node(parent)?.id)),
            None => Ok(None),
        }
    }

    /// (left, right) of an internal node, `None` for a leaf
    pub fn children_of(&self, node: NodeRef) -> TreeResult<Option<(NodeRef, NodeRef)>> {
        match self.node(self.handle_of(node)?)?.children() {
            Some((left, right)) => Ok(Some((self.node(left)?.id, self.node(right)?.id))),
            None => Ok(None),
        }
    }

    pub fn public_key(&self, node: NodeRef) -> TreeResult<[u8; 32]> {
        Ok(self.node(self.handle_of(node)?)?.public_key())
    }

    pub fn node_group_key(&self, node: NodeRef) -> TreeResult<Secret> {
        Ok(self.node(self.handle_of(node)?)?.group_key)
    }

    /// The other child of `node`'s parent
    pub fn sibling(&self, node: NodeRef) -> TreeResult<NodeRef> {
        let sibling = self.sibling_handle(self.handle_of(node)?)?;
        Ok(self.node(sibling)?.id)
    }

    // ===== Key path / co-path =====

    /// `member`'s leaf, its parent, ... up to the root
    pub fn key_path(&self, member: MemberId) -> TreeResult<Vec<NodeRef>> {
        self.key_path_of_node(NodeRef::Leaf(member))
    }

    /// Siblings of every key path node except the root, leaf-to-root
    pub fn co_path(&self, member: MemberId) -> TreeResult<Vec<NodeRef>> {
        self.co_path_of_node(NodeRef::Leaf(member))
    }

    pub fn key_path_of_node(&self, node: NodeRef) -> TreeResult<Vec<NodeRef>> {
        let path = self.key_path_handles(self.handle_of(node)?)?;
        self.refs(&path)
    }

    pub fn co_path_of_node(&self, node: NodeRef) -> TreeResult<Vec<NodeRef>> {
        let path = self.co_path_handles(self.handle_of(node)?)?;
        self.refs(&path)
    }

    pub(crate) fn key_path_handles(&self, start: NodeHandle) -> TreeResult<Vec<NodeHandle>> {
        let mut path = vec![start];
        let mut current = start;

        while let Some(parent) = self.node(current)?.parent {
            path.push(parent);
            current = parent;
        }

        Ok(path)
    }

    pub(crate) fn co_path_handles(&self, start: NodeHandle) -> TreeResult<Vec<NodeHandle>> {
        let mut copath = Vec::new();
        let mut current = start;

        while let Some(parent) = self.node(current)?.parent {
            copath.push(self.sibling_handle(current)?);
            current = parent;
        }

        Ok(copath)
    }

    // ===== Sponsor election =====

    /// Member responsible for re-keying after a change at `node`
    ///
    /// Descends from `node`, preferring the right child over the left.
    pub fn sponsor_for(&self, node: NodeRef) -> TreeResult<MemberId> {
        let sponsor = self.sponsor_from(self.handle_of(node)?)?;
        self.node(sponsor)?
            .id
            .member()
            .ok_or_else(|| TreeError::structural("sponsor descent ended on an internal node"))
    }

    pub(crate) fn sponsor_from(&self, start: NodeHandle) -> TreeResult<NodeHandle> {
        let mut current = start;
        loop {
            let node = self.node(current)?;
            match (node.right, node.left) {
                (Some(right), _) => current = right,
                (None, Some(left)) => current = left,
                (None, None) => return Ok(current),
            }
        }
    }

    // ===== Traversal and validation =====

    pub fn inorder(&self) -> TreeResult<Vec<NodeRef>> {
        let mut out = Vec::with_capacity(self.leaf_count() + self.internal_count());
        if let Some(root) = self.root {
            self.walk_inorder(root, &mut out)?;
        }
        Ok(out)
    }

    pub fn preorder(&self) -> TreeResult<Vec<NodeRef>> {
        let mut out = Vec::with_capacity(self.leaf_count() + self.internal_count());
        let mut stack: Vec<NodeHandle> = self.root.into_iter().collect();

        while let Some(handle) = stack.pop() {
            let node = self.node(handle)?;
            out.push(node.id);
            if let Some((left, right)) = node.children() {
                stack.push(right);
                stack.push(left);
            }
        }

        Ok(out)
    }

    fn walk_inorder(&self, handle: NodeHandle, out: &mut Vec<NodeRef>) -> TreeResult<()> {
        let node = self.node(handle)?;
        match node.children() {
            Some((left, right)) => {
                self.walk_inorder(left, out)?;
                out.push(node.id);
                self.walk_inorder(right, out)
            }
            None => {
                out.push(node.id);
                Ok(())
            }
        }
    }

    /// Check every structural and key invariant of the tree.
    ///
    /// Internal group keys are recomputed with the primitive; this does not
    /// count toward the DH metric.
    pub fn validate(&self) -> TreeResult<()> {
        let Some(root) = self.root else {
            if !self.members.is_empty() || !self.internals.is_empty() {
                return Err(TreeError::structural("empty tree with registered nodes"));
            }
            return Ok(());
        };

        let mut leaves = 0;
        let mut internals = 0;
        let mut stack = vec![(root, None, 0usize)];

        while let Some((handle, expected_parent, expected_level)) = stack.pop() {
            let node = self.node(handle)?;

            if node.parent != expected_parent {
                return Err(TreeError::structural(format!(
                    "{} has a wrong parent link",
                    node.id
                )));
            }
            if node.level != expected_level {
                return Err(TreeError::structural(format!(
                    "{} is at level {} but sits at depth {}",
                    node.id, node.level, expected_level
                )));
            }

            match (node.id, node.left, node.right) {
                (NodeRef::Leaf(id), None, None) => {
                    if self.members.get(id) != Some(handle) {
                        return Err(TreeError::structural(format!(
                            "{id} is missing from the member directory"
                        )));
                    }
                    leaves += 1;
                }
                (NodeRef::Internal(id), Some(left), Some(right)) => {
                    if self.internals.get(id) != Some(handle) {
                        return Err(TreeError::structural(format!(
                            "{id} is missing from the internal node directory"
                        )));
                    }
                    self.check_internal_key(node, left, right)?;
                    internals += 1;
                    stack.push((left, Some(handle), expected_level + 1));
                    stack.push((right, Some(handle), expected_level + 1));
                }
                (id, _, _) => {
                    return Err(TreeError::structural(format!(
                        "{id} has an invalid number of children"
                    )));
                }
            }
        }

        if leaves != self.members.len() || internals != self.internals.len() {
            return Err(TreeError::structural(
                "directories disagree with the reachable tree",
            ));
        }
        if internals + 1 != leaves {
            return Err(TreeError::structural(
                "internal node count is not leaf count - 1",
            ));
        }
        if self.nodes.iter().flatten().count() != leaves + internals {
            return Err(TreeError::structural("unreachable nodes left in the arena"));
        }

        Ok(())
    }

    fn check_internal_key(
        &self,
        node: &Node,
        left: NodeHandle,
        right: NodeHandle,
    ) -> TreeResult<()> {
        let left = self.node(left)?;
        let right = self.node(right)?;

        let expected = self
            .primitive
            .compute_shared_secret(&left.key_pair.sk, &right.key_pair.pk)?;
        if expected != node.group_key {
            return Err(TreeError::structural(format!(
                "{} group key does not match its children",
                node.id
            )));
        }

        let derived = self.primitive.keypair_from_secret(&node.group_key)?;
        if derived.pk != node.key_pair.pk {
            return Err(TreeError::structural(format!(
                "{} key pair is not derived from its group key",
                node.id
            )));
        }

        Ok(())
    }

    // ===== Arena helpers =====

    fn alloc(&mut self, node: Node) -> NodeHandle {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeHandle(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeHandle(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, handle: NodeHandle) -> TreeResult<Node> {
        let node = self
            .nodes
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or_else(|| TreeError::structural("release of a dangling node handle"))?;
        self.free.push(handle.0);
        Ok(node)
    }

    pub(crate) fn node(&self, handle: NodeHandle) -> TreeResult<&Node> {
        self.nodes
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TreeError::structural("dangling node handle"))
    }

    pub(crate) fn node_mut(&mut self, handle: NodeHandle) -> TreeResult<&mut Node> {
        self.nodes
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| TreeError::structural("dangling node handle"))
    }

    pub(crate) fn leaf_handle(&self, id: MemberId) -> TreeResult<NodeHandle> {
        self.members.get(id).ok_or(TreeError::NotFound(id))
    }

    pub(crate) fn handle_of(&self, node: NodeRef) -> TreeResult<NodeHandle> {
        match node {
            NodeRef::Leaf(id) => self.leaf_handle(id),
            NodeRef::Internal(id) => self
                .internals
                .get(id)
                .ok_or(TreeError::UnknownNode(node)),
        }
    }

    /// Id-space sizes for sizing the broadcast ledger
    pub(crate) fn id_slots(&self) -> (usize, usize) {
        (self.members.capacity(), self.internals.capacity())
    }

    fn refs(&self, handles: &[NodeHandle]) -> TreeResult<Vec<NodeRef>> {
        handles
            .iter()
            .map(|&handle| self.node(handle).map(|node| node.id))
            .collect()
    }

    // ===== Structural helpers =====

    pub(crate) fn sibling_handle(&self, handle: NodeHandle) -> TreeResult<NodeHandle> {
        let node = self.node(handle)?;
        let parent = node
            .parent
            .ok_or_else(|| TreeError::structural(format!("root {} has no sibling", node.id)))?;
        let (left, right) = self
            .node(parent)?
            .children()
            .ok_or_else(|| TreeError::structural("parent with fewer than two children"))?;

        if left == handle {
            Ok(right)
        } else if right == handle {
            Ok(left)
        } else {
            Err(TreeError::structural(format!(
                "{} is not a child of its parent",
                node.id
            )))
        }
    }

    /// Put `new` where `old` hung under `parent` (or at the root).
    fn replace_child(
        &mut self,
        parent: Option<NodeHandle>,
        old: NodeHandle,
        new: NodeHandle,
    ) -> TreeResult<()> {
        match parent {
            None => self.root = Some(new),
            Some(parent) => {
                let node = self.node_mut(parent)?;
                if node.left == Some(old) {
                    node.left = Some(new);
                } else if node.right == Some(old) {
                    node.right = Some(new);
                } else {
                    return Err(TreeError::structural("replaced node is not a child"));
                }
            }
        }
        self.node_mut(new)?.parent = parent;
        Ok(())
    }

    fn relevel(&mut self, top: NodeHandle, level: usize) -> TreeResult<()> {
        let mut stack = vec![(top, level)];
        while let Some((handle, level)) = stack.pop() {
            let node = self.node_mut(handle)?;
            node.level = level;
            if let Some((left, right)) = node.children() {
                stack.push((left, level + 1));
                stack.push((right, level + 1));
            }
        }
        Ok(())
    }

    /// Height of the subtree at `handle` if all its leaves share one depth
    fn perfect_height(&self, handle: NodeHandle) -> TreeResult<Option<usize>> {
        match self.node(handle)?.children() {
            None => Ok(Some(0)),
            Some((left, right)) => {
                let (Some(left), Some(right)) =
                    (self.perfect_height(left)?, self.perfect_height(right)?)
                else {
                    return Ok(None);
                };
                Ok((left == right).then_some(left + 1))
            }
        }
    }

    /// Whether all leaves sit at the same depth
    pub fn is_perfect(&self) -> bool {
        self.root
            .is_some_and(|root| matches!(self.perfect_height(root), Ok(Some(_))))
    }

    /// Node whose position a joining member's internal node will take
    ///
    /// The new leaf lands one level below the target, so the target must sit
    /// above `floor(log2(leaf_count + 1))` for the join to stay within the
    /// height bound. The newest member's anchor is used when it qualifies.
    fn insertion_target(&self) -> TreeResult<NodeHandle> {
        let limit = (self.leaf_count() + 1).ilog2() as usize;

        let anchored = self.anchored_target()?;
        if self.node(anchored)?.level < limit {
            return Ok(anchored);
        }

        let fallback = self.shallow_target(limit.saturating_sub(1))?;
        let (anchored_id, fallback_id) = (self.node(anchored)?.id, self.node(fallback)?.id);
        trace!(
            anchored = %anchored_id,
            fallback = %fallback_id,
            "anchor too deep, joining at a shallower node"
        );
        Ok(fallback)
    }

    /// Climb from the newest member while the sibling is a perfect subtree of
    /// the height climbed so far
    fn anchored_target(&self) -> TreeResult<NodeHandle> {
        let newest = self
            .members
            .max_id()
            .ok_or_else(|| TreeError::structural("non-empty tree without members"))?;

        let mut target = self.leaf_handle(newest)?;
        let mut height = 0;
        while let Some(parent) = self.node(target)?.parent {
            let sibling = self.sibling_handle(target)?;
            if self.perfect_height(sibling)? != Some(height) {
                break;
            }
            target = parent;
            height += 1;
        }

        Ok(target)
    }

    /// Node at or above `max_level` with the fewest leaves beneath it.
    ///
    /// Ties go to the shallower node, then to the rightmost one, so a shallow
    /// leaf is split whenever there is one.
    fn shallow_target(&self, max_level: usize) -> TreeResult<NodeHandle> {
        let root = self
            .root
            .ok_or_else(|| TreeError::structural("placement in an empty tree"))?;

        let mut best: Option<((usize, usize), NodeHandle)> = None;
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            let node = self.node(handle)?;
            if node.level > max_level {
                continue;
            }

            let rank = (self.leaves_under(handle)?, node.level);
            if best.is_none_or(|(best_rank, _)| rank <= best_rank) {
                best = Some((rank, handle));
            }
            if let Some((left, right)) = node.children() {
                stack.push(right);
                stack.push(left);
            }
        }

        best.map(|(_, handle)| handle)
            .ok_or_else(|| TreeError::structural("no node above the placement limit"))
    }

    fn leaves_under(&self, top: NodeHandle) -> TreeResult<usize> {
        let mut count = 0;
        let mut stack = vec![top];
        while let Some(handle) = stack.pop() {
            match self.node(handle)?.children() {
                Some((left, right)) => {
                    stack.push(left);
                    stack.push(right);
                }
                None => count += 1,
            }
        }
        Ok(count)
    }
}

impl<P: KeyPrimitive> fmt::Display for KeyTree<P> {
    /// Level-by-level dump with a short public key prefix per node
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current: Vec<NodeHandle> = self.root.into_iter().collect();
        let mut level = 0;

        while !current.is_empty() {
            write!(f, "Level {}: ", level)?;

            let mut next = Vec::new();
            for handle in &current {
                let Ok(node) = self.node(*handle) else {
                    continue;
                };
                write!(f, "[{}] {:02x?}  ", node.id, &node.key_pair.pk[..4])?;
                if let Some((left, right)) = node.children() {
                    next.push(left);
                    next.push(right);
                }
            }

            writeln!(f)?;
            current = next;
            level += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(members: usize) -> KeyTree {
        let mut tree = KeyTree::new(X25519::seeded(1));
        for _ in 0..members {
            tree.add_member().unwrap();
        }
        tree
    }

    fn leaf(id: u32) -> NodeRef {
        NodeRef::Leaf(MemberId(id))
    }

    fn internal(id: u32) -> NodeRef {
        NodeRef::Internal(InternalId(id))
    }

    #[test]
    fn test_first_member_becomes_root() {
        let tree = tree_with(1);

        assert_eq!(tree.root(), Some(leaf(0)));
        assert_eq!(tree.tree_height(), 0);
        assert_eq!(tree.internal_count(), 0);
        assert_eq!(tree.parent_of(leaf(0)).unwrap(), None);
        tree.validate().unwrap();
    }

    #[test]
    fn test_growth_of_first_eight_members() {
        let mut tree = tree_with(2);
        assert_eq!(tree.root(), Some(internal(0)));
        assert_eq!(tree.children_of(internal(0)).unwrap(), Some((leaf(0), leaf(1))));

        // Perfect tree: a new root is grown
        tree.add_member().unwrap();
        assert_eq!(tree.root(), Some(internal(1)));
        assert_eq!(tree.children_of(internal(1)).unwrap(), Some((internal(0), leaf(2))));

        // The newest leaf is split
        tree.add_member().unwrap();
        assert_eq!(tree.children_of(internal(1)).unwrap(), Some((internal(0), internal(2))));
        assert_eq!(tree.children_of(internal(2)).unwrap(), Some((leaf(2), leaf(3))));
        assert!(tree.is_perfect());

        tree.add_member().unwrap();
        tree.add_member().unwrap();
        // Wrap the perfect pair above the newest leaf
        tree.add_member().unwrap();
        assert_eq!(tree.children_of(internal(4)).unwrap(), Some((leaf(4), leaf(5))));
        assert_eq!(tree.children_of(internal(5)).unwrap(), Some((internal(4), leaf(6))));
        assert_eq!(tree.children_of(internal(3)).unwrap(), Some((internal(1), internal(5))));

        tree.add_member().unwrap();
        assert!(tree.is_perfect());
        assert_eq!(tree.depth(), 3);
        tree.validate().unwrap();
    }

    #[test]
    fn test_levels_track_depth() {
        let tree = tree_with(5);

        assert_eq!(tree.node_level(internal(3)).unwrap(), 0);
        assert_eq!(tree.node_level(leaf(4)).unwrap(), 1);
        assert_eq!(tree.node_level(internal(1)).unwrap(), 1);
        assert_eq!(tree.node_level(leaf(0)).unwrap(), 3);
    }

    #[test]
    fn test_key_path_and_co_path() {
        let tree = tree_with(4);

        assert_eq!(
            tree.key_path(MemberId(0)).unwrap(),
            vec![leaf(0), internal(0), internal(1)]
        );
        assert_eq!(tree.co_path(MemberId(0)).unwrap(), vec![leaf(1), internal(2)]);
        assert_eq!(
            tree.key_path(MemberId(3)).unwrap(),
            vec![leaf(3), internal(2), internal(1)]
        );
        assert_eq!(tree.co_path(MemberId(3)).unwrap(), vec![leaf(2), internal(0)]);

        // Internal nodes have paths too
        assert_eq!(
            tree.key_path_of_node(internal(0)).unwrap(),
            vec![internal(0), internal(1)]
        );
        assert!(tree.co_path_of_node(internal(1)).unwrap().is_empty());
    }

    #[test]
    fn test_sibling() {
        let tree = tree_with(3);

        assert_eq!(tree.sibling(leaf(0)).unwrap(), leaf(1));
        assert_eq!(tree.sibling(leaf(2)).unwrap(), internal(0));
        assert!(matches!(
            tree.sibling(internal(1)),
            Err(TreeError::StructuralInvariantViolation(_))
        ));
        assert!(matches!(
            tree.sibling(leaf(9)),
            Err(TreeError::NotFound(MemberId(9)))
        ));
    }

    #[test]
    fn test_sponsor_prefers_right_child() {
        let tree = tree_with(6);

        assert_eq!(tree.sponsor_for(internal(3)).unwrap(), MemberId(5));
        assert_eq!(tree.sponsor_for(internal(1)).unwrap(), MemberId(3));
        assert_eq!(tree.sponsor_for(internal(0)).unwrap(), MemberId(1));
        assert_eq!(tree.sponsor_for(leaf(2)).unwrap(), MemberId(2));
    }

    #[test]
    fn test_remove_promotes_sibling_subtree() {
        let mut tree = tree_with(4);

        tree.remove_member(MemberId(3)).unwrap();
        assert_eq!(tree.children_of(internal(1)).unwrap(), Some((internal(0), leaf(2))));
        assert_eq!(tree.node_level(leaf(2)).unwrap(), 1);
        assert!(matches!(
            tree.node_level(internal(2)),
            Err(TreeError::UnknownNode(_))
        ));

        tree.remove_member(MemberId(2)).unwrap();
        assert_eq!(tree.root(), Some(internal(0)));
        assert_eq!(tree.node_level(leaf(0)).unwrap(), 1);
        tree.validate().unwrap();
    }

    #[test]
    fn test_remove_last_member_empties_tree() {
        let mut tree = tree_with(1);

        tree.remove_member(MemberId(0)).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.group_key(), None);
        assert_eq!(tree.tree_height(), 0);
        tree.validate().unwrap();

        // Ids are never reused
        assert_eq!(tree.add_member().unwrap(), MemberId(1));
    }

    #[test]
    fn test_insert_after_removal_targets_newest_member() {
        let mut tree = tree_with(4);
        tree.remove_member(MemberId(0)).unwrap();

        // L1 was promoted; the newest member L3 is still the anchor
        let id = tree.add_member().unwrap();
        assert_eq!(id, MemberId(4));
        assert_eq!(tree.parent_of(leaf(4)).unwrap(), tree.parent_of(internal(2)).unwrap());
        tree.validate().unwrap();
    }

    #[test]
    fn test_deep_anchor_falls_back_to_shallow_leaf() {
        let mut tree = tree_with(8);
        for id in [0, 4, 6, 5, 7] {
            tree.remove_member(MemberId(id)).unwrap();
        }
        // L1 sits at level 1, L2 and L3 below it on the right
        assert_eq!(tree.node_level(leaf(1)).unwrap(), 1);

        // The newest member anchors the first join
        let before = tree.dh_operation_count();
        let first = tree.add_member().unwrap();
        assert_eq!(tree.dh_operation_count() - before, 3);
        assert_eq!(tree.node_level(NodeRef::Leaf(first)).unwrap(), 2);

        // Its anchor is now too deep, so the shallow L1 is split instead
        let before = tree.dh_operation_count();
        let second = tree.add_member().unwrap();
        assert_eq!(tree.dh_operation_count() - before, tree.tree_height() + 1);
        assert_eq!(
            tree.parent_of(NodeRef::Leaf(second)).unwrap(),
            tree.parent_of(leaf(1)).unwrap()
        );
        assert_eq!(tree.node_level(NodeRef::Leaf(second)).unwrap(), 2);

        for _ in 0..6 {
            let before = tree.dh_operation_count();
            tree.add_member().unwrap();
            assert!(tree.dh_operation_count() - before <= tree.tree_height() + 1);
        }
        tree.validate().unwrap();
    }

    #[test]
    fn test_traversals() {
        let tree = tree_with(3);

        assert_eq!(
            tree.inorder().unwrap(),
            vec![leaf(0), internal(0), leaf(1), internal(1), leaf(2)]
        );
        assert_eq!(
            tree.preorder().unwrap(),
            vec![internal(1), internal(0), leaf(0), leaf(1), leaf(2)]
        );
    }

    #[test]
    fn test_display_lists_every_level() {
        let tree = tree_with(3);
        let rendered = tree.to_string();

        assert!(rendered.starts_with("Level 0: [I1]"));
        assert!(rendered.contains("Level 2: [L0]"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn test_max_ids() {
        let mut tree = tree_with(3);
        assert_eq!(tree.max_member_id(), Some(MemberId(2)));
        assert_eq!(tree.max_internal_id(), Some(InternalId(1)));

        tree.remove_member(MemberId(2)).unwrap();
        assert_eq!(tree.max_member_id(), Some(MemberId(1)));
        assert_eq!(tree.max_internal_id(), Some(InternalId(0)));
    }

    #[test]
    fn test_arena_slots_are_recycled() {
        let mut tree = tree_with(4);
        let slots = tree.nodes.len();

        tree.remove_member(MemberId(1)).unwrap();
        tree.add_member().unwrap();
        assert_eq!(tree.nodes.len(), slots);
        tree.validate().unwrap();
    }

    #[test]
    fn test_validate_detects_broken_level() {
        let mut tree = tree_with(2);
        let handle = tree.leaf_handle(MemberId(1)).unwrap();
        tree.node_mut(handle).unwrap().level = 5;

        assert!(matches!(
            tree.validate(),
            Err(TreeError::StructuralInvariantViolation(_))
        ));
    }

    #[test]
    fn test_validate_detects_stale_internal_key() {
        let mut tree = tree_with(2);
        // I0's key is DH(L0 private, L1 public)
        let handle = tree.leaf_handle(MemberId(1)).unwrap();
        tree.node_mut(handle).unwrap().key_pair.pk[0] ^= 0xFF;

        assert!(tree.validate().unwrap_err().is_fatal());
    }
}
