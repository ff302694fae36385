//! Re-keying along the sponsor's key path and broadcast accounting
//!
//! After a membership change the sponsor refreshes its leaf key and recomputes
//! every internal node up to the root:
//!
//! ```text
//! group_key(v) = DH(private(left(v)), public(right(v)))
//! key_pair(v)  = keypair_from_secret(group_key(v))
//! ```
//!
//! Every other member has exactly one refreshed node on its co-path (the
//! sibling of the point where its key path meets the sponsor's), learns that
//! node's new public key from the broadcast, and recomputes the root itself.

use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::crypto::{KeyPair, KeyPrimitive, Secret};
use crate::error::{TreeError, TreeResult};
use crate::messages::{KeyUpdate, MembershipEvent, RekeyBroadcast};
use crate::node::{MemberId, NodeHandle, NodeRef};
use crate::tree::KeyTree;

impl<P: KeyPrimitive> KeyTree<P> {
    /// Recompute every internal node on `sponsor`'s key path and account for
    /// the broadcast.
    ///
    /// The sponsor's leaf already holds the key pair generated for this event
    /// (see [`KeyTree::install_leaf_key`]); that generation is counted by the
    /// caller before the tree changed.
    pub(crate) fn rekey(&mut self, event: MembershipEvent, sponsor: NodeHandle) -> TreeResult<()> {
        let ops_before = self.dh_operations;
        let path = self.key_path_handles(sponsor)?;

        for &handle in &path {
            if !self.node(handle)?.is_leaf() {
                self.derive_internal(handle)?;
            }
        }

        // One extra for the sponsor's leaf key
        let event_ops = self.dh_operations - ops_before + 1;
        let broadcast = self.account_broadcasts(event, sponsor, &path, event_ops)?;

        debug!(
            sponsor = %broadcast.sponsor,
            path_len = path.len(),
            dh_operations = event_ops,
            recipients = broadcast.recipients.len(),
            "re-key complete"
        );
        self.last_rekey = Some(broadcast);
        Ok(())
    }

    /// Give a leaf a freshly generated key pair
    pub(crate) fn install_leaf_key(
        &mut self,
        handle: NodeHandle,
        key_pair: KeyPair,
    ) -> TreeResult<()> {
        let node = self.node_mut(handle)?;
        if !node.is_leaf() {
            return Err(TreeError::structural("leaf key installed on an internal node"));
        }
        node.group_key = key_pair.sk;
        node.key_pair = key_pair;
        trace!(node = %node.id, "leaf key refreshed");
        Ok(())
    }

    /// Recompute an internal node from its children's current keys
    fn derive_internal(&mut self, handle: NodeHandle) -> TreeResult<()> {
        let (left, right) = self
            .node(handle)?
            .children()
            .ok_or_else(|| TreeError::structural("internal node without two children"))?;

        let mut left_private = self.node(left)?.key_pair.sk;
        let right_public = self.node(right)?.public_key();

        let group_key = self
            .primitive
            .compute_shared_secret(&left_private, &right_public);
        left_private.zeroize();
        let group_key = group_key?;
        let key_pair = self.primitive.keypair_from_secret(&group_key)?;
        self.dh_operations += 1;

        let node = self.node_mut(handle)?;
        node.group_key = group_key;
        node.key_pair = key_pair;
        trace!(node = %node.id, "internal key derived");
        Ok(())
    }

    /// Charge one broadcast per member that holds a refreshed node on its co-path.
    ///
    /// A refreshed node `c` sits on member `m`'s co-path exactly when `m` lives
    /// under `sibling(c)`, so the walk visits those subtrees and lets the
    /// ledger drop members already charged in this pass. Each internal node's
    /// new public key is published once, however often it shows up on `path`.
    fn account_broadcasts(
        &mut self,
        event: MembershipEvent,
        sponsor: NodeHandle,
        path: &[NodeHandle],
        dh_operations: usize,
    ) -> TreeResult<RekeyBroadcast> {
        let (member_slots, internal_slots) = self.id_slots();
        self.ledger.begin(member_slots, internal_slots);

        let mut updates = Vec::with_capacity(path.len());
        let mut recipients = Vec::new();

        for &handle in path {
            let (id, node_public, is_root) = {
                let node = self.node(handle)?;
                (node.id, node.public_key(), node.parent.is_none())
            };
            let first_announcement = match id {
                NodeRef::Internal(internal) => self.ledger.announce(internal),
                NodeRef::Leaf(_) => true,
            };
            if first_announcement {
                updates.push(KeyUpdate {
                    node: id,
                    node_public,
                });
            }

            if is_root {
                continue;
            }
            let sibling = self.sibling_handle(handle)?;
            for member in self.members_under(sibling)? {
                if self.ledger.notify(member) {
                    self.broadcasts += 1;
                    recipients.push(member);
                }
            }
        }

        self.ledger.finish();

        let sponsor = self
            .node(sponsor)?
            .id
            .member()
            .ok_or_else(|| TreeError::structural("sponsor is not a leaf"))?;

        Ok(RekeyBroadcast {
            event,
            sponsor,
            updates,
            dh_operations,
            recipients,
        })
    }

    /// Members in the subtree rooted at `top`
    fn members_under(&self, top: NodeHandle) -> TreeResult<Vec<MemberId>> {
        let mut members = Vec::new();
        let mut stack = vec![top];

        while let Some(handle) = stack.pop() {
            let node = self.node(handle)?;
            match node.children() {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => members.extend(node.id.member()),
            }
        }

        Ok(members)
    }

    /// Recompute the group key the way `member` does after a broadcast.
    ///
    /// Uses only the member's own leaf private key and the public keys on its
    /// co-path. Not counted in the DH metric: it is the receivers' work.
    pub fn member_group_key(&self, member: MemberId) -> TreeResult<Secret> {
        let leaf = self.leaf_handle(member)?;
        let leaf_node = self.node(leaf)?;

        let mut private = leaf_node.key_pair.sk;
        let mut secret = leaf_node.group_key;
        let mut current = leaf;

        while let Some(parent) = self.node(current)?.parent {
            let peer = self.node(self.sibling_handle(current)?)?.public_key();
            secret = self.primitive.compute_shared_secret(&private, &peer)?;
            private = self.primitive.keypair_from_secret(&secret)?.sk;
            current = parent;
        }

        private.zeroize();
        Ok(secret)
    }
}
