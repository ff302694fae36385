//! Id-to-node lookup tables for leaves and internal nodes
//!
//! Entries are tombstoned on removal and never compacted, so ids stay stable
//! and `max_id` only ever reports live entries.

use std::marker::PhantomData;

use crate::node::{InternalId, MemberId, NodeHandle};

/// Ids that can index a directory
pub trait DirectoryKey: Copy {
    fn index(self) -> usize;
    fn from_index(index: usize) -> Self;
}

impl DirectoryKey for MemberId {
    fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        MemberId(index as u32)
    }
}

impl DirectoryKey for InternalId {
    fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        InternalId(index as u32)
    }
}

/// Lookup from id to arena handle
#[derive(Clone, Debug)]
pub struct Directory<K> {
    slots: Vec<Option<NodeHandle>>,
    live: usize,
    _key: PhantomData<K>,
}

/// Leaf lookup, keyed by member id
pub type MemberDirectory = Directory<MemberId>;

/// Internal node lookup, keyed by internal id
pub type InternalNodeDirectory = Directory<InternalId>;

impl<K: DirectoryKey> Directory<K> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
            _key: PhantomData,
        }
    }

    /// Register `handle` under `id`, replacing any previous entry.
    pub fn insert(&mut self, id: K, handle: NodeHandle) {
        let index = id.index();
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        if self.slots[index].replace(handle).is_none() {
            self.live += 1;
        }
    }

    /// Tombstone `id`, returning the handle it pointed at.
    pub fn remove(&mut self, id: K) -> Option<NodeHandle> {
        let removed = self.slots.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    pub fn get(&self, id: K) -> Option<NodeHandle> {
        self.slots.get(id.index()).copied().flatten()
    }

    pub fn contains(&self, id: K) -> bool {
        self.get(id).is_some()
    }

    /// Largest live id
    pub fn max_id(&self) -> Option<K> {
        self.slots
            .iter()
            .rposition(Option::is_some)
            .map(K::from_index)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live entries in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (K, NodeHandle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|handle| (K::from_index(index), handle)))
    }

    /// One past the largest id ever registered
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<K: DirectoryKey> Default for Directory<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut directory = MemberDirectory::new();
        directory.insert(MemberId(0), NodeHandle(10));
        directory.insert(MemberId(2), NodeHandle(12));

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get(MemberId(0)), Some(NodeHandle(10)));
        assert_eq!(directory.get(MemberId(1)), None);
        assert_eq!(directory.get(MemberId(2)), Some(NodeHandle(12)));
        assert_eq!(directory.get(MemberId(99)), None);
    }

    #[test]
    fn test_removal_tombstones_entry() {
        let mut directory = MemberDirectory::new();
        for i in 0..4 {
            directory.insert(MemberId(i), NodeHandle(i as usize));
        }

        assert_eq!(directory.remove(MemberId(3)), Some(NodeHandle(3)));
        assert_eq!(directory.remove(MemberId(3)), None);
        assert_eq!(directory.len(), 3);

        // Slots are never compacted
        assert_eq!(directory.capacity(), 4);
        assert!(!directory.contains(MemberId(3)));
    }

    #[test]
    fn test_max_id_skips_tombstones() {
        let mut directory = InternalNodeDirectory::new();
        assert_eq!(directory.max_id(), None);

        directory.insert(InternalId(0), NodeHandle(0));
        directory.insert(InternalId(1), NodeHandle(1));
        directory.insert(InternalId(2), NodeHandle(2));
        assert_eq!(directory.max_id(), Some(InternalId(2)));

        directory.remove(InternalId(2));
        assert_eq!(directory.max_id(), Some(InternalId(1)));

        directory.remove(InternalId(0));
        directory.remove(InternalId(1));
        assert_eq!(directory.max_id(), None);
        assert!(directory.is_empty());
    }

    #[test]
    fn test_iter_yields_live_entries_in_order() {
        let mut directory = MemberDirectory::new();
        directory.insert(MemberId(3), NodeHandle(7));
        directory.insert(MemberId(1), NodeHandle(5));
        directory.insert(MemberId(2), NodeHandle(6));
        directory.remove(MemberId(2));

        let entries: Vec<_> = directory.iter().collect();
        assert_eq!(
            entries,
            vec![(MemberId(1), NodeHandle(5)), (MemberId(3), NodeHandle(7))]
        );
    }
}
