use std::borrow::Borrow;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Removed keys remembered by default.
const DEFAULT_CAPACITY: usize = 4096;

/// Bounded memory of removed keys, oldest forgotten first.
///
/// Replicated records can arrive after the removal they precede. Keys here are
/// never reused (uuid game ids, per-connection ids), so a late record for one of
/// them is always stale.
#[derive(Debug)]
pub struct Tombstones<K> {
    order: VecDeque<K>,
    keys: HashSet<K>,
    capacity: usize,
}

impl<K> Default for Tombstones<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
            keys: HashSet::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl<K: Clone + Eq + Hash> Tombstones<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, key: K) {
        if !self.keys.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.keys.remove(&oldest);
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
