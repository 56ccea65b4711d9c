//! Two-level identity index: owner client first, then sequence within owner.
//!
//! Ids from one owner are dense and arrive in order, so the inner maps stay
//! compact; the outer map stays small because a graph rarely sees more than
//! a few hundred client sessions.

use rustc_hash::FxHashMap;

use crate::identity::{ClientId, EntityId};

/// Initial outer capacity (prime, above the expected number of owners).
const OWNER_BUCKETS: usize = 101;
/// Initial inner capacity (prime, above the expected entities per owner).
const SEQUENCE_BUCKETS: usize = 1009;

#[derive(Debug, Clone)]
pub struct EntityIndex<V> {
    owners: FxHashMap<ClientId, FxHashMap<u64, V>>,
    len: usize,
}

impl<V> Default for EntityIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EntityIndex<V> {
    pub fn new() -> Self {
        let mut owners = FxHashMap::default();
        owners.reserve(OWNER_BUCKETS);
        Self { owners, len: 0 }
    }

    /// Inserts `value` under `id`, returning the previous value if any.
    pub fn insert(&mut self, id: EntityId, value: V) -> Option<V> {
        let inner = self.owners.entry(id.owner).or_insert_with(|| {
            let mut map = FxHashMap::default();
            map.reserve(SEQUENCE_BUCKETS);
            map
        });
        let previous = inner.insert(id.sequence, value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub fn get(&self, id: &EntityId) -> Option<&V> {
        self.owners.get(&id.owner)?.get(&id.sequence)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<V> {
        let inner = self.owners.get_mut(&id.owner)?;
        let removed = inner.remove(&id.sequence);
        if removed.is_some() {
            self.len -= 1;
            if inner.is_empty() {
                self.owners.remove(&id.owner);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.owners.clear();
        self.len = 0;
    }
}
