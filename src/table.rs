//! Open-addressed hash table core for a single shard region.
//!
//! Unsynchronized: callers guarantee exclusive access, either by holding
//! the region's write lock or by being the unique PSM proxy of the shard.
//! Slots cache the full 64-bit partition fingerprint so equality checks
//! filter on the hash before ever comparing keys.

/// Grow when occupancy crosses 3/4.
const LOAD_NUM: usize = 3;
const LOAD_DEN: usize = 4;

/// Smallest non-empty capacity.
const MIN_CAP: usize = 8;

struct Slot<K, V> {
    hash: u64,
    key: K,
    value: V,
}

pub(crate) struct Table<K, V> {
    // Power-of-two length; empty until the first insert.
    slots: Vec<Option<Slot<K, V>>>,
    len: usize,
}

impl<K: Eq, V> Table<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Fold `value` into the slot for `key`, inserting on first sight.
    /// Returns true when the key was newly inserted.
    pub(crate) fn combine_with(
        &mut self,
        hash: u64,
        key: K,
        value: V,
        combine: impl FnOnce(&mut V, V),
    ) -> bool {
        self.reserve_one();
        let idx = self.probe(hash, &key);
        match &mut self.slots[idx] {
            Some(slot) => {
                combine(&mut slot.value, value);
                false
            }
            empty => {
                *empty = Some(Slot { hash, key, value });
                self.len += 1;
                true
            }
        }
    }

    /// Unconditional insert; an existing value for the key is replaced and
    /// returned.
    pub(crate) fn insert(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        self.reserve_one();
        let idx = self.probe(hash, &key);
        match &mut self.slots[idx] {
            Some(slot) => Some(std::mem::replace(&mut slot.value, value)),
            empty => {
                *empty = Some(Slot { hash, key, value });
                self.len += 1;
                None
            }
        }
    }

    pub(crate) fn get(&self, hash: u64, key: &K) -> Option<&V> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = self.probe(hash, key);
        self.slots[idx].as_ref().map(|s| &s.value)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|s| (&s.key, &s.value)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut().map(|s| (&s.key, &mut s.value)))
    }

    pub(crate) fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.len = 0;
    }

    /// Index of the slot holding `key`, or of the empty slot where it
    /// belongs. Triangular probing over a power-of-two table visits every
    /// slot, and the load factor keeps at least one slot empty.
    fn probe(&self, hash: u64, key: &K) -> usize {
        let mask = self.slots.len() - 1;
        // The low fingerprint bits select the shard; start from the upper
        // bits so slots within one shard do not all collide.
        let mut idx = (hash >> 32) as usize & mask;
        let mut step = 0;
        loop {
            match &self.slots[idx] {
                None => return idx,
                Some(s) if s.hash == hash && s.key == *key => return idx,
                _ => {
                    step += 1;
                    idx = (idx + step) & mask;
                }
            }
        }
    }

    fn reserve_one(&mut self) {
        if (self.len + 1) * LOAD_DEN > self.slots.len() * LOAD_NUM {
            self.grow();
        }
    }

    fn grow(&mut self) {
        let new_cap = (self.slots.len() * 2).max(MIN_CAP);
        let old = std::mem::replace(
            &mut self.slots,
            std::iter::repeat_with(|| None).take(new_cap).collect(),
        );
        for slot in old.into_iter().flatten() {
            let idx = self.probe(slot.hash, &slot.key);
            self.slots[idx] = Some(slot);
        }
    }
}
