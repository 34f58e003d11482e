//! Locked shard stores: the open-addressed and chained map flavors.
//!
//! Both hold a power-of-two array of independent regions selected by the
//! low bits of the partition fingerprint. Concurrent `combine` calls whose
//! keys land in different regions share nothing; calls into the same region
//! serialize on that region's rwlock. Traversal and reset take `&mut self`,
//! which makes "no worker is active" a compile-time fact rather than a
//! calling convention.

use parking_lot::RwLock;

use crate::chain::ChainTable;
use crate::combiner::{Combiner, EmitSink};
use crate::partition::Partition;
use crate::round_up_shards;
use crate::table::Table;

// One rwlock-guarded region per cache line, so lock words of neighboring
// shards do not ping-pong.
#[repr(align(64))]
struct Region<T>(RwLock<T>);

/// Sharded map with open-addressed shards, one rwlock per shard.
///
/// This is the flavor to reach for when keys are well distributed: the
/// shard count is the concurrency unit, and a large shard count relative to
/// the worker count makes lock contention rare.
pub struct ShardedMap<K, V, C, P> {
    shards: Box<[Region<Table<K, V>>]>,
    mask: usize,
    combiner: C,
    partition: P,
}

impl<K, V, C, P> ShardedMap<K, V, C, P>
where
    K: Eq,
    C: Combiner<V>,
    P: Partition<K>,
{
    /// `nshard` is rounded up to a power of two, minimum 1.
    pub fn new(nshard: usize, combiner: C, partition: P) -> Self {
        let n = round_up_shards(nshard);
        Self {
            shards: (0..n).map(|_| Region(RwLock::new(Table::new()))).collect(),
            mask: n - 1,
            combiner,
            partition,
        }
    }

    #[inline]
    fn region(&self, hash: u64) -> &RwLock<Table<K, V>> {
        &self.shards[hash as usize & self.mask].0
    }

    /// Fold `value` into the accumulator for `key`, inserting the value
    /// itself when the key is new. Thread-safe.
    pub fn combine(&self, key: K, value: V) {
        let hash = self.partition.partition(&key);
        self.region(hash).write().combine_with(hash, key, value, |acc, v| {
            self.combiner.combine(acc, v)
        });
    }

    /// Unconditional insert, replacing and returning any existing value.
    /// This is the pre-seed path: populate keys before the first run so
    /// every expected slot exists even if no record maps to it.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let hash = self.partition.partition(&key);
        self.region(hash).write().insert(hash, key, value)
    }

    /// Look up a key under the region's read guard.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let hash = self.partition.partition(key);
        self.region(hash).read().get(hash, key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let hash = self.partition.partition(key);
        self.region(hash).read().get(hash, key).is_some()
    }

    /// Sum of shard sizes. Cheap, but takes every region's read lock.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|r| r.0.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.mask + 1
    }

    /// Per-shard entry counts, in shard order. Handy for spotting skew.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|r| r.0.read().len()).collect()
    }

    /// Traverse all entries in undefined order.
    pub fn iter(&mut self) -> impl Iterator<Item = (&K, &V)> {
        self.shards.iter_mut().flat_map(|r| r.0.get_mut().iter())
    }

    /// Traverse with mutable access to the values, for resetting
    /// accumulators in place between runs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.shards.iter_mut().flat_map(|r| r.0.get_mut().iter_mut())
    }

    /// Destructive reset of every shard.
    pub fn clear(&mut self) {
        for r in self.shards.iter_mut() {
            r.0.get_mut().clear();
        }
    }
}

impl<K, V, C, P> EmitSink<K, V> for ShardedMap<K, V, C, P>
where
    K: Eq + Send + Sync,
    V: Send + Sync,
    C: Combiner<V>,
    P: Partition<K>,
{
    #[inline]
    fn deliver(&self, key: K, value: V) {
        self.combine(key, value);
    }
}

/// Fixed bucket count per lock stripe of the chained flavor.
const STRIPE_BUCKETS: usize = 128;

/// Sharded map with chained shards, each subdivided into `nlock` lock
/// stripes.
///
/// A stripe is a region of the shard's chain space with its own rwlock, so
/// a single hot shard can still admit several concurrent writers. Bucket
/// geometry is fixed; chains absorb growth without rehashing.
pub struct StripedMap<K, V, C, P> {
    shards: Box<[StripedShard<K, V>]>,
    shard_mask: usize,
    // Stripes select on the fingerprint bits just above the shard bits.
    stripe_shift: u32,
    combiner: C,
    partition: P,
}

struct StripedShard<K, V> {
    stripes: Box<[Region<ChainTable<K, V>>]>,
    mask: usize,
}

impl<K, V, C, P> StripedMap<K, V, C, P>
where
    K: Eq,
    C: Combiner<V>,
    P: Partition<K>,
{
    /// One lock stripe per shard: equivalent locking discipline to
    /// [`ShardedMap`], with chained storage.
    pub fn new(nshard: usize, combiner: C, partition: P) -> Self {
        Self::with_stripes(nshard, 1, combiner, partition)
    }

    /// `nshard` and `nlock` are each rounded up to a power of two,
    /// minimum 1.
    pub fn with_stripes(nshard: usize, nlock: usize, combiner: C, partition: P) -> Self {
        let n = round_up_shards(nshard);
        let l = round_up_shards(nlock);
        let shards = (0..n)
            .map(|_| StripedShard {
                stripes: (0..l)
                    .map(|_| Region(RwLock::new(ChainTable::with_buckets(STRIPE_BUCKETS))))
                    .collect(),
                mask: l - 1,
            })
            .collect();
        Self {
            shards,
            shard_mask: n - 1,
            stripe_shift: n.trailing_zeros(),
            combiner,
            partition,
        }
    }

    #[inline]
    fn region(&self, hash: u64) -> &RwLock<ChainTable<K, V>> {
        let shard = &self.shards[hash as usize & self.shard_mask];
        let stripe = (hash >> self.stripe_shift) as usize & shard.mask;
        &shard.stripes[stripe].0
    }

    /// Fold `value` into the accumulator for `key`, inserting the value
    /// itself when the key is new. Thread-safe.
    pub fn combine(&self, key: K, value: V) {
        let hash = self.partition.partition(&key);
        self.region(hash).write().combine_with(hash, key, value, |acc, v| {
            self.combiner.combine(acc, v)
        });
    }

    /// Unconditional insert, replacing and returning any existing value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let hash = self.partition.partition(&key);
        self.region(hash).write().insert(hash, key, value)
    }

    /// Look up a key under its stripe's read guard.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let hash = self.partition.partition(key);
        self.region(hash).read().get(hash, key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let hash = self.partition.partition(key);
        self.region(hash).read().get(hash, key).is_some()
    }

    /// Sum of stripe sizes across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .flat_map(|s| s.stripes.iter())
            .map(|r| r.0.read().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shard_mask + 1
    }

    pub fn stripe_count(&self) -> usize {
        self.shards[0].mask + 1
    }

    /// Per-shard entry counts, in shard order.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|s| s.stripes.iter().map(|r| r.0.read().len()).sum())
            .collect()
    }

    /// Traverse all entries in undefined order.
    pub fn iter(&mut self) -> impl Iterator<Item = (&K, &V)> {
        self.shards
            .iter_mut()
            .flat_map(|s| s.stripes.iter_mut())
            .flat_map(|r| r.0.get_mut().iter())
    }

    /// Traverse with mutable access to the values.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.shards
            .iter_mut()
            .flat_map(|s| s.stripes.iter_mut())
            .flat_map(|r| r.0.get_mut().iter_mut())
    }

    /// Destructive reset of every stripe.
    pub fn clear(&mut self) {
        for s in self.shards.iter_mut() {
            for r in s.stripes.iter_mut() {
                r.0.get_mut().clear();
            }
        }
    }
}

impl<K, V, C, P> EmitSink<K, V> for StripedMap<K, V, C, P>
where
    K: Eq + Send + Sync,
    V: Send + Sync,
    C: Combiner<V>,
    P: Partition<K>,
{
    #[inline]
    fn deliver(&self, key: K, value: V) {
        self.combine(key, value);
    }
}
