//! PSM pipeline: an array of PSM-protected shard regions behind the same
//! emit interface as the locked stores.
//!
//! Each shard pairs a handoff queue with an unsynchronized hash table.
//! Contending emits into one shard hand their pair to the shard's current
//! proxy instead of blocking; emits into different shards never interact.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::combiner::{Combiner, EmitSink};
use crate::partition::Partition;
use crate::psm::{process_cas, process_fas, PsmQueue};
use crate::round_up_shards;
use crate::table::Table;

/// Key/value payload carrying its partition fingerprint, computed once at
/// emit time so the pipeline never rehashes.
pub struct InternalPair<K, V> {
    pub key: K,
    pub value: V,
    pub hash: u64,
}

impl<K, V> InternalPair<K, V> {
    #[inline]
    pub fn new<P: Partition<K>>(key: K, value: V, partition: &P) -> Self {
        let hash = partition.partition(&key);
        Self { key, value, hash }
    }
}

/// Queue-closing strategy of the handoff protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Handoff {
    /// Close with a single compare-exchange. The default.
    #[default]
    Cas,
    /// Close with a two-swap sequence; for targets where compare-exchange
    /// is disproportionately expensive.
    Fas,
}

#[repr(align(64))]
struct PsmShard<K, V> {
    queue: PsmQueue<InternalPair<K, V>>,
    table: UnsafeCell<Table<K, V>>,
}

/// Sharded set of PSM-protected regions.
pub struct PsmPipeline<K, V, C, P> {
    shards: Box<[PsmShard<K, V>]>,
    mask: usize,
    handoff: Handoff,
    combiner: C,
    partition: P,
    proxy_entries: AtomicUsize,
}

// SAFETY: a shard's table is mutated only from inside the proxy branch of
// its queue's protocol, and the queue admits at most one proxy at a time.
// Quiesced reads and resets go through `&mut self`.
unsafe impl<K: Send, V: Send, C: Sync, P: Sync> Sync for PsmPipeline<K, V, C, P> {}

impl<K, V, C, P> PsmPipeline<K, V, C, P>
where
    K: Eq,
    C: Combiner<V>,
    P: Partition<K>,
{
    /// `nshard` is rounded up to a power of two, minimum 1.
    pub fn new(nshard: usize, combiner: C, partition: P) -> Self {
        Self::with_handoff(nshard, Handoff::Cas, combiner, partition)
    }

    pub fn with_handoff(nshard: usize, handoff: Handoff, combiner: C, partition: P) -> Self {
        let n = round_up_shards(nshard);
        Self {
            shards: (0..n)
                .map(|_| PsmShard {
                    queue: PsmQueue::new(),
                    table: UnsafeCell::new(Table::new()),
                })
                .collect(),
            mask: n - 1,
            handoff,
            combiner,
            partition,
            proxy_entries: AtomicUsize::new(0),
        }
    }

    /// Deliver one pair into its shard through the handoff protocol.
    /// Thread-safe and lock-free; the calling thread either returns
    /// immediately (work delegated) or drains the shard as its proxy.
    pub fn process(&self, pair: InternalPair<K, V>) {
        let shard = &self.shards[pair.hash as usize & self.mask];
        let table = shard.table.get();
        let apply = |p: InternalPair<K, V>| {
            // SAFETY: see the Sync impl note; only the unique proxy of
            // this shard executes `apply`.
            let table = unsafe { &mut *table };
            table.combine_with(p.hash, p.key, p.value, |acc, v| {
                self.combiner.combine(acc, v)
            });
        };
        let was_proxy = match self.handoff {
            Handoff::Cas => process_cas(&shard.queue, pair, apply),
            Handoff::Fas => process_fas(&shard.queue, pair, apply),
        };
        if was_proxy {
            self.proxy_entries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// How many `process` calls have taken the proxy branch so far. Under
    /// contention this stays far below the emit count: most emits are
    /// handed off.
    pub fn proxy_entries(&self) -> usize {
        self.proxy_entries.load(Ordering::Relaxed)
    }

    /// Unconditional insert, bypassing the queue; the pre-seed path used
    /// to populate expected keys before the first run. Quiesced by
    /// `&mut self`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.partition.partition(&key);
        self.shards[hash as usize & self.mask]
            .table
            .get_mut()
            .insert(hash, key, value)
    }

    /// Look up a key. Quiesced by `&mut self`: the PSM path has no read
    /// guards, so lookups are only meaningful after workers have joined.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let hash = self.partition.partition(key);
        self.shards[hash as usize & self.mask]
            .table
            .get_mut()
            .get(hash, key)
    }

    /// Sum of shard sizes. Quiesced by `&mut self`.
    pub fn len(&mut self) -> usize {
        self.shards.iter_mut().map(|s| s.table.get_mut().len()).sum()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.mask + 1
    }

    /// Per-shard entry counts, in shard order. Quiesced by `&mut self`.
    pub fn shard_sizes(&mut self) -> Vec<usize> {
        self.shards
            .iter_mut()
            .map(|s| s.table.get_mut().len())
            .collect()
    }

    /// Traverse all entries in undefined order. Quiesced by `&mut self`.
    pub fn iter(&mut self) -> impl Iterator<Item = (&K, &V)> {
        self.shards.iter_mut().flat_map(|s| s.table.get_mut().iter())
    }

    /// Traverse with mutable access to the values, for resetting
    /// accumulators in place between runs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.shards
            .iter_mut()
            .flat_map(|s| s.table.get_mut().iter_mut())
    }

    /// Destructive reset of every shard.
    pub fn clear(&mut self) {
        for s in self.shards.iter_mut() {
            s.table.get_mut().clear();
        }
    }
}

impl<K, V, C, P> EmitSink<K, V> for PsmPipeline<K, V, C, P>
where
    K: Eq + Send + Sync,
    V: Send + Sync,
    C: Combiner<V>,
    P: Partition<K>,
{
    #[inline]
    fn deliver(&self, key: K, value: V) {
        self.process(InternalPair::new(key, value, &self.partition));
    }
}
