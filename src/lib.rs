//! mapcombine: an in-process parallel MapCombine engine for CPU-bound
//! aggregation on a single multicore machine.
//!
//! A user-supplied mapper runs over disjoint chunks of the input, one
//! CPU-pinned worker per chunk, and every emitted key/value pair is folded
//! into a concurrent associative store. Two interchangeable aggregation
//! substrates are provided:
//!
//! - [`ShardedMap`] / [`StripedMap`]: sharded hash maps with fine-grained
//!   region rwlocks (open-addressed and chained flavors);
//! - [`PsmPipeline`]: a lock-free variant where contending writers hand
//!   their work to the single in-progress writer of a shard through a
//!   per-shard wait-free queue.
//!
//! Results are unordered and the combiner must be associative (and in
//! practice commutative); see [`Combiner`]. Stores survive across
//! [`Runtime::run`] calls, so iterative workloads (k-means style) can read
//! and reset values in place between rounds.

pub mod combiner;
pub mod partition;
pub mod pipeline;
pub mod psm;
pub mod runtime;
pub mod splitter;
pub mod store;

mod chain;
mod table;
mod task;

pub use combiner::{AdditiveCombiner, Combiner, Emitter, EmitSink, Mapper};
pub use partition::{HashPartition, IntKey, IntPartition, Partition};
pub use pipeline::{Handoff, InternalPair, PsmPipeline};
pub use runtime::{RunError, Runtime};
pub use splitter::{ArraySplitter, SplitError, Splitter, TextChunk, TextSplitter};
pub use store::{ShardedMap, StripedMap};

use std::sync::LazyLock;
use std::thread;

// Global cached CPU count to avoid repeated OS queries.
static CPU_COUNT: LazyLock<usize> = LazyLock::new(|| {
    thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
});

#[inline(always)]
pub(crate) fn cpu_count() -> usize {
    *CPU_COUNT
}

/// Shard counts are rounded up to a power of two, minimum 1, so that shard
/// selection stays a mask of the partition fingerprint.
#[inline]
pub(crate) fn round_up_shards(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
