//! Value combiners, the mapper contract, and the emit path between them.

use std::ops::AddAssign;

/// Associative binary reducer over values: folds `value` into `acc`.
///
/// The combiner must not touch the store it is combining into and must not
/// block. Emits from different workers interleave arbitrarily, so in
/// practice the operation must also be commutative; within one PSM shard
/// calls are serialized on the proxy thread in enqueue order.
pub trait Combiner<V>: Sync {
    fn combine(&self, acc: &mut V, value: V);
}

/// Combines with `+=`.
#[derive(Clone, Copy, Default)]
pub struct AdditiveCombiner;

impl<V: AddAssign> Combiner<V> for AdditiveCombiner {
    #[inline]
    fn combine(&self, acc: &mut V, value: V) {
        *acc += value;
    }
}

/// Destination for mapper emits.
///
/// The two implementor families are the two adapter shapes of the engine:
/// the locked stores deliver straight into `combine`, while
/// [`crate::PsmPipeline`] wraps the pair with its precomputed partition
/// fingerprint and runs the handoff protocol.
pub trait EmitSink<K, V>: Sync {
    fn deliver(&self, key: K, value: V);
}

/// Handle a mapper uses to yield key/value pairs into the shared store.
pub struct Emitter<'a, K, V> {
    sink: &'a dyn EmitSink<K, V>,
}

impl<'a, K, V> Emitter<'a, K, V> {
    pub(crate) fn new(sink: &'a dyn EmitSink<K, V>) -> Self {
        Self { sink }
    }

    #[inline]
    pub fn emit(&mut self, key: K, value: V) {
        self.sink.deliver(key, value);
    }
}

/// User-supplied map function, invoked once per input record.
///
/// One clone of the mapper runs per worker, so `&mut self` gives each
/// worker private scratch space. A mapper may emit any number of pairs per
/// record (including none); it must not touch shared state other than the
/// store behind the emitter.
pub trait Mapper<R>: Clone + Send {
    type Key;
    type Value;

    fn map(&mut self, record: R, em: &mut Emitter<'_, Self::Key, Self::Value>);
}
