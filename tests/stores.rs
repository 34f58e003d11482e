use std::sync::{Arc, Barrier};
use std::thread;

use mapcombine::{
    AdditiveCombiner, EmitSink, HashPartition, IntPartition, Partition, PsmPipeline, ShardedMap,
    StripedMap,
};

#[test]
fn shard_count_rounds_up_to_power_of_two() {
    let store: ShardedMap<u64, u64, _, _> = ShardedMap::new(0, AdditiveCombiner, IntPartition);
    assert_eq!(store.shard_count(), 1);
    let store: ShardedMap<u64, u64, _, _> = ShardedMap::new(5, AdditiveCombiner, IntPartition);
    assert_eq!(store.shard_count(), 8);
    let store: ShardedMap<u64, u64, _, _> = ShardedMap::new(16, AdditiveCombiner, IntPartition);
    assert_eq!(store.shard_count(), 16);

    let mut pipe: PsmPipeline<u64, u64, _, _> = PsmPipeline::new(3, AdditiveCombiner, IntPartition);
    assert_eq!(pipe.shard_count(), 4);
    assert!(pipe.is_empty());

    let striped: StripedMap<u64, u64, _, _> =
        StripedMap::with_stripes(3, 3, AdditiveCombiner, IntPartition);
    assert_eq!(striped.shard_count(), 4);
    assert_eq!(striped.stripe_count(), 4);
}

#[test]
fn keys_reside_in_their_partition_shard() {
    let partition = IntPartition;
    let nshard = 8;
    let store = ShardedMap::new(nshard, AdditiveCombiner, partition);
    for key in 0..1000u64 {
        store.combine(key, 1u64);
    }

    // Reconstruct the expected per-shard population from the partition
    // function and compare with where the store actually put things.
    let mut expected = vec![0usize; nshard];
    for key in 0..1000u64 {
        expected[(partition.partition(&key) & (nshard as u64 - 1)) as usize] += 1;
    }
    assert_eq!(store.shard_sizes(), expected);
}

#[test]
fn skewed_partition_concentrates_on_one_shard() {
    #[derive(Clone, Copy)]
    struct Constant;
    impl Partition<u64> for Constant {
        fn partition(&self, _key: &u64) -> u64 {
            3
        }
    }

    let store = ShardedMap::new(4, AdditiveCombiner, Constant);
    for key in 0..100u64 {
        store.combine(key, 1u64);
    }
    assert_eq!(store.shard_sizes(), vec![0, 0, 0, 100]);
}

#[test]
fn insert_overwrites_and_returns_previous() {
    let store = ShardedMap::new(4, AdditiveCombiner, IntPartition);
    assert_eq!(store.insert(7u64, 10u64), None);
    assert_eq!(store.insert(7, 20), Some(10));
    assert_eq!(store.get(&7), Some(20));

    store.combine(7, 5);
    assert_eq!(store.get(&7), Some(25));
}

#[test]
fn string_keys_work_through_the_hash_partition() {
    let store = ShardedMap::new(8, AdditiveCombiner, HashPartition::new());
    store.combine("lorem".to_string(), 1u64);
    store.combine("ipsum".to_string(), 1);
    store.combine("lorem".to_string(), 1);

    assert_eq!(store.get(&"lorem".to_string()), Some(2));
    assert_eq!(store.get(&"ipsum".to_string()), Some(1));
    assert_eq!(store.len(), 2);
}

#[test]
fn concurrent_combine_from_raw_threads() {
    // The stores are plain sinks; they work outside the runtime too.
    let store = Arc::new(ShardedMap::new(16, AdditiveCombiner, IntPartition));
    let nthread = 6;
    let iters = 10_000u64;
    let barrier = Arc::new(Barrier::new(nthread));

    let mut handles = Vec::new();
    for t in 0..nthread as u64 {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..iters {
                store.combine((t * iters + i) % 256, 1u64);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let store = Arc::into_inner(store).unwrap();
    assert_eq!(store.len(), 256);
    let mut store = store;
    let total: u64 = store.iter().map(|(_, v)| *v).sum();
    assert_eq!(total, nthread as u64 * iters);
}

#[test]
fn striped_map_with_single_stripe_matches_plain_locking() {
    let striped = StripedMap::new(4, AdditiveCombiner, IntPartition);
    assert_eq!(striped.stripe_count(), 1);
    for key in 0..100u64 {
        striped.combine(key % 10, 1u64);
    }
    let mut striped = striped;
    assert_eq!(striped.len(), 10);
    for key in 0..10u64 {
        assert_eq!(striped.get(&key), Some(10));
    }

    striped.clear();
    assert!(striped.is_empty());
    assert_eq!(striped.iter().count(), 0);
}

#[test]
fn pipeline_seed_then_process_then_reset() {
    let mut pipe = PsmPipeline::new(4, AdditiveCombiner, IntPartition);
    for key in 0..8u64 {
        pipe.insert(key, 0u64);
    }
    assert_eq!(pipe.len(), 8);

    for key in 0..8u64 {
        for _ in 0..5 {
            pipe.deliver(key, 1);
        }
    }
    assert_eq!(pipe.get(&3), Some(&5));

    // In-place reset between iterative runs keeps the key set.
    for (_, v) in pipe.iter_mut() {
        *v = 0;
    }
    assert_eq!(pipe.len(), 8);
    assert_eq!(pipe.get(&3), Some(&0));

    pipe.clear();
    assert!(pipe.is_empty());
}
