use std::ops::AddAssign;
use std::thread;

use mapcombine::{
    AdditiveCombiner, ArraySplitter, Emitter, IntPartition, Mapper, Runtime, ShardedMap,
};

fn bounded(ntask: usize) -> usize {
    ntask.min(thread::available_parallelism().map(|p| p.get()).unwrap_or(1))
}

type Point = [f64; 2];

/// Per-cluster contribution: component-wise sum of assigned points plus
/// their count, normalized by the driver between rounds.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
struct Contribution {
    sum: Point,
    count: u64,
}

impl AddAssign for Contribution {
    fn add_assign(&mut self, rhs: Self) {
        self.sum[0] += rhs.sum[0];
        self.sum[1] += rhs.sum[1];
        self.count += rhs.count;
    }
}

/// Assigns each point to its nearest centroid and emits the point as a
/// contribution to that cluster. Centroids are frozen per round: each
/// worker gets its own copy via the mapper clone.
#[derive(Clone)]
struct AssignMapper {
    centroids: Vec<Point>,
}

fn sq_dist(a: &Point, b: &Point) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

impl<'a> Mapper<&'a Point> for AssignMapper {
    type Key = u64;
    type Value = Contribution;

    fn map(&mut self, point: &'a Point, em: &mut Emitter<'_, u64, Contribution>) {
        let mut best = 0;
        let mut best_dist = sq_dist(&self.centroids[0], point);
        for (i, c) in self.centroids.iter().enumerate().skip(1) {
            let dist = sq_dist(c, point);
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        em.emit(best as u64, Contribution {
            sum: *point,
            count: 1,
        });
    }
}

const POINTS: [Point; 6] = [
    [0.0, 0.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [10.0, 10.0],
    [10.0, 11.0],
    [11.0, 10.0],
];

/// One Lloyd round: map points into per-cluster contributions, then read
/// the store, update the centroids, and zero the slots in place for the
/// next round.
fn lloyd_round(
    store: &mut ShardedMap<u64, Contribution, AdditiveCombiner, IntPartition>,
    points: &[Point],
    centroids: &mut [Point],
) {
    let mut splitter = ArraySplitter::new(points);
    Runtime::new(&mut splitter, store)
        .run(
            AssignMapper {
                centroids: centroids.to_vec(),
            },
            bounded(2),
        )
        .unwrap();

    for (cluster, contrib) in store.iter_mut() {
        if contrib.count > 0 {
            let n = contrib.count as f64;
            centroids[*cluster as usize] = [contrib.sum[0] / n, contrib.sum[1] / n];
        }
        *contrib = Contribution::default();
    }
}

fn assert_close(a: &Point, b: &Point) {
    assert!(
        (a[0] - b[0]).abs() < 1e-9 && (a[1] - b[1]).abs() < 1e-9,
        "{a:?} != {b:?}"
    );
}

#[test]
fn one_iteration_updates_both_centroids() {
    let mut store = ShardedMap::new(2, AdditiveCombiner, IntPartition);
    // Pre-seed every cluster so empty clusters still have a slot to read.
    for cluster in 0..2u64 {
        store.insert(cluster, Contribution::default());
    }
    let mut centroids = vec![[0.0, 0.0], [10.0, 10.0]];
    lloyd_round(&mut store, &POINTS, &mut centroids);

    assert_close(&centroids[0], &[1.0 / 3.0, 1.0 / 3.0]);
    assert_close(&centroids[1], &[31.0 / 3.0, 31.0 / 3.0]);
}

#[test]
fn iterates_to_convergence_over_one_store() {
    let mut store = ShardedMap::new(2, AdditiveCombiner, IntPartition);
    for cluster in 0..2u64 {
        store.insert(cluster, Contribution::default());
    }
    let mut centroids = vec![[0.0, 0.0], [10.0, 10.0]];

    let mut stabilized = false;
    let mut rounds = 0;
    while !stabilized && rounds < 10 {
        let previous = centroids.clone();
        lloyd_round(&mut store, &POINTS, &mut centroids);
        stabilized = centroids
            .iter()
            .zip(&previous)
            .all(|(a, b)| sq_dist(a, b) < 1e-18);
        rounds += 1;
    }

    assert!(stabilized, "did not stabilize in {rounds} rounds");
    assert_close(&centroids[0], &[1.0 / 3.0, 1.0 / 3.0]);
    assert_close(&centroids[1], &[31.0 / 3.0, 31.0 / 3.0]);
}

#[test]
fn empty_cluster_keeps_its_seeded_slot() {
    // A centroid far from every point receives no contributions; the
    // seeded slot survives the run untouched.
    let mut store = ShardedMap::new(2, AdditiveCombiner, IntPartition);
    for cluster in 0..3u64 {
        store.insert(cluster, Contribution::default());
    }
    let mut centroids = vec![[0.0, 0.0], [10.0, 10.0], [1000.0, 1000.0]];
    let before = centroids[2];
    lloyd_round(&mut store, &POINTS, &mut centroids);

    assert_eq!(store.len(), 3);
    assert_eq!(centroids[2], before);
}
