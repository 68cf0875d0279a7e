// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{cluster::Cluster, optimizer::Optimizer, seeder::Seeder};
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

// Data items per parallel assignment task
const ASSIGN_CHUNK: usize = 1_000;

// Clusters per parallel update task
const UPDATE_CHUNK: usize = 2;

/// Parallel flat k-means clusterer: seed, then alternate assignment and
/// centroid update until the assignment stabilizes or the iteration cap is
/// reached.
///
/// Both phases are parallel; the assignment phase writes only the private
/// slice of the assignment array owned by each task, and the update phase
/// gives each task exclusive clusters.
pub struct KMeans<O, S> {
    optimizer: O,
    seeder: S,

    k: usize,

    /// `None` runs to convergence, `Some(0)` assigns once after seeding,
    /// `Some(n)` caps the rounds at n.
    max_iters: Option<u32>,

    enforce_cluster_count: bool,

    epsilon: Option<f64>,

    assignments: Vec<usize>,
    final_rmse: f64,
}

impl<O, S> KMeans<O, S> {
    /// Creates a clusterer targeting `k` clusters.
    pub fn new(k: usize, optimizer: O, seeder: S) -> Self {
        Self {
            optimizer,
            seeder,
            k,
            max_iters: Some(100),
            enforce_cluster_count: false,
            epsilon: None,
            assignments: Vec::new(),
            final_rmse: 0.0,
        }
    }

    /// Sets the iteration cap; `None` runs to convergence.
    #[must_use]
    pub fn max_iters(mut self, max_iters: Option<u32>) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Forces exactly `min(k, |data|)` non-empty output clusters by
    /// resplitting shuffled data when the run converges with empties.
    #[must_use]
    pub fn enforce_cluster_count(mut self, enforce: bool) -> Self {
        self.enforce_cluster_count = enforce;
        self
    }

    /// Enables the optional RMSE-delta early-out; assignment stability
    /// remains the canonical convergence criterion.
    #[must_use]
    pub fn epsilon(mut self, epsilon: Option<f64>) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// The target cluster count k.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// The cluster index assigned to each data item of the last run.
    ///
    /// Indices refer to the seeded cluster sequence; with
    /// [`KMeans::enforce_cluster_count`] every one of those clusters is
    /// returned, otherwise empty ones are dropped from the result.
    #[must_use]
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    /// Root-mean-square distance of every item to its final centroid, from
    /// the last run.
    #[must_use]
    pub fn rmse(&self) -> f64 {
        self.final_rmse
    }

    /// Clusters `data` into (at most) k groups.
    ///
    /// Returns the non-empty clusters; the centroids are owned by the
    /// returned [`Cluster`]s and the member lists borrow `data`.
    pub fn cluster<'a, V>(&mut self, data: &[&'a V]) -> Vec<Cluster<'a, V>>
    where
        V: Clone + Send + Sync,
        O: Optimizer<V> + Sync,
        S: Seeder<V>,
    {
        self.assignments.clear();
        self.assignments.resize(data.len(), 0);
        self.final_rmse = 0.0;

        let centroids = self.seeder.seed(data, self.k);
        if centroids.is_empty() {
            return Vec::new();
        }

        let mut clusters: Vec<Cluster<'a, V>> = centroids.into_iter().map(Cluster::new).collect();

        // First round: assign, then update unless this is an assign-only run
        self.assign(data, &mut clusters);

        if self.max_iters != Some(0) {
            self.update(&mut clusters);

            if self.max_iters != Some(1) {
                self.iterate(data, &mut clusters);
            }
        }

        self.finalize(data, clusters)
    }

    fn iterate<'a, V>(&mut self, data: &[&'a V], clusters: &mut Vec<Cluster<'a, V>>)
    where
        V: Clone + Send + Sync,
        O: Optimizer<V> + Sync,
        S: Seeder<V>,
    {
        let mut iterations = 1u32;
        let mut last_rmse = f64::INFINITY;

        loop {
            let (changed, sse) = self.assign(data, clusters);
            self.update(clusters);
            iterations += 1;

            if !changed {
                log::trace!("k-means converged after {iterations} iterations");
                break;
            }

            if let Some(max_iters) = self.max_iters {
                if iterations >= max_iters {
                    log::trace!("k-means hit the iteration cap ({max_iters})");
                    break;
                }
            }

            if let Some(epsilon) = self.epsilon {
                let rmse = mean_root(sse, data.len());

                if (last_rmse - rmse).abs() < epsilon {
                    log::trace!("k-means RMSE settled after {iterations} iterations");
                    break;
                }

                last_rmse = rmse;
            }
        }
    }

    /// Assignment phase: nearest centroid per item in parallel, then a
    /// serial regroup pass so the per-cluster member lists stay race-free.
    fn assign<'a, V>(&mut self, data: &[&'a V], clusters: &mut Vec<Cluster<'a, V>>) -> (bool, f64)
    where
        V: Send + Sync,
        O: Optimizer<V> + Sync,
    {
        let changed = AtomicBool::new(false);
        let optimizer = &self.optimizer;
        let view: &[Cluster<'a, V>] = clusters;

        let sse: f64 = data
            .par_chunks(ASSIGN_CHUNK)
            .zip(self.assignments.par_chunks_mut(ASSIGN_CHUNK))
            .map(|(items, slots)| {
                let mut task_sse = 0.0;

                for (&item, slot) in items.iter().zip(slots) {
                    let nearest = optimizer.nearest_by(item, view, |c| c.centroid());

                    if nearest.index != *slot {
                        // monotonic; ordering is irrelevant
                        changed.store(true, Ordering::Relaxed);
                    }

                    *slot = nearest.index;
                    task_sse += nearest.distance * nearest.distance;
                }

                task_sse
            })
            .sum();

        self.regroup(data, clusters);

        (changed.into_inner(), sse)
    }

    /// Rebuilds the per-cluster member lists from the assignment array.
    fn regroup<'a, V>(&self, data: &[&'a V], clusters: &mut [Cluster<'a, V>]) {
        for cluster in clusters.iter_mut() {
            cluster.members.clear();
        }

        for (&item, &slot) in data.iter().zip(&self.assignments) {
            clusters
                .get_mut(slot)
                .expect("assignment within cluster range")
                .members
                .push(item);
        }
    }

    /// Update phase: recompute every non-empty cluster's centroid in
    /// parallel. Each centroid is exclusive to its task.
    fn update<V>(&self, clusters: &mut [Cluster<'_, V>])
    where
        V: Send + Sync,
        O: Optimizer<V> + Sync,
    {
        let optimizer = &self.optimizer;

        clusters.par_chunks_mut(UPDATE_CHUNK).for_each(|chunk| {
            for cluster in chunk {
                if !cluster.members.is_empty() {
                    let Cluster { centroid, members } = cluster;
                    optimizer.update_prototype(centroid, members, &[]);
                }
            }
        });
    }

    fn finalize<'a, V>(&mut self, data: &[&'a V], mut clusters: Vec<Cluster<'a, V>>) -> Vec<Cluster<'a, V>>
    where
        V: Clone + Send + Sync,
        O: Optimizer<V> + Sync,
        S: Seeder<V>,
    {
        if self.enforce_cluster_count && clusters.iter().any(Cluster::is_empty) {
            self.resplit(data, &mut clusters);
        } else if clusters.iter().any(Cluster::is_empty) {
            // Drop empty clusters, remapping the assignment array so it
            // keeps indexing the returned sequence
            let mut remap = vec![usize::MAX; clusters.len()];
            let mut kept = 0;

            for (old, cluster) in clusters.iter().enumerate() {
                if !cluster.is_empty() {
                    *remap.get_mut(old).expect("old index in range") = kept;
                    kept += 1;
                }
            }

            clusters.retain(|cluster| !cluster.is_empty());

            for slot in &mut self.assignments {
                *slot = *remap.get(*slot).expect("assignment within cluster range");
            }
        }

        let sse: f64 = data
            .iter()
            .zip(&self.assignments)
            .map(|(&item, &slot)| {
                let centroid = clusters
                    .get(slot)
                    .expect("assignment within cluster range")
                    .centroid();
                self.optimizer.squared_distance(item, centroid)
            })
            .sum();
        self.final_rmse = mean_root(sse, data.len());

        clusters
    }

    /// Convergence left empty clusters: shuffle the data uniformly, chunk
    /// it into one piece per cluster as a forced assignment, and run the
    /// update phase over that partition.
    fn resplit<'a, V>(&mut self, data: &[&'a V], clusters: &mut [Cluster<'a, V>])
    where
        V: Send + Sync,
        O: Optimizer<V> + Sync,
    {
        log::trace!(
            "k-means resplitting {} items into {} forced clusters",
            data.len(),
            clusters.len(),
        );

        let mut shuffled: Vec<usize> = (0..data.len()).collect();
        shuffled.shuffle(&mut rand::rng());

        for (position, item) in shuffled.into_iter().enumerate() {
            let slot = self
                .assignments
                .get_mut(item)
                .expect("shuffled index within data range");
            *slot = position * clusters.len() / data.len();
        }

        self.regroup(data, clusters);
        self.update(clusters);
    }
}

fn mean_root(sse: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        (sse / count as f64).sqrt()
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{optimizer::hamming_optimizer, seeder::RandomSeeder, BitVector};
    use test_log::test;

    fn tiny_data() -> Vec<BitVector> {
        [0u64, 0b1, u64::MAX, u64::MAX ^ 1]
            .iter()
            .map(|&b| BitVector::from_blocks(vec![b]))
            .collect()
    }

    #[test]
    fn kmeans_singletons_when_k_equals_data_len() {
        let data = tiny_data();
        let refs: Vec<&BitVector> = data.iter().collect();

        let mut kmeans = KMeans::new(4, hamming_optimizer(), RandomSeeder::with_seed(1))
            .max_iters(None)
            .enforce_cluster_count(true);

        let clusters = kmeans.cluster(&refs);

        assert_eq!(4, clusters.len());
        for cluster in &clusters {
            assert_eq!(1, cluster.len());
        }
        assert_eq!(0.0, kmeans.rmse());
    }

    #[test]
    fn kmeans_returns_fewer_clusters_when_k_exceeds_data() {
        let data = tiny_data();
        let refs: Vec<&BitVector> = data.iter().collect();

        let mut kmeans = KMeans::new(10, hamming_optimizer(), RandomSeeder::with_seed(2))
            .max_iters(None)
            .enforce_cluster_count(true);

        let clusters = kmeans.cluster(&refs);

        // the seeder cannot produce more centroids than data points
        assert_eq!(4, clusters.len());
    }

    #[test]
    fn kmeans_empty_input() {
        let refs: Vec<&BitVector> = Vec::new();

        let mut kmeans = KMeans::new(3, hamming_optimizer(), RandomSeeder::new());
        let clusters = kmeans.cluster(&refs);

        assert!(clusters.is_empty());
        assert_eq!(0.0, kmeans.rmse());
    }

    #[test]
    fn kmeans_assignments_match_nearest_centroid() {
        let data: Vec<BitVector> = (0..200u64)
            .map(|i| BitVector::from_blocks(vec![i.wrapping_mul(0x9E37_79B9_7F4A_7C15), !i]))
            .collect();
        let refs: Vec<&BitVector> = data.iter().collect();

        let mut kmeans =
            KMeans::new(4, hamming_optimizer(), RandomSeeder::with_seed(3)).max_iters(None);

        let clusters = kmeans.cluster(&refs);
        let optimizer = hamming_optimizer();

        assert_eq!(refs.len(), kmeans.assignments().len());

        for (&item, &slot) in refs.iter().zip(kmeans.assignments()) {
            let nearest = optimizer.nearest_by(item, &clusters, |c| c.centroid());
            let assigned = optimizer.distance(item, clusters[slot].centroid());

            // no better centroid exists
            assert!(assigned <= nearest.distance);
        }

        let total: usize = clusters.iter().map(Cluster::len).sum();
        assert_eq!(200, total);
    }

    #[test]
    fn kmeans_assign_only_keeps_seed_centroids() {
        let data = tiny_data();
        let refs: Vec<&BitVector> = data.iter().collect();

        let mut kmeans =
            KMeans::new(2, hamming_optimizer(), RandomSeeder::with_seed(4)).max_iters(Some(0));

        let clusters = kmeans.cluster(&refs);

        // seeds are copies of data points
        for cluster in &clusters {
            assert!(data.contains(cluster.centroid()));
        }
    }
}
