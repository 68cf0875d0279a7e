// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::distance::Distance;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Produces an initial centroid set from data.
///
/// Centroids are freshly allocated copies of data points; ownership of the
/// returned vectors transfers to the caller. At most `data.len()` centroids
/// are produced, regardless of how many were requested.
pub trait Seeder<V> {
    /// Produces up to `count` initial centroids from `data`.
    fn seed(&mut self, data: &[&V], count: usize) -> Vec<V>;
}

/// Seeds with a uniform random sample of the data (without replacement).
#[derive(Clone, Debug)]
pub struct RandomSeeder {
    rng: StdRng,
}

impl Default for RandomSeeder {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSeeder {
    /// Creates a seeder with an OS-seeded RNG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Seeds the RNG for reproducible runs.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<V: Clone> Seeder<V> for RandomSeeder {
    fn seed(&mut self, data: &[&V], count: usize) -> Vec<V> {
        let count = count.min(data.len());

        rand::seq::index::sample(&mut self.rng, data.len(), count)
            .iter()
            .map(|i| (*data.get(i).expect("sampled index in range")).clone())
            .collect()
    }
}

/// D²-weighted seeding (the k-means++ strategy): the first center is chosen
/// uniformly, every further center with probability proportional to the
/// squared distance from the nearest already-chosen center.
#[derive(Clone, Debug)]
pub struct DSquaredSeeder<D> {
    distance: D,
    rng: StdRng,
}

impl<D> DSquaredSeeder<D> {
    /// Creates a seeder with an OS-seeded RNG.
    #[must_use]
    pub fn new(distance: D) -> Self {
        Self {
            distance,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Seeds the RNG for reproducible runs.
    #[must_use]
    pub fn with_seed(distance: D, seed: u64) -> Self {
        Self {
            distance,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn pick_weighted(&mut self, weights: &[f64], total: f64) -> usize {
        let mut remaining = self.rng.random::<f64>() * total;

        // Walk the weights; rounding can leave a residue past the last slot,
        // so the final index is the fallback.
        for (index, weight) in weights.iter().enumerate() {
            if remaining <= *weight {
                return index;
            }
            remaining -= weight;
        }

        weights.len().saturating_sub(1)
    }
}

impl<V: Clone, D: Distance<V>> Seeder<V> for DSquaredSeeder<D> {
    fn seed(&mut self, data: &[&V], count: usize) -> Vec<V> {
        if data.is_empty() || count == 0 {
            return Vec::new();
        }

        let count = count.min(data.len());
        let mut centroids = Vec::with_capacity(count);

        let first = self.rng.random_range(0..data.len());
        let first = *data.get(first).expect("index in range");
        centroids.push(first.clone());

        // Squared distance of every point to its nearest chosen center
        let mut closest: Vec<f64> = data
            .iter()
            .map(|point| self.distance.squared(point, first))
            .collect();
        let mut potential: f64 = closest.iter().sum();

        while centroids.len() < count {
            let chosen = self.pick_weighted(&closest, potential);
            let chosen = *data.get(chosen).expect("index in range");
            centroids.push(chosen.clone());

            potential = 0.0;
            for (point, slot) in data.iter().zip(&mut closest) {
                let d = self.distance.squared(point, chosen);
                if d < *slot {
                    *slot = d;
                }
                potential += *slot;
            }
        }

        centroids
    }
}
