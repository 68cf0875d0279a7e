// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    distance::{Distance, Euclidean, Hamming},
    prototype::{MajorityBit, Mean, Prototype},
};

/// Decides whether a candidate distance beats the best one seen so far.
pub trait Comparator {
    /// Whether `current` beats `best`.
    fn improves(&self, current: f64, best: f64) -> bool;
}

/// Prefer smaller distances.
#[derive(Clone, Copy, Debug, Default)]
pub struct Minimize;

impl Comparator for Minimize {
    fn improves(&self, current: f64, best: f64) -> bool {
        current < best
    }
}

/// Prefer larger values (for similarity functions).
#[derive(Clone, Copy, Debug, Default)]
pub struct Maximize;

impl Comparator for Maximize {
    fn improves(&self, current: f64, best: f64) -> bool {
        current > best
    }
}

/// The result of a nearest-candidate scan.
#[derive(Debug)]
pub struct Nearest<'a, K> {
    /// The winning candidate.
    pub key: &'a K,

    /// Its index in the candidate sequence.
    pub index: usize,

    /// Its distance to the probe object.
    pub distance: f64,
}

/// Bundles a distance, a comparator and a prototype into the interface the
/// clusterers optimize against.
pub trait Optimizer<V> {
    /// Distance between two vectors.
    fn distance(&self, a: &V, b: &V) -> f64;

    /// Squared distance, for squared-error aggregation.
    fn squared_distance(&self, a: &V, b: &V) -> f64;

    /// Whether `current` beats `best`.
    fn improves(&self, current: f64, best: f64) -> bool;

    /// Overwrites `prototype` with the summary of `members`.
    fn update_prototype(&self, prototype: &mut V, members: &[&V], weights: &[u32]);

    /// Scans `candidates` for the entry whose key (extracted by `accessor`)
    /// optimizes the distance to `object`. Ties keep the first occurrence.
    ///
    /// # Panics
    ///
    /// Panics if `candidates` is empty.
    fn nearest_by<'a, K>(
        &self,
        object: &V,
        candidates: &'a [K],
        accessor: impl Fn(&K) -> &V,
    ) -> Nearest<'a, K> {
        let (first, rest) = candidates
            .split_first()
            .expect("nearest scan over no candidates");

        let mut nearest = Nearest {
            key: first,
            index: 0,
            distance: self.distance(object, accessor(first)),
        };

        for (index, candidate) in rest.iter().enumerate() {
            let distance = self.distance(object, accessor(candidate));

            if self.improves(distance, nearest.distance) {
                nearest = Nearest {
                    key: candidate,
                    index: index + 1,
                    distance,
                };
            }
        }

        nearest
    }

    /// Scans `candidates` for the one that optimizes the distance to
    /// `object`. Ties keep the first occurrence.
    ///
    /// # Panics
    ///
    /// Panics if `candidates` is empty.
    fn nearest<'a>(&self, object: &V, candidates: &'a [V]) -> Nearest<'a, V> {
        self.nearest_by(object, candidates, |key| key)
    }

    /// Sum of squared distances from `center` to every member.
    fn sum_squared_error(&self, center: &V, members: &[&V]) -> f64 {
        members
            .iter()
            .map(|member| self.squared_distance(center, member))
            .sum()
    }
}

/// An [`Optimizer`] composed from three function objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct FunctorOptimizer<D, C, P> {
    distance: D,
    comparator: C,
    prototype: P,
}

impl<D, C, P> FunctorOptimizer<D, C, P> {
    /// Composes an optimizer from its three parts.
    pub fn new(distance: D, comparator: C, prototype: P) -> Self {
        Self {
            distance,
            comparator,
            prototype,
        }
    }
}

impl<V, D: Distance<V>, C: Comparator, P: Prototype<V>> Optimizer<V>
    for FunctorOptimizer<D, C, P>
{
    fn distance(&self, a: &V, b: &V) -> f64 {
        self.distance.distance(a, b)
    }

    fn squared_distance(&self, a: &V, b: &V) -> f64 {
        self.distance.squared(a, b)
    }

    fn improves(&self, current: f64, best: f64) -> bool {
        self.comparator.improves(current, best)
    }

    fn update_prototype(&self, prototype: &mut V, members: &[&V], weights: &[u32]) {
        self.prototype.update(prototype, members, weights);
    }
}

/// The canonical optimizer for binary signatures: Hamming distance,
/// minimized, with the bitwise-majority prototype.
pub type HammingOptimizer = FunctorOptimizer<Hamming, Minimize, MajorityBit>;

/// Euclidean distance, minimized, with the arithmetic-mean prototype.
pub type EuclideanOptimizer = FunctorOptimizer<Euclidean, Minimize, Mean>;

/// Returns the canonical bit-vector optimizer.
#[must_use]
pub fn hamming_optimizer() -> HammingOptimizer {
    FunctorOptimizer::new(Hamming, Minimize, MajorityBit)
}
